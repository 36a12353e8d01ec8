//! Windowed demo of the deferred renderer.
//!
//! Runs as a cargo example:
//!   cargo run --example deferred
//!   cargo run --example deferred -- --width 1920 --height 1080 --lights 64
//!
//! WASD moves the camera and Q/E fly down and up. Hold the right mouse
//! button to look around. F1 toggles the overlay windows, Escape quits.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use glam::Vec3;
use parking_lot::Mutex;
use winit::event::{DeviceEvent, ElementState, Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget};
use winit::keyboard::{KeyCode, PhysicalKey};

use deferred_engine::backend::wgpu_backend::WgpuBackend;
use deferred_engine::egui_integration::EguiIntegration;
use deferred_engine::engine::{DebugSource, DrawMode, ShadowFilter, ShadowResolution};
use deferred_engine::resources::{Material, Mesh, TextureData, TextureSlot};
use deferred_engine::scene::{
    generate_point_lights, CameraInput, PointLight, Scene, SceneObject, Transform,
};
use deferred_engine::window::{InputCollector, Window};
use deferred_engine::{Engine, EngineConfig};

/// Number of frame time samples kept for the plot.
const FRAME_HISTORY: usize = 120;

#[derive(Parser, Debug)]
#[command(name = "deferred", about = "Deferred renderer demo")]
struct Args {
    /// Window width in pixels
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Window height in pixels
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Disable vsync
    #[arg(long)]
    no_vsync: bool,

    /// Shadow map resolution (512, 1024, 2048, 4096 or 8192)
    #[arg(long, default_value_t = 4096)]
    shadow_resolution: u32,

    /// Number of seeded point lights in the atrium scene
    #[arg(long, default_value_t = 32)]
    lights: u32,
}

/// A log record captured for the overlay console.
struct LogLine {
    level: log::Level,
    message: String,
}

/// Forwards records to env_logger and mirrors them into the overlay console.
struct UiLogger {
    stderr: env_logger::Logger,
    lines: Arc<Mutex<Vec<LogLine>>>,
}

impl log::Log for UiLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.stderr.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.stderr.enabled(record.metadata()) {
            self.stderr.log(record);
            self.lines.lock().push(LogLine {
                level: record.level(),
                message: format!("{}: {}", record.target(), record.args()),
            });
        }
    }

    fn flush(&self) {
        self.stderr.flush();
    }
}

/// Install the mirroring logger. RUST_LOG filtering applies to both sinks.
fn install_logger() -> Arc<Mutex<Vec<LogLine>>> {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let stderr = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .build();
    let max_level = stderr.filter();
    let logger = UiLogger {
        stderr,
        lines: Arc::clone(&lines),
    };
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(max_level);
    }
    lines
}

fn level_color(level: log::Level) -> egui::Color32 {
    match level {
        log::Level::Error => egui::Color32::LIGHT_RED,
        log::Level::Warn => egui::Color32::YELLOW,
        log::Level::Info => egui::Color32::LIGHT_GRAY,
        _ => egui::Color32::DARK_GRAY,
    }
}

/// Overlay state: frame statistics and the captured log.
struct Hud {
    visible: bool,
    /// Frame times in milliseconds, newest last.
    frame_history: VecDeque<f32>,
    fps: f32,
    log_lines: Arc<Mutex<Vec<LogLine>>>,
}

impl Hud {
    fn new(log_lines: Arc<Mutex<Vec<LogLine>>>) -> Self {
        Self {
            visible: true,
            frame_history: VecDeque::with_capacity(FRAME_HISTORY),
            fps: 0.0,
            log_lines,
        }
    }

    fn push_frame_time(&mut self, dt: f32) {
        if self.frame_history.len() >= FRAME_HISTORY {
            self.frame_history.pop_front();
        }
        self.frame_history.push_back(dt * 1000.0);

        let sum: f32 = self.frame_history.iter().sum();
        if sum > 0.0 {
            self.fps = 1000.0 * self.frame_history.len() as f32 / sum;
        }
    }

    fn show(&self, ctx: &egui::Context, engine: &mut Engine<WgpuBackend>) {
        self.show_performance(ctx, engine);
        self.show_settings(ctx, engine);
        self.show_log(ctx);
    }

    fn show_performance(&self, ctx: &egui::Context, engine: &Engine<WgpuBackend>) {
        let profiler_on = engine.profiler_enabled();
        let rows: Vec<(&'static str, f32)> = engine
            .timings()
            .rows
            .iter()
            .map(|row| (row.name, row.milliseconds))
            .collect();
        let scene_stats = engine
            .scene()
            .map(|scene| (scene.objects.len(), scene.point_lights.len(), scene.camera.position));

        egui::Window::new("Performance")
            .default_pos([10.0, 10.0])
            .default_size([240.0, 300.0])
            .show(ctx, |ui| {
                ui.label(format!("FPS: {:.1}", self.fps));
                frame_time_plot(ui, &self.frame_history);
                ui.separator();

                if profiler_on {
                    egui::Grid::new("pass_timings")
                        .num_columns(2)
                        .spacing([24.0, 4.0])
                        .striped(true)
                        .show(ui, |ui| {
                            for (name, milliseconds) in &rows {
                                ui.label(*name);
                                ui.label(format!("{milliseconds:.3} ms"));
                                ui.end_row();
                            }
                        });
                } else {
                    ui.label("GPU timestamps unavailable on this adapter");
                }

                if let Some((objects, lights, position)) = scene_stats {
                    ui.separator();
                    ui.label(format!("Objects: {objects}   Lights: {lights}"));
                    ui.label(format!(
                        "Camera: ({:.1}, {:.1}, {:.1})",
                        position.x, position.y, position.z
                    ));
                }
            });
    }

    fn show_settings(&self, ctx: &egui::Context, engine: &mut Engine<WgpuBackend>) {
        let mut settings = *engine.settings();
        let mut vsync = engine.vsync();
        let mut selected_scene = engine.active_scene_index();
        let scene_names: Vec<String> = engine
            .scenes()
            .iter()
            .map(|scene| scene.name.clone())
            .collect();
        let mut reset_camera = false;
        let mut reset_models = false;

        egui::Window::new("Settings")
            .default_pos([10.0, 330.0])
            .default_size([260.0, 480.0])
            .show(ctx, |ui| {
                egui::ComboBox::from_label("Draw mode")
                    .selected_text(settings.draw_mode.label())
                    .show_ui(ui, |ui| {
                        for mode in DrawMode::ALL {
                            ui.selectable_value(&mut settings.draw_mode, mode, mode.label());
                        }
                    });
                ui.separator();

                ui.checkbox(&mut settings.point_lights, "Point lights");
                ui.checkbox(&mut settings.skybox, "Skybox");
                ui.checkbox(&mut settings.gizmos, "Gizmos");
                ui.separator();

                ui.checkbox(&mut settings.ssao, "SSAO");
                ui.checkbox(&mut settings.ssao_blur, "SSAO blur");
                ui.add(egui::Slider::new(&mut settings.ssao_radius, 0.5..=10.0).text("SSAO radius"));
                ui.add(egui::Slider::new(&mut settings.ssao_bias, 0.0..=0.2).text("SSAO bias"));
                ui.separator();

                ui.checkbox(&mut settings.shadows, "Shadows");
                egui::ComboBox::from_label("Shadow filter")
                    .selected_text(settings.shadow_filter.label())
                    .show_ui(ui, |ui| {
                        for filter in ShadowFilter::ALL {
                            ui.selectable_value(&mut settings.shadow_filter, filter, filter.label());
                        }
                    });
                egui::ComboBox::from_label("Shadow resolution")
                    .selected_text(settings.shadow_resolution.label())
                    .show_ui(ui, |ui| {
                        for resolution in ShadowResolution::ALL {
                            ui.selectable_value(
                                &mut settings.shadow_resolution,
                                resolution,
                                resolution.label(),
                            );
                        }
                    });
                ui.separator();

                ui.add(egui::Slider::new(&mut settings.lighting.ambient, 0.0..=1.0).text("Ambient"));
                ui.add(egui::Slider::new(&mut settings.lighting.diffuse, 0.0..=3.0).text("Diffuse"));
                ui.add(
                    egui::Slider::new(&mut settings.lighting.specular, 0.0..=3.0).text("Specular"),
                );
                ui.add(
                    egui::Slider::new(&mut settings.lighting.shininess, 1.0..=128.0)
                        .text("Shininess"),
                );
                ui.separator();

                ui.checkbox(&mut settings.texture_visualization, "Texture visualization");
                egui::ComboBox::from_label("Source")
                    .selected_text(settings.visualized_source.label())
                    .show_ui(ui, |ui| {
                        for source in DebugSource::ALL {
                            ui.selectable_value(
                                &mut settings.visualized_source,
                                source,
                                source.label(),
                            );
                        }
                    });
                ui.separator();

                ui.checkbox(&mut vsync, "V-Sync");
                egui::ComboBox::from_label("Scene")
                    .selected_text(scene_names.get(selected_scene).map(String::as_str).unwrap_or(""))
                    .show_ui(ui, |ui| {
                        for (index, name) in scene_names.iter().enumerate() {
                            ui.selectable_value(&mut selected_scene, index, name);
                        }
                    });
                ui.horizontal(|ui| {
                    if ui.button("Reset camera").clicked() {
                        reset_camera = true;
                    }
                    if ui.button("Reset models").clicked() {
                        reset_models = true;
                    }
                });
            });

        *engine.settings_mut() = settings;
        engine.set_vsync(vsync);
        if selected_scene != engine.active_scene_index() {
            if let Err(err) = engine.select_scene(selected_scene) {
                log::warn!("scene switch rejected: {err}");
            }
        }
        if reset_camera {
            engine.reset_camera();
        }
        if reset_models {
            engine.reset_models();
        }
    }

    fn show_log(&self, ctx: &egui::Context) {
        let lines = Arc::clone(&self.log_lines);

        egui::Window::new("Log")
            .default_pos([290.0, 10.0])
            .default_size([420.0, 180.0])
            .show(ctx, |ui| {
                let mut lines = lines.lock();
                ui.horizontal(|ui| {
                    ui.label(format!("{} entries", lines.len()));
                    if ui.button("Clear").clicked() {
                        lines.clear();
                    }
                });
                ui.separator();
                egui::ScrollArea::vertical()
                    .auto_shrink([false, false])
                    .stick_to_bottom(true)
                    .show(ui, |ui| {
                        for line in lines.iter() {
                            ui.colored_label(level_color(line.level), &line.message);
                        }
                    });
            });
    }
}

/// Paint the frame time history as a filled-background line graph.
fn frame_time_plot(ui: &mut egui::Ui, history: &VecDeque<f32>) {
    let width = ui.available_width().max(180.0);
    let (rect, _) = ui.allocate_exact_size(egui::vec2(width, 48.0), egui::Sense::hover());
    let painter = ui.painter_at(rect);
    painter.rect_filled(rect, 2.0, egui::Color32::from_gray(24));

    if history.len() < 2 {
        return;
    }

    // Scale so a vsynced trace sits around two thirds of the height.
    let max_ms = history.iter().copied().fold(25.0_f32, f32::max);
    let last = history.len() - 1;
    let points: Vec<egui::Pos2> = history
        .iter()
        .enumerate()
        .map(|(i, &ms)| {
            let x = rect.left() + rect.width() * i as f32 / last as f32;
            let y = rect.bottom() - rect.height() * (ms / max_ms).min(1.0);
            egui::pos2(x, y)
        })
        .collect();
    painter.add(egui::Shape::line(
        points,
        egui::Stroke::new(1.0, egui::Color32::LIGHT_GREEN),
    ));
}

struct App {
    window: Window,
    engine: Engine<WgpuBackend>,
    egui: EguiIntegration,
    collector: InputCollector,
    hud: Hud,
    last_frame: Instant,
}

impl App {
    fn handle_event(&mut self, event: Event<()>, elwt: &EventLoopWindowTarget<()>) {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => {
                let consumed = self.egui.on_window_event(self.window.winit(), &event);

                // Lifecycle events apply even while the GUI has focus.
                match &event {
                    WindowEvent::CloseRequested => elwt.exit(),
                    WindowEvent::Resized(size) => {
                        self.window.set_dimensions(size.width, size.height);
                        self.engine.resize(size.width, size.height);
                    }
                    WindowEvent::RedrawRequested => self.redraw(),
                    _ => {}
                }

                if !consumed {
                    self.handle_input(&event, elwt);
                }
            }
            Event::DeviceEvent {
                event: DeviceEvent::MouseMotion { delta },
                ..
            } => {
                if !self.egui.wants_pointer_input() {
                    self.collector.on_mouse_motion(delta);
                }
            }
            Event::AboutToWait => self.window.request_redraw(),
            _ => {}
        }
    }

    fn handle_input(&mut self, event: &WindowEvent, elwt: &EventLoopWindowTarget<()>) {
        if let WindowEvent::KeyboardInput { event: key, .. } = event {
            let pressed = key.state == ElementState::Pressed;
            if let PhysicalKey::Code(code) = key.physical_key {
                match code {
                    KeyCode::Escape => {
                        elwt.exit();
                        return;
                    }
                    KeyCode::F1 if pressed && !key.repeat => {
                        self.hud.visible = !self.hud.visible;
                        log::info!(
                            "overlay {}",
                            if self.hud.visible { "shown" } else { "hidden" }
                        );
                        return;
                    }
                    _ => {}
                }
            }
        }
        self.collector.on_window_event(self.window.winit(), event);
    }

    fn redraw(&mut self) {
        let now = Instant::now();
        let dt = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.hud.push_frame_time(dt);

        self.egui.begin_frame(self.window.winit());
        if self.hud.visible {
            let ctx = self.egui.context().clone();
            self.hud.show(&ctx, &mut self.engine);
        }
        self.egui.end_frame(self.window.winit());

        // Camera input is withheld while a GUI widget has keyboard focus.
        let input = if self.egui.wants_keyboard_input() {
            CameraInput::new()
        } else {
            self.collector.input().clone()
        };
        self.collector.end_frame();

        if let Err(err) = self.engine.render_frame(&input, dt) {
            log::error!("frame aborted: {err}");
            return;
        }

        let (width, height) = self.window.dimensions();
        self.egui.render(self.engine.backend_mut(), width, height);

        if let Err(err) = self.engine.end_frame() {
            log::error!("present failed: {err}");
        }
    }
}

fn main() {
    let args = Args::parse();
    let log_lines = install_logger();

    let shadow_resolution = ShadowResolution::ALL
        .into_iter()
        .find(|resolution| resolution.size() == args.shadow_resolution)
        .unwrap_or_else(|| {
            eprintln!(
                "unsupported shadow resolution {}, using {}",
                args.shadow_resolution,
                ShadowResolution::default().size()
            );
            ShadowResolution::default()
        });

    let config = EngineConfig {
        title: "Deferred Renderer".to_string(),
        width: args.width,
        height: args.height,
        vsync: !args.no_vsync,
        shadow_resolution,
        light_count: args.lights,
    };

    println!("Deferred renderer demo");
    println!("  WASD       - Move camera");
    println!("  Q/E        - Move down/up");
    println!("  Right Mouse - Look around");
    println!("  F1         - Toggle overlay");
    println!("  Escape     - Exit");
    println!();

    let event_loop = EventLoop::new().expect("Failed to create event loop");
    let window = Window::new(&event_loop, &config.title, config.width, config.height)
        .expect("Failed to create window");

    let backend = match WgpuBackend::new(window.share(), config.vsync) {
        Ok(backend) => backend,
        Err(err) => {
            eprintln!("Graphics device initialization failed: {err}");
            return;
        }
    };

    let mut engine = match Engine::new(&config, backend) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("Engine initialization failed: {err}");
            return;
        }
    };

    register_scenes(&mut engine, config.light_count);
    log::info!("{} scenes registered", engine.scenes().len());

    let egui = EguiIntegration::new(engine.backend(), window.winit());

    let mut app = App {
        window,
        engine,
        egui,
        collector: InputCollector::new(),
        hud: Hud::new(log_lines),
        last_frame: Instant::now(),
    };

    event_loop
        .run(move |event, elwt: &EventLoopWindowTarget<()>| app.handle_event(event, elwt))
        .expect("Event loop failed");
}

struct MeshIds {
    cube: usize,
    sphere: usize,
    hall_floor: usize,
    yard_floor: usize,
}

struct MaterialIds {
    checker: usize,
    stone: usize,
    brass: usize,
    slate: usize,
    porcelain: usize,
}

fn register_scenes(engine: &mut Engine<WgpuBackend>, light_count: u32) {
    let meshes = MeshIds {
        cube: engine.add_mesh(Mesh::cube()),
        sphere: engine.add_mesh(Mesh::uv_sphere(32, 16)),
        hall_floor: engine.add_mesh(Mesh::plane(280.0, 120.0, 14)),
        yard_floor: engine.add_mesh(Mesh::plane(60.0, 60.0, 6)),
    };

    let materials = MaterialIds {
        checker: engine.add_material(
            Material::new("checker floor")
                .with_diffuse_color(Vec3::splat(0.9))
                .with_texture(
                    TextureSlot::Diffuse,
                    TextureData::checkerboard(128, 16, [205, 205, 205, 255], [40, 40, 48, 255]),
                ),
        ),
        stone: engine
            .add_material(Material::solid("stone", Vec3::new(0.55, 0.52, 0.48)).with_shininess(8.0)),
        brass: engine.add_material(
            Material::solid("brass", Vec3::new(0.71, 0.51, 0.16))
                .with_specular_color(Vec3::new(0.9, 0.8, 0.5))
                .with_shininess(64.0),
        ),
        slate: engine
            .add_material(Material::solid("slate", Vec3::new(0.25, 0.28, 0.33)).with_shininess(16.0)),
        porcelain: engine.add_material(
            Material::solid("porcelain", Vec3::new(0.85, 0.87, 0.9))
                .with_specular_color(Vec3::splat(0.8))
                .with_shininess(96.0),
        ),
    };

    engine.add_scene(atrium_scene(&meshes, &materials, light_count));
    engine.add_scene(carousel_scene(&meshes, &materials));
    engine.add_scene(sphere_grid_scene(&meshes, &materials));
}

/// Hall sized scene matching the volume the seeded lights are spread over.
fn atrium_scene(meshes: &MeshIds, materials: &MaterialIds, light_count: u32) -> Scene {
    let mut scene = Scene::new("Atrium");
    scene.camera.position = Vec3::new(-70.0, 10.0, -30.0);
    scene.camera.look_at(Vec3::new(20.0, 0.0, 5.0));

    scene.add_object(
        SceneObject::new(meshes.hall_floor, materials.checker)
            .with_position(Vec3::new(14.0, -8.0, 2.0)),
    );

    // Two colonnades along the long axis.
    for i in 0..10 {
        let x = -100.0 + i as f32 * 26.0;
        for z in [-42.0, 46.0] {
            scene.add_object(SceneObject::new(meshes.cube, materials.stone).with_transform(
                Transform::from_position_scale(Vec3::new(x, 7.0, z), Vec3::new(3.0, 15.0, 3.0)),
            ));
        }
    }

    // Slowly turning centerpiece.
    scene.add_object(
        SceneObject::new(meshes.cube, materials.brass)
            .with_position(Vec3::new(14.0, -1.0, 2.0))
            .with_scale(Vec3::splat(6.0))
            .with_spin(Vec3::new(0.4, 0.2, 0.0)),
    );

    for (x, z, radius) in [(-40.0, -15.0, 4.0), (60.0, 25.0, 5.0), (100.0, -20.0, 3.0)] {
        scene.add_object(
            SceneObject::new(meshes.sphere, materials.porcelain)
                .with_position(Vec3::new(x, -8.0 + radius, z))
                .with_scale(Vec3::splat(radius)),
        );
    }

    scene.point_lights = generate_point_lights(light_count, 42);
    scene
}

fn carousel_scene(meshes: &MeshIds, materials: &MaterialIds) -> Scene {
    let mut scene = Scene::new("Carousel");
    scene.camera.position = Vec3::new(0.0, 8.0, -26.0);
    scene.camera.look_at(Vec3::ZERO);

    scene.add_object(
        SceneObject::new(meshes.yard_floor, materials.slate).with_position(Vec3::new(0.0, -4.0, 0.0)),
    );
    scene.add_object(
        SceneObject::new(meshes.sphere, materials.brass)
            .with_position(Vec3::new(0.0, 0.0, 0.0))
            .with_scale(Vec3::splat(3.0))
            .with_spin(Vec3::new(0.3, 0.0, 0.0)),
    );

    for i in 0..8 {
        let angle = i as f32 / 8.0 * std::f32::consts::TAU;
        let position = Vec3::new(angle.cos() * 12.0, 0.0, angle.sin() * 12.0);
        scene.add_object(
            SceneObject::new(meshes.cube, materials.porcelain)
                .with_position(position)
                .with_scale(Vec3::splat(1.5))
                .with_spin(Vec3::new(0.8, 0.5 + i as f32 * 0.1, 0.0)),
        );

        let color = Vec3::new(
            (i as f32 * 0.9).sin().abs(),
            (i as f32 * 0.6 + 1.0).sin().abs(),
            (i as f32 * 0.4 + 2.0).sin().abs(),
        );
        scene.point_lights.push(PointLight::new(
            Vec3::new(angle.cos() * 16.0, 3.0, angle.sin() * 16.0),
            color,
            Vec3::splat(14.0),
        ));
    }

    scene
}

fn sphere_grid_scene(meshes: &MeshIds, materials: &MaterialIds) -> Scene {
    let mut scene = Scene::new("Sphere grid");
    scene.camera.position = Vec3::new(-18.0, 14.0, -22.0);
    scene.camera.look_at(Vec3::new(0.0, -2.0, 0.0));

    scene.add_object(
        SceneObject::new(meshes.yard_floor, materials.checker)
            .with_position(Vec3::new(0.0, -4.0, 0.0)),
    );

    let palette = [materials.stone, materials.brass, materials.slate, materials.porcelain];
    for row in 0..5 {
        for column in 0..5 {
            let material = palette[(row * 5 + column) % palette.len()];
            scene.add_object(
                SceneObject::new(meshes.sphere, material)
                    .with_position(Vec3::new(
                        -10.0 + column as f32 * 5.0,
                        -2.5,
                        -10.0 + row as f32 * 5.0,
                    ))
                    .with_scale(Vec3::splat(1.5)),
            );
        }
    }

    scene.point_lights.push(PointLight::new(
        Vec3::new(0.0, 6.0, 0.0),
        Vec3::new(1.0, 0.9, 0.7),
        Vec3::splat(24.0),
    ));
    scene
}
