//! egui overlay drawn on top of the deferred output.
//!
//! Couples `egui-winit` input translation with the `egui-wgpu` renderer.
//! The overlay records into the backend's in-flight frame encoder, so
//! [`EguiIntegration::render`] must run after the scene passes are recorded
//! and before the frame is presented.

use egui::ViewportId;
use egui_wgpu::ScreenDescriptor;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::backend::wgpu_backend::WgpuBackend;

/// Immediate mode GUI layered over the swapchain.
pub struct EguiIntegration {
    context: egui::Context,
    input_state: egui_winit::State,
    renderer: egui_wgpu::Renderer,
    /// Tessellated by [`Self::end_frame`], consumed by [`Self::render`].
    paint_jobs: Vec<egui::ClippedPrimitive>,
    textures_delta: egui::TexturesDelta,
}

impl EguiIntegration {
    pub fn new(backend: &WgpuBackend, window: &Window) -> Self {
        let context = egui::Context::default();

        let input_state = egui_winit::State::new(
            context.clone(),
            ViewportId::ROOT,
            window,
            Some(window.scale_factor() as f32),
            None,
        );

        let renderer =
            egui_wgpu::Renderer::new(backend.device(), backend.wgpu_surface_format(), None, 1);

        Self {
            context,
            input_state,
            renderer,
            paint_jobs: Vec::new(),
            textures_delta: egui::TexturesDelta::default(),
        }
    }

    /// Feed a winit event to egui. Returns true when egui consumed it, in
    /// which case camera input handling should skip the event.
    pub fn on_window_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        self.input_state.on_window_event(window, event).consumed
    }

    /// Start a GUI frame. Widget code runs against [`Self::context`] between
    /// this and [`Self::end_frame`].
    pub fn begin_frame(&mut self, window: &Window) {
        self.context
            .begin_frame(self.input_state.take_egui_input(window));
    }

    /// Finish the GUI frame and tessellate the widget output.
    pub fn end_frame(&mut self, window: &Window) {
        let egui::FullOutput {
            platform_output,
            textures_delta,
            shapes,
            pixels_per_point,
            ..
        } = self.context.end_frame();

        self.input_state.handle_platform_output(window, platform_output);
        self.paint_jobs = self.context.tessellate(shapes, pixels_per_point);
        // Appending keeps deltas alive across a frame whose render was
        // skipped (minimized window).
        self.textures_delta.append(textures_delta);
    }

    /// Draw the tessellated GUI onto the current swapchain image. Does
    /// nothing outside a frame.
    pub fn render(&mut self, backend: &mut WgpuBackend, screen_width: u32, screen_height: u32) {
        let Some(swapchain_view) = backend.current_swapchain_view() else {
            return;
        };

        let screen_descriptor = ScreenDescriptor {
            size_in_pixels: [screen_width, screen_height],
            pixels_per_point: self.context.pixels_per_point(),
        };

        let deltas = std::mem::take(&mut self.textures_delta);
        let (device, queue, encoder) = backend.device_queue_encoder();

        for (id, image_delta) in &deltas.set {
            self.renderer.update_texture(device, queue, *id, image_delta);
        }

        if let Some(encoder) = encoder {
            self.renderer
                .update_buffers(device, queue, encoder, &self.paint_jobs, &screen_descriptor);
        }

        backend.render_egui(
            &self.renderer,
            &self.paint_jobs,
            &screen_descriptor,
            swapchain_view,
        );

        // Freed ids may still be referenced by the pass just recorded, so
        // the frees run last.
        for id in &deltas.free {
            self.renderer.free_texture(id);
        }
    }

    pub fn context(&self) -> &egui::Context {
        &self.context
    }

    /// True while a text field or similar widget has keyboard focus.
    pub fn wants_keyboard_input(&self) -> bool {
        self.context.wants_keyboard_input()
    }

    /// True while the pointer hovers or drags a GUI element.
    pub fn wants_pointer_input(&self) -> bool {
        self.context.wants_pointer_input()
    }
}
