//! Engine core: runtime settings, shared GPU state and the frame loop.
//!
//! [`Engine`] owns the backend, the compiled render graph and every
//! registered scene. Passes read from [`RenderState`] and [`RenderSettings`]
//! through the frame parameters; both are refreshed at the start of each
//! frame, so settings edits made between frames take effect on the next
//! `render_frame` call.

use glam::{Quat, Vec3};
use thiserror::Error;

use crate::backend::{
    AddressMode, BackendError, BackendResult, BindGroupEntry, BindGroupHandle,
    BindGroupLayoutEntry, BindGroupLayoutHandle, BindingType, BufferDescriptor, BufferHandle,
    BufferUsage, CameraUniform, CompareFunction, GraphicsBackend, SamplerDescriptor,
    SamplerHandle, ShaderStageFlags, TextureSampleType,
};
use crate::pipeline::{build_deferred_graph, DeferredResources};
use crate::profiling::{FrameTimings, GpuProfiler, MeasurementError};
use crate::render_graph::{
    CompiledGraph, FrameParams, RenderGraph, RenderGraphExecutor, TextureSize,
};
use crate::resources::{GpuMesh, Material, MaterialDefaults, Mesh, Model, TextureSlot};
use crate::scene::{
    Camera, CameraController, CameraInput, FreeFlyController, LightsUniform, PointLight, Scene,
    ShadowFitter,
};
use crate::EngineConfig;

/// Sphere scale used for point light gizmo markers.
const GIZMO_MARKER_SCALE: f32 = 2.0;

/// What the lighting combine writes to the swapchain.
///
/// Discriminants are uploaded as-is to the combine shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DrawMode {
    Shaded = 0,
    Albedo = 1,
    Normals = 2,
    Specular = 3,
    AmbientOcclusion = 4,
    Depth = 5,
    ShadowMap = 6,
}

impl DrawMode {
    pub const ALL: [DrawMode; 7] = [
        DrawMode::Shaded,
        DrawMode::Albedo,
        DrawMode::Normals,
        DrawMode::Specular,
        DrawMode::AmbientOcclusion,
        DrawMode::Depth,
        DrawMode::ShadowMap,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DrawMode::Shaded => "Shaded",
            DrawMode::Albedo => "Albedo",
            DrawMode::Normals => "Normals",
            DrawMode::Specular => "Specular",
            DrawMode::AmbientOcclusion => "Ambient occlusion",
            DrawMode::Depth => "Depth",
            DrawMode::ShadowMap => "Shadow map",
        }
    }
}

impl Default for DrawMode {
    fn default() -> Self {
        DrawMode::Shaded
    }
}

/// Shadow map sampling mode used by the combine shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ShadowFilter {
    /// Single comparison tap, visible stair-stepping at the penumbra.
    Hard = 0,
    /// Percentage-closer filtering over the neighbouring texels.
    Pcf = 1,
}

impl ShadowFilter {
    pub const ALL: [ShadowFilter; 2] = [ShadowFilter::Hard, ShadowFilter::Pcf];

    pub fn label(self) -> &'static str {
        match self {
            ShadowFilter::Hard => "Hard",
            ShadowFilter::Pcf => "PCF",
        }
    }
}

impl Default for ShadowFilter {
    fn default() -> Self {
        ShadowFilter::Pcf
    }
}

/// Square shadow map sizes selectable at runtime.
///
/// Changing the resolution recreates only the shadow map; every other
/// target keeps its allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowResolution {
    R512,
    R1024,
    R2048,
    R4096,
    R8192,
}

impl ShadowResolution {
    pub const ALL: [ShadowResolution; 5] = [
        ShadowResolution::R512,
        ShadowResolution::R1024,
        ShadowResolution::R2048,
        ShadowResolution::R4096,
        ShadowResolution::R8192,
    ];

    /// Edge length in texels.
    pub const fn size(self) -> u32 {
        match self {
            ShadowResolution::R512 => 512,
            ShadowResolution::R1024 => 1024,
            ShadowResolution::R2048 => 2048,
            ShadowResolution::R4096 => 4096,
            ShadowResolution::R8192 => 8192,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ShadowResolution::R512 => "512",
            ShadowResolution::R1024 => "1024",
            ShadowResolution::R2048 => "2048",
            ShadowResolution::R4096 => "4096",
            ShadowResolution::R8192 => "8192",
        }
    }
}

impl Default for ShadowResolution {
    fn default() -> Self {
        ShadowResolution::R4096
    }
}

/// Intermediate targets selectable in the texture visualization overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DebugSource {
    GbufferDepth = 0,
    DirLightDepth = 1,
    PointLightDiffuse = 2,
    PointLightSpecular = 3,
    OcclusionMap = 4,
    OcclusionMapBlurred = 5,
}

impl DebugSource {
    pub const ALL: [DebugSource; 6] = [
        DebugSource::GbufferDepth,
        DebugSource::DirLightDepth,
        DebugSource::PointLightDiffuse,
        DebugSource::PointLightSpecular,
        DebugSource::OcclusionMap,
        DebugSource::OcclusionMapBlurred,
    ];

    pub fn label(self) -> &'static str {
        match self {
            DebugSource::GbufferDepth => "G-buffer depth",
            DebugSource::DirLightDepth => "Shadow map depth",
            DebugSource::PointLightDiffuse => "Light diffuse",
            DebugSource::PointLightSpecular => "Light specular",
            DebugSource::OcclusionMap => "SSAO",
            DebugSource::OcclusionMapBlurred => "SSAO blurred",
        }
    }
}

impl Default for DebugSource {
    fn default() -> Self {
        DebugSource::GbufferDepth
    }
}

/// Scalar factors applied to the lighting terms in the combine shader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightingScales {
    pub ambient: f32,
    pub diffuse: f32,
    pub specular: f32,
    pub shininess: f32,
}

impl Default for LightingScales {
    fn default() -> Self {
        Self {
            ambient: 0.3,
            diffuse: 1.0,
            specular: 1.0,
            shininess: 20.0,
        }
    }
}

/// Everything the user can toggle at runtime.
///
/// Plain data; passes read a shared reference during the frame and the
/// GUI mutates it between frames.
#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    pub draw_mode: DrawMode,
    /// Accumulate point light volumes into the light buffers.
    pub point_lights: bool,
    pub ssao: bool,
    /// Sample the blurred occlusion map instead of the raw one.
    pub ssao_blur: bool,
    /// Occlusion sampling radius in view space units.
    pub ssao_radius: f32,
    /// Depth offset that suppresses self-occlusion.
    pub ssao_bias: f32,
    pub shadows: bool,
    pub shadow_filter: ShadowFilter,
    pub shadow_resolution: ShadowResolution,
    pub skybox: bool,
    /// Draw the origin marker and point light markers.
    pub gizmos: bool,
    /// Blit an intermediate target over the frame.
    pub texture_visualization: bool,
    pub visualized_source: DebugSource,
    pub lighting: LightingScales,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            draw_mode: DrawMode::Shaded,
            point_lights: false,
            ssao: true,
            ssao_blur: false,
            ssao_radius: 3.0,
            ssao_bias: 0.025,
            shadows: true,
            shadow_filter: ShadowFilter::Pcf,
            shadow_resolution: ShadowResolution::default(),
            skybox: true,
            gizmos: false,
            texture_visualization: false,
            visualized_source: DebugSource::GbufferDepth,
            lighting: LightingScales::default(),
        }
    }
}

/// Camera data captured once per frame and shared by every pass.
#[derive(Debug, Clone, Copy)]
pub struct FrameUniforms {
    pub camera: CameraUniform,
    pub light_camera: CameraUniform,
}

impl Default for FrameUniforms {
    fn default() -> Self {
        let camera = Camera::default().uniform_data();
        Self {
            camera,
            light_camera: camera,
        }
    }
}

/// GPU objects shared by every pass: bind group layouts, the per-frame
/// uniform buffers with their bind groups, fallback material textures and
/// the unit meshes used for light volumes, markers and the skybox.
///
/// Created once at startup; only `models` changes afterwards, when the
/// active scene switches.
pub struct RenderState {
    pub camera_layout: BindGroupLayoutHandle,
    pub object_layout: BindGroupLayoutHandle,
    pub material_layout: BindGroupLayoutHandle,
    pub lights_layout: BindGroupLayoutHandle,

    pub camera_buffer: BufferHandle,
    pub light_camera_buffer: BufferHandle,
    pub lights_buffer: BufferHandle,
    pub gizmo_lights_buffer: BufferHandle,
    pub origin_marker_buffer: BufferHandle,

    pub camera_bind_group: BindGroupHandle,
    pub light_camera_bind_group: BindGroupHandle,
    pub lights_bind_group: BindGroupHandle,
    pub gizmo_lights_bind_group: BindGroupHandle,
    pub origin_marker_bind_group: BindGroupHandle,

    pub material_sampler: SamplerHandle,
    /// Comparison sampler for shadow map lookups.
    pub shadow_sampler: SamplerHandle,

    pub defaults: MaterialDefaults,
    /// Unit sphere drawn instanced for light volumes and gizmo markers.
    pub sphere: GpuMesh,
    /// Unit cube drawn for the skybox and the origin marker.
    pub cube: GpuMesh,

    /// GPU models for the active scene, index-aligned with its objects.
    pub models: Vec<Model>,
}

impl RenderState {
    /// Create the shared layouts, uniform buffers and unit meshes.
    pub fn create(backend: &mut dyn GraphicsBackend) -> BackendResult<Self> {
        let camera_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::VERTEX_FRAGMENT,
            ty: BindingType::UniformBuffer,
        }])?;
        let object_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::VERTEX,
            ty: BindingType::UniformBuffer,
        }])?;
        let lights_layout = backend.create_bind_group_layout(&[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStageFlags::VERTEX_FRAGMENT,
            ty: BindingType::UniformBuffer,
        }])?;

        // Constants, sampler, then one binding per texture slot.
        let mut material_entries = vec![
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::UniformBuffer,
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Sampler { comparison: false },
            },
        ];
        for slot in TextureSlot::ALL {
            material_entries.push(BindGroupLayoutEntry {
                binding: 2 + slot.index() as u32,
                visibility: ShaderStageFlags::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                },
            });
        }
        let material_layout = backend.create_bind_group_layout(&material_entries)?;

        let camera_size = std::mem::size_of::<CameraUniform>() as u64;
        let lights_size = std::mem::size_of::<LightsUniform>() as u64;
        let camera_buffer = uniform_buffer(backend, "camera uniforms", camera_size)?;
        let light_camera_buffer = uniform_buffer(backend, "light camera uniforms", camera_size)?;
        let lights_buffer = uniform_buffer(backend, "point light uniforms", lights_size)?;
        let gizmo_lights_buffer = uniform_buffer(backend, "gizmo marker uniforms", lights_size)?;

        // Static red marker at the world origin.
        let origin_uniform =
            LightsUniform::from_lights(&[PointLight::new(Vec3::ZERO, Vec3::X, Vec3::ONE)]);
        let origin_marker_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some("origin marker uniforms".to_string()),
                size: std::mem::size_of_val(&origin_uniform) as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                mapped_at_creation: false,
            },
            bytemuck::bytes_of(&origin_uniform),
        )?;

        let camera_bind_group = uniform_bind_group(backend, camera_layout, camera_buffer)?;
        let light_camera_bind_group =
            uniform_bind_group(backend, camera_layout, light_camera_buffer)?;
        let lights_bind_group = uniform_bind_group(backend, lights_layout, lights_buffer)?;
        let gizmo_lights_bind_group =
            uniform_bind_group(backend, lights_layout, gizmo_lights_buffer)?;
        let origin_marker_bind_group =
            uniform_bind_group(backend, lights_layout, origin_marker_buffer)?;

        let material_sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some("material sampler".to_string()),
            address_mode_u: AddressMode::Repeat,
            address_mode_v: AddressMode::Repeat,
            address_mode_w: AddressMode::Repeat,
            ..SamplerDescriptor::default()
        })?;
        let shadow_sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some("shadow comparison sampler".to_string()),
            compare: Some(CompareFunction::LessEqual),
            ..SamplerDescriptor::default()
        })?;

        let defaults = MaterialDefaults::create(backend)?;
        let sphere = GpuMesh::create(backend, &Mesh::uv_sphere(24, 16))?;
        let cube = GpuMesh::create(backend, &Mesh::cube())?;

        Ok(Self {
            camera_layout,
            object_layout,
            material_layout,
            lights_layout,
            camera_buffer,
            light_camera_buffer,
            lights_buffer,
            gizmo_lights_buffer,
            origin_marker_buffer,
            camera_bind_group,
            light_camera_bind_group,
            lights_bind_group,
            gizmo_lights_bind_group,
            origin_marker_bind_group,
            material_sampler,
            shadow_sampler,
            defaults,
            sphere,
            cube,
            models: Vec::new(),
        })
    }
}

fn uniform_buffer(
    backend: &mut dyn GraphicsBackend,
    label: &str,
    size: u64,
) -> BackendResult<BufferHandle> {
    backend.create_buffer(&BufferDescriptor {
        label: Some(label.to_string()),
        size,
        usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        mapped_at_creation: false,
    })
}

fn uniform_bind_group(
    backend: &mut dyn GraphicsBackend,
    layout: BindGroupLayoutHandle,
    buffer: BufferHandle,
) -> BackendResult<BindGroupHandle> {
    backend.create_bind_group(
        layout,
        &[(
            0,
            BindGroupEntry::Buffer {
                buffer,
                offset: 0,
                size: None,
            },
        )],
    )
}

/// Errors surfaced by the engine API.
///
/// Timing faults never abort rendering: a failed sample is dropped with a
/// warning and the frame completes normally.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("gpu resource failure: {0}")]
    ResourceCreation(#[from] BackendError),
    #[error("asset load failed: {0}")]
    AssetLoad(String),
    #[error("scene index {index} out of range, {count} scenes registered")]
    InvalidSceneIndex { index: usize, count: usize },
    #[error("timing measurement fault: {0}")]
    MeasurementFault(#[from] MeasurementError),
}

/// Owns the backend, the compiled render graph and all registered scenes,
/// and renders one frame at a time.
pub struct Engine<B: GraphicsBackend> {
    backend: B,
    graph: RenderGraph,
    compiled: CompiledGraph,
    executor: RenderGraphExecutor,
    resources: DeferredResources,
    profiler: GpuProfiler,

    state: RenderState,
    settings: RenderSettings,
    frame: FrameUniforms,
    shadow_fitter: ShadowFitter,
    controller: FreeFlyController,

    scenes: Vec<Scene>,
    active_scene: usize,
    /// Scene index the uploaded `state.models` belong to.
    loaded_scene: Option<usize>,

    meshes: Vec<Mesh>,
    materials: Vec<Material>,

    width: u32,
    height: u32,
    vsync: bool,
    /// Shadow map edge length currently applied to the graph.
    shadow_map_size: u32,
}

impl<B: GraphicsBackend> Engine<B> {
    /// Build the render graph and the shared GPU state against an already
    /// initialized backend.
    ///
    /// Scenes are registered afterwards with [`Engine::add_scene`]; their
    /// GPU data is uploaded lazily on the first frame that uses them.
    pub fn new(config: &EngineConfig, mut backend: B) -> Result<Self, EngineError> {
        let (width, height) = backend.surface_size();
        backend.set_vsync(config.vsync);

        let settings = RenderSettings {
            shadow_resolution: config.shadow_resolution,
            ..RenderSettings::default()
        };
        let shadow_map_size = settings.shadow_resolution.size();

        let (graph, resources) = build_deferred_graph(shadow_map_size);
        let compiled = graph.compile();
        let profiler = GpuProfiler::new(&mut backend)?;
        let state = RenderState::create(&mut backend)?;

        log::info!(
            "engine ready: {}x{} surface, {:?} swapchain, {} passes",
            width,
            height,
            backend.swapchain_format(),
            compiled.pass_order.len()
        );

        Ok(Self {
            backend,
            graph,
            compiled,
            executor: RenderGraphExecutor::new(),
            resources,
            profiler,
            state,
            settings,
            frame: FrameUniforms::default(),
            shadow_fitter: ShadowFitter::new(),
            controller: FreeFlyController::new(),
            scenes: Vec::new(),
            active_scene: 0,
            loaded_scene: None,
            meshes: Vec::new(),
            materials: Vec::new(),
            width,
            height,
            vsync: config.vsync,
            shadow_map_size,
        })
    }

    /// Register a mesh and return its id for scene objects.
    pub fn add_mesh(&mut self, mesh: Mesh) -> usize {
        self.meshes.push(mesh);
        self.meshes.len() - 1
    }

    /// Register a material and return its id for scene objects.
    pub fn add_material(&mut self, material: Material) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    /// Register a scene and return its index. The first registered scene
    /// becomes active.
    pub fn add_scene(&mut self, scene: Scene) -> usize {
        log::info!(
            "scene '{}' registered: {} objects, {} point lights",
            scene.name,
            scene.objects.len(),
            scene.point_lights.len()
        );
        self.scenes.push(scene);
        let index = self.scenes.len() - 1;
        if index == 0 {
            self.align_controller();
        }
        index
    }

    /// Switch the active scene. The previous scene stays registered; its
    /// GPU models are replaced at the start of the next frame.
    pub fn select_scene(&mut self, index: usize) -> Result<(), EngineError> {
        if index >= self.scenes.len() {
            return Err(EngineError::InvalidSceneIndex {
                index,
                count: self.scenes.len(),
            });
        }
        if index != self.active_scene {
            self.active_scene = index;
            self.align_controller();
            log::info!("scene {} '{}' selected", index, self.scenes[index].name);
        }
        Ok(())
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn active_scene_index(&self) -> usize {
        self.active_scene
    }

    pub fn scene(&self) -> Option<&Scene> {
        self.scenes.get(self.active_scene)
    }

    pub fn scene_mut(&mut self) -> Option<&mut Scene> {
        self.scenes.get_mut(self.active_scene)
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Mutable settings access for UIs. Every field takes effect on the
    /// next frame, including the shadow resolution.
    pub fn settings_mut(&mut self) -> &mut RenderSettings {
        &mut self.settings
    }

    /// Change the shadow map resolution. The map is reallocated at the
    /// start of the next frame; no other target is touched.
    pub fn set_shadow_resolution(&mut self, resolution: ShadowResolution) {
        self.settings.shadow_resolution = resolution;
    }

    pub fn set_vsync(&mut self, vsync: bool) {
        if vsync != self.vsync {
            self.vsync = vsync;
            self.backend.set_vsync(vsync);
        }
    }

    pub fn vsync(&self) -> bool {
        self.vsync
    }

    /// Current surface size in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Smoothed per-pass GPU timings from completed frames.
    pub fn timings(&self) -> &FrameTimings {
        self.profiler.timings()
    }

    pub fn profiler_enabled(&self) -> bool {
        self.profiler.enabled()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Move the camera back to the active scene's starting pose.
    pub fn reset_camera(&mut self) {
        if let Some(scene) = self.scenes.get_mut(self.active_scene) {
            self.controller.reset(&mut scene.camera);
        }
    }

    /// Clear accumulated spin so objects return to their authored pose.
    pub fn reset_models(&mut self) {
        if let Some(scene) = self.scenes.get_mut(self.active_scene) {
            for object in &mut scene.objects {
                if object.spin != Vec3::ZERO {
                    object.transform.rotation = Quat::IDENTITY;
                }
            }
        }
    }

    /// Resize the drawable surface.
    ///
    /// A zero dimension or an unchanged size is ignored. Otherwise every
    /// graph target is dropped here and reallocated together when the next
    /// frame starts, so passes never see a mix of old and new sizes.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || (width == self.width && height == self.height) {
            return;
        }
        self.backend.resize(width, height);
        let (width, height) = self.backend.surface_size();
        if width == self.width && height == self.height {
            // Clamped back to the current size.
            return;
        }
        log::debug!("surface resized to {width}x{height}");
        self.width = width;
        self.height = height;
        if let Some(scene) = self.scenes.get_mut(self.active_scene) {
            scene.camera.set_aspect(width, height);
        }
        self.executor.cleanup(&mut self.backend);
    }

    /// Update the active scene and record one frame of the render graph.
    ///
    /// Does not present; call [`Engine::end_frame`] afterwards, or use
    /// [`Engine::render`] when nothing else draws into the frame. With no
    /// scenes registered this is a no-op.
    pub fn render_frame(&mut self, input: &CameraInput, dt: f32) -> Result<(), EngineError> {
        if self.scenes.is_empty() {
            log::debug!("render_frame skipped, no scenes registered");
            return Ok(());
        }

        self.sync_shadow_resolution();
        self.sync_scene_models()?;

        let width = self.width;
        let height = self.height;

        // Advance the simulation before capturing uniforms.
        {
            let scene = &mut self.scenes[self.active_scene];
            scene.camera.set_aspect(width, height);
            self.controller.update(&mut scene.camera, input, dt);
            scene.update(dt);
        }

        let scene = &self.scenes[self.active_scene];
        let light_camera = self
            .shadow_fitter
            .fit(&scene.camera, &scene.directional_light)
            .uniform_data();
        self.frame = FrameUniforms {
            camera: scene.camera.uniform_data(),
            light_camera,
        };

        let backend = &mut self.backend;
        backend.write_buffer(
            self.state.camera_buffer,
            0,
            bytemuck::bytes_of(&self.frame.camera),
        );
        backend.write_buffer(
            self.state.light_camera_buffer,
            0,
            bytemuck::bytes_of(&self.frame.light_camera),
        );

        let lights = LightsUniform::from_lights(&scene.point_lights);
        backend.write_buffer(self.state.lights_buffer, 0, bytemuck::bytes_of(&lights));
        let markers = LightsUniform::markers(&scene.point_lights, GIZMO_MARKER_SCALE);
        backend.write_buffer(
            self.state.gizmo_lights_buffer,
            0,
            bytemuck::bytes_of(&markers),
        );

        for (model, object) in self.state.models.iter().zip(&scene.objects) {
            model.update_transform(backend, &object.transform);
        }

        let frame_context = backend.begin_frame()?;
        self.executor
            .set_external_view(self.resources.swapchain, frame_context.swapchain_view);
        self.executor
            .allocate_resources(&self.graph, backend, width, height)?;

        let pass_timestamps = self.profiler.pass_timestamps();
        let params = FrameParams {
            scene,
            state: &self.state,
            settings: &self.settings,
            frame: &self.frame,
            width,
            height,
            pass_timestamps: &pass_timestamps,
        };
        self.executor
            .execute(&mut self.graph, &self.compiled, backend, &params);

        // A lost sample only costs one profiler row update.
        if let Err(fault) = self.profiler.end_frame(backend) {
            log::warn!("frame timing sample dropped: {fault}");
        }
        Ok(())
    }

    /// Submit the recorded frame and present it.
    pub fn end_frame(&mut self) -> Result<(), EngineError> {
        self.backend.end_frame()?;
        Ok(())
    }

    /// Record and present in one call.
    ///
    /// Embedders that draw an overlay between scene rendering and present
    /// call [`Engine::render_frame`] and [`Engine::end_frame`] separately.
    pub fn render(&mut self, input: &CameraInput, dt: f32) -> Result<(), EngineError> {
        if self.scenes.is_empty() {
            return Ok(());
        }
        self.render_frame(input, dt)?;
        self.end_frame()
    }

    /// Point the fly controller at the active scene's camera pose.
    fn align_controller(&mut self) {
        let camera = &self.scenes[self.active_scene].camera;
        let forward = camera.forward();
        self.controller.yaw = forward.x.atan2(forward.z);
        self.controller.pitch = forward.y.clamp(-1.0, 1.0).asin();
        self.controller.start_position = camera.position;
    }

    /// Apply a pending shadow resolution change to the graph.
    fn sync_shadow_resolution(&mut self) {
        let size = self.settings.shadow_resolution.size();
        if size == self.shadow_map_size {
            return;
        }
        log::info!("shadow map resized to {size}x{size}");
        self.shadow_map_size = size;
        self.graph.set_texture_size(
            self.resources.shadow_map,
            TextureSize::Absolute {
                width: size,
                height: size,
            },
        );
        self.executor
            .invalidate_texture(&mut self.backend, self.resources.shadow_map);
    }

    /// Replace `state.models` when the active scene changed.
    fn sync_scene_models(&mut self) -> Result<(), EngineError> {
        if self.loaded_scene == Some(self.active_scene) {
            return Ok(());
        }
        for model in self.state.models.drain(..) {
            model.destroy(&mut self.backend);
        }
        self.loaded_scene = None;

        let scene = &self.scenes[self.active_scene];
        for object in &scene.objects {
            let mesh = self.meshes.get(object.mesh_id).ok_or_else(|| {
                EngineError::AssetLoad(format!(
                    "scene '{}' references unknown mesh id {}",
                    scene.name, object.mesh_id
                ))
            })?;
            let material = self.materials.get(object.material_id).ok_or_else(|| {
                EngineError::AssetLoad(format!(
                    "scene '{}' references unknown material id {}",
                    scene.name, object.material_id
                ))
            })?;
            let model = Model::create(
                &mut self.backend,
                mesh,
                material,
                &object.transform,
                self.state.object_layout,
                self.state.material_layout,
                self.state.material_sampler,
                &self.state.defaults,
            )?;
            self.state.models.push(model);
        }
        self.loaded_scene = Some(self.active_scene);
        log::debug!(
            "{} models uploaded for scene '{}'",
            self.state.models.len(),
            scene.name
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_backend::{RecordedCommand, TestBackend};
    use crate::backend::{LoadOp, TextureViewHandle};
    use crate::scene::{generate_point_lights, SceneObject};

    fn demo_scene(engine: &mut Engine<TestBackend>, lights: u32) -> usize {
        let plane = engine.add_mesh(Mesh::plane(60.0, 60.0, 1));
        let cube = engine.add_mesh(Mesh::cube());
        let gray = engine.add_material(Material::solid("gray", Vec3::splat(0.6)));
        let red = engine.add_material(Material::solid("red", Vec3::X));

        let mut scene = Scene::new("test scene");
        scene.add_object(SceneObject::new(plane, gray));
        scene.add_object(
            SceneObject::new(cube, red)
                .with_position(Vec3::new(0.0, 1.0, 0.0))
                .with_spin(Vec3::new(0.0, 0.6, 0.0)),
        );
        scene.point_lights = generate_point_lights(lights, 7);
        engine.add_scene(scene)
    }

    fn test_engine(width: u32, height: u32) -> Engine<TestBackend> {
        let config = EngineConfig::default();
        let mut engine = Engine::new(&config, TestBackend::new(width, height)).unwrap();
        demo_scene(&mut engine, 8);
        engine
    }

    #[test]
    fn test_default_settings_match_startup_state() {
        let settings = RenderSettings::default();
        assert_eq!(settings.draw_mode, DrawMode::Shaded);
        assert_eq!(settings.shadow_filter, ShadowFilter::Pcf);
        assert_eq!(settings.shadow_resolution.size(), 4096);
        assert!(settings.ssao);
        assert!(!settings.ssao_blur);
        assert!(settings.shadows);
        assert!(settings.skybox);
        assert!(!settings.point_lights);
        assert!(!settings.gizmos);
        assert!(!settings.texture_visualization);
        assert_eq!(settings.visualized_source, DebugSource::GbufferDepth);
    }

    #[test]
    fn test_shadow_resolution_sizes() {
        let sizes: Vec<u32> = ShadowResolution::ALL.iter().map(|r| r.size()).collect();
        assert_eq!(sizes, vec![512, 1024, 2048, 4096, 8192]);
    }

    #[test]
    fn test_render_without_scenes_is_ok() {
        let config = EngineConfig::default();
        let mut engine = Engine::new(&config, TestBackend::new(320, 200)).unwrap();
        engine.render(&CameraInput::default(), 0.016).unwrap();
        assert!(engine.backend().passes.is_empty());
    }

    #[test]
    fn test_hundred_frames_with_everything_enabled() {
        let mut engine = test_engine(1920, 1080);
        {
            let settings = engine.settings_mut();
            settings.point_lights = true;
            settings.ssao = true;
            settings.ssao_blur = true;
            settings.shadows = true;
            settings.skybox = true;
            settings.gizmos = true;
            settings.texture_visualization = true;
        }

        let input = CameraInput::default();
        for _ in 0..100 {
            engine.render(&input, 1.0 / 60.0).unwrap();
        }

        assert_eq!(engine.backend().passes_labeled("gbuffer_pass").len(), 100);
        assert_eq!(
            engine.backend().passes_labeled("texture_debug_pass").len(),
            100
        );
    }

    #[test]
    fn test_pass_order_follows_pipeline() {
        let mut engine = test_engine(640, 360);
        engine.settings_mut().texture_visualization = true;
        engine.render(&CameraInput::default(), 0.016).unwrap();

        let labels: Vec<&str> = engine
            .backend()
            .passes
            .iter()
            .map(|pass| pass.label())
            .collect();
        assert_eq!(
            labels,
            vec![
                "shadow_pass",
                "gbuffer_pass",
                "light_volume_pass",
                "ssao_pass",
                "ssao_blur_pass",
                "combine_pass",
                "forward_pass",
                "texture_debug_pass",
            ]
        );
    }

    #[test]
    fn test_no_pass_reads_its_own_attachments() {
        let mut engine = test_engine(800, 600);
        engine.settings_mut().texture_visualization = true;
        engine.settings_mut().point_lights = true;
        // Two frames so pass bind group caches are warm and stable.
        engine.render(&CameraInput::default(), 0.016).unwrap();
        engine.render(&CameraInput::default(), 0.016).unwrap();

        let backend = engine.backend();
        for pass in &backend.passes {
            let mut attachments: Vec<TextureViewHandle> = pass
                .descriptor
                .color_attachments
                .iter()
                .map(|attachment| attachment.view)
                .collect();
            if let Some(depth) = &pass.descriptor.depth_stencil_attachment {
                attachments.push(depth.view);
            }

            for command in &pass.commands {
                let RecordedCommand::SetBindGroup { bind_group, .. } = command else {
                    continue;
                };
                let Some(entries) = backend.bind_groups.get(&bind_group.0) else {
                    continue;
                };
                for (_, entry) in entries {
                    if let BindGroupEntry::Texture(view) = entry {
                        assert!(
                            !attachments.contains(view),
                            "pass {} samples one of its own attachments",
                            pass.label()
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_point_lights_disabled_skips_volume_draws() {
        let mut engine = test_engine(640, 360);
        engine.render(&CameraInput::default(), 0.016).unwrap();

        let pass = engine
            .backend()
            .pass("light_volume_pass")
            .expect("volume pass recorded");
        assert_eq!(pass.draw_count(), 0);
        // The accumulation targets are still cleared.
        for attachment in &pass.descriptor.color_attachments {
            assert!(matches!(attachment.load_op, LoadOp::Clear(_)));
        }
    }

    #[test]
    fn test_point_light_volumes_draw_one_instance_per_light() {
        let mut engine = test_engine(640, 360);
        engine.settings_mut().point_lights = true;
        engine.render(&CameraInput::default(), 0.016).unwrap();

        let pass = engine.backend().pass("light_volume_pass").unwrap();
        assert_eq!(pass.instance_count(), 8);
    }

    #[test]
    fn test_shadow_resolution_switch_unbinds_old_views() {
        let mut engine = test_engine(640, 360);
        engine.render(&CameraInput::default(), 0.016).unwrap();

        let old_view = {
            let backend = engine.backend();
            let id = backend
                .views
                .iter()
                .find(|(_, texture)| {
                    backend
                        .textures
                        .get(&texture.0)
                        .is_some_and(|desc| desc.width == 4096)
                })
                .map(|(view, _)| *view)
                .expect("shadow map view allocated");
            TextureViewHandle(id)
        };

        engine.set_shadow_resolution(ShadowResolution::R2048);
        engine.render(&CameraInput::default(), 0.016).unwrap();

        let backend = engine.backend();
        assert!(backend.destroyed_views.contains(&old_view));
        for entries in backend.bind_groups.values() {
            for (_, entry) in entries {
                if let BindGroupEntry::Texture(view) = entry {
                    assert_ne!(*view, old_view);
                }
            }
        }
        assert!(backend
            .textures
            .values()
            .any(|desc| desc.width == 2048 && desc.height == 2048));
        assert!(!backend.textures.values().any(|desc| desc.width == 4096));
    }

    #[test]
    fn test_resize_same_size_is_a_noop() {
        let mut engine = test_engine(1280, 720);
        engine.render(&CameraInput::default(), 0.016).unwrap();

        let ids_before = {
            let mut ids: Vec<u64> = engine.backend().textures.keys().copied().collect();
            ids.sort_unstable();
            ids
        };

        engine.resize(1280, 720);
        engine.resize(0, 720);
        engine.resize(1280, 0);

        let ids_after = {
            let mut ids: Vec<u64> = engine.backend().textures.keys().copied().collect();
            ids.sort_unstable();
            ids
        };
        assert_eq!(ids_after, ids_before);
        assert!(engine.backend().destroyed_textures.is_empty());
    }

    #[test]
    fn test_resize_reallocates_screen_targets() {
        let mut engine = test_engine(1280, 720);
        engine.render(&CameraInput::default(), 0.016).unwrap();
        assert!(engine
            .backend()
            .textures
            .values()
            .any(|desc| desc.width == 1280 && desc.height == 720));

        engine.resize(1920, 1080);
        engine.render(&CameraInput::default(), 0.016).unwrap();

        assert_eq!(engine.dimensions(), (1920, 1080));
        let backend = engine.backend();
        assert!(backend
            .textures
            .values()
            .any(|desc| desc.width == 1920 && desc.height == 1080));
        assert!(!backend
            .textures
            .values()
            .any(|desc| desc.width == 1280 && desc.height == 720));
    }

    #[test]
    fn test_select_scene_rejects_out_of_range_index() {
        let mut engine = test_engine(640, 360);
        let err = engine.select_scene(3).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidSceneIndex { index: 3, count: 1 }
        ));
        assert_eq!(engine.active_scene_index(), 0);
    }

    #[test]
    fn test_scene_switch_replaces_gpu_models() {
        let mut engine = test_engine(640, 360);
        let sphere = engine.add_mesh(Mesh::uv_sphere(8, 6));
        let blue = engine.add_material(Material::solid("blue", Vec3::Z));
        let mut second = Scene::new("second");
        second.add_object(SceneObject::new(sphere, blue));
        let second_index = engine.add_scene(second);

        engine.render(&CameraInput::default(), 0.016).unwrap();
        assert_eq!(
            engine.backend().pass("gbuffer_pass").unwrap().draw_count(),
            2
        );

        engine.select_scene(second_index).unwrap();
        engine.backend_mut().clear_passes();
        engine.render(&CameraInput::default(), 0.016).unwrap();

        let backend = engine.backend();
        assert_eq!(backend.pass("gbuffer_pass").unwrap().draw_count(), 1);
        assert!(!backend.destroyed_buffers.is_empty());
    }

    #[test]
    fn test_missing_mesh_id_fails_as_asset_error() {
        let config = EngineConfig::default();
        let mut engine = Engine::new(&config, TestBackend::new(320, 200)).unwrap();
        let material = engine.add_material(Material::solid("gray", Vec3::ONE));
        let mut scene = Scene::new("broken");
        scene.add_object(SceneObject::new(9, material));
        engine.add_scene(scene);

        let err = engine.render(&CameraInput::default(), 0.016).unwrap_err();
        assert!(matches!(err, EngineError::AssetLoad(_)));
    }
}
