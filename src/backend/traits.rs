//! Backend abstraction.
//!
//! [`GraphicsBackend`] is the seam between the render graph and the GPU.
//! Implementations hand out opaque u64 handles, never reused within one
//! backend's lifetime; the trait is object safe so passes can record
//! through `&mut dyn GraphicsBackend`.

use crate::backend::types::*;
use std::ops::Range;
use thiserror::Error;

/// Everything a backend call can fail with.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("backend initialization failed: {0}")]
    InitializationFailed(String),
    #[error("surface creation failed: {0}")]
    SurfaceCreationFailed(String),
    #[error("device request failed: {0}")]
    DeviceCreationFailed(String),
    #[error("swapchain image acquire failed: {0}")]
    AcquireImageFailed(String),
    #[error("present failed: {0}")]
    PresentFailed(String),
    #[error("buffer creation failed: {0}")]
    BufferCreationFailed(String),
    #[error("texture creation failed: {0}")]
    TextureCreationFailed(String),
    #[error("pipeline creation failed: {0}")]
    PipelineCreationFailed(String),
    #[error("shader compilation failed: {0}")]
    ShaderCreationFailed(String),
    #[error("query set creation failed: {0}")]
    QuerySetCreationFailed(String),
    #[error("buffer map failed: {0}")]
    BufferMapFailed(String),
    #[error("surface lost")]
    SurfaceLost,
    #[error("out of GPU memory")]
    OutOfMemory,
    #[error("device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Id of a buffer owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Id of a texture owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Id of a texture view. The swapchain view gets a fresh id every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewHandle(pub(crate) u64);

/// Id of a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerHandle(pub(crate) u64);

/// Id of a compiled render pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderPipelineHandle(pub(crate) u64);

/// Id of a bind group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupHandle(pub(crate) u64);

/// Id of a bind group layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupLayoutHandle(pub(crate) u64);

/// Id of a timestamp query set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuerySetHandle(pub(crate) u64);

/// One resource bound into a bind group, tagged with its binding index
/// at the call site.
#[derive(Debug, Clone)]
pub enum BindGroupEntry {
    Buffer {
        buffer: BufferHandle,
        offset: u64,
        size: Option<u64>,
    },
    Texture(TextureViewHandle),
    Sampler(SamplerHandle),
}

/// Shader stage visibility flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderStageFlags(pub u32);

impl ShaderStageFlags {
    pub const VERTEX: Self = Self(1 << 0);
    pub const FRAGMENT: Self = Self(1 << 1);
    pub const VERTEX_FRAGMENT: Self = Self(1 << 0 | 1 << 1);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

/// How a texture binding is sampled in the shader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSampleType {
    Float { filterable: bool },
    Depth,
    Sint,
    Uint,
}

/// Binding type for a bind group layout entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingType {
    UniformBuffer,
    Texture { sample_type: TextureSampleType },
    Sampler { comparison: bool },
}

/// Declares one binding slot of a bind group layout.
#[derive(Debug, Clone, Copy)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub visibility: ShaderStageFlags,
    pub ty: BindingType,
}

/// Depth/stencil state for a render pipeline
#[derive(Debug, Clone, Copy)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
}

/// Color write mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorWrites(pub u32);

impl ColorWrites {
    pub const ALL: Self = Self(0xF);
}

/// One color target of a render pipeline
#[derive(Debug, Clone)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
    pub write_mask: ColorWrites,
}

/// Render pipeline creation descriptor. Shaders are WGSL source with
/// `vs_main` / `fs_main` entry points; `fragment_shader: None` makes a
/// depth-only pipeline.
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub vertex_shader: String,
    pub fragment_shader: Option<String>,
    pub vertex_layouts: Vec<VertexBufferLayout>,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
    pub primitive_topology: PrimitiveTopology,
    pub front_face: FrontFace,
    pub cull_mode: CullMode,
    pub depth_stencil: Option<DepthStencilState>,
    pub color_targets: Vec<ColorTargetState>,
}

/// Load operation for an attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

/// Store operation for an attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    Discard,
}

/// One color attachment of a render pass
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub view: TextureViewHandle,
    pub resolve_target: Option<TextureViewHandle>,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

/// Depth/stencil attachment of a render pass
#[derive(Debug, Clone)]
pub struct DepthStencilAttachment {
    pub view: TextureViewHandle,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub depth_clear_value: f32,
}

/// Begin/end timestamps recorded around one render pass
#[derive(Debug, Clone, Copy)]
pub struct PassTimestampWrites {
    pub query_set: QuerySetHandle,
    pub begin_index: Option<u32>,
    pub end_index: Option<u32>,
}

/// Attachments and timing instrumentation for one render pass.
#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
    pub timestamp_writes: Option<PassTimestampWrites>,
}

/// Index buffer element format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Per-frame context returned by `begin_frame`
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub swapchain_view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

/// Abstraction over the GPU API.
///
/// Construction is backend specific (a windowed backend wants a winit
/// window, the test backend wants nothing), so it lives on the concrete
/// types rather than here. Everything after construction goes through
/// this trait.
pub trait GraphicsBackend {
    // --- Surface / frame lifecycle ---

    /// Resize the swapchain. Zero dimensions are ignored.
    fn resize(&mut self, width: u32, height: u32);

    /// Current surface size as configured (may differ from the request when
    /// clamped to device limits).
    fn surface_size(&self) -> (u32, u32);

    /// Switch presentation mode. Takes effect on the next surface
    /// configuration.
    fn set_vsync(&mut self, vsync: bool);

    /// Acquire the next swapchain image and start the frame encoder.
    fn begin_frame(&mut self) -> BackendResult<FrameContext>;

    /// Submit the frame encoder and present.
    fn end_frame(&mut self) -> BackendResult<()>;

    fn swapchain_format(&self) -> TextureFormat;

    // --- Resource creation ---

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Create a buffer initialized with `data`; `desc.size` is ignored in
    /// favor of the data length.
    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle>;

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle>;

    /// Upload tightly packed texel data to mip 0.
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32);

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle>;

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle>;

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle>;

    /// Create a timestamp query set with `count` slots. Fails when the
    /// device lacks timestamp support; check `timestamps_supported` first.
    fn create_query_set(&mut self, label: Option<&str>, count: u32)
        -> BackendResult<QuerySetHandle>;

    // --- Timing queries ---

    fn timestamps_supported(&self) -> bool;

    /// Nanoseconds per timestamp tick.
    fn timestamp_period_ns(&self) -> f32;

    /// Record a resolve of queries `0..count` into `destination` on the
    /// frame encoder.
    fn resolve_query_set(&mut self, query_set: QuerySetHandle, count: u32, destination: BufferHandle);

    /// Record a full-buffer copy on the frame encoder.
    fn copy_buffer_to_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64);

    /// Non-blocking mapped read of a MAP_READ buffer. Returns `Ok(None)`
    /// while the map is still in flight; `Ok(Some(bytes))` unmaps before
    /// returning. Callers own the retry/timeout policy.
    fn try_read_buffer(&mut self, buffer: BufferHandle, size: u64)
        -> BackendResult<Option<Vec<u8>>>;

    // --- Render pass recording ---

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor);

    fn end_render_pass(&mut self);

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle);

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle);

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64);

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat);

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32);

    fn set_scissor_rect(&mut self, x: u32, y: u32, width: u32, height: u32);

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>);

    // --- Destruction ---

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn destroy_texture_view(&mut self, view: TextureViewHandle);

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle);

    fn destroy_query_set(&mut self, query_set: QuerySetHandle);
}
