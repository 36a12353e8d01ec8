//! wgpu implementation of the [`GraphicsBackend`] trait.
//!
//! Handles are integer ids minted by per-kind [`ResourceTable`]s, so a stale
//! handle degrades into a skipped binding instead of a dangling pointer.
//! Render pass commands are buffered and replayed on `end_render_pass`; a
//! live `wgpu::RenderPass` borrows the frame encoder and cannot cross the
//! object-safe trait boundary.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::mpsc;
use std::sync::Arc;

use wgpu::util::DeviceExt;

use crate::backend::traits::*;
use crate::backend::types::*;

/// Id-keyed storage for one kind of wgpu object.
///
/// Ids start at 1 so a zeroed handle never resolves.
struct ResourceTable<T> {
    entries: HashMap<u64, T>,
    next_id: u64,
}

impl<T> ResourceTable<T> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
        }
    }

    /// Hand out an id without storing anything under it.
    fn reserve_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert(&mut self, value: T) -> u64 {
        let id = self.reserve_id();
        self.entries.insert(id, value);
        id
    }

    fn get(&self, id: u64) -> Option<&T> {
        self.entries.get(&id)
    }

    fn remove(&mut self, id: u64) {
        self.entries.remove(&id);
    }
}

/// One buffered call inside a render pass.
enum DrawCommand {
    SetPipeline(RenderPipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    SetVertexBuffer { slot: u32, buffer: BufferHandle, offset: u64 },
    SetIndexBuffer { buffer: BufferHandle, offset: u64, format: IndexFormat },
    SetViewport { x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32 },
    SetScissorRect { x: u32, y: u32, width: u32, height: u32 },
    Draw { vertices: Range<u32>, instances: Range<u32> },
    DrawIndexed { indices: Range<u32>, base_vertex: i32, instances: Range<u32> },
}

/// A pass under recording, replayed when `end_render_pass` runs.
struct RecordedPass {
    desc: RenderPassDescriptor,
    commands: Vec<DrawCommand>,
}

pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    #[allow(dead_code)]
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    timestamps_supported: bool,

    buffers: ResourceTable<wgpu::Buffer>,
    textures: ResourceTable<wgpu::Texture>,
    texture_views: ResourceTable<wgpu::TextureView>,
    samplers: ResourceTable<wgpu::Sampler>,
    bind_group_layouts: ResourceTable<wgpu::BindGroupLayout>,
    bind_groups: ResourceTable<wgpu::BindGroup>,
    render_pipelines: ResourceTable<wgpu::RenderPipeline>,
    query_sets: ResourceTable<wgpu::QuerySet>,

    // Frame state, alive between begin_frame and end_frame.
    current_texture: Option<wgpu::SurfaceTexture>,
    // Handle id standing in for the swapchain view, re-minted every frame.
    current_view_id: u64,
    encoder: Option<wgpu::CommandEncoder>,
    recording: Option<RecordedPass>,

    // map_async receivers for readbacks still in flight, keyed by buffer id.
    pending_maps: HashMap<u64, mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>>,
}

impl WgpuBackend {
    /// Blocking construction for native targets.
    pub fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    pub async fn new_async(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        let (instance, surface, adapter) = Self::acquire_adapter(window.clone()).await?;

        let info = adapter.get_info();
        log::info!("Selected GPU: {} ({:?} backend)", info.name, info.backend);
        println!("Selected GPU: {} ({:?} backend)", info.name, info.backend);

        // The per-pass profiler rides on TIMESTAMP_QUERY; only request it when
        // the adapter has it so device creation never fails over profiling.
        let mut required_features = wgpu::Features::empty();
        if adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
            required_features |= wgpu::Features::TIMESTAMP_QUERY;
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Graphics Device"),
                    required_features,
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .unwrap_or(caps.formats[0]);

        let size = window.inner_size();
        let (width, height) =
            clamp_surface_size(size.width, size.height, device.limits().max_texture_dimension_2d);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: present_mode_for(vsync),
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let timestamps_supported = device.features().contains(wgpu::Features::TIMESTAMP_QUERY);
        if !timestamps_supported {
            log::warn!("Timestamp queries not supported, GPU profiling disabled");
        }

        Ok(Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            surface_config,
            timestamps_supported,
            buffers: ResourceTable::new(),
            textures: ResourceTable::new(),
            texture_views: ResourceTable::new(),
            samplers: ResourceTable::new(),
            bind_group_layouts: ResourceTable::new(),
            bind_groups: ResourceTable::new(),
            render_pipelines: ResourceTable::new(),
            query_sets: ResourceTable::new(),
            current_texture: None,
            current_view_id: 0,
            encoder: None,
            recording: None,
            pending_maps: HashMap::new(),
        })
    }

    /// Create the instance, surface and adapter, honoring the `WGPU_BACKEND`
    /// env override and retrying with the full backend set when the preferred
    /// one has no usable adapter.
    async fn acquire_adapter(
        window: Arc<winit::window::Window>,
    ) -> BackendResult<(wgpu::Instance, wgpu::Surface<'static>, wgpu::Adapter)> {
        let preferred = Self::preferred_backends();
        if let Some(found) = Self::try_backends(window.clone(), preferred).await? {
            return Ok(found);
        }
        if preferred != wgpu::Backends::all() {
            log::warn!("Preferred backend not available, falling back to all backends");
            if let Some(found) = Self::try_backends(window, wgpu::Backends::all()).await? {
                return Ok(found);
            }
        }
        Err(BackendError::InitializationFailed(
            "No suitable adapter found".into(),
        ))
    }

    fn preferred_backends() -> wgpu::Backends {
        // WGPU_BACKEND is wgpu's own selection override; when set, expose
        // everything and let wgpu filter.
        if std::env::var("WGPU_BACKEND").is_ok() {
            return wgpu::Backends::all();
        }
        // The D3D12 debug layer trips validation errors on this renderer, so
        // Windows goes through Vulkan.
        if cfg!(target_os = "windows") {
            wgpu::Backends::VULKAN
        } else {
            wgpu::Backends::all()
        }
    }

    async fn try_backends(
        window: Arc<winit::window::Window>,
        backends: wgpu::Backends,
    ) -> BackendResult<Option<(wgpu::Instance, wgpu::Surface<'static>, wgpu::Adapter)>> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await;
        Ok(adapter.map(|adapter| (instance, surface, adapter)))
    }

    /// Append to the pass being recorded. Calls outside a pass are dropped.
    fn record(&mut self, command: DrawCommand) {
        if let Some(recording) = self.recording.as_mut() {
            recording.commands.push(command);
        }
    }

    /// Replay buffered commands into a live pass. Commands whose handles no
    /// longer resolve are skipped.
    fn replay<'p>(&'p self, pass: &mut wgpu::RenderPass<'p>, commands: &[DrawCommand]) {
        for command in commands {
            match command {
                DrawCommand::SetPipeline(handle) => {
                    if let Some(pipeline) = self.render_pipelines.get(handle.0) {
                        pass.set_pipeline(pipeline);
                    }
                }
                DrawCommand::SetBindGroup { index, bind_group } => {
                    if let Some(group) = self.bind_groups.get(bind_group.0) {
                        pass.set_bind_group(*index, group, &[]);
                    }
                }
                DrawCommand::SetVertexBuffer { slot, buffer, offset } => {
                    if let Some(target) = self.buffers.get(buffer.0) {
                        pass.set_vertex_buffer(*slot, target.slice(*offset..));
                    }
                }
                DrawCommand::SetIndexBuffer { buffer, offset, format } => {
                    if let Some(target) = self.buffers.get(buffer.0) {
                        let format = match format {
                            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
                            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
                        };
                        pass.set_index_buffer(target.slice(*offset..), format);
                    }
                }
                DrawCommand::SetViewport { x, y, width, height, min_depth, max_depth } => {
                    pass.set_viewport(*x, *y, *width, *height, *min_depth, *max_depth);
                }
                DrawCommand::SetScissorRect { x, y, width, height } => {
                    pass.set_scissor_rect(*x, *y, *width, *height);
                }
                DrawCommand::Draw { vertices, instances } => {
                    pass.draw(vertices.clone(), instances.clone());
                }
                DrawCommand::DrawIndexed { indices, base_vertex, instances } => {
                    pass.draw_indexed(indices.clone(), *base_vertex, instances.clone());
                }
            }
        }
    }
}

impl GraphicsBackend for WgpuBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let limit = self.device.limits().max_texture_dimension_2d;
        let (width, height) = clamp_surface_size(width, height, limit);
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn set_vsync(&mut self, vsync: bool) {
        let mode = present_mode_for(vsync);
        if self.surface_config.present_mode != mode {
            self.surface_config.present_mode = mode;
            self.surface.configure(&self.device, &self.surface_config);
        }
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let output = self.surface.get_current_texture().map_err(|e| match e {
            wgpu::SurfaceError::Lost => BackendError::SurfaceLost,
            wgpu::SurfaceError::OutOfMemory => BackendError::OutOfMemory,
            _ => BackendError::AcquireImageFailed(e.to_string()),
        })?;

        // The swapchain view gets a fresh id every frame; the underlying view
        // is only created when a pass actually attaches it.
        self.current_view_id = self.texture_views.reserve_id();
        self.current_texture = Some(output);
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                }),
        );

        Ok(FrameContext {
            swapchain_view: TextureViewHandle(self.current_view_id),
            width: self.surface_config.width,
            height: self.surface_config.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
        if let Some(texture) = self.current_texture.take() {
            texture.present();
        }
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        texture_format_from_wgpu(self.surface_config.format)
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: map_buffer_usage(desc.usage),
            mapped_at_creation: desc.mapped_at_creation,
        });
        Ok(BufferHandle(self.buffers.insert(buffer)))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: desc.label.as_deref(),
                contents: data,
                usage: map_buffer_usage(desc.usage),
            });
        Ok(BufferHandle(self.buffers.insert(buffer)))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(target) = self.buffers.get(buffer.0) {
            self.queue.write_buffer(target, offset, data);
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.depth,
            },
            mip_level_count: desc.mip_levels,
            sample_count: 1,
            dimension: if desc.depth > 1 {
                wgpu::TextureDimension::D3
            } else {
                wgpu::TextureDimension::D2
            },
            format: map_texture_format(desc.format),
            usage: map_texture_usage(desc.usage),
            view_formats: &[],
        });
        Ok(TextureHandle(self.textures.insert(texture)))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        let view = self
            .textures
            .get(texture.0)
            .ok_or_else(|| BackendError::TextureCreationFailed("Texture not found".into()))?
            .create_view(&wgpu::TextureViewDescriptor::default());
        Ok(TextureViewHandle(self.texture_views.insert(view)))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        let Some(target) = self.textures.get(texture.0) else {
            return;
        };
        let bytes_per_texel = target.format().block_copy_size(None).unwrap_or(4);
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * bytes_per_texel),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: map_address_mode(desc.address_mode_u),
            address_mode_v: map_address_mode(desc.address_mode_v),
            address_mode_w: map_address_mode(desc.address_mode_w),
            mag_filter: map_filter_mode(desc.mag_filter),
            min_filter: map_filter_mode(desc.min_filter),
            mipmap_filter: map_filter_mode(desc.mipmap_filter),
            lod_min_clamp: 0.0,
            lod_max_clamp: f32::MAX,
            compare: desc.compare.map(map_compare_function),
            anisotropy_clamp: 1,
            border_color: None,
        });
        Ok(SamplerHandle(self.samplers.insert(sampler)))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let wgpu_entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|entry| wgpu::BindGroupLayoutEntry {
                binding: entry.binding,
                visibility: map_shader_stages(entry.visibility),
                ty: map_binding_type(&entry.ty),
                count: None,
            })
            .collect();

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: None,
                entries: &wgpu_entries,
            });
        Ok(BindGroupLayoutHandle(self.bind_group_layouts.insert(layout)))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout = self
            .bind_group_layouts
            .get(layout.0)
            .ok_or_else(|| BackendError::PipelineCreationFailed("Layout not found".into()))?;

        let bindings: Vec<wgpu::BindGroupEntry> = entries
            .iter()
            .filter_map(|(binding, entry)| {
                let resource = match entry {
                    BindGroupEntry::Buffer { buffer, offset, size } => {
                        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: self.buffers.get(buffer.0)?,
                            offset: *offset,
                            size: size.and_then(std::num::NonZeroU64::new),
                        })
                    }
                    BindGroupEntry::Texture(view) => {
                        wgpu::BindingResource::TextureView(self.texture_views.get(view.0)?)
                    }
                    BindGroupEntry::Sampler(sampler) => {
                        wgpu::BindingResource::Sampler(self.samplers.get(sampler.0)?)
                    }
                };
                Some(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource,
                })
            })
            .collect();

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout,
            entries: &bindings,
        });
        Ok(BindGroupHandle(self.bind_groups.insert(bind_group)))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        // One WGSL module carries both entry points (vs_main / fs_main);
        // `fragment_shader` only decides whether a fragment stage is attached.
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: desc.label.as_deref(),
                source: wgpu::ShaderSource::Wgsl(desc.vertex_shader.as_str().into()),
            });

        let layouts: Vec<&wgpu::BindGroupLayout> = desc
            .bind_group_layouts
            .iter()
            .filter_map(|handle| self.bind_group_layouts.get(handle.0))
            .collect();
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        // Attribute arrays live here so the VertexBufferLayout borrows below
        // stay valid through pipeline creation.
        let attribute_storage: Vec<Vec<wgpu::VertexAttribute>> = desc
            .vertex_layouts
            .iter()
            .map(|layout| {
                layout
                    .attributes
                    .iter()
                    .map(|a| wgpu::VertexAttribute {
                        format: map_vertex_format(a.format),
                        offset: a.offset,
                        shader_location: a.location,
                    })
                    .collect()
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = desc
            .vertex_layouts
            .iter()
            .zip(&attribute_storage)
            .map(|(layout, attributes)| wgpu::VertexBufferLayout {
                array_stride: layout.array_stride,
                step_mode: match layout.step_mode {
                    VertexStepMode::Vertex => wgpu::VertexStepMode::Vertex,
                    VertexStepMode::Instance => wgpu::VertexStepMode::Instance,
                },
                attributes,
            })
            .collect();

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .color_targets
            .iter()
            .map(|target| {
                Some(wgpu::ColorTargetState {
                    format: map_texture_format(target.format),
                    blend: target.blend.as_ref().map(|blend| wgpu::BlendState {
                        color: map_blend_component(&blend.color),
                        alpha: map_blend_component(&blend.alpha),
                    }),
                    write_mask: wgpu::ColorWrites::from_bits_truncate(target.write_mask.0),
                })
            })
            .collect();

        let primitive = wgpu::PrimitiveState {
            topology: map_topology(desc.primitive_topology),
            strip_index_format: None,
            front_face: match desc.front_face {
                FrontFace::Ccw => wgpu::FrontFace::Ccw,
                FrontFace::Cw => wgpu::FrontFace::Cw,
            },
            cull_mode: match desc.cull_mode {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            ..Default::default()
        };

        let depth_stencil = desc.depth_stencil.as_ref().map(|ds| wgpu::DepthStencilState {
            format: map_texture_format(ds.format),
            depth_write_enabled: ds.depth_write_enabled,
            depth_compare: map_compare_function(ds.depth_compare),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: desc.label.as_deref(),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: "vs_main",
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: desc.fragment_shader.as_ref().map(|_| wgpu::FragmentState {
                    module: &module,
                    entry_point: "fs_main",
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive,
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });

        Ok(RenderPipelineHandle(self.render_pipelines.insert(pipeline)))
    }

    fn create_query_set(
        &mut self,
        label: Option<&str>,
        count: u32,
    ) -> BackendResult<QuerySetHandle> {
        if !self.timestamps_supported {
            return Err(BackendError::QuerySetCreationFailed(
                "Timestamp queries not supported by device".into(),
            ));
        }
        let query_set = self.device.create_query_set(&wgpu::QuerySetDescriptor {
            label,
            ty: wgpu::QueryType::Timestamp,
            count,
        });
        Ok(QuerySetHandle(self.query_sets.insert(query_set)))
    }

    fn timestamps_supported(&self) -> bool {
        self.timestamps_supported
    }

    fn timestamp_period_ns(&self) -> f32 {
        self.queue.get_timestamp_period()
    }

    fn resolve_query_set(&mut self, query_set: QuerySetHandle, count: u32, destination: BufferHandle) {
        let (Some(encoder), Some(queries), Some(target)) = (
            self.encoder.as_mut(),
            self.query_sets.get(query_set.0),
            self.buffers.get(destination.0),
        ) else {
            return;
        };
        encoder.resolve_query_set(queries, 0..count, target, 0);
    }

    fn copy_buffer_to_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) {
        let (Some(encoder), Some(from), Some(to)) = (
            self.encoder.as_mut(),
            self.buffers.get(src.0),
            self.buffers.get(dst.0),
        ) else {
            return;
        };
        encoder.copy_buffer_to_buffer(from, 0, to, 0, size);
    }

    fn try_read_buffer(
        &mut self,
        buffer: BufferHandle,
        size: u64,
    ) -> BackendResult<Option<Vec<u8>>> {
        let Some(target) = self.buffers.get(buffer.0) else {
            return Err(BackendError::BufferMapFailed("Buffer not found".into()));
        };

        // The first call kicks off map_async; later calls poll the receiver
        // until the callback lands.
        if !self.pending_maps.contains_key(&buffer.0) {
            let (sender, receiver) = mpsc::channel();
            target
                .slice(..size)
                .map_async(wgpu::MapMode::Read, move |result| {
                    let _ = sender.send(result);
                });
            self.pending_maps.insert(buffer.0, receiver);
        }

        let _ = self.device.poll(wgpu::Maintain::Poll);

        match self.pending_maps[&buffer.0].try_recv() {
            Ok(Ok(())) => {
                self.pending_maps.remove(&buffer.0);
                let data = target.slice(..size).get_mapped_range().to_vec();
                target.unmap();
                Ok(Some(data))
            }
            Ok(Err(e)) => {
                self.pending_maps.remove(&buffer.0);
                Err(BackendError::BufferMapFailed(e.to_string()))
            }
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => {
                self.pending_maps.remove(&buffer.0);
                Err(BackendError::BufferMapFailed("Map callback dropped".into()))
            }
        }
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.recording = Some(RecordedPass {
            desc: desc.clone(),
            commands: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) {
        let Some(recording) = self.recording.take() else {
            return;
        };
        let Some(mut encoder) = self.encoder.take() else {
            return;
        };

        {
            // The surface texture gets a throwaway view here; attachment ids
            // equal to `current_view_id` resolve to it instead of the table.
            let surface_view = self
                .current_texture
                .as_ref()
                .map(|t| t.texture.create_view(&wgpu::TextureViewDescriptor::default()));
            let resolve_view = |handle: TextureViewHandle| {
                if handle.0 == self.current_view_id {
                    surface_view.as_ref()
                } else {
                    self.texture_views.get(handle.0)
                }
            };

            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = recording
                .desc
                .color_attachments
                .iter()
                .filter_map(|att| {
                    let view = resolve_view(att.view)?;
                    Some(Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: match &att.load_op {
                                LoadOp::Clear(c) => wgpu::LoadOp::Clear(wgpu::Color {
                                    r: c[0] as f64,
                                    g: c[1] as f64,
                                    b: c[2] as f64,
                                    a: c[3] as f64,
                                }),
                                LoadOp::Load => wgpu::LoadOp::Load,
                            },
                            store: map_store_op(att.store_op),
                        },
                    }))
                })
                .collect();

            let depth_attachment =
                recording.desc.depth_stencil_attachment.as_ref().and_then(|att| {
                    let view = resolve_view(att.view)?;
                    Some(wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            // For depth the clear payload rides in
                            // `depth_clear_value`, not in the LoadOp.
                            load: match &att.depth_load_op {
                                LoadOp::Clear(_) => wgpu::LoadOp::Clear(att.depth_clear_value),
                                LoadOp::Load => wgpu::LoadOp::Load,
                            },
                            store: map_store_op(att.depth_store_op),
                        }),
                        stencil_ops: None,
                    })
                });

            let timestamp_writes = recording.desc.timestamp_writes.as_ref().and_then(|tw| {
                Some(wgpu::RenderPassTimestampWrites {
                    query_set: self.query_sets.get(tw.query_set.0)?,
                    beginning_of_pass_write_index: tw.begin_index,
                    end_of_pass_write_index: tw.end_index,
                })
            });

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: recording.desc.label.as_deref(),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes,
                occlusion_query_set: None,
            });
            self.replay(&mut pass, &recording.commands);
        }

        self.encoder = Some(encoder);
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.record(DrawCommand::SetPipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        self.record(DrawCommand::SetBindGroup { index, bind_group });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.record(DrawCommand::SetVertexBuffer { slot, buffer, offset });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        self.record(DrawCommand::SetIndexBuffer { buffer, offset, format });
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) {
        self.record(DrawCommand::SetViewport { x, y, width, height, min_depth, max_depth });
    }

    fn set_scissor_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.record(DrawCommand::SetScissorRect { x, y, width, height });
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.record(DrawCommand::Draw { vertices, instances });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.record(DrawCommand::DrawIndexed { indices, base_vertex, instances });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.pending_maps.remove(&buffer.0);
        self.buffers.remove(buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(texture.0);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.texture_views.remove(view.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(bind_group.0);
    }

    fn destroy_query_set(&mut self, query_set: QuerySetHandle) {
        self.query_sets.remove(query_set.0);
    }
}

// Accessors for layering egui (or any other wgpu-native consumer) over a frame.
impl WgpuBackend {
    /// Raw wgpu device, needed to construct an `egui_wgpu::Renderer`.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Raw wgpu queue, needed for egui texture and buffer uploads.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Surface format as the native wgpu type.
    pub fn wgpu_surface_format(&self) -> wgpu::TextureFormat {
        self.surface_config.format
    }

    /// Device, queue and the open frame encoder under one borrow, so callers
    /// can hand all three to egui-wgpu at once.
    pub fn device_queue_encoder(
        &mut self,
    ) -> (&wgpu::Device, &wgpu::Queue, Option<&mut wgpu::CommandEncoder>) {
        (&self.device, &self.queue, self.encoder.as_mut())
    }

    /// Handle standing in for this frame's swapchain view, or `None` outside
    /// begin_frame/end_frame.
    pub fn current_swapchain_view(&self) -> Option<TextureViewHandle> {
        self.current_texture
            .is_some()
            .then_some(TextureViewHandle(self.current_view_id))
    }

    /// Draw egui primitives on top of the swapchain. The pass loads existing
    /// content, so it must run after the scene passes and before `end_frame`.
    pub fn render_egui(
        &mut self,
        renderer: &egui_wgpu::Renderer,
        paint_jobs: &[egui::ClippedPrimitive],
        screen_descriptor: &egui_wgpu::ScreenDescriptor,
        swapchain_view: TextureViewHandle,
    ) {
        let Some(encoder) = self.encoder.as_mut() else {
            return;
        };
        let Some(surface_view) = self
            .current_texture
            .as_ref()
            .map(|t| t.texture.create_view(&wgpu::TextureViewDescriptor::default()))
        else {
            return;
        };

        let view = if swapchain_view.0 == self.current_view_id {
            &surface_view
        } else if let Some(view) = self.texture_views.get(swapchain_view.0) {
            view
        } else {
            return;
        };

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("egui Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        renderer.render(&mut pass, paint_jobs, screen_descriptor);
    }
}

/// Clamp a requested surface size to the device texture limit, preserving
/// aspect ratio when a dimension overshoots.
fn clamp_surface_size(width: u32, height: u32, limit: u32) -> (u32, u32) {
    if width <= limit && height <= limit {
        return (width.max(1), height.max(1));
    }
    let scale = (limit as f32 / width as f32).min(limit as f32 / height as f32);
    let clamped_w = ((width as f32 * scale) as u32).max(1);
    let clamped_h = ((height as f32 * scale) as u32).max(1);
    (clamped_w, clamped_h)
}

fn present_mode_for(vsync: bool) -> wgpu::PresentMode {
    if vsync {
        wgpu::PresentMode::AutoVsync
    } else {
        wgpu::PresentMode::AutoNoVsync
    }
}

fn map_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
    }
}

/// Inverse of [`map_texture_format`] for the formats a surface can report.
/// Anything outside that set falls back to `Rgba8Unorm`.
fn texture_format_from_wgpu(format: wgpu::TextureFormat) -> TextureFormat {
    match format {
        wgpu::TextureFormat::R8Unorm => TextureFormat::R8Unorm,
        wgpu::TextureFormat::Rg8Unorm => TextureFormat::Rg8Unorm,
        wgpu::TextureFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
        wgpu::TextureFormat::Rgba8UnormSrgb => TextureFormat::Rgba8UnormSrgb,
        wgpu::TextureFormat::Bgra8Unorm => TextureFormat::Bgra8Unorm,
        wgpu::TextureFormat::Bgra8UnormSrgb => TextureFormat::Bgra8UnormSrgb,
        wgpu::TextureFormat::Rgba16Float => TextureFormat::Rgba16Float,
        wgpu::TextureFormat::Rgba32Float => TextureFormat::Rgba32Float,
        wgpu::TextureFormat::Depth32Float => TextureFormat::Depth32Float,
        wgpu::TextureFormat::Depth24PlusStencil8 => TextureFormat::Depth24PlusStencil8,
        wgpu::TextureFormat::R32Float => TextureFormat::R32Float,
        wgpu::TextureFormat::Rg32Float => TextureFormat::Rg32Float,
        _ => TextureFormat::Rgba8Unorm,
    }
}

fn map_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let table = [
        (BufferUsage::MAP_READ, wgpu::BufferUsages::MAP_READ),
        (BufferUsage::MAP_WRITE, wgpu::BufferUsages::MAP_WRITE),
        (BufferUsage::COPY_SRC, wgpu::BufferUsages::COPY_SRC),
        (BufferUsage::COPY_DST, wgpu::BufferUsages::COPY_DST),
        (BufferUsage::INDEX, wgpu::BufferUsages::INDEX),
        (BufferUsage::VERTEX, wgpu::BufferUsages::VERTEX),
        (BufferUsage::UNIFORM, wgpu::BufferUsages::UNIFORM),
        (BufferUsage::STORAGE, wgpu::BufferUsages::STORAGE),
        (BufferUsage::INDIRECT, wgpu::BufferUsages::INDIRECT),
        (BufferUsage::QUERY_RESOLVE, wgpu::BufferUsages::QUERY_RESOLVE),
    ];
    let mut out = wgpu::BufferUsages::empty();
    for (ours, theirs) in table {
        if usage.contains(ours) {
            out |= theirs;
        }
    }
    out
}

fn map_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    let table = [
        (TextureUsage::COPY_SRC, wgpu::TextureUsages::COPY_SRC),
        (TextureUsage::COPY_DST, wgpu::TextureUsages::COPY_DST),
        (TextureUsage::TEXTURE_BINDING, wgpu::TextureUsages::TEXTURE_BINDING),
        (TextureUsage::STORAGE_BINDING, wgpu::TextureUsages::STORAGE_BINDING),
        (TextureUsage::RENDER_ATTACHMENT, wgpu::TextureUsages::RENDER_ATTACHMENT),
    ];
    let mut out = wgpu::TextureUsages::empty();
    for (ours, theirs) in table {
        if usage.contains(ours) {
            out |= theirs;
        }
    }
    out
}

fn map_shader_stages(flags: ShaderStageFlags) -> wgpu::ShaderStages {
    let mut out = wgpu::ShaderStages::empty();
    if flags.contains(ShaderStageFlags::VERTEX) {
        out |= wgpu::ShaderStages::VERTEX;
    }
    if flags.contains(ShaderStageFlags::FRAGMENT) {
        out |= wgpu::ShaderStages::FRAGMENT;
    }
    out
}

fn map_binding_type(ty: &BindingType) -> wgpu::BindingType {
    match ty {
        BindingType::UniformBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingType::Texture { sample_type } => wgpu::BindingType::Texture {
            sample_type: match sample_type {
                TextureSampleType::Float { filterable } => {
                    wgpu::TextureSampleType::Float { filterable: *filterable }
                }
                TextureSampleType::Depth => wgpu::TextureSampleType::Depth,
                TextureSampleType::Sint => wgpu::TextureSampleType::Sint,
                TextureSampleType::Uint => wgpu::TextureSampleType::Uint,
            },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        BindingType::Sampler { comparison } => wgpu::BindingType::Sampler(if *comparison {
            wgpu::SamplerBindingType::Comparison
        } else {
            wgpu::SamplerBindingType::Filtering
        }),
    }
}

fn map_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32 => wgpu::VertexFormat::Float32,
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        VertexFormat::Uint32 => wgpu::VertexFormat::Uint32,
        VertexFormat::Sint32 => wgpu::VertexFormat::Sint32,
    }
}

fn map_topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
        PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
        PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

fn map_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
    match func {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn map_blend_component(comp: &BlendComponent) -> wgpu::BlendComponent {
    wgpu::BlendComponent {
        src_factor: map_blend_factor(comp.src_factor),
        dst_factor: map_blend_factor(comp.dst_factor),
        operation: map_blend_operation(comp.operation),
    }
}

fn map_blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::Src => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrc => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::Dst => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDst => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn map_blend_operation(op: BlendOperation) -> wgpu::BlendOperation {
    match op {
        BlendOperation::Add => wgpu::BlendOperation::Add,
        BlendOperation::Subtract => wgpu::BlendOperation::Subtract,
        BlendOperation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
        BlendOperation::Min => wgpu::BlendOperation::Min,
        BlendOperation::Max => wgpu::BlendOperation::Max,
    }
}

fn map_store_op(op: StoreOp) -> wgpu::StoreOp {
    match op {
        StoreOp::Store => wgpu::StoreOp::Store,
        StoreOp::Discard => wgpu::StoreOp::Discard,
    }
}

fn map_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
    match mode {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

fn map_address_mode(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        AddressMode::Repeat => wgpu::AddressMode::Repeat,
        AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
    }
}
