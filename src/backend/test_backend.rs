//! Headless backend for tests
//!
//! Records every resource creation and every render pass with its buffered
//! commands instead of talking to a GPU. Timestamp queries produce synthetic
//! monotonic values so profiling code paths run end to end.

use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::HashMap;
use std::ops::Range;

/// One command recorded inside a render pass
#[derive(Debug, Clone)]
pub enum RecordedCommand {
    SetPipeline(RenderPipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle },
    SetVertexBuffer { slot: u32, buffer: BufferHandle, offset: u64 },
    SetIndexBuffer { buffer: BufferHandle, offset: u64, format: IndexFormat },
    SetViewport { x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32 },
    SetScissorRect { x: u32, y: u32, width: u32, height: u32 },
    Draw { vertices: Range<u32>, instances: Range<u32> },
    DrawIndexed { indices: Range<u32>, base_vertex: i32, instances: Range<u32> },
}

/// A completed render pass: descriptor plus the commands replayed into it
#[derive(Debug, Clone)]
pub struct RecordedPass {
    pub descriptor: RenderPassDescriptor,
    pub commands: Vec<RecordedCommand>,
}

impl RecordedPass {
    pub fn label(&self) -> &str {
        self.descriptor.label.as_deref().unwrap_or("")
    }

    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, RecordedCommand::Draw { .. } | RecordedCommand::DrawIndexed { .. }))
            .count()
    }

    /// Total instances across all draws in this pass
    pub fn instance_count(&self) -> u32 {
        self.commands
            .iter()
            .map(|c| match c {
                RecordedCommand::Draw { instances, .. } => instances.end - instances.start,
                RecordedCommand::DrawIndexed { instances, .. } => instances.end - instances.start,
                _ => 0,
            })
            .sum()
    }

    pub fn pipelines(&self) -> Vec<RenderPipelineHandle> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::SetPipeline(handle) => Some(*handle),
                _ => None,
            })
            .collect()
    }

    pub fn bound_groups(&self) -> Vec<BindGroupHandle> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::SetBindGroup { bind_group, .. } => Some(*bind_group),
                _ => None,
            })
            .collect()
    }
}

/// Recorded buffer with its backing bytes
#[derive(Debug, Clone)]
pub struct BufferRecord {
    pub usage: BufferUsage,
    pub data: Vec<u8>,
}

/// In-memory `GraphicsBackend` that records instead of rendering
pub struct TestBackend {
    width: u32,
    height: u32,
    vsync: bool,
    timestamps: bool,

    pub buffers: HashMap<u64, BufferRecord>,
    pub textures: HashMap<u64, TextureDescriptor>,
    /// view id -> texture it was created from
    pub views: HashMap<u64, TextureHandle>,
    pub samplers: HashMap<u64, SamplerDescriptor>,
    pub layouts: HashMap<u64, Vec<BindGroupLayoutEntry>>,
    pub bind_groups: HashMap<u64, Vec<(u32, BindGroupEntry)>>,
    pub pipelines: HashMap<u64, RenderPipelineDescriptor>,
    query_sets: HashMap<u64, Vec<u64>>,

    pub passes: Vec<RecordedPass>,
    pub destroyed_buffers: Vec<BufferHandle>,
    pub destroyed_textures: Vec<TextureHandle>,
    pub destroyed_views: Vec<TextureViewHandle>,
    pub destroyed_query_sets: Vec<QuerySetHandle>,

    pending: Option<RecordedPass>,
    current_swapchain_view: Option<TextureViewHandle>,

    next_id: u64,
    next_timestamp: u64,
    /// Remaining `try_read_buffer` calls per buffer that still report in flight
    map_latency: u32,
    map_countdown: HashMap<u64, u32>,
}

impl TestBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            vsync: true,
            timestamps: true,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            samplers: HashMap::new(),
            layouts: HashMap::new(),
            bind_groups: HashMap::new(),
            pipelines: HashMap::new(),
            query_sets: HashMap::new(),
            passes: Vec::new(),
            destroyed_buffers: Vec::new(),
            destroyed_textures: Vec::new(),
            destroyed_views: Vec::new(),
            destroyed_query_sets: Vec::new(),
            pending: None,
            current_swapchain_view: None,
            next_id: 1,
            next_timestamp: 1_000,
            map_latency: 0,
            map_countdown: HashMap::new(),
        }
    }

    pub fn without_timestamps(width: u32, height: u32) -> Self {
        let mut backend = Self::new(width, height);
        backend.timestamps = false;
        backend
    }

    /// Make every mapped read report in flight `calls` times before the data
    /// arrives.
    pub fn with_map_latency(mut self, calls: u32) -> Self {
        self.map_latency = calls;
        self
    }

    fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// First recorded pass whose label matches
    pub fn pass(&self, label: &str) -> Option<&RecordedPass> {
        self.passes.iter().find(|p| p.label() == label)
    }

    /// All recorded passes whose label matches
    pub fn passes_labeled(&self, label: &str) -> Vec<&RecordedPass> {
        self.passes.iter().filter(|p| p.label() == label).collect()
    }

    /// Format of the texture a view was created from
    pub fn view_format(&self, view: TextureViewHandle) -> Option<TextureFormat> {
        let texture = self.views.get(&view.0)?;
        Some(self.textures.get(&texture.0)?.format)
    }

    pub fn alive_texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn clear_passes(&mut self) {
        self.passes.clear();
    }
}

impl GraphicsBackend for TestBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.width = width;
            self.height = height;
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn set_vsync(&mut self, vsync: bool) {
        self.vsync = vsync;
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let view_id = self.fresh_id();
        self.current_swapchain_view = Some(TextureViewHandle(view_id));
        Ok(FrameContext {
            swapchain_view: TextureViewHandle(view_id),
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.current_swapchain_view = None;
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        TextureFormat::Bgra8UnormSrgb
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let id = self.fresh_id();
        self.buffers.insert(
            id,
            BufferRecord {
                usage: desc.usage,
                data: vec![0; desc.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let id = self.fresh_id();
        self.buffers.insert(
            id,
            BufferRecord {
                usage: desc.usage,
                data: data.to_vec(),
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(record) = self.buffers.get_mut(&buffer.0) {
            let end = offset as usize + data.len();
            if record.data.len() < end {
                record.data.resize(end, 0);
            }
            record.data[offset as usize..end].copy_from_slice(data);
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let id = self.fresh_id();
        self.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::TextureCreationFailed("Texture not found".into()));
        }
        let id = self.fresh_id();
        self.views.insert(id, texture);
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, _texture: TextureHandle, _data: &[u8], _width: u32, _height: u32) {}

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let id = self.fresh_id();
        self.samplers.insert(id, desc.clone());
        Ok(SamplerHandle(id))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let id = self.fresh_id();
        self.layouts.insert(id, entries.to_vec());
        Ok(BindGroupLayoutHandle(id))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        if !self.layouts.contains_key(&layout.0) {
            return Err(BackendError::PipelineCreationFailed("Layout not found".into()));
        }
        let id = self.fresh_id();
        self.bind_groups.insert(id, entries.to_vec());
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let id = self.fresh_id();
        self.pipelines.insert(id, desc.clone());
        Ok(RenderPipelineHandle(id))
    }

    fn create_query_set(
        &mut self,
        _label: Option<&str>,
        count: u32,
    ) -> BackendResult<QuerySetHandle> {
        if !self.timestamps {
            return Err(BackendError::QuerySetCreationFailed(
                "Timestamp queries not supported by device".into(),
            ));
        }
        let id = self.fresh_id();
        self.query_sets.insert(id, vec![0; count as usize]);
        Ok(QuerySetHandle(id))
    }

    fn timestamps_supported(&self) -> bool {
        self.timestamps
    }

    fn timestamp_period_ns(&self) -> f32 {
        1.0
    }

    fn resolve_query_set(&mut self, query_set: QuerySetHandle, count: u32, destination: BufferHandle) {
        let Some(values) = self.query_sets.get(&query_set.0) else {
            return;
        };
        let bytes: Vec<u8> = values
            .iter()
            .take(count as usize)
            .flat_map(|v| v.to_le_bytes())
            .collect();
        if let Some(record) = self.buffers.get_mut(&destination.0) {
            if record.data.len() < bytes.len() {
                record.data.resize(bytes.len(), 0);
            }
            record.data[..bytes.len()].copy_from_slice(&bytes);
        }
    }

    fn copy_buffer_to_buffer(&mut self, src: BufferHandle, dst: BufferHandle, size: u64) {
        let Some(bytes) = self
            .buffers
            .get(&src.0)
            .map(|r| r.data[..(size as usize).min(r.data.len())].to_vec())
        else {
            return;
        };
        if let Some(record) = self.buffers.get_mut(&dst.0) {
            if record.data.len() < bytes.len() {
                record.data.resize(bytes.len(), 0);
            }
            record.data[..bytes.len()].copy_from_slice(&bytes);
        }
    }

    fn try_read_buffer(
        &mut self,
        buffer: BufferHandle,
        size: u64,
    ) -> BackendResult<Option<Vec<u8>>> {
        let Some(record) = self.buffers.get(&buffer.0) else {
            return Err(BackendError::BufferMapFailed("Buffer not found".into()));
        };
        let remaining = self
            .map_countdown
            .entry(buffer.0)
            .or_insert(self.map_latency);
        if *remaining > 0 {
            *remaining -= 1;
            return Ok(None);
        }
        self.map_countdown.remove(&buffer.0);
        let len = (size as usize).min(record.data.len());
        Ok(Some(record.data[..len].to_vec()))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.pending = Some(RecordedPass {
            descriptor: desc.clone(),
            commands: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) {
        let Some(pass) = self.pending.take() else {
            return;
        };
        // Model timestamp_writes the way a pass execution would: each
        // referenced slot receives the next monotonic tick.
        if let Some(tw) = pass.descriptor.timestamp_writes {
            if let Some(values) = self.query_sets.get_mut(&tw.query_set.0) {
                for index in [tw.begin_index, tw.end_index].into_iter().flatten() {
                    if let Some(slot) = values.get_mut(index as usize) {
                        *slot = self.next_timestamp;
                        self.next_timestamp += 1_000;
                    }
                }
            }
        }
        self.passes.push(pass);
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        if let Some(ref mut pending) = self.pending {
            pending.commands.push(RecordedCommand::SetPipeline(pipeline));
        }
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle) {
        if let Some(ref mut pending) = self.pending {
            pending.commands.push(RecordedCommand::SetBindGroup { index, bind_group });
        }
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        if let Some(ref mut pending) = self.pending {
            pending.commands.push(RecordedCommand::SetVertexBuffer { slot, buffer, offset });
        }
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        if let Some(ref mut pending) = self.pending {
            pending.commands.push(RecordedCommand::SetIndexBuffer { buffer, offset, format });
        }
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) {
        if let Some(ref mut pending) = self.pending {
            pending.commands.push(RecordedCommand::SetViewport { x, y, width, height, min_depth, max_depth });
        }
    }

    fn set_scissor_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        if let Some(ref mut pending) = self.pending {
            pending.commands.push(RecordedCommand::SetScissorRect { x, y, width, height });
        }
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        if let Some(ref mut pending) = self.pending {
            pending.commands.push(RecordedCommand::Draw { vertices, instances });
        }
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        if let Some(ref mut pending) = self.pending {
            pending.commands.push(RecordedCommand::DrawIndexed { indices, base_vertex, instances });
        }
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.map_countdown.remove(&buffer.0);
        if self.buffers.remove(&buffer.0).is_some() {
            self.destroyed_buffers.push(buffer);
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture.0).is_some() {
            self.destroyed_textures.push(texture);
        }
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        if self.views.remove(&view.0).is_some() {
            self.destroyed_views.push(view);
        }
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }

    fn destroy_query_set(&mut self, query_set: QuerySetHandle) {
        if self.query_sets.remove(&query_set.0).is_some() {
            self.destroyed_query_sets.push(query_set);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_pass_tracks_draws() {
        let mut backend = TestBackend::new(64, 64);
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Test Pass".into()),
            color_attachments: vec![],
            depth_stencil_attachment: None,
            timestamp_writes: None,
        });
        backend.draw(0..3, 0..1);
        backend.draw_indexed(0..36, 0, 0..8);
        backend.end_render_pass();

        let pass = backend.pass("Test Pass").unwrap();
        assert_eq!(pass.draw_count(), 2);
        assert_eq!(pass.instance_count(), 9);
    }

    #[test]
    fn test_query_set_resolves_monotonic_timestamps() {
        let mut backend = TestBackend::new(64, 64);
        let query_set = backend.create_query_set(Some("Timing"), 4).unwrap();
        let resolve = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 32,
                usage: BufferUsage::QUERY_RESOLVE | BufferUsage::COPY_SRC,
                mapped_at_creation: false,
            })
            .unwrap();

        for i in 0..2u32 {
            backend.begin_render_pass(&RenderPassDescriptor {
                label: None,
                color_attachments: vec![],
                depth_stencil_attachment: None,
                timestamp_writes: Some(PassTimestampWrites {
                    query_set,
                    begin_index: Some(i * 2),
                    end_index: Some(i * 2 + 1),
                }),
            });
            backend.end_render_pass();
        }
        backend.resolve_query_set(query_set, 4, resolve);

        let bytes = backend.try_read_buffer(resolve, 32).unwrap().unwrap();
        let values: Vec<u64> = bytes
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect();
        assert_eq!(values.len(), 4);
        for pair in values.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_map_latency_delays_reads() {
        let mut backend = TestBackend::new(64, 64).with_map_latency(2);
        let buffer = backend
            .create_buffer_init(
                &BufferDescriptor {
                    label: None,
                    size: 0,
                    usage: BufferUsage::MAP_READ,
                    mapped_at_creation: false,
                },
                &[7u8; 8],
            )
            .unwrap();

        assert!(backend.try_read_buffer(buffer, 8).unwrap().is_none());
        assert!(backend.try_read_buffer(buffer, 8).unwrap().is_none());
        assert_eq!(backend.try_read_buffer(buffer, 8).unwrap(), Some(vec![7u8; 8]));
    }
}
