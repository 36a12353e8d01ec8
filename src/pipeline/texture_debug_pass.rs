//! Intermediate-texture visualization quad.
//!
//! When enabled, draws a square inspector quad in the lower-right corner of
//! the swapchain showing one of the pipeline's intermediate targets. All six
//! sources stay bound in a single group and a uniform selects which one the
//! fragment shader reads, so switching sources never rebuilds bindings.
//! The quad spans x in [0.3, 1.0] of NDC and its height is scaled by the
//! aspect ratio so it stays square in pixels.

use bytemuck::{Pod, Zeroable};
use glam::{UVec4, Vec4};

use crate::backend::{
    BackendResult, BindGroupEntry, BindGroupHandle, BindGroupLayoutEntry, BindGroupLayoutHandle,
    BindingType, BufferDescriptor, BufferHandle, BufferUsage, ColorAttachment, ColorTargetState,
    ColorWrites, CullMode, FrontFace, LoadOp, PrimitiveTopology, RenderPassDescriptor,
    RenderPipelineDescriptor, RenderPipelineHandle, ShaderStageFlags, StoreOp,
    TextureSampleType, TextureViewHandle,
};
use crate::render_graph::{
    PassExecuteContext, PassSetupContext, RenderPass, ResourceId, ResourceUsage,
};

use super::DeferredResources;

/// params: x = aspect ratio (width / height), y = near, z = far.
/// source: x = source index.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DebugUniforms {
    params: Vec4,
    source: UVec4,
}

type CachedViews = (
    TextureViewHandle,
    TextureViewHandle,
    TextureViewHandle,
    TextureViewHandle,
    TextureViewHandle,
    TextureViewHandle,
);

pub struct TextureDebugPass {
    gbuffer_depth: ResourceId,
    shadow_map: ResourceId,
    light_diffuse: ResourceId,
    light_specular: ResourceId,
    ssao_raw: ResourceId,
    ssao_blurred: ResourceId,
    target: ResourceId,
    pipeline: Option<RenderPipelineHandle>,
    input_layout: Option<BindGroupLayoutHandle>,
    uniform_buffer: Option<BufferHandle>,
    input_group: Option<BindGroupHandle>,
    cached_views: Option<CachedViews>,
}

impl TextureDebugPass {
    pub fn new(resources: &DeferredResources) -> Self {
        Self {
            gbuffer_depth: resources.gbuffer_depth,
            shadow_map: resources.shadow_map,
            light_diffuse: resources.light_diffuse,
            light_specular: resources.light_specular,
            ssao_raw: resources.ssao_raw,
            ssao_blurred: resources.ssao_blurred,
            target: resources.swapchain,
            pipeline: None,
            input_layout: None,
            uniform_buffer: None,
            input_group: None,
            cached_views: None,
        }
    }

    fn record(&mut self, ctx: &mut PassExecuteContext) -> BackendResult<()> {
        if !ctx.settings.texture_visualization {
            return Ok(());
        }

        let (
            Some(depth_view),
            Some(shadow_view),
            Some(diffuse_view),
            Some(specular_view),
            Some(raw_view),
            Some(blurred_view),
            Some(target_view),
        ) = (
            ctx.get_texture(self.gbuffer_depth),
            ctx.get_texture(self.shadow_map),
            ctx.get_texture(self.light_diffuse),
            ctx.get_texture(self.light_specular),
            ctx.get_texture(self.ssao_raw),
            ctx.get_texture(self.ssao_blurred),
            ctx.get_texture(self.target),
        )
        else {
            return Ok(());
        };

        let settings = ctx.settings;

        let uniform_buffer = match self.uniform_buffer {
            Some(buffer) => buffer,
            None => {
                let buffer = ctx.backend.create_buffer(&BufferDescriptor {
                    label: Some("texture_debug_uniforms".to_string()),
                    size: std::mem::size_of::<DebugUniforms>() as u64,
                    usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                    mapped_at_creation: false,
                })?;
                self.uniform_buffer = Some(buffer);
                buffer
            }
        };

        let aspect = if ctx.height > 0 {
            ctx.width as f32 / ctx.height as f32
        } else {
            1.0
        };
        let uniforms = DebugUniforms {
            params: Vec4::new(
                aspect,
                ctx.scene.camera.projection.near(),
                ctx.scene.camera.projection.far(),
                0.0,
            ),
            source: UVec4::new(settings.visualized_source as u32, 0, 0, 0),
        };
        ctx.backend
            .write_buffer(uniform_buffer, 0, bytemuck::bytes_of(&uniforms));

        let input_layout = match self.input_layout {
            Some(layout) => layout,
            None => {
                let texture = |binding, sample_type| BindGroupLayoutEntry {
                    binding,
                    visibility: ShaderStageFlags::FRAGMENT,
                    ty: BindingType::Texture { sample_type },
                };
                let layout = ctx.backend.create_bind_group_layout(&[
                    texture(0, TextureSampleType::Depth),
                    texture(1, TextureSampleType::Depth),
                    texture(2, TextureSampleType::Float { filterable: true }),
                    texture(3, TextureSampleType::Float { filterable: true }),
                    texture(4, TextureSampleType::Float { filterable: true }),
                    texture(5, TextureSampleType::Float { filterable: true }),
                    BindGroupLayoutEntry {
                        binding: 6,
                        visibility: ShaderStageFlags::VERTEX_FRAGMENT,
                        ty: BindingType::UniformBuffer,
                    },
                ])?;
                self.input_layout = Some(layout);
                layout
            }
        };

        let views = (
            depth_view,
            shadow_view,
            diffuse_view,
            specular_view,
            raw_view,
            blurred_view,
        );
        let input_group = match self.input_group {
            Some(group) if self.cached_views == Some(views) => group,
            _ => {
                if let Some(old) = self.input_group.take() {
                    ctx.backend.destroy_bind_group(old);
                }
                let group = ctx.backend.create_bind_group(
                    input_layout,
                    &[
                        (0, BindGroupEntry::Texture(depth_view)),
                        (1, BindGroupEntry::Texture(shadow_view)),
                        (2, BindGroupEntry::Texture(diffuse_view)),
                        (3, BindGroupEntry::Texture(specular_view)),
                        (4, BindGroupEntry::Texture(raw_view)),
                        (5, BindGroupEntry::Texture(blurred_view)),
                        (
                            6,
                            BindGroupEntry::Buffer {
                                buffer: uniform_buffer,
                                offset: 0,
                                size: None,
                            },
                        ),
                    ],
                )?;
                self.input_group = Some(group);
                self.cached_views = Some(views);
                group
            }
        };

        let pipeline = match self.pipeline {
            Some(pipeline) => pipeline,
            None => {
                let format = ctx.backend.swapchain_format();
                let pipeline = ctx.backend.create_render_pipeline(&RenderPipelineDescriptor {
                    label: Some("texture_debug_pipeline".to_string()),
                    vertex_shader: TEXTURE_DEBUG_SHADER.to_string(),
                    fragment_shader: Some(TEXTURE_DEBUG_SHADER.to_string()),
                    vertex_layouts: vec![],
                    bind_group_layouts: vec![input_layout],
                    primitive_topology: PrimitiveTopology::TriangleList,
                    front_face: FrontFace::Ccw,
                    cull_mode: CullMode::None,
                    depth_stencil: None,
                    color_targets: vec![ColorTargetState {
                        format,
                        blend: None,
                        write_mask: ColorWrites::ALL,
                    }],
                })?;
                self.pipeline = Some(pipeline);
                pipeline
            }
        };

        let (width, height) = (ctx.width as f32, ctx.height as f32);

        // Not part of the profiled frame scopes.
        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("texture_debug_pass".to_string()),
            color_attachments: vec![ColorAttachment {
                view: target_view,
                resolve_target: None,
                load_op: LoadOp::Load,
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
            timestamp_writes: None,
        });

        ctx.backend.set_render_pipeline(pipeline);
        ctx.backend.set_viewport(0.0, 0.0, width, height, 0.0, 1.0);
        ctx.backend.set_bind_group(0, input_group);
        ctx.backend.draw(0..6, 0..1);

        ctx.backend.end_render_pass();
        Ok(())
    }
}

impl RenderPass for TextureDebugPass {
    fn name(&self) -> &str {
        "Texture Debug"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.gbuffer_depth, ResourceUsage::TextureRead);
        ctx.read(self.shadow_map, ResourceUsage::TextureRead);
        ctx.read(self.light_diffuse, ResourceUsage::TextureRead);
        ctx.read(self.light_specular, ResourceUsage::TextureRead);
        ctx.read(self.ssao_raw, ResourceUsage::TextureRead);
        ctx.read(self.ssao_blurred, ResourceUsage::TextureRead);
        ctx.write(self.target, ResourceUsage::RenderTarget);
    }

    fn execute(&mut self, ctx: &mut PassExecuteContext) {
        if let Err(err) = self.record(ctx) {
            log::error!("texture debug pass failed: {err}");
        }
    }
}

/// Quad shader: corner positions built from the aspect ratio, source chosen
/// by uniform. G-buffer depth is linearized with the camera planes; the
/// orthographic shadow map is shown as stored.
pub const TEXTURE_DEBUG_SHADER: &str = r#"
struct DebugUniforms {
    params: vec4<f32>,
    source: vec4<u32>,
}

@group(0) @binding(0) var gbuffer_depth: texture_depth_2d;
@group(0) @binding(1) var shadow_map: texture_depth_2d;
@group(0) @binding(2) var light_diffuse: texture_2d<f32>;
@group(0) @binding(3) var light_specular: texture_2d<f32>;
@group(0) @binding(4) var occlusion_raw: texture_2d<f32>;
@group(0) @binding(5) var occlusion_blurred: texture_2d<f32>;
@group(0) @binding(6) var<uniform> debug: DebugUniforms;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    let top = -1.0 + 0.7 * debug.params.x;
    var positions = array<vec2<f32>, 6>(
        vec2<f32>(0.3, -1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(1.0, top),
        vec2<f32>(0.3, -1.0),
        vec2<f32>(1.0, top),
        vec2<f32>(0.3, top),
    );
    var uvs = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 0.0),
    );
    var out: VertexOutput;
    out.clip_position = vec4<f32>(positions[vertex_index], 0.0, 1.0);
    out.uv = uvs[vertex_index];
    return out;
}

const SOURCE_GBUFFER_DEPTH: u32 = 0u;
const SOURCE_SHADOW_MAP: u32 = 1u;
const SOURCE_LIGHT_DIFFUSE: u32 = 2u;
const SOURCE_LIGHT_SPECULAR: u32 = 3u;
const SOURCE_OCCLUSION_RAW: u32 = 4u;

fn tap_coord(uv: vec2<f32>, dims: vec2<u32>) -> vec2<i32> {
    let coord = vec2<i32>(uv * vec2<f32>(dims));
    return clamp(coord, vec2<i32>(0, 0), vec2<i32>(dims) - vec2<i32>(1, 1));
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let source = debug.source.x;

    if (source == SOURCE_GBUFFER_DEPTH) {
        let tap = tap_coord(in.uv, textureDimensions(gbuffer_depth));
        let depth = textureLoad(gbuffer_depth, tap, 0);
        let near = debug.params.y;
        let far = debug.params.z;
        let z_view = (near * far) / ((far - near) * depth - far);
        let linear = (-z_view - near) / (far - near);
        return vec4<f32>(linear, linear, linear, 1.0);
    }
    if (source == SOURCE_SHADOW_MAP) {
        let tap = tap_coord(in.uv, textureDimensions(shadow_map));
        let depth = textureLoad(shadow_map, tap, 0);
        return vec4<f32>(depth, depth, depth, 1.0);
    }
    if (source == SOURCE_LIGHT_DIFFUSE) {
        let tap = tap_coord(in.uv, textureDimensions(light_diffuse));
        return vec4<f32>(textureLoad(light_diffuse, tap, 0).rgb, 1.0);
    }
    if (source == SOURCE_LIGHT_SPECULAR) {
        let tap = tap_coord(in.uv, textureDimensions(light_specular));
        return vec4<f32>(textureLoad(light_specular, tap, 0).rgb, 1.0);
    }
    if (source == SOURCE_OCCLUSION_RAW) {
        let tap = tap_coord(in.uv, textureDimensions(occlusion_raw));
        let occ = textureLoad(occlusion_raw, tap, 0).r;
        return vec4<f32>(occ, occ, occ, 1.0);
    }

    let tap = tap_coord(in.uv, textureDimensions(occlusion_blurred));
    let occ = textureLoad(occlusion_blurred, tap, 0).r;
    return vec4<f32>(occ, occ, occ, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_uniforms_pack_params_then_source() {
        assert_eq!(std::mem::size_of::<DebugUniforms>(), 32);
        let uniforms = DebugUniforms {
            params: Vec4::new(16.0 / 9.0, 3.0, 300.0, 0.0),
            source: UVec4::new(4, 0, 0, 0),
        };
        let bytes = bytemuck::bytes_of(&uniforms);
        let source: UVec4 = bytemuck::pod_read_unaligned(&bytes[16..32]);
        assert_eq!(source.x, 4);
    }
}
