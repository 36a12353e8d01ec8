//! Deferred combine: resolves the G-buffer, shadow map, light accumulation
//! and occlusion targets into the swapchain.
//!
//! Directional Blinn-Phong with an orthographic shadow lookup (hard or 3x3
//! PCF), point-light terms added from the accumulation targets, ambient
//! scaled by occlusion. A draw-mode switch can short-circuit the resolve to
//! visualize one intermediate term instead.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec4, Vec4};

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

/// Everything the combine shader needs beyond the camera.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct CombineUniforms {
    light_view_proj: Mat4,
    /// xyz = world-space direction of light travel, w = shadow map texel size
    light_direction: Vec4,
    /// x = ambient, y = diffuse, z = specular scale, w = shininess exponent
    scales: Vec4,
    /// x = draw mode, y = shadow filter, z = shadows on, w = occlusion on
    flags: UVec4,
}

type CachedViews = (
    TextureViewHandle,
    TextureViewHandle,
    TextureViewHandle,
    TextureViewHandle,
    TextureViewHandle,
    TextureViewHandle,
    TextureViewHandle,
);

pub struct CombinePass {
    gbuffer_depth: ResourceId,
    gbuffer_normal: ResourceId,
    gbuffer_albedo: ResourceId,
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

impl CombinePass {
    pub fn new(resources: &DeferredResources) -> Self {
        Self {
            gbuffer_depth: resources.gbuffer_depth,
            gbuffer_normal: resources.gbuffer_normal,
            gbuffer_albedo: resources.gbuffer_albedo,
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
        let (
            Some(depth_view),
            Some(normal_view),
            Some(albedo_view),
            Some(shadow_view),
            Some(diffuse_view),
            Some(specular_view),
            Some(target_view),
        ) = (
            ctx.get_texture(self.gbuffer_depth),
            ctx.get_texture(self.gbuffer_normal),
            ctx.get_texture(self.gbuffer_albedo),
            ctx.get_texture(self.shadow_map),
            ctx.get_texture(self.light_diffuse),
            ctx.get_texture(self.light_specular),
            ctx.get_texture(self.target),
        )
        else {
            return Ok(());
        };

        let state = ctx.state;
        let settings = ctx.settings;

        // The blur toggle swaps which occlusion target feeds the resolve.
        let occlusion_resource = if settings.ssao_blur {
            self.ssao_blurred
        } else {
            self.ssao_raw
        };
        let Some(occlusion_view) = ctx.get_texture(occlusion_resource) else {
            return Ok(());
        };

        let uniform_buffer = match self.uniform_buffer {
            Some(buffer) => buffer,
            None => {
                let buffer = ctx.backend.create_buffer(&BufferDescriptor {
                    label: Some("combine_uniforms".to_string()),
                    size: std::mem::size_of::<CombineUniforms>() as u64,
                    usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                    mapped_at_creation: false,
                })?;
                self.uniform_buffer = Some(buffer);
                buffer
            }
        };

        let shadow_texel = 1.0 / settings.shadow_resolution.size() as f32;
        let uniforms = CombineUniforms {
            light_view_proj: ctx.frame.light_camera.view_proj,
            light_direction: ctx
                .scene
                .directional_light
                .direction()
                .extend(shadow_texel),
            scales: Vec4::new(
                settings.lighting.ambient,
                settings.lighting.diffuse,
                settings.lighting.specular,
                settings.lighting.shininess,
            ),
            flags: UVec4::new(
                settings.draw_mode as u32,
                settings.shadow_filter as u32,
                settings.shadows as u32,
                settings.ssao as u32,
            ),
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
                    texture(1, TextureSampleType::Float { filterable: true }),
                    texture(2, TextureSampleType::Float { filterable: true }),
                    texture(3, TextureSampleType::Depth),
                    BindGroupLayoutEntry {
                        binding: 4,
                        visibility: ShaderStageFlags::FRAGMENT,
                        ty: BindingType::Sampler { comparison: true },
                    },
                    texture(5, TextureSampleType::Float { filterable: true }),
                    texture(6, TextureSampleType::Float { filterable: true }),
                    texture(7, TextureSampleType::Float { filterable: true }),
                    BindGroupLayoutEntry {
                        binding: 8,
                        visibility: ShaderStageFlags::FRAGMENT,
                        ty: BindingType::UniformBuffer,
                    },
                ])?;
                self.input_layout = Some(layout);
                layout
            }
        };

        let views = (
            depth_view,
            normal_view,
            albedo_view,
            shadow_view,
            diffuse_view,
            specular_view,
            occlusion_view,
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
                        (1, BindGroupEntry::Texture(normal_view)),
                        (2, BindGroupEntry::Texture(albedo_view)),
                        (3, BindGroupEntry::Texture(shadow_view)),
                        (4, BindGroupEntry::Sampler(state.shadow_sampler)),
                        (5, BindGroupEntry::Texture(diffuse_view)),
                        (6, BindGroupEntry::Texture(specular_view)),
                        (7, BindGroupEntry::Texture(occlusion_view)),
                        (
                            8,
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
                    label: Some("combine_pipeline".to_string()),
                    vertex_shader: COMBINE_SHADER.to_string(),
                    fragment_shader: Some(COMBINE_SHADER.to_string()),
                    vertex_layouts: vec![],
                    bind_group_layouts: vec![state.camera_layout, input_layout],
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

        let timestamp_writes = ctx.timestamp_writes("combine");
        let (width, height) = (ctx.width as f32, ctx.height as f32);

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("combine_pass".to_string()),
            color_attachments: vec![ColorAttachment {
                view: target_view,
                resolve_target: None,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
            timestamp_writes,
        });

        ctx.backend.set_render_pipeline(pipeline);
        ctx.backend.set_viewport(0.0, 0.0, width, height, 0.0, 1.0);
        ctx.backend.set_bind_group(0, state.camera_bind_group);
        ctx.backend.set_bind_group(1, input_group);
        ctx.backend.draw(0..3, 0..1);

        ctx.backend.end_render_pass();
        Ok(())
    }
}

impl RenderPass for CombinePass {
    fn name(&self) -> &str {
        "Lighting Combine"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.gbuffer_depth, ResourceUsage::TextureRead);
        ctx.read(self.gbuffer_normal, ResourceUsage::TextureRead);
        ctx.read(self.gbuffer_albedo, ResourceUsage::TextureRead);
        ctx.read(self.shadow_map, ResourceUsage::TextureRead);
        ctx.read(self.light_diffuse, ResourceUsage::TextureRead);
        ctx.read(self.light_specular, ResourceUsage::TextureRead);
        ctx.read(self.ssao_raw, ResourceUsage::TextureRead);
        ctx.read(self.ssao_blurred, ResourceUsage::TextureRead);
        ctx.write(self.target, ResourceUsage::RenderTarget);
    }

    fn execute(&mut self, ctx: &mut PassExecuteContext) {
        if let Err(err) = self.record(ctx) {
            log::error!("combine pass failed: {err}");
        }
    }
}

/// Fullscreen resolve shader.
///
/// Out-of-range shadow lookups count as lit, matching the orthographic
/// frustum being fitted to the view: anything outside it is beyond what the
/// map can answer. Comparison sampling uses the explicit-level variant, so
/// it is legal after the early returns of the draw-mode switch.
pub const COMBINE_SHADER: &str = r#"
struct CameraUniforms {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_proj: mat4x4<f32>,
    inv_view: mat4x4<f32>,
    inv_proj: mat4x4<f32>,
    position: vec4<f32>,
    near_far: vec4<f32>,
}

struct CombineUniforms {
    light_view_proj: mat4x4<f32>,
    light_direction: vec4<f32>,
    scales: vec4<f32>,
    flags: vec4<u32>,
}

@group(0) @binding(0) var<uniform> camera: CameraUniforms;
@group(1) @binding(0) var gbuffer_depth: texture_depth_2d;
@group(1) @binding(1) var gbuffer_normal: texture_2d<f32>;
@group(1) @binding(2) var gbuffer_albedo: texture_2d<f32>;
@group(1) @binding(3) var shadow_map: texture_depth_2d;
@group(1) @binding(4) var shadow_sampler: sampler_comparison;
@group(1) @binding(5) var light_diffuse: texture_2d<f32>;
@group(1) @binding(6) var light_specular: texture_2d<f32>;
@group(1) @binding(7) var occlusion_texture: texture_2d<f32>;
@group(1) @binding(8) var<uniform> combine: CombineUniforms;

const DRAW_MODE_SHADED: u32 = 0u;
const DRAW_MODE_ALBEDO: u32 = 1u;
const DRAW_MODE_NORMALS: u32 = 2u;
const DRAW_MODE_SPECULAR: u32 = 3u;
const DRAW_MODE_AMBIENT_OCCLUSION: u32 = 4u;
const DRAW_MODE_DEPTH: u32 = 5u;
const DRAW_MODE_SHADOW_MAP: u32 = 6u;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    var out: VertexOutput;
    out.clip_position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(x, 1.0 - y);
    return out;
}

fn sign_not_zero(v: vec2<f32>) -> vec2<f32> {
    return vec2<f32>(
        select(-1.0, 1.0, v.x >= 0.0),
        select(-1.0, 1.0, v.y >= 0.0),
    );
}

fn octahedral_decode(f: vec2<f32>) -> vec3<f32> {
    let e = f * 2.0 - 1.0;
    var n = vec3<f32>(e.x, e.y, 1.0 - abs(e.x) - abs(e.y));
    let t = clamp(-n.z, 0.0, 1.0);
    n.x = n.x - select(-t, t, n.x >= 0.0);
    n.y = n.y - select(-t, t, n.y >= 0.0);
    return normalize(n);
}

fn view_position(uv: vec2<f32>, depth: f32) -> vec3<f32> {
    let ndc = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth, 1.0);
    let view = camera.inv_proj * ndc;
    return view.xyz / view.w;
}

fn shadow_factor(view_pos: vec3<f32>) -> f32 {
    let world = camera.inv_view * vec4<f32>(view_pos, 1.0);
    let light_clip = combine.light_view_proj * world;
    let ndc = light_clip.xyz / light_clip.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);

    // Outside the fitted light frustum there is no shadow information;
    // treat those fragments as lit.
    if (uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0
        || ndc.z < 0.0 || ndc.z > 1.0) {
        return 1.0;
    }

    if (combine.flags.y == 0u) {
        return textureSampleCompareLevel(shadow_map, shadow_sampler, uv, ndc.z);
    }

    let texel = combine.light_direction.w;
    var sum = 0.0;
    for (var x = -1; x <= 1; x = x + 1) {
        for (var y = -1; y <= 1; y = y + 1) {
            let offset = vec2<f32>(f32(x), f32(y)) * texel;
            sum = sum + textureSampleCompareLevel(
                shadow_map, shadow_sampler, uv + offset, ndc.z,
            );
        }
    }
    return sum / 9.0;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let coord = vec2<i32>(in.clip_position.xy);
    let depth = textureLoad(gbuffer_depth, coord, 0);
    let mode = combine.flags.x;

    // Modes that map the whole screen run before the background early-out.
    if (mode == DRAW_MODE_SHADOW_MAP) {
        let dims = vec2<f32>(textureDimensions(shadow_map));
        let tap = vec2<i32>(in.uv * dims);
        let stored = textureLoad(shadow_map, tap, 0);
        return vec4<f32>(stored, stored, stored, 1.0);
    }
    if (mode == DRAW_MODE_AMBIENT_OCCLUSION) {
        let occ = textureLoad(occlusion_texture, coord, 0).r;
        return vec4<f32>(occ, occ, occ, 1.0);
    }
    if (mode == DRAW_MODE_DEPTH) {
        let near = camera.near_far.x;
        let far = camera.near_far.y;
        let z_view = (near * far) / ((far - near) * depth - far);
        let linear = (-z_view - near) / (far - near);
        return vec4<f32>(linear, linear, linear, 1.0);
    }

    if (depth >= 1.0) {
        return vec4<f32>(0.0, 0.0, 0.0, 1.0);
    }

    let albedo_spec = textureLoad(gbuffer_albedo, coord, 0);
    let normal = octahedral_decode(textureLoad(gbuffer_normal, coord, 0).rg);

    if (mode == DRAW_MODE_ALBEDO) {
        return vec4<f32>(albedo_spec.rgb, 1.0);
    }
    if (mode == DRAW_MODE_NORMALS) {
        return vec4<f32>(normal * 0.5 + 0.5, 1.0);
    }
    if (mode == DRAW_MODE_SPECULAR) {
        return vec4<f32>(vec3<f32>(albedo_spec.a), 1.0);
    }

    let view_pos = view_position(in.uv, depth);

    var occlusion = 1.0;
    if (combine.flags.w != 0u) {
        occlusion = textureLoad(occlusion_texture, coord, 0).r;
    }

    let l = normalize((camera.view * vec4<f32>(-combine.light_direction.xyz, 0.0)).xyz);
    let n_dot_l = max(dot(normal, l), 0.0);
    let v = normalize(-view_pos);
    let h = normalize(l + v);
    var specular = pow(max(dot(normal, h), 0.0), combine.scales.w);
    specular = specular * select(0.0, 1.0, n_dot_l > 0.0);

    var shadow = 1.0;
    if (combine.flags.z != 0u) {
        shadow = shadow_factor(view_pos);
    }

    let point_diffuse = textureLoad(light_diffuse, coord, 0).rgb;
    let point_specular = textureLoad(light_specular, coord, 0).rgb;

    let ambient = combine.scales.x * albedo_spec.rgb * occlusion;
    let direct = shadow
        * (combine.scales.y * n_dot_l * albedo_spec.rgb
            + vec3<f32>(combine.scales.z * specular * albedo_spec.a));
    let point = combine.scales.y * point_diffuse * albedo_spec.rgb
        + combine.scales.z * point_specular * albedo_spec.a;

    return vec4<f32>(ambient + direct + point, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_uniforms_are_tightly_packed() {
        // mat4 + three vec4s, no implicit padding.
        assert_eq!(std::mem::size_of::<CombineUniforms>(), 112);

        let uniforms = CombineUniforms {
            light_view_proj: Mat4::IDENTITY,
            light_direction: Vec4::new(0.0, -1.0, 0.0, 1.0 / 4096.0),
            scales: Vec4::new(0.3, 1.0, 1.0, 20.0),
            flags: UVec4::new(0, 1, 1, 1),
        };
        let bytes = bytemuck::bytes_of(&uniforms);
        assert_eq!(bytes.len(), 112);
        // Flags land in the last 16 bytes.
        let flags: UVec4 = bytemuck::pod_read_unaligned(&bytes[96..112]);
        assert_eq!(flags, UVec4::new(0, 1, 1, 1));
    }
}
