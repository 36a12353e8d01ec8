//! Instanced point-light volumes accumulating into two lighting targets.
//!
//! Every point light is drawn as one instance of a unit sphere scaled by the
//! light's volume scale. Fragments covered by a volume read G-buffer depth
//! and normals, evaluate Blinn-Phong for that light and add the diffuse and
//! specular terms into separate accumulation targets with additive blending.
//! Front faces are culled so the volume still shades when the camera is
//! inside it, and the pass has no depth attachment.

use bytemuck::{Pod, Zeroable};
use glam::Vec4;

use crate::backend::{
    BackendResult, BindGroupEntry, BindGroupHandle, BindGroupLayoutEntry, BindGroupLayoutHandle,
    BindingType, BlendState, BufferDescriptor, BufferHandle, BufferUsage, ColorAttachment,
    ColorTargetState, ColorWrites, CullMode, FrontFace, LoadOp, PrimitiveTopology,
    RenderPassDescriptor, RenderPipelineDescriptor, RenderPipelineHandle, ShaderStageFlags,
    StoreOp, TextureFormat, TextureSampleType, TextureViewHandle, Vertex,
};
use crate::render_graph::{
    PassExecuteContext, PassSetupContext, RenderPass, ResourceId, ResourceUsage,
};
use crate::scene::MAX_POINT_LIGHTS;

/// Per-frame shading parameters for the volume fragment shader.
/// x = shininess exponent, yzw unused.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct VolumeParams {
    params: Vec4,
}

pub struct LightVolumePass {
    gbuffer_depth: ResourceId,
    gbuffer_normal: ResourceId,
    diffuse_target: ResourceId,
    specular_target: ResourceId,
    pipeline: Option<RenderPipelineHandle>,
    input_layout: Option<BindGroupLayoutHandle>,
    params_buffer: Option<BufferHandle>,
    input_group: Option<BindGroupHandle>,
    cached_views: Option<(TextureViewHandle, TextureViewHandle)>,
}

impl LightVolumePass {
    pub fn new(
        gbuffer_depth: ResourceId,
        gbuffer_normal: ResourceId,
        diffuse_target: ResourceId,
        specular_target: ResourceId,
    ) -> Self {
        Self {
            gbuffer_depth,
            gbuffer_normal,
            diffuse_target,
            specular_target,
            pipeline: None,
            input_layout: None,
            params_buffer: None,
            input_group: None,
            cached_views: None,
        }
    }

    fn record(&mut self, ctx: &mut PassExecuteContext) -> BackendResult<()> {
        let (Some(depth_view), Some(normal_view), Some(diffuse_view), Some(specular_view)) = (
            ctx.get_texture(self.gbuffer_depth),
            ctx.get_texture(self.gbuffer_normal),
            ctx.get_texture(self.diffuse_target),
            ctx.get_texture(self.specular_target),
        ) else {
            return Ok(());
        };

        let state = ctx.state;
        let settings = ctx.settings;

        let input_layout = match self.input_layout {
            Some(layout) => layout,
            None => {
                let layout = ctx.backend.create_bind_group_layout(&[
                    BindGroupLayoutEntry {
                        binding: 0,
                        visibility: ShaderStageFlags::FRAGMENT,
                        ty: BindingType::Texture {
                            sample_type: TextureSampleType::Depth,
                        },
                    },
                    BindGroupLayoutEntry {
                        binding: 1,
                        visibility: ShaderStageFlags::FRAGMENT,
                        ty: BindingType::Texture {
                            sample_type: TextureSampleType::Float { filterable: true },
                        },
                    },
                    BindGroupLayoutEntry {
                        binding: 2,
                        visibility: ShaderStageFlags::FRAGMENT,
                        ty: BindingType::UniformBuffer,
                    },
                ])?;
                self.input_layout = Some(layout);
                layout
            }
        };

        let params_buffer = match self.params_buffer {
            Some(buffer) => buffer,
            None => {
                let buffer = ctx.backend.create_buffer(&BufferDescriptor {
                    label: Some("light_volume_params".to_string()),
                    size: std::mem::size_of::<VolumeParams>() as u64,
                    usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                    mapped_at_creation: false,
                })?;
                self.params_buffer = Some(buffer);
                buffer
            }
        };

        let params = VolumeParams {
            params: Vec4::new(settings.lighting.shininess, 0.0, 0.0, 0.0),
        };
        ctx.backend
            .write_buffer(params_buffer, 0, bytemuck::bytes_of(&params));

        // G-buffer views change on resize; rebuild the input group when they
        // do.
        let input_group = match self.input_group {
            Some(group) if self.cached_views == Some((depth_view, normal_view)) => group,
            _ => {
                if let Some(old) = self.input_group.take() {
                    ctx.backend.destroy_bind_group(old);
                }
                let group = ctx.backend.create_bind_group(
                    input_layout,
                    &[
                        (0, BindGroupEntry::Texture(depth_view)),
                        (1, BindGroupEntry::Texture(normal_view)),
                        (
                            2,
                            BindGroupEntry::Buffer {
                                buffer: params_buffer,
                                offset: 0,
                                size: None,
                            },
                        ),
                    ],
                )?;
                self.input_group = Some(group);
                self.cached_views = Some((depth_view, normal_view));
                group
            }
        };

        let pipeline = match self.pipeline {
            Some(pipeline) => pipeline,
            None => {
                let pipeline = ctx.backend.create_render_pipeline(&RenderPipelineDescriptor {
                    label: Some("light_volume_pipeline".to_string()),
                    vertex_shader: LIGHT_VOLUME_SHADER.to_string(),
                    fragment_shader: Some(LIGHT_VOLUME_SHADER.to_string()),
                    vertex_layouts: vec![Vertex::layout()],
                    bind_group_layouts: vec![state.camera_layout, state.lights_layout, input_layout],
                    primitive_topology: PrimitiveTopology::TriangleList,
                    front_face: FrontFace::Ccw,
                    cull_mode: CullMode::Front,
                    depth_stencil: None,
                    color_targets: vec![
                        ColorTargetState {
                            format: TextureFormat::Rgba8Unorm,
                            blend: Some(BlendState::additive()),
                            write_mask: ColorWrites::ALL,
                        },
                        ColorTargetState {
                            format: TextureFormat::Rgba8Unorm,
                            blend: Some(BlendState::additive()),
                            write_mask: ColorWrites::ALL,
                        },
                    ],
                })?;
                self.pipeline = Some(pipeline);
                pipeline
            }
        };

        let timestamp_writes = ctx.timestamp_writes("light_volumes");
        let (width, height) = (ctx.width as f32, ctx.height as f32);
        let light_count = ctx.scene.point_lights.len().min(MAX_POINT_LIGHTS) as u32;

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("light_volume_pass".to_string()),
            color_attachments: vec![
                ColorAttachment {
                    view: diffuse_view,
                    resolve_target: None,
                    load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                    store_op: StoreOp::Store,
                },
                ColorAttachment {
                    view: specular_view,
                    resolve_target: None,
                    load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                    store_op: StoreOp::Store,
                },
            ],
            depth_stencil_attachment: None,
            timestamp_writes,
        });

        // Accumulation targets are cleared even with point lights disabled so
        // the combine pass always reads zero contribution.
        if settings.point_lights && light_count > 0 {
            ctx.backend.set_render_pipeline(pipeline);
            ctx.backend.set_viewport(0.0, 0.0, width, height, 0.0, 1.0);
            ctx.backend.set_bind_group(0, state.camera_bind_group);
            ctx.backend.set_bind_group(1, state.lights_bind_group);
            ctx.backend.set_bind_group(2, input_group);
            state.sphere.draw_instanced(ctx.backend, light_count);
        }

        ctx.backend.end_render_pass();
        Ok(())
    }
}

impl RenderPass for LightVolumePass {
    fn name(&self) -> &str {
        "Light Volumes"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.gbuffer_depth, ResourceUsage::TextureRead);
        ctx.read(self.gbuffer_normal, ResourceUsage::TextureRead);
        ctx.write(self.diffuse_target, ResourceUsage::RenderTarget);
        ctx.write(self.specular_target, ResourceUsage::RenderTarget);
    }

    fn execute(&mut self, ctx: &mut PassExecuteContext) {
        if let Err(err) = self.record(ctx) {
            log::error!("light volume pass failed: {err}");
        }
    }
}

/// Sphere-volume shader. The vertex stage places one sphere instance per
/// light, indexed by `instance_index` into the lights uniform; the fragment
/// stage shades the G-buffer sample under each covered pixel.
pub const LIGHT_VOLUME_SHADER: &str = r#"
struct CameraUniforms {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_proj: mat4x4<f32>,
    inv_view: mat4x4<f32>,
    inv_proj: mat4x4<f32>,
    position: vec4<f32>,
    near_far: vec4<f32>,
}

struct PointLight {
    position: vec4<f32>,
    color: vec4<f32>,
    scale: vec4<f32>,
}

struct Lights {
    count: vec4<u32>,
    data: array<PointLight, 64>,
}

struct VolumeParams {
    params: vec4<f32>,
}

@group(0) @binding(0) var<uniform> camera: CameraUniforms;
@group(1) @binding(0) var<uniform> lights: Lights;
@group(2) @binding(0) var gbuffer_depth: texture_depth_2d;
@group(2) @binding(1) var gbuffer_normal: texture_2d<f32>;
@group(2) @binding(2) var<uniform> volume: VolumeParams;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) @interpolate(flat) light_index: u32,
}

@vertex
fn vs_main(
    @location(0) position: vec3<f32>,
    @builtin(instance_index) instance: u32,
) -> VertexOutput {
    let light = lights.data[instance];
    let world = light.position.xyz + position * light.scale.xyz;
    var out: VertexOutput;
    out.clip_position = camera.view_proj * vec4<f32>(world, 1.0);
    out.light_index = instance;
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

struct FragmentOutput {
    @location(0) diffuse: vec4<f32>,
    @location(1) specular: vec4<f32>,
}

@fragment
fn fs_main(in: VertexOutput) -> FragmentOutput {
    let coord = vec2<i32>(in.clip_position.xy);
    let depth = textureLoad(gbuffer_depth, coord, 0);
    if (depth >= 1.0) {
        discard;
    }

    let dims = vec2<f32>(textureDimensions(gbuffer_depth));
    let uv = in.clip_position.xy / dims;
    let frag_pos = view_position(uv, depth);
    let normal = octahedral_decode(textureLoad(gbuffer_normal, coord, 0).rg);

    let light = lights.data[in.light_index];
    let light_pos = (camera.view * vec4<f32>(light.position.xyz, 1.0)).xyz;
    let to_light = light_pos - frag_pos;
    let distance = length(to_light);

    // The sphere mesh has radius 0.5, so the lit radius is half the volume
    // scale.
    let radius = light.scale.x * 0.5;
    var attenuation = max(0.0, 1.0 - distance / radius);
    attenuation = attenuation * attenuation;

    let l = normalize(to_light);
    let n_dot_l = max(dot(normal, l), 0.0);
    let v = normalize(-frag_pos);
    let h = normalize(l + v);
    var specular = pow(max(dot(normal, h), 0.0), volume.params.x);
    specular = specular * select(0.0, 1.0, n_dot_l > 0.0);

    var out: FragmentOutput;
    out.diffuse = vec4<f32>(light.color.rgb * n_dot_l * attenuation, 1.0);
    out.specular = vec4<f32>(light.color.rgb * specular * attenuation, 1.0);
    return out;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_params_are_one_vec4() {
        assert_eq!(std::mem::size_of::<VolumeParams>(), 16);
        let params = VolumeParams {
            params: Vec4::new(20.0, 0.0, 0.0, 0.0),
        };
        let bytes = bytemuck::bytes_of(&params);
        assert_eq!(bytes.len(), 16);
        assert_eq!(bytemuck::pod_read_unaligned::<f32>(&bytes[0..4]), 20.0);
    }
}
