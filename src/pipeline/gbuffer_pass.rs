//! Geometry pass filling the G-buffer.
//!
//! One draw per model into two color targets plus depth: octahedral-encoded
//! view-space normals in `Rg8Unorm`, albedo and specular intensity in
//! `Rgba8Unorm`. Later screen-space passes reconstruct view positions from
//! the depth target, so nothing else is stored.

use crate::backend::{
    BackendResult, BlendState, ColorAttachment, ColorTargetState, ColorWrites, CompareFunction,
    CullMode, DepthStencilAttachment, DepthStencilState, FrontFace, LoadOp, PrimitiveTopology,
    RenderPassDescriptor, RenderPipelineDescriptor, RenderPipelineHandle, StoreOp, TextureFormat,
    Vertex,
};
use crate::render_graph::{
    PassExecuteContext, PassSetupContext, RenderPass, ResourceId, ResourceUsage,
};

pub struct GbufferPass {
    normal_target: ResourceId,
    albedo_target: ResourceId,
    depth_target: ResourceId,
    pipeline: Option<RenderPipelineHandle>,
}

impl GbufferPass {
    pub fn new(
        normal_target: ResourceId,
        albedo_target: ResourceId,
        depth_target: ResourceId,
    ) -> Self {
        Self {
            normal_target,
            albedo_target,
            depth_target,
            pipeline: None,
        }
    }

    fn record(&mut self, ctx: &mut PassExecuteContext) -> BackendResult<()> {
        let (Some(normal_view), Some(albedo_view), Some(depth_view)) = (
            ctx.get_texture(self.normal_target),
            ctx.get_texture(self.albedo_target),
            ctx.get_texture(self.depth_target),
        ) else {
            return Ok(());
        };

        let state = ctx.state;

        let pipeline = match self.pipeline {
            Some(pipeline) => pipeline,
            None => {
                let pipeline = ctx.backend.create_render_pipeline(&RenderPipelineDescriptor {
                    label: Some("gbuffer_pipeline".to_string()),
                    vertex_shader: GBUFFER_SHADER.to_string(),
                    fragment_shader: Some(GBUFFER_SHADER.to_string()),
                    vertex_layouts: vec![Vertex::layout()],
                    bind_group_layouts: vec![
                        state.camera_layout,
                        state.object_layout,
                        state.material_layout,
                    ],
                    primitive_topology: PrimitiveTopology::TriangleList,
                    front_face: FrontFace::Ccw,
                    cull_mode: CullMode::Back,
                    depth_stencil: Some(DepthStencilState {
                        format: TextureFormat::Depth32Float,
                        depth_write_enabled: true,
                        depth_compare: CompareFunction::Less,
                    }),
                    color_targets: vec![
                        ColorTargetState {
                            format: TextureFormat::Rg8Unorm,
                            blend: None::<BlendState>,
                            write_mask: ColorWrites::ALL,
                        },
                        ColorTargetState {
                            format: TextureFormat::Rgba8Unorm,
                            blend: None,
                            write_mask: ColorWrites::ALL,
                        },
                    ],
                })?;
                self.pipeline = Some(pipeline);
                pipeline
            }
        };

        let timestamp_writes = ctx.timestamp_writes("gbuffer");
        let (width, height) = (ctx.width as f32, ctx.height as f32);

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("gbuffer_pass".to_string()),
            color_attachments: vec![
                ColorAttachment {
                    view: normal_view,
                    resolve_target: None,
                    load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                    store_op: StoreOp::Store,
                },
                ColorAttachment {
                    view: albedo_view,
                    resolve_target: None,
                    load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                    store_op: StoreOp::Store,
                },
            ],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth_view,
                depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
            timestamp_writes,
        });

        if !state.models.is_empty() {
            ctx.backend.set_render_pipeline(pipeline);
            ctx.backend.set_viewport(0.0, 0.0, width, height, 0.0, 1.0);
            ctx.backend.set_bind_group(0, state.camera_bind_group);
            for model in &state.models {
                model.draw(ctx.backend, false);
            }
        }

        ctx.backend.end_render_pass();
        Ok(())
    }
}

impl RenderPass for GbufferPass {
    fn name(&self) -> &str {
        "Geometry Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.write(self.normal_target, ResourceUsage::RenderTarget);
        ctx.write(self.albedo_target, ResourceUsage::RenderTarget);
        ctx.write(self.depth_target, ResourceUsage::DepthStencilWrite);
    }

    fn execute(&mut self, ctx: &mut PassExecuteContext) {
        if let Err(err) = self.record(ctx) {
            log::error!("gbuffer pass failed: {err}");
        }
    }
}

/// Geometry shader writing the two G-buffer targets.
///
/// Normals leave the vertex stage in view space; the fragment stage applies
/// tangent-space normal mapping when the material carries a normal map and
/// octahedral-encodes the result into two channels.
pub const GBUFFER_SHADER: &str = r#"
struct CameraUniforms {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_proj: mat4x4<f32>,
    inv_view: mat4x4<f32>,
    inv_proj: mat4x4<f32>,
    position: vec4<f32>,
    near_far: vec4<f32>,
}

struct ObjectUniforms {
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
}

struct MaterialUniforms {
    ambient_color: vec4<f32>,
    diffuse_color: vec4<f32>,
    specular_color: vec4<f32>,
    params: vec4<f32>,
    flags: vec4<u32>,
}

@group(0) @binding(0) var<uniform> camera: CameraUniforms;
@group(1) @binding(0) var<uniform> object: ObjectUniforms;
@group(2) @binding(0) var<uniform> material: MaterialUniforms;
@group(2) @binding(1) var material_sampler: sampler;
@group(2) @binding(2) var ambient_map: texture_2d<f32>;
@group(2) @binding(3) var diffuse_map: texture_2d<f32>;
@group(2) @binding(4) var specular_map: texture_2d<f32>;
@group(2) @binding(5) var normal_map: texture_2d<f32>;
@group(2) @binding(6) var bump_map: texture_2d<f32>;
@group(2) @binding(7) var dissolve_map: texture_2d<f32>;
@group(2) @binding(8) var emissive_map: texture_2d<f32>;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) view_normal: vec3<f32>,
    @location(1) view_tangent: vec4<f32>,
    @location(2) uv: vec2<f32>,
}

@vertex
fn vs_main(
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
) -> VertexOutput {
    var out: VertexOutput;
    let world = object.model * vec4<f32>(position, 1.0);
    out.clip_position = camera.view_proj * world;
    out.view_normal = (camera.view * object.normal_matrix * vec4<f32>(normal, 0.0)).xyz;
    out.view_tangent = vec4<f32>(
        (camera.view * object.model * vec4<f32>(tangent.xyz, 0.0)).xyz,
        tangent.w,
    );
    out.uv = uv;
    return out;
}

fn sign_not_zero(v: vec2<f32>) -> vec2<f32> {
    return vec2<f32>(
        select(-1.0, 1.0, v.x >= 0.0),
        select(-1.0, 1.0, v.y >= 0.0),
    );
}

// Octahedral mapping: unit vector to [0, 1]^2, storable in two unorm
// channels.
fn octahedral_encode(n: vec3<f32>) -> vec2<f32> {
    let p = n.xy / (abs(n.x) + abs(n.y) + abs(n.z));
    var e = p;
    if (n.z < 0.0) {
        e = (1.0 - abs(p.yx)) * sign_not_zero(p);
    }
    return e * 0.5 + 0.5;
}

struct FragmentOutput {
    @location(0) normal: vec4<f32>,
    @location(1) albedo: vec4<f32>,
}

const HAS_DIFFUSE_MAP: u32 = 2u;
const HAS_SPECULAR_MAP: u32 = 4u;
const HAS_NORMAL_MAP: u32 = 8u;
const HAS_DISSOLVE_MAP: u32 = 32u;

@fragment
fn fs_main(in: VertexOutput) -> FragmentOutput {
    var albedo = material.diffuse_color.rgb;
    if ((material.flags.x & HAS_DIFFUSE_MAP) != 0u) {
        albedo = albedo * textureSample(diffuse_map, material_sampler, in.uv).rgb;
    }

    var specular = material.specular_color.r;
    if ((material.flags.x & HAS_SPECULAR_MAP) != 0u) {
        specular = textureSample(specular_map, material_sampler, in.uv).r;
    }

    var normal = normalize(in.view_normal);
    if ((material.flags.x & HAS_NORMAL_MAP) != 0u) {
        let sampled = textureSample(normal_map, material_sampler, in.uv).xyz * 2.0 - 1.0;
        var tangent = in.view_tangent.xyz;
        tangent = normalize(tangent - normal * dot(normal, tangent));
        let bitangent = cross(normal, tangent) * in.view_tangent.w;
        normal = normalize(
            tangent * sampled.x + bitangent * sampled.y + normal * sampled.z,
        );
    }

    var alpha = material.params.y;
    if ((material.flags.x & HAS_DISSOLVE_MAP) != 0u) {
        alpha = alpha * textureSample(dissolve_map, material_sampler, in.uv).r;
    }
    if (alpha < 0.5) {
        discard;
    }

    var out: FragmentOutput;
    out.normal = vec4<f32>(octahedral_encode(normal), 0.0, 1.0);
    out.albedo = vec4<f32>(albedo, specular);
    return out;
}
"#;
