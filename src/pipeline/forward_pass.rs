//! Forward pass on top of the combined image: skybox and gizmos.
//!
//! Loads the swapchain and the G-buffer depth so forward geometry depth-tests
//! against the deferred scene. The skybox is a camera-centered cube with its
//! depth forced to the far plane, so it only fills background pixels. Gizmos
//! are an origin cube and one small sphere per point light, drawn instanced
//! from the same lights layout the volume pass uses. The pass always opens
//! its render pass, even with everything toggled off, so profiler scopes
//! stay balanced.

use crate::backend::{
    BackendResult, ColorAttachment, ColorTargetState, ColorWrites, CompareFunction, CullMode,
    DepthStencilAttachment, DepthStencilState, FrontFace, LoadOp, PrimitiveTopology,
    RenderPassDescriptor, RenderPipelineDescriptor, RenderPipelineHandle, StoreOp, TextureFormat,
    Vertex,
};
use crate::render_graph::{
    PassExecuteContext, PassSetupContext, RenderPass, ResourceId, ResourceUsage,
};
use crate::scene::MAX_POINT_LIGHTS;

pub struct ForwardPass {
    target: ResourceId,
    gbuffer_depth: ResourceId,
    skybox_pipeline: Option<RenderPipelineHandle>,
    gizmo_pipeline: Option<RenderPipelineHandle>,
}

impl ForwardPass {
    pub fn new(target: ResourceId, gbuffer_depth: ResourceId) -> Self {
        Self {
            target,
            gbuffer_depth,
            skybox_pipeline: None,
            gizmo_pipeline: None,
        }
    }

    fn record(&mut self, ctx: &mut PassExecuteContext) -> BackendResult<()> {
        let (Some(target_view), Some(depth_view)) = (
            ctx.get_texture(self.target),
            ctx.get_texture(self.gbuffer_depth),
        ) else {
            return Ok(());
        };

        let state = ctx.state;
        let settings = ctx.settings;

        // Forward geometry tests against deferred depth but never writes it;
        // the graph sees this pass as a depth reader only.
        let depth_state = DepthStencilState {
            format: TextureFormat::Depth32Float,
            depth_write_enabled: false,
            depth_compare: CompareFunction::LessEqual,
        };

        let skybox_pipeline = match self.skybox_pipeline {
            Some(pipeline) => pipeline,
            None => {
                let format = ctx.backend.swapchain_format();
                let pipeline = ctx.backend.create_render_pipeline(&RenderPipelineDescriptor {
                    label: Some("skybox_pipeline".to_string()),
                    vertex_shader: SKYBOX_SHADER.to_string(),
                    fragment_shader: Some(SKYBOX_SHADER.to_string()),
                    vertex_layouts: vec![Vertex::layout()],
                    bind_group_layouts: vec![state.camera_layout],
                    primitive_topology: PrimitiveTopology::TriangleList,
                    front_face: FrontFace::Ccw,
                    // The camera sits inside the cube.
                    cull_mode: CullMode::Front,
                    depth_stencil: Some(depth_state),
                    color_targets: vec![ColorTargetState {
                        format,
                        blend: None,
                        write_mask: ColorWrites::ALL,
                    }],
                })?;
                self.skybox_pipeline = Some(pipeline);
                pipeline
            }
        };

        let gizmo_pipeline = match self.gizmo_pipeline {
            Some(pipeline) => pipeline,
            None => {
                let format = ctx.backend.swapchain_format();
                let pipeline = ctx.backend.create_render_pipeline(&RenderPipelineDescriptor {
                    label: Some("gizmo_pipeline".to_string()),
                    vertex_shader: GIZMO_SHADER.to_string(),
                    fragment_shader: Some(GIZMO_SHADER.to_string()),
                    vertex_layouts: vec![Vertex::layout()],
                    bind_group_layouts: vec![state.camera_layout, state.lights_layout],
                    primitive_topology: PrimitiveTopology::TriangleList,
                    front_face: FrontFace::Ccw,
                    cull_mode: CullMode::Back,
                    depth_stencil: Some(depth_state),
                    color_targets: vec![ColorTargetState {
                        format,
                        blend: None,
                        write_mask: ColorWrites::ALL,
                    }],
                })?;
                self.gizmo_pipeline = Some(pipeline);
                pipeline
            }
        };

        let timestamp_writes = ctx.timestamp_writes("forward");
        let (width, height) = (ctx.width as f32, ctx.height as f32);
        let light_count = ctx.scene.point_lights.len().min(MAX_POINT_LIGHTS) as u32;

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("forward_pass".to_string()),
            color_attachments: vec![ColorAttachment {
                view: target_view,
                resolve_target: None,
                load_op: LoadOp::Load,
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: depth_view,
                depth_load_op: LoadOp::Load,
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
            timestamp_writes,
        });

        if settings.skybox || settings.gizmos {
            ctx.backend.set_viewport(0.0, 0.0, width, height, 0.0, 1.0);
        }

        if settings.skybox {
            ctx.backend.set_render_pipeline(skybox_pipeline);
            ctx.backend.set_bind_group(0, state.camera_bind_group);
            state.cube.draw_instanced(ctx.backend, 1);
        }

        if settings.gizmos {
            ctx.backend.set_render_pipeline(gizmo_pipeline);
            ctx.backend.set_bind_group(0, state.camera_bind_group);
            ctx.backend.set_bind_group(1, state.origin_marker_bind_group);
            state.cube.draw_instanced(ctx.backend, 1);

            if settings.point_lights && light_count > 0 {
                ctx.backend.set_bind_group(1, state.gizmo_lights_bind_group);
                state.sphere.draw_instanced(ctx.backend, light_count);
            }
        }

        ctx.backend.end_render_pass();
        Ok(())
    }
}

impl RenderPass for ForwardPass {
    fn name(&self) -> &str {
        "Forward Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.write(self.target, ResourceUsage::RenderTarget);
        ctx.read(self.gbuffer_depth, ResourceUsage::DepthStencilRead);
    }

    fn execute(&mut self, ctx: &mut PassExecuteContext) {
        if let Err(err) = self.record(ctx) {
            log::error!("forward pass failed: {err}");
        }
    }
}

/// Procedural gradient skybox. The cube follows the camera; `z = w` pins
/// the depth to the far plane so only background pixels pass LessEqual.
pub const SKYBOX_SHADER: &str = r#"
struct CameraUniforms {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_proj: mat4x4<f32>,
    inv_view: mat4x4<f32>,
    inv_proj: mat4x4<f32>,
    position: vec4<f32>,
    near_far: vec4<f32>,
}

@group(0) @binding(0) var<uniform> camera: CameraUniforms;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) direction: vec3<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> VertexOutput {
    let world = camera.position.xyz + position * 10.0;
    let clip = camera.view_proj * vec4<f32>(world, 1.0);
    var out: VertexOutput;
    out.clip_position = vec4<f32>(clip.xy, clip.w, clip.w);
    out.direction = position;
    return out;
}

const HORIZON_COLOR: vec3<f32> = vec3<f32>(0.16, 0.14, 0.13);
const ZENITH_COLOR: vec3<f32> = vec3<f32>(0.24, 0.42, 0.72);

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let dir = normalize(in.direction);
    let t = clamp(dir.y * 0.5 + 0.5, 0.0, 1.0);
    return vec4<f32>(mix(HORIZON_COLOR, ZENITH_COLOR, t), 1.0);
}
"#;

/// Marker shader shared by the origin cube and the light spheres: position,
/// color and scale per instance from a lights-layout uniform, with a fixed
/// key light for a little shape.
pub const GIZMO_SHADER: &str = r#"
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

@group(0) @binding(0) var<uniform> camera: CameraUniforms;
@group(1) @binding(0) var<uniform> markers: Lights;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) normal: vec3<f32>,
    @location(1) color: vec3<f32>,
}

@vertex
fn vs_main(
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @builtin(instance_index) instance: u32,
) -> VertexOutput {
    let marker = markers.data[instance];
    let world = marker.position.xyz + position * marker.scale.xyz;
    var out: VertexOutput;
    out.clip_position = camera.view_proj * vec4<f32>(world, 1.0);
    out.normal = normal;
    out.color = marker.color.rgb;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let key = normalize(vec3<f32>(0.4, 0.8, 0.45));
    let shade = 0.6 + 0.4 * max(dot(normalize(in.normal), key), 0.0);
    return vec4<f32>(in.color * shade, 1.0);
}
"#;
