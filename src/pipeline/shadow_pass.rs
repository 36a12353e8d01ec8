//! Directional-light shadow map pass.
//!
//! Renders scene depth from the light's point of view into a square
//! `Depth32Float` map. The light camera is an orthographic frustum fitted
//! around the view frustum each frame, so the map is cleared and redrawn
//! every frame. Front faces are culled so the map stores back-face depth,
//! which avoids acne on surfaces facing the light.

use crate::backend::{
    BackendResult, CompareFunction, CullMode, DepthStencilAttachment, DepthStencilState, FrontFace,
    LoadOp, PrimitiveTopology, RenderPassDescriptor, RenderPipelineDescriptor,
    RenderPipelineHandle, StoreOp, TextureFormat, Vertex,
};
use crate::render_graph::{
    PassExecuteContext, PassSetupContext, RenderPass, ResourceId, ResourceUsage,
};

pub struct ShadowPass {
    shadow_map: ResourceId,
    pipeline: Option<RenderPipelineHandle>,
}

impl ShadowPass {
    pub fn new(shadow_map: ResourceId) -> Self {
        Self {
            shadow_map,
            pipeline: None,
        }
    }

    fn record(&mut self, ctx: &mut PassExecuteContext) -> BackendResult<()> {
        let Some(view) = ctx.get_texture(self.shadow_map) else {
            return Ok(());
        };

        let state = ctx.state;
        let settings = ctx.settings;

        let pipeline = match self.pipeline {
            Some(pipeline) => pipeline,
            None => {
                let pipeline = ctx.backend.create_render_pipeline(&RenderPipelineDescriptor {
                    label: Some("shadow_pipeline".to_string()),
                    vertex_shader: SHADOW_SHADER.to_string(),
                    fragment_shader: None,
                    vertex_layouts: vec![Vertex::layout()],
                    bind_group_layouts: vec![state.camera_layout, state.object_layout],
                    primitive_topology: PrimitiveTopology::TriangleList,
                    front_face: FrontFace::Ccw,
                    cull_mode: CullMode::Front,
                    depth_stencil: Some(DepthStencilState {
                        format: TextureFormat::Depth32Float,
                        depth_write_enabled: true,
                        depth_compare: CompareFunction::Less,
                    }),
                    color_targets: vec![],
                })?;
                self.pipeline = Some(pipeline);
                pipeline
            }
        };

        let timestamp_writes = ctx.timestamp_writes("shadow");
        let map_size = settings.shadow_resolution.size() as f32;

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("shadow_pass".to_string()),
            color_attachments: vec![],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view,
                depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
            timestamp_writes,
        });

        // The map is cleared even when shadow rendering is off so stale
        // depth never leaks into the combine pass.
        if settings.shadows && !state.models.is_empty() {
            ctx.backend.set_render_pipeline(pipeline);
            ctx.backend
                .set_viewport(0.0, 0.0, map_size, map_size, 0.0, 1.0);
            ctx.backend.set_bind_group(0, state.light_camera_bind_group);
            for model in &state.models {
                model.draw(ctx.backend, true);
            }
        }

        ctx.backend.end_render_pass();
        Ok(())
    }
}

impl RenderPass for ShadowPass {
    fn name(&self) -> &str {
        "Shadow Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.write(self.shadow_map, ResourceUsage::DepthStencilWrite);
    }

    fn execute(&mut self, ctx: &mut PassExecuteContext) {
        if let Err(err) = self.record(ctx) {
            log::error!("shadow pass failed: {err}");
        }
    }
}

/// Depth-only shader: positions transformed by the light camera, no fragment
/// stage.
pub const SHADOW_SHADER: &str = r#"
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

@group(0) @binding(0) var<uniform> camera: CameraUniforms;
@group(1) @binding(0) var<uniform> object: ObjectUniforms;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return camera.view_proj * object.model * vec4<f32>(position, 1.0);
}
"#;
