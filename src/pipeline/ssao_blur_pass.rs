//! 4x4 box blur over the raw occlusion target.
//!
//! The SSAO noise tiles at 4x4, so averaging a 4x4 neighborhood removes the
//! banding it introduces. Runs every frame; the combine pass picks the raw
//! or blurred target based on the blur toggle.

use crate::backend::{
    BackendResult, BindGroupEntry, BindGroupHandle, BindGroupLayoutEntry, BindGroupLayoutHandle,
    BindingType, ColorAttachment, ColorTargetState, ColorWrites, CullMode, FrontFace, LoadOp,
    PrimitiveTopology, RenderPassDescriptor, RenderPipelineDescriptor, RenderPipelineHandle,
    ShaderStageFlags, StoreOp, TextureFormat, TextureSampleType, TextureViewHandle,
};
use crate::render_graph::{
    PassExecuteContext, PassSetupContext, RenderPass, ResourceId, ResourceUsage,
};

pub struct SsaoBlurPass {
    input: ResourceId,
    output: ResourceId,
    pipeline: Option<RenderPipelineHandle>,
    input_layout: Option<BindGroupLayoutHandle>,
    input_group: Option<BindGroupHandle>,
    cached_view: Option<TextureViewHandle>,
}

impl SsaoBlurPass {
    pub fn new(input: ResourceId, output: ResourceId) -> Self {
        Self {
            input,
            output,
            pipeline: None,
            input_layout: None,
            input_group: None,
            cached_view: None,
        }
    }

    fn record(&mut self, ctx: &mut PassExecuteContext) -> BackendResult<()> {
        let (Some(input_view), Some(output_view)) = (
            ctx.get_texture(self.input),
            ctx.get_texture(self.output),
        ) else {
            return Ok(());
        };

        let input_layout = match self.input_layout {
            Some(layout) => layout,
            None => {
                let layout = ctx.backend.create_bind_group_layout(&[BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStageFlags::FRAGMENT,
                    ty: BindingType::Texture {
                        sample_type: TextureSampleType::Float { filterable: true },
                    },
                }])?;
                self.input_layout = Some(layout);
                layout
            }
        };

        let input_group = match self.input_group {
            Some(group) if self.cached_view == Some(input_view) => group,
            _ => {
                if let Some(old) = self.input_group.take() {
                    ctx.backend.destroy_bind_group(old);
                }
                let group = ctx
                    .backend
                    .create_bind_group(input_layout, &[(0, BindGroupEntry::Texture(input_view))])?;
                self.input_group = Some(group);
                self.cached_view = Some(input_view);
                group
            }
        };

        let pipeline = match self.pipeline {
            Some(pipeline) => pipeline,
            None => {
                let pipeline = ctx.backend.create_render_pipeline(&RenderPipelineDescriptor {
                    label: Some("ssao_blur_pipeline".to_string()),
                    vertex_shader: SSAO_BLUR_SHADER.to_string(),
                    fragment_shader: Some(SSAO_BLUR_SHADER.to_string()),
                    vertex_layouts: vec![],
                    bind_group_layouts: vec![input_layout],
                    primitive_topology: PrimitiveTopology::TriangleList,
                    front_face: FrontFace::Ccw,
                    cull_mode: CullMode::None,
                    depth_stencil: None,
                    color_targets: vec![ColorTargetState {
                        format: TextureFormat::R8Unorm,
                        blend: None,
                        write_mask: ColorWrites::ALL,
                    }],
                })?;
                self.pipeline = Some(pipeline);
                pipeline
            }
        };

        let timestamp_writes = ctx.timestamp_writes("ssao_blur");
        let (width, height) = (ctx.width as f32, ctx.height as f32);

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("ssao_blur_pass".to_string()),
            color_attachments: vec![ColorAttachment {
                view: output_view,
                resolve_target: None,
                load_op: LoadOp::Clear([1.0, 1.0, 1.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
            timestamp_writes,
        });

        ctx.backend.set_render_pipeline(pipeline);
        ctx.backend.set_viewport(0.0, 0.0, width, height, 0.0, 1.0);
        ctx.backend.set_bind_group(0, input_group);
        ctx.backend.draw(0..3, 0..1);

        ctx.backend.end_render_pass();
        Ok(())
    }
}

impl RenderPass for SsaoBlurPass {
    fn name(&self) -> &str {
        "SSAO Blur"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.input, ResourceUsage::TextureRead);
        ctx.write(self.output, ResourceUsage::RenderTarget);
    }

    fn execute(&mut self, ctx: &mut PassExecuteContext) {
        if let Err(err) = self.record(ctx) {
            log::error!("ssao blur pass failed: {err}");
        }
    }
}

/// 16-tap box filter with clamped edge reads.
pub const SSAO_BLUR_SHADER: &str = r#"
@group(0) @binding(0) var occlusion_texture: texture_2d<f32>;

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

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let coord = vec2<i32>(in.clip_position.xy);
    let max_coord = vec2<i32>(textureDimensions(occlusion_texture)) - vec2<i32>(1, 1);

    var sum = 0.0;
    for (var x = -2; x < 2; x = x + 1) {
        for (var y = -2; y < 2; y = y + 1) {
            let tap = clamp(coord + vec2<i32>(x, y), vec2<i32>(0, 0), max_coord);
            sum = sum + textureLoad(occlusion_texture, tap, 0).r;
        }
    }

    let blurred = sum / 16.0;
    return vec4<f32>(blurred, blurred, blurred, 1.0);
}
"#;
