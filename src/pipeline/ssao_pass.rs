//! Screen-space ambient occlusion over the G-buffer.
//!
//! A fullscreen triangle samples a 64-point hemisphere kernel around each
//! fragment's view-space position, oriented by the decoded normal and
//! rotated per pixel with a tiled 4x4 noise texture. The occlusion factor
//! lands in an `R8Unorm` target that the combine pass multiplies into the
//! ambient term. The pass runs every frame; the toggle only controls
//! whether the combine pass applies the result.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use rand::Rng;
use rand_chacha::ChaCha8Rng;

use crate::backend::{
    BackendResult, BindGroupEntry, BindGroupHandle, BindGroupLayoutEntry, BindGroupLayoutHandle,
    BindingType, BufferDescriptor, BufferHandle, BufferUsage, ColorAttachment, ColorTargetState,
    ColorWrites, CullMode, FrontFace, LoadOp, PrimitiveTopology, RenderPassDescriptor,
    RenderPipelineDescriptor, RenderPipelineHandle, ShaderStageFlags, StoreOp, TextureFormat,
    TextureSampleType, TextureViewHandle,
};
use crate::render_graph::{
    PassExecuteContext, PassSetupContext, RenderPass, ResourceId, ResourceUsage,
};
use crate::resources::{GpuTexture, TextureData};

pub const SSAO_KERNEL_SIZE: usize = 64;
pub const SSAO_NOISE_DIM: u32 = 4;

/// Fixed seed for the kernel and noise generator.
const SSAO_SEED: u64 = 42;

/// Hemisphere kernel: samples normalized then pushed towards the center so
/// near samples dominate. Three draws per sample, z in [0, 1].
pub fn ssao_kernel(rng: &mut ChaCha8Rng) -> [Vec4; SSAO_KERNEL_SIZE] {
    std::array::from_fn(|i| {
        let sample = Vec3::new(
            rng.gen::<f32>() * 2.0 - 1.0,
            rng.gen::<f32>() * 2.0 - 1.0,
            rng.gen::<f32>(),
        )
        .normalize_or_zero();
        let t = i as f32 / SSAO_KERNEL_SIZE as f32;
        let scale = 0.1 + 0.9 * t * t;
        (sample * scale).extend(0.0)
    })
}

/// 4x4 tiling rotation noise: unit-square vectors in the xy plane, packed
/// into `Rgba8Unorm` as `v * 0.5 + 0.5`.
pub fn ssao_noise_data(rng: &mut ChaCha8Rng) -> TextureData {
    let mut data = Vec::with_capacity((SSAO_NOISE_DIM * SSAO_NOISE_DIM * 4) as usize);
    for _ in 0..SSAO_NOISE_DIM * SSAO_NOISE_DIM {
        let x = rng.gen::<f32>() * 2.0 - 1.0;
        let y = rng.gen::<f32>() * 2.0 - 1.0;
        data.push(((x * 0.5 + 0.5) * 255.0).round() as u8);
        data.push(((y * 0.5 + 0.5) * 255.0).round() as u8);
        data.push(128);
        data.push(255);
    }
    TextureData {
        width: SSAO_NOISE_DIM,
        height: SSAO_NOISE_DIM,
        format: TextureFormat::Rgba8Unorm,
        data,
        name: "ssao_noise".to_string(),
    }
}

/// Kernel plus per-frame parameters: x = sample radius, y = depth bias.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SsaoUniforms {
    kernel: [Vec4; SSAO_KERNEL_SIZE],
    params: Vec4,
}

const PARAMS_OFFSET: u64 = (SSAO_KERNEL_SIZE * std::mem::size_of::<Vec4>()) as u64;

pub struct SsaoPass {
    gbuffer_depth: ResourceId,
    gbuffer_normal: ResourceId,
    output: ResourceId,
    pipeline: Option<RenderPipelineHandle>,
    input_layout: Option<BindGroupLayoutHandle>,
    uniform_buffer: Option<BufferHandle>,
    noise: Option<GpuTexture>,
    input_group: Option<BindGroupHandle>,
    cached_views: Option<(TextureViewHandle, TextureViewHandle)>,
}

impl SsaoPass {
    pub fn new(gbuffer_depth: ResourceId, gbuffer_normal: ResourceId, output: ResourceId) -> Self {
        Self {
            gbuffer_depth,
            gbuffer_normal,
            output,
            pipeline: None,
            input_layout: None,
            uniform_buffer: None,
            noise: None,
            input_group: None,
            cached_views: None,
        }
    }

    fn record(&mut self, ctx: &mut PassExecuteContext) -> BackendResult<()> {
        let (Some(depth_view), Some(normal_view), Some(output_view)) = (
            ctx.get_texture(self.gbuffer_depth),
            ctx.get_texture(self.gbuffer_normal),
            ctx.get_texture(self.output),
        ) else {
            return Ok(());
        };

        let state = ctx.state;
        let settings = ctx.settings;

        // Kernel and noise share one generator so the sample pattern is a
        // pure function of the seed.
        let uniform_buffer = match self.uniform_buffer {
            Some(buffer) => buffer,
            None => {
                use rand::SeedableRng;
                let mut rng = ChaCha8Rng::seed_from_u64(SSAO_SEED);
                let uniforms = SsaoUniforms {
                    kernel: ssao_kernel(&mut rng),
                    params: Vec4::new(settings.ssao_radius, settings.ssao_bias, 0.0, 0.0),
                };
                let buffer = ctx.backend.create_buffer_init(
                    &BufferDescriptor {
                        label: Some("ssao_uniforms".to_string()),
                        size: std::mem::size_of::<SsaoUniforms>() as u64,
                        usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
                        mapped_at_creation: false,
                    },
                    bytemuck::bytes_of(&uniforms),
                )?;
                self.noise = Some(GpuTexture::create(
                    ctx.backend,
                    &ssao_noise_data(&mut rng),
                )?);
                self.uniform_buffer = Some(buffer);
                buffer
            }
        };

        let params = Vec4::new(settings.ssao_radius, settings.ssao_bias, 0.0, 0.0);
        ctx.backend
            .write_buffer(uniform_buffer, PARAMS_OFFSET, bytemuck::bytes_of(&params));

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
                        ty: BindingType::Texture {
                            sample_type: TextureSampleType::Float { filterable: true },
                        },
                    },
                    BindGroupLayoutEntry {
                        binding: 3,
                        visibility: ShaderStageFlags::FRAGMENT,
                        ty: BindingType::UniformBuffer,
                    },
                ])?;
                self.input_layout = Some(layout);
                layout
            }
        };

        let input_group = match self.input_group {
            Some(group) if self.cached_views == Some((depth_view, normal_view)) => group,
            _ => {
                if let Some(old) = self.input_group.take() {
                    ctx.backend.destroy_bind_group(old);
                }
                let noise_view = match &self.noise {
                    Some(noise) => noise.view,
                    None => return Ok(()),
                };
                let group = ctx.backend.create_bind_group(
                    input_layout,
                    &[
                        (0, BindGroupEntry::Texture(depth_view)),
                        (1, BindGroupEntry::Texture(normal_view)),
                        (2, BindGroupEntry::Texture(noise_view)),
                        (
                            3,
                            BindGroupEntry::Buffer {
                                buffer: uniform_buffer,
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
                    label: Some("ssao_pipeline".to_string()),
                    vertex_shader: SSAO_SHADER.to_string(),
                    fragment_shader: Some(SSAO_SHADER.to_string()),
                    vertex_layouts: vec![],
                    bind_group_layouts: vec![state.camera_layout, input_layout],
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

        let timestamp_writes = ctx.timestamp_writes("ssao");
        let (width, height) = (ctx.width as f32, ctx.height as f32);

        ctx.backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("ssao_pass".to_string()),
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
        ctx.backend.set_bind_group(0, state.camera_bind_group);
        ctx.backend.set_bind_group(1, input_group);
        ctx.backend.draw(0..3, 0..1);

        ctx.backend.end_render_pass();
        Ok(())
    }
}

impl RenderPass for SsaoPass {
    fn name(&self) -> &str {
        "SSAO"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.gbuffer_depth, ResourceUsage::TextureRead);
        ctx.read(self.gbuffer_normal, ResourceUsage::TextureRead);
        ctx.write(self.output, ResourceUsage::RenderTarget);
    }

    fn execute(&mut self, ctx: &mut PassExecuteContext) {
        if let Err(err) = self.record(ctx) {
            log::error!("ssao pass failed: {err}");
        }
    }
}

/// Hemisphere-kernel occlusion estimate, one fullscreen triangle.
pub const SSAO_SHADER: &str = r#"
struct CameraUniforms {
    view: mat4x4<f32>,
    proj: mat4x4<f32>,
    view_proj: mat4x4<f32>,
    inv_view: mat4x4<f32>,
    inv_proj: mat4x4<f32>,
    position: vec4<f32>,
    near_far: vec4<f32>,
}

struct SsaoUniforms {
    kernel: array<vec4<f32>, 64>,
    params: vec4<f32>,
}

@group(0) @binding(0) var<uniform> camera: CameraUniforms;
@group(1) @binding(0) var gbuffer_depth: texture_depth_2d;
@group(1) @binding(1) var gbuffer_normal: texture_2d<f32>;
@group(1) @binding(2) var noise_texture: texture_2d<f32>;
@group(1) @binding(3) var<uniform> ssao: SsaoUniforms;

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

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let coord = vec2<i32>(in.clip_position.xy);
    let depth = textureLoad(gbuffer_depth, coord, 0);
    if (depth >= 1.0) {
        return vec4<f32>(1.0);
    }

    let dims_u = textureDimensions(gbuffer_depth);
    let dims = vec2<f32>(dims_u);
    let frag_pos = view_position(in.uv, depth);
    let normal = octahedral_decode(textureLoad(gbuffer_normal, coord, 0).rg);

    let noise_coord = coord % vec2<i32>(4, 4);
    let random = normalize(textureLoad(noise_texture, noise_coord, 0).xyz * 2.0 - 1.0);

    let tangent = normalize(random - normal * dot(random, normal));
    let bitangent = cross(normal, tangent);
    let tbn = mat3x3<f32>(tangent, bitangent, normal);

    let radius = ssao.params.x;
    let bias = ssao.params.y;
    let max_coord = vec2<i32>(dims_u) - vec2<i32>(1, 1);

    var occlusion = 0.0;
    for (var i = 0u; i < 64u; i = i + 1u) {
        let sample_pos = frag_pos + (tbn * ssao.kernel[i].xyz) * radius;

        var offset = camera.proj * vec4<f32>(sample_pos, 1.0);
        let ndc = offset.xy / offset.w;
        let sample_uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
        let sample_coord = clamp(
            vec2<i32>(sample_uv * dims),
            vec2<i32>(0, 0),
            max_coord,
        );
        let sample_depth = textureLoad(gbuffer_depth, sample_coord, 0);
        let sample_view = view_position(sample_uv, sample_depth);

        let range_check = smoothstep(0.0, 1.0, radius / abs(frag_pos.z - sample_view.z));
        occlusion = occlusion
            + select(0.0, 1.0, sample_view.z >= sample_pos.z + bias) * range_check;
    }

    let visibility = 1.0 - occlusion / 64.0;
    return vec4<f32>(visibility, visibility, visibility, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_kernel_is_a_scaled_hemisphere() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let kernel = ssao_kernel(&mut rng);

        // First sample sits at the inner scale, later samples reach further
        // out, and everything stays inside the unit hemisphere (z >= 0).
        assert!((kernel[0].truncate().length() - 0.1).abs() < 1e-4);
        assert!(kernel[63].truncate().length() > kernel[0].truncate().length());
        for sample in &kernel {
            assert!(sample.truncate().length() <= 1.0 + 1e-4);
            assert!(sample.z >= 0.0);
            assert_eq!(sample.w, 0.0);
        }
    }

    #[test]
    fn test_kernel_is_deterministic_per_seed() {
        let mut a = ChaCha8Rng::seed_from_u64(42);
        let mut b = ChaCha8Rng::seed_from_u64(42);
        assert_eq!(ssao_kernel(&mut a), ssao_kernel(&mut b));

        let mut c = ChaCha8Rng::seed_from_u64(7);
        assert_ne!(ssao_kernel(&mut a)[0], ssao_kernel(&mut c)[0]);
    }

    #[test]
    fn test_noise_is_a_4x4_xy_tile() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let noise = ssao_noise_data(&mut rng);
        assert_eq!((noise.width, noise.height), (4, 4));
        assert_eq!(noise.format, TextureFormat::Rgba8Unorm);
        assert_eq!(noise.data.len(), 64);
        for pixel in noise.data.chunks(4) {
            // z stays at the midpoint so decoded vectors lie in the xy plane.
            assert_eq!(pixel[2], 128);
            assert_eq!(pixel[3], 255);
        }
    }

    #[test]
    fn test_uniforms_put_params_after_kernel() {
        assert_eq!(std::mem::size_of::<SsaoUniforms>(), 1040);
        assert_eq!(PARAMS_OFFSET, 1024);
    }
}
