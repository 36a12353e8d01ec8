//! Deferred rendering pipeline.
//!
//! Eight passes in a fixed order:
//! 1. Shadow map - scene depth from the directional light
//! 2. Geometry - G-buffer normals, albedo/specular and depth
//! 3. Light volumes - instanced point-light spheres into two accumulation
//!    targets
//! 4. SSAO - hemisphere-kernel occlusion from depth and normals
//! 5. SSAO blur - 4x4 box filter over the raw occlusion
//! 6. Combine - full resolve into the swapchain
//! 7. Forward - skybox and gizmos over the combined image
//! 8. Texture debug - corner quad visualizing one intermediate target
//!
//! The graph compiles to exactly this order because every pass only reads
//! targets written by earlier passes; no pass ever samples a texture it is
//! currently rendering to.

pub mod combine_pass;
pub mod forward_pass;
pub mod gbuffer_pass;
pub mod light_volume_pass;
pub mod shadow_pass;
pub mod ssao_blur_pass;
pub mod ssao_pass;
pub mod texture_debug_pass;

pub use combine_pass::CombinePass;
pub use forward_pass::ForwardPass;
pub use gbuffer_pass::GbufferPass;
pub use light_volume_pass::LightVolumePass;
pub use shadow_pass::ShadowPass;
pub use ssao_blur_pass::SsaoBlurPass;
pub use ssao_pass::SsaoPass;
pub use texture_debug_pass::TextureDebugPass;

use crate::backend::{TextureFormat, TextureUsage};
use crate::render_graph::{RenderGraph, ResourceId, TextureSize};

/// The graph's virtual textures plus the external swapchain slot.
#[derive(Debug, Clone, Copy)]
pub struct DeferredResources {
    pub swapchain: ResourceId,
    pub gbuffer_normal: ResourceId,
    pub gbuffer_albedo: ResourceId,
    pub gbuffer_depth: ResourceId,
    pub shadow_map: ResourceId,
    pub light_diffuse: ResourceId,
    pub light_specular: ResourceId,
    pub ssao_raw: ResourceId,
    pub ssao_blurred: ResourceId,
}

/// Build the deferred render graph with every pass registered in pipeline
/// order. Screen-sized targets track the swapchain; the shadow map is a
/// square of `shadow_resolution` and resizes through
/// [`RenderGraph::set_texture_size`].
pub fn build_deferred_graph(shadow_resolution: u32) -> (RenderGraph, DeferredResources) {
    let mut graph = RenderGraph::new();

    let swapchain = graph.register_external("swapchain");

    let screen = TextureSize::Relative {
        width_scale: 1.0,
        height_scale: 1.0,
    };
    let usage = TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING;

    let gbuffer_normal = graph.create_texture("gbuffer_normal", screen, TextureFormat::Rg8Unorm, usage);
    let gbuffer_albedo = graph.create_texture("gbuffer_albedo", screen, TextureFormat::Rgba8Unorm, usage);
    let gbuffer_depth = graph.create_texture("gbuffer_depth", screen, TextureFormat::Depth32Float, usage);
    let shadow_map = graph.create_texture(
        "shadow_map",
        TextureSize::Absolute {
            width: shadow_resolution,
            height: shadow_resolution,
        },
        TextureFormat::Depth32Float,
        usage,
    );
    let light_diffuse = graph.create_texture("light_diffuse", screen, TextureFormat::Rgba8Unorm, usage);
    let light_specular = graph.create_texture("light_specular", screen, TextureFormat::Rgba8Unorm, usage);
    let ssao_raw = graph.create_texture("ssao_raw", screen, TextureFormat::R8Unorm, usage);
    let ssao_blurred = graph.create_texture("ssao_blurred", screen, TextureFormat::R8Unorm, usage);

    let resources = DeferredResources {
        swapchain,
        gbuffer_normal,
        gbuffer_albedo,
        gbuffer_depth,
        shadow_map,
        light_diffuse,
        light_specular,
        ssao_raw,
        ssao_blurred,
    };

    graph.add_pass(ShadowPass::new(shadow_map));
    graph.add_pass(GbufferPass::new(gbuffer_normal, gbuffer_albedo, gbuffer_depth));
    graph.add_pass(LightVolumePass::new(
        gbuffer_depth,
        gbuffer_normal,
        light_diffuse,
        light_specular,
    ));
    graph.add_pass(SsaoPass::new(gbuffer_depth, gbuffer_normal, ssao_raw));
    graph.add_pass(SsaoBlurPass::new(ssao_raw, ssao_blurred));
    graph.add_pass(CombinePass::new(&resources));
    graph.add_pass(ForwardPass::new(swapchain, gbuffer_depth));
    graph.add_pass(TextureDebugPass::new(&resources));

    (graph, resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render_graph::VirtualResource;

    #[test]
    fn test_graph_compiles_to_registration_order() {
        let (graph, _) = build_deferred_graph(4096);
        let compiled = graph.compile();
        assert_eq!(compiled.pass_order.len(), 8);

        let names: Vec<&str> = compiled
            .pass_order
            .iter()
            .map(|&id| {
                graph
                    .pass_nodes()
                    .iter()
                    .find(|node| node.id == id)
                    .map(|node| node.name.as_str())
                    .unwrap_or("")
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "Shadow Pass",
                "Geometry Pass",
                "Light Volumes",
                "SSAO",
                "SSAO Blur",
                "Lighting Combine",
                "Forward Pass",
                "Texture Debug",
            ]
        );
    }

    #[test]
    fn test_no_pass_samples_its_own_render_target() {
        let (graph, _) = build_deferred_graph(4096);
        for node in graph.pass_nodes() {
            for output in &node.outputs {
                assert!(
                    !node.reads_resource(output.resource),
                    "pass {} both reads and writes resource {:?}",
                    node.name,
                    output.resource
                );
            }
        }
    }

    #[test]
    fn test_texture_formats_match_pipeline_contract() {
        let (graph, resources) = build_deferred_graph(2048);

        let format_of = |id: ResourceId| {
            graph
                .resources()
                .iter()
                .find_map(|resource| match resource {
                    VirtualResource::Texture(texture) if texture.id == id => Some(texture.format),
                    _ => None,
                })
                .unwrap()
        };

        assert_eq!(format_of(resources.gbuffer_normal), TextureFormat::Rg8Unorm);
        assert_eq!(format_of(resources.gbuffer_albedo), TextureFormat::Rgba8Unorm);
        assert_eq!(format_of(resources.gbuffer_depth), TextureFormat::Depth32Float);
        assert_eq!(format_of(resources.shadow_map), TextureFormat::Depth32Float);
        assert_eq!(format_of(resources.light_diffuse), TextureFormat::Rgba8Unorm);
        assert_eq!(format_of(resources.light_specular), TextureFormat::Rgba8Unorm);
        assert_eq!(format_of(resources.ssao_raw), TextureFormat::R8Unorm);
        assert_eq!(format_of(resources.ssao_blurred), TextureFormat::R8Unorm);
    }

    #[test]
    fn test_shadow_map_is_absolute_and_resizable() {
        let (mut graph, resources) = build_deferred_graph(4096);

        let size_of = |graph: &RenderGraph, id: ResourceId| {
            graph
                .resources()
                .iter()
                .find_map(|resource| match resource {
                    VirtualResource::Texture(texture) if texture.id == id => Some(texture.size),
                    _ => None,
                })
                .unwrap()
        };

        assert_eq!(
            size_of(&graph, resources.shadow_map),
            TextureSize::Absolute {
                width: 4096,
                height: 4096,
            }
        );

        graph.set_texture_size(
            resources.shadow_map,
            TextureSize::Absolute {
                width: 1024,
                height: 1024,
            },
        );
        assert_eq!(
            size_of(&graph, resources.shadow_map),
            TextureSize::Absolute {
                width: 1024,
                height: 1024,
            }
        );

        // Screen-sized targets are unaffected.
        assert_eq!(
            size_of(&graph, resources.gbuffer_depth),
            TextureSize::Relative {
                width_scale: 1.0,
                height_scale: 1.0,
            }
        );
    }

    #[test]
    fn test_combine_reads_both_occlusion_variants() {
        let (graph, resources) = build_deferred_graph(4096);
        let combine = graph
            .pass_nodes()
            .iter()
            .find(|node| node.name == "Lighting Combine")
            .unwrap();
        assert!(combine.reads_resource(resources.ssao_raw));
        assert!(combine.reads_resource(resources.ssao_blurred));
        assert!(combine.writes_resource(resources.swapchain));
    }

    #[test]
    fn test_forward_pass_only_reads_depth() {
        let (graph, resources) = build_deferred_graph(4096);
        let forward = graph
            .pass_nodes()
            .iter()
            .find(|node| node.name == "Forward Pass")
            .unwrap();
        assert!(forward.reads_resource(resources.gbuffer_depth));
        assert!(!forward.writes_resource(resources.gbuffer_depth));
        assert!(forward.writes_resource(resources.swapchain));
    }
}
