//! Backing storage and execution for compiled graphs. The graph itself
//! only knows virtual resources; this is where they get real textures.

use crate::backend::traits::*;
use crate::engine::{FrameUniforms, RenderSettings, RenderState};
use crate::render_graph::graph::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::scene::Scene;
use std::collections::HashMap;

/// Per-frame inputs threaded into every pass execution
pub struct FrameParams<'a> {
    pub scene: &'a Scene,
    pub state: &'a RenderState,
    pub settings: &'a RenderSettings,
    pub frame: &'a FrameUniforms,
    pub width: u32,
    pub height: u32,
    pub pass_timestamps: &'a HashMap<String, PassTimestampWrites>,
}

/// Executor for running the compiled render graph.
///
/// Owns the physical textures behind the graph's virtual resources.
/// Cleanup-then-allocate replaces the whole set atomically between frames,
/// which is how resizes work; `invalidate_texture` recreates a single
/// resource (shadow resolution changes).
pub struct RenderGraphExecutor {
    textures: HashMap<ResourceId, TextureHandle>,
    views: HashMap<ResourceId, TextureViewHandle>,

    /// Views owned by someone else. The swapchain view lands here and is
    /// stale after present, so the engine re-registers it every frame.
    externals: HashMap<ResourceId, TextureViewHandle>,
}

impl RenderGraphExecutor {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            views: HashMap::new(),
            externals: HashMap::new(),
        }
    }

    /// Register the current view behind an external resource.
    pub fn set_external_view(&mut self, resource: ResourceId, view: TextureViewHandle) {
        self.externals.insert(resource, view);
    }

    /// Allocate physical textures for every virtual resource that has none.
    /// Symbolic sizes resolve against the current surface size.
    pub fn allocate_resources(
        &mut self,
        graph: &RenderGraph,
        backend: &mut dyn GraphicsBackend,
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        for resource in graph.resources() {
            // Externals have no descriptor; their views arrive through
            // set_external_view instead.
            let VirtualResource::Texture(tex) = resource else {
                continue;
            };
            if self.textures.contains_key(&tex.id) {
                continue;
            }

            let desc = tex.descriptor(width, height);
            let handle = backend.create_texture(&desc)?;
            let view = backend.create_texture_view(handle)?;
            self.textures.insert(tex.id, handle);
            self.views.insert(tex.id, view);
        }

        Ok(())
    }

    /// Drop one texture so the next allocation recreates it
    pub fn invalidate_texture(&mut self, backend: &mut dyn GraphicsBackend, resource: ResourceId) {
        if let Some(view) = self.views.remove(&resource) {
            backend.destroy_texture_view(view);
        }
        if let Some(handle) = self.textures.remove(&resource) {
            backend.destroy_texture(handle);
        }
    }

    /// Current physical view for a resource, allocated or external.
    pub fn view_for(&self, resource: ResourceId) -> Option<TextureViewHandle> {
        self.views
            .get(&resource)
            .or_else(|| self.externals.get(&resource))
            .copied()
    }

    /// Execute the render graph in compiled order
    pub fn execute(
        &self,
        graph: &mut RenderGraph,
        compiled: &CompiledGraph,
        backend: &mut dyn GraphicsBackend,
        params: &FrameParams,
    ) {
        let texture_views: HashMap<ResourceId, TextureViewHandle> = self
            .views
            .iter()
            .chain(self.externals.iter())
            .map(|(&id, &view)| (id, view))
            .collect();

        for &pass_id in &compiled.pass_order {
            if let Some(pass) = graph.get_pass_mut(pass_id) {
                let mut ctx = PassExecuteContext {
                    backend: &mut *backend,
                    scene: params.scene,
                    state: params.state,
                    settings: params.settings,
                    frame: params.frame,
                    width: params.width,
                    height: params.height,
                    resource_textures: &texture_views,
                    pass_timestamps: params.pass_timestamps,
                };

                pass.execute(&mut ctx);
            }
        }
    }

    /// Destroy every allocated texture and view. Views go first since they
    /// refer to the textures.
    pub fn cleanup(&mut self, backend: &mut dyn GraphicsBackend) {
        for (_, view) in self.views.drain() {
            backend.destroy_texture_view(view);
        }
        for (_, handle) in self.textures.drain() {
            backend.destroy_texture(handle);
        }
        self.externals.clear();
    }
}

impl Default for RenderGraphExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_backend::TestBackend;
    use crate::backend::types::*;

    fn graph_with_two_targets() -> (RenderGraph, ResourceId, ResourceId) {
        let mut graph = RenderGraph::new();
        let full = graph.create_texture(
            "full_res",
            TextureSize::default(),
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        );
        let fixed = graph.create_texture(
            "fixed_res",
            TextureSize::Absolute {
                width: 2048,
                height: 2048,
            },
            TextureFormat::Depth32Float,
            TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
        );
        graph.register_external("swapchain");
        (graph, full, fixed)
    }

    #[test]
    fn test_allocate_resolves_sizes_and_is_idempotent() {
        let (graph, _, _) = graph_with_two_targets();
        let mut backend = TestBackend::new(1280, 720);
        let mut executor = RenderGraphExecutor::new();

        executor
            .allocate_resources(&graph, &mut backend, 1280, 720)
            .unwrap();
        assert_eq!(backend.alive_texture_count(), 2);

        let full = backend
            .textures
            .values()
            .find(|d| d.label.as_deref() == Some("full_res"))
            .unwrap();
        assert_eq!((full.width, full.height), (1280, 720));

        let fixed = backend
            .textures
            .values()
            .find(|d| d.label.as_deref() == Some("fixed_res"))
            .unwrap();
        assert_eq!((fixed.width, fixed.height), (2048, 2048));

        // Second allocation must not create duplicates
        executor
            .allocate_resources(&graph, &mut backend, 1280, 720)
            .unwrap();
        assert_eq!(backend.alive_texture_count(), 2);
    }

    #[test]
    fn test_invalidate_recreates_single_texture() {
        let (graph, full, fixed) = graph_with_two_targets();
        let mut backend = TestBackend::new(1280, 720);
        let mut executor = RenderGraphExecutor::new();

        executor
            .allocate_resources(&graph, &mut backend, 1280, 720)
            .unwrap();
        let untouched_view = executor.view_for(full).unwrap();
        let old_view = executor.view_for(fixed).unwrap();

        executor.invalidate_texture(&mut backend, fixed);
        assert_eq!(backend.alive_texture_count(), 1);
        assert_eq!(backend.destroyed_views, vec![old_view]);
        assert!(executor.view_for(fixed).is_none());

        executor
            .allocate_resources(&graph, &mut backend, 1280, 720)
            .unwrap();
        assert_eq!(backend.alive_texture_count(), 2);
        assert_ne!(executor.view_for(fixed), Some(old_view));
        assert_eq!(executor.view_for(full), Some(untouched_view));
    }

    #[test]
    fn test_cleanup_then_allocate_replaces_whole_set() {
        let (graph, full, _) = graph_with_two_targets();
        let mut backend = TestBackend::new(1280, 720);
        let mut executor = RenderGraphExecutor::new();

        executor
            .allocate_resources(&graph, &mut backend, 1280, 720)
            .unwrap();

        executor.cleanup(&mut backend);
        assert_eq!(backend.alive_texture_count(), 0);
        assert_eq!(backend.destroyed_views.len(), 2);
        assert!(executor.view_for(full).is_none());

        executor
            .allocate_resources(&graph, &mut backend, 1920, 1080)
            .unwrap();
        let resized = backend
            .textures
            .values()
            .find(|d| d.label.as_deref() == Some("full_res"))
            .unwrap();
        assert_eq!((resized.width, resized.height), (1920, 1080));
    }
}
