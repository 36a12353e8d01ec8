//! A render graph-based deferred shading renderer.
//!
//! The engine records a fixed pipeline of render passes into a
//! [`render_graph::RenderGraph`], compiles it into a deterministic pass
//! order and executes it against a handle-based [`backend::GraphicsBackend`].
//! The deferred pipeline covers a directional shadow map fitted to the view
//! frustum each frame, a packed G-buffer, instanced point-light volumes,
//! SSAO with optional blur, a combination resolve and a forward overlay for
//! skybox and debug geometry.

pub mod backend;
pub mod engine;
pub mod pipeline;
pub mod profiling;
pub mod render_graph;
pub mod resources;
pub mod scene;
pub mod window;

pub mod egui_integration;

pub use engine::{Engine, EngineError};

use engine::ShadowResolution;

/// Engine configuration, supplied once at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Title for the OS window
    pub title: String,
    /// Initial window width in pixels
    pub width: u32,
    /// Initial window height in pixels
    pub height: u32,
    /// Enable vsync (can be toggled at runtime)
    pub vsync: bool,
    /// Side length of the directional shadow map
    pub shadow_resolution: ShadowResolution,
    /// Number of seeded point lights per scene
    pub light_count: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Deferred Engine".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            shadow_resolution: ShadowResolution::default(),
            light_count: 32,
        }
    }
}
