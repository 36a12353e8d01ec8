//! Render graph: virtual resources, pass descriptors and a deterministic
//! compile step that turns registered passes into an executable order.
//!
//! Passes declare reads and writes against [`ResourceId`]s; the graph owns
//! the wiring and the executor owns the physical allocations.

mod executor;
mod graph;
mod pass;
mod resource;

pub use executor::{FrameParams, RenderGraphExecutor};
pub use graph::{CompiledGraph, RenderGraph, ResourceLifetime};
pub use pass::{PassExecuteContext, PassId, PassNode, PassSetupContext, RenderPass};
pub use resource::{
    ResourceAccess, ResourceId, ResourceUsage, TextureSize, VirtualResource, VirtualTexture,
};
