//! The pass trait and the contexts passes run inside.

use crate::backend::traits::*;
use crate::engine::{FrameUniforms, RenderSettings, RenderState};
use crate::render_graph::resource::*;
use crate::scene::Scene;
use std::collections::HashMap;

/// Graph-assigned pass id. Ordered so the scheduler can break ties by
/// registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

/// Context for declaring what a pass reads and writes.
///
/// Textures themselves are created on the graph by the pipeline builder;
/// passes receive their `ResourceId`s at construction and declare accesses
/// here so the graph can order passes and track lifetimes.
pub struct PassSetupContext<'a> {
    pub(crate) inputs: &'a mut Vec<ResourceAccess>,
    pub(crate) outputs: &'a mut Vec<ResourceAccess>,
}

impl<'a> PassSetupContext<'a> {
    /// Record a read access. Readers run after the writer of `resource`.
    pub fn read(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.inputs.push(ResourceAccess { resource, usage });
    }

    /// Record a write access. Multiple writers keep registration order.
    pub fn write(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.outputs.push(ResourceAccess { resource, usage });
    }
}

/// Context for executing a render pass.
///
/// Everything a pass touches comes through here: the backend to record
/// into, the active scene, the engine's shared render state, this frame's
/// settings snapshot, and the physical views behind the graph's virtual
/// resources.
pub struct PassExecuteContext<'a> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub scene: &'a Scene,
    pub state: &'a RenderState,
    pub settings: &'a RenderSettings,
    pub frame: &'a FrameUniforms,
    pub width: u32,
    pub height: u32,
    pub(crate) resource_textures: &'a HashMap<ResourceId, TextureViewHandle>,
    pub(crate) pass_timestamps: &'a HashMap<String, PassTimestampWrites>,
}

impl<'a> PassExecuteContext<'a> {
    /// Get the physical texture view behind a virtual resource
    pub fn get_texture(&self, resource: ResourceId) -> Option<TextureViewHandle> {
        self.resource_textures.get(&resource).copied()
    }

    /// Timestamp slots assigned to the named profiler scope this frame, if
    /// profiling is active
    pub fn timestamp_writes(&self, scope: &str) -> Option<PassTimestampWrites> {
        self.pass_timestamps.get(scope).copied()
    }
}

/// One node of the render graph.
pub trait RenderPass: Send + Sync {
    /// Stable name, used for profiler scopes and log messages.
    fn name(&self) -> &str;

    /// Declare resource accesses. Runs once, when the pass is added to
    /// the graph.
    fn setup(&mut self, ctx: &mut PassSetupContext);

    /// Execute phase - record commands. Takes `&mut self` so passes can
    /// lazily build pipelines and rebuild bind groups when the physical
    /// views behind their inputs change.
    fn execute(&mut self, ctx: &mut PassExecuteContext);
}

/// What the graph knows about a registered pass: its declared accesses,
/// separate from the boxed pass itself.
#[derive(Debug)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub inputs: Vec<ResourceAccess>,
    pub outputs: Vec<ResourceAccess>,
}

impl PassNode {
    pub fn reads_resource(&self, resource: ResourceId) -> bool {
        self.inputs.iter().any(|a| a.resource == resource)
    }

    pub fn writes_resource(&self, resource: ResourceId) -> bool {
        self.outputs.iter().any(|a| a.resource == resource)
    }
}
