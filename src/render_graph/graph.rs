//! Pass registration and compilation. Compiling turns the declared reads
//! and writes into a deterministic execution order.

use crate::backend::types::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Holds the registered passes and virtual resources between compiles.
pub struct RenderGraph {
    passes: Vec<Box<dyn RenderPass>>,
    pass_nodes: Vec<PassNode>,
    resources: Vec<VirtualResource>,
    next_pass_id: u32,
    next_resource_id: u32,

    /// Named ids for resources the executor imports instead of allocating.
    external_resources: HashMap<String, ResourceId>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            pass_nodes: Vec::new(),
            resources: Vec::new(),
            next_pass_id: 0,
            next_resource_id: 0,
            external_resources: HashMap::new(),
        }
    }

    /// Declare a resource whose view is supplied from outside the graph.
    /// The swapchain image is the only external the engine registers.
    pub fn register_external(&mut self, name: &str) -> ResourceId {
        let id = ResourceId(self.next_resource_id);
        self.next_resource_id += 1;
        self.resources.push(VirtualResource::External(id));
        self.external_resources.insert(name.to_string(), id);
        id
    }

    /// Look up a registered external by name.
    pub fn get_external(&self, name: &str) -> Option<ResourceId> {
        self.external_resources.get(name).copied()
    }

    /// Declare a graph-owned texture. Nothing is allocated until the
    /// executor sees the compiled graph.
    pub fn create_texture(
        &mut self,
        name: &str,
        size: TextureSize,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> ResourceId {
        let id = ResourceId(self.next_resource_id);
        self.next_resource_id += 1;

        self.resources.push(VirtualResource::Texture(VirtualTexture {
            id,
            name: name.to_string(),
            size,
            format,
            usage,
        }));

        id
    }

    /// Change the symbolic size of a virtual texture (used by the shadow
    /// resolution selector). Takes effect at the next allocation.
    pub fn set_texture_size(&mut self, id: ResourceId, size: TextureSize) {
        for resource in &mut self.resources {
            if let VirtualResource::Texture(tex) = resource {
                if tex.id == id {
                    tex.size = size;
                }
            }
        }
    }

    /// Box a pass and record the accesses its `setup` declares.
    pub fn add_pass<P: RenderPass + 'static>(&mut self, pass: P) -> PassId {
        let id = PassId(self.next_pass_id);
        self.next_pass_id += 1;

        let name = pass.name().to_string();
        let mut boxed_pass = Box::new(pass);

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        {
            let mut ctx = PassSetupContext {
                inputs: &mut inputs,
                outputs: &mut outputs,
            };
            boxed_pass.setup(&mut ctx);
        }

        self.passes.push(boxed_pass);
        self.pass_nodes.push(PassNode {
            id,
            name,
            inputs,
            outputs,
        });

        id
    }

    /// Order the passes so every read happens after the write it depends
    /// on, then work out when each resource is in use.
    pub fn compile(&self) -> CompiledGraph {
        // Writer lists stay in registration order because pass ids are
        // handed out sequentially.
        let mut writers: HashMap<ResourceId, Vec<PassId>> = HashMap::new();
        for node in &self.pass_nodes {
            for output in &node.outputs {
                writers.entry(output.resource).or_default().push(node.id);
            }
        }

        let mut dependencies: HashMap<PassId, HashSet<PassId>> = self
            .pass_nodes
            .iter()
            .map(|node| (node.id, HashSet::new()))
            .collect();

        for node in &self.pass_nodes {
            let edges = dependencies.get_mut(&node.id).unwrap();

            // A read orders this pass after every writer of that resource.
            for input in &node.inputs {
                let resource_writers = writers.get(&input.resource).into_iter().flatten();
                edges.extend(resource_writers.filter(|&&writer| writer != node.id));
            }

            // Two writers of the same resource keep registration order
            // (write-after-write hazard).
            for output in &node.outputs {
                let earlier = writers[&output.resource]
                    .iter()
                    .take_while(|&&writer| writer < node.id);
                edges.extend(earlier);
            }
        }

        // Kahn's algorithm. Ready passes drain lowest id first, which
        // makes the compiled order deterministic.
        let mut successors: HashMap<PassId, Vec<PassId>> = HashMap::new();
        for (&pass, deps) in &dependencies {
            for &dep in deps {
                successors.entry(dep).or_default().push(pass);
            }
        }

        let mut in_degree: HashMap<PassId, usize> = dependencies
            .iter()
            .map(|(&id, deps)| (id, deps.len()))
            .collect();

        let mut ready: BinaryHeap<Reverse<PassId>> = self
            .pass_nodes
            .iter()
            .filter(|node| in_degree[&node.id] == 0)
            .map(|node| Reverse(node.id))
            .collect();

        let mut pass_order = Vec::with_capacity(self.pass_nodes.len());

        while let Some(Reverse(pass_id)) = ready.pop() {
            pass_order.push(pass_id);

            // Release successors whose last dependency just scheduled.
            for &successor in successors.get(&pass_id).into_iter().flatten() {
                let degree = in_degree.get_mut(&successor).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(successor));
                }
            }
        }

        if pass_order.len() != self.pass_nodes.len() {
            log::warn!(
                "Render graph contains a cycle: {} of {} passes unscheduled",
                self.pass_nodes.len() - pass_order.len(),
                self.pass_nodes.len()
            );
        }

        // Lifetimes are in terms of compiled order, not registration order.
        let mut resource_lifetimes: HashMap<ResourceId, ResourceLifetime> = HashMap::new();

        for (order, &pass_id) in pass_order.iter().enumerate() {
            let node = self.get_pass_node(pass_id).unwrap();

            for access in node.inputs.iter().chain(node.outputs.iter()) {
                resource_lifetimes
                    .entry(access.resource)
                    .and_modify(|lifetime| lifetime.last_use = order)
                    .or_insert(ResourceLifetime {
                        first_use: order,
                        last_use: order,
                    });
            }
        }

        CompiledGraph {
            pass_order,
            resource_lifetimes,
        }
    }

    /// Registered passes, in registration order.
    pub fn passes(&self) -> &[Box<dyn RenderPass>] {
        &self.passes
    }

    /// Declared accesses per pass, same order as [`Self::passes`].
    pub fn pass_nodes(&self) -> &[PassNode] {
        &self.pass_nodes
    }

    /// Every virtual resource declared so far.
    pub fn resources(&self) -> &[VirtualResource] {
        &self.resources
    }

    /// Pass lookup by id.
    pub fn get_pass(&self, id: PassId) -> Option<&dyn RenderPass> {
        let index = self.pass_nodes.iter().position(|n| n.id == id)?;
        Some(self.passes[index].as_ref())
    }

    /// Mutable pass lookup by id.
    pub fn get_pass_mut(&mut self, id: PassId) -> Option<&mut (dyn RenderPass + 'static)> {
        let index = self.pass_nodes.iter().position(|n| n.id == id)?;
        Some(self.passes[index].as_mut())
    }

    /// Access metadata lookup by id.
    pub fn get_pass_node(&self, id: PassId) -> Option<&PassNode> {
        self.pass_nodes.iter().find(|n| n.id == id)
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// First and last compiled step touching a resource, both inclusive.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLifetime {
    pub first_use: usize,
    pub last_use: usize,
}

/// What [`RenderGraph::compile`] produces: the order passes run in and the
/// span each resource is needed for.
#[derive(Debug)]
pub struct CompiledGraph {
    pub pass_order: Vec<PassId>,
    pub resource_lifetimes: HashMap<ResourceId, ResourceLifetime>,
}

impl CompiledGraph {
    /// Whether `step` falls inside the resource's use span. Resources no
    /// pass touches are never alive.
    pub fn is_resource_alive(&self, resource: ResourceId, step: usize) -> bool {
        self.resource_lifetimes
            .get(&resource)
            .map_or(false, |lifetime| {
                (lifetime.first_use..=lifetime.last_use).contains(&step)
            })
    }
}
