//! Render graph definition and compilation

use crate::backend::traits::GraphicsBackend;
use crate::backend::types::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Render graph has a dependency cycle between passes: {}", passes.join(", "))]
    Cycle { passes: Vec<String> },
    #[error("Pass '{pass}' uses undeclared resource {resource:?}")]
    UnknownResource { pass: String, resource: ResourceId },
    #[error("External resource '{name}' has no view bound for this frame")]
    UnboundExternal { name: String },
}

/// The main render graph structure
pub struct RenderGraph {
    passes: Vec<Box<dyn RenderPass>>,
    pass_nodes: Vec<PassNode>,
    registry: ResourceRegistry,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            pass_nodes: Vec::new(),
            registry: ResourceRegistry::default(),
        }
    }

    /// Declare a graph-owned texture before adding the passes that share it
    pub fn create_texture(&mut self, name: &str, desc: TextureDescriptor) -> ResourceId {
        self.registry.add_texture(name, desc)
    }

    pub fn create_texture_relative(
        &mut self,
        name: &str,
        size: TextureSize,
        format: TextureFormat,
        usage: TextureUsage,
        screen_width: u32,
        screen_height: u32,
    ) -> ResourceId {
        let desc = relative_texture_desc(name, size, format, usage, screen_width, screen_height);
        self.registry.add_texture(name, desc)
    }

    pub fn create_buffer(&mut self, name: &str, desc: BufferDescriptor) -> ResourceId {
        self.registry.add_buffer(name, desc)
    }

    /// Register an external resource (like swapchain image)
    pub fn register_external(&mut self, name: &str) -> ResourceId {
        self.registry.add_external(name)
    }

    /// Get external resource by name
    pub fn get_external(&self, name: &str) -> Option<ResourceId> {
        self.registry.find_external(name)
    }

    /// Add a render pass to the graph
    pub fn add_pass<P: RenderPass + 'static>(
        &mut self,
        pass: P,
        pass_type: PassType,
        screen_width: u32,
        screen_height: u32,
    ) -> PassId {
        let id = PassId(self.pass_nodes.len() as u32);
        let name = pass.name().to_string();
        let mut boxed_pass = Box::new(pass);

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        {
            let mut ctx = PassSetupContext {
                registry: &mut self.registry,
                inputs: &mut inputs,
                outputs: &mut outputs,
                screen_width,
                screen_height,
            };
            boxed_pass.setup(&mut ctx);
        }

        self.passes.push(boxed_pass);
        self.pass_nodes.push(PassNode {
            id,
            name,
            pass_type,
            inputs,
            outputs,
        });

        id
    }

    /// Compile the graph - topological sort and resource lifetimes.
    ///
    /// A pass depends on every other pass that writes a resource it reads.
    /// Among passes whose dependencies are met, the one declared first runs
    /// first, so the same graph always compiles to the same order.
    pub fn compile(&self) -> Result<CompiledGraph, GraphError> {
        for node in &self.pass_nodes {
            if let Some(access) = node
                .accesses()
                .find(|a| !self.registry.contains(a.resource))
            {
                return Err(GraphError::UnknownResource {
                    pass: node.name.clone(),
                    resource: access.resource,
                });
            }
        }

        let count = self.pass_nodes.len();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        let mut in_degree = vec![0usize; count];

        for (reader_idx, reader) in self.pass_nodes.iter().enumerate() {
            let writers: BTreeSet<usize> = reader
                .inputs
                .iter()
                .flat_map(|input| {
                    self.pass_nodes
                        .iter()
                        .enumerate()
                        .filter(move |(idx, writer)| {
                            *idx != reader_idx && writer.writes_resource(input.resource)
                        })
                        .map(|(idx, _)| idx)
                })
                .collect();

            in_degree[reader_idx] = writers.len();
            for writer_idx in writers {
                dependents[writer_idx].push(reader_idx);
            }
        }

        // Kahn's algorithm with declaration order as the tie breaker
        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut sorted = Vec::with_capacity(count);

        while let Some(idx) = ready.pop_first() {
            sorted.push(idx);
            for &dependent in &dependents[idx] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if sorted.len() != count {
            let passes = (0..count)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.pass_nodes[i].name.clone())
                .collect();
            return Err(GraphError::Cycle { passes });
        }

        let mut resource_lifetimes: HashMap<ResourceId, ResourceLifetime> = HashMap::new();
        for (order, &idx) in sorted.iter().enumerate() {
            for access in self.pass_nodes[idx].accesses() {
                resource_lifetimes
                    .entry(access.resource)
                    .or_insert(ResourceLifetime {
                        first_use: order,
                        last_use: order,
                    })
                    .last_use = order;
            }
        }

        let pass_order: Vec<PassId> = sorted.iter().map(|&i| self.pass_nodes[i].id).collect();

        log::debug!(
            "Compiled render graph: {}",
            sorted
                .iter()
                .map(|&i| self.pass_nodes[i].name.as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        Ok(CompiledGraph {
            pass_order,
            resource_lifetimes,
        })
    }

    /// Get all passes
    pub fn passes(&self) -> &[Box<dyn RenderPass>] {
        &self.passes
    }

    /// Get mutable passes
    pub fn passes_mut(&mut self) -> &mut [Box<dyn RenderPass>] {
        &mut self.passes
    }

    /// Let every pass destroy its pipelines and bind groups
    pub fn release_passes(&mut self, backend: &mut dyn GraphicsBackend) {
        for pass in &mut self.passes {
            pass.release(backend);
        }
    }

    /// Get pass nodes (metadata)
    pub fn pass_nodes(&self) -> &[PassNode] {
        &self.pass_nodes
    }

    /// Get all resources
    pub fn resources(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Get pass by ID
    pub fn get_pass(&self, id: PassId) -> Option<&dyn RenderPass> {
        self.passes.get(id.0 as usize).map(|p| p.as_ref())
    }

    /// Get pass node by ID
    pub fn get_pass_node(&self, id: PassId) -> Option<&PassNode> {
        self.pass_nodes.get(id.0 as usize)
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource lifetime in terms of pass execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLifetime {
    pub first_use: usize,
    pub last_use: usize,
}

/// Compiled render graph with execution order and resource lifetimes
#[derive(Debug)]
pub struct CompiledGraph {
    pub pass_order: Vec<PassId>,
    pub resource_lifetimes: HashMap<ResourceId, ResourceLifetime>,
}

impl CompiledGraph {
    /// Check if a resource is alive at a given execution step
    pub fn is_resource_alive(&self, resource: ResourceId, step: usize) -> bool {
        self.resource_lifetimes
            .get(&resource)
            .is_some_and(|l| step >= l.first_use && step <= l.last_use)
    }

    /// Whether any pass touches the resource
    pub fn is_used(&self, resource: ResourceId) -> bool {
        self.resource_lifetimes.contains_key(&resource)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Pass that only declares accesses
    pub(crate) struct DeclaringPass {
        pub name: &'static str,
        pub reads: Vec<ResourceId>,
        pub writes: Vec<ResourceId>,
    }

    impl DeclaringPass {
        pub fn new(name: &'static str, reads: &[ResourceId], writes: &[ResourceId]) -> Self {
            Self {
                name,
                reads: reads.to_vec(),
                writes: writes.to_vec(),
            }
        }
    }

    impl RenderPass for DeclaringPass {
        fn name(&self) -> &str {
            self.name
        }

        fn setup(&mut self, ctx: &mut PassSetupContext) {
            for &r in &self.reads {
                ctx.read(r, ResourceUsage::TextureRead);
            }
            for &w in &self.writes {
                ctx.write(w, ResourceUsage::RenderTarget);
            }
        }

        fn execute(&self, _ctx: &mut PassExecuteContext) {}
    }

    fn names(graph: &RenderGraph, compiled: &CompiledGraph) -> Vec<String> {
        compiled
            .pass_order
            .iter()
            .filter_map(|&id| graph.get_pass(id))
            .map(|p| p.name().to_string())
            .collect()
    }

    fn texture(graph: &mut RenderGraph, name: &str) -> ResourceId {
        graph.create_texture(name, TextureDescriptor::default())
    }

    #[test]
    fn test_shadow_geometry_post_order() {
        let mut graph = RenderGraph::new();
        let swapchain = graph.register_external("swapchain");
        let shadow = texture(&mut graph, "shadow");
        let hdr = texture(&mut graph, "hdr");

        // Declared back to front on purpose
        graph.add_pass(DeclaringPass::new("post", &[hdr], &[swapchain]), PassType::Graphics, 8, 8);
        graph.add_pass(DeclaringPass::new("geometry", &[shadow], &[hdr]), PassType::Graphics, 8, 8);
        graph.add_pass(DeclaringPass::new("shadow", &[], &[shadow]), PassType::Graphics, 8, 8);

        let compiled = graph.compile().unwrap();
        assert_eq!(names(&graph, &compiled), ["shadow", "geometry", "post"]);
    }

    #[test]
    fn test_independent_passes_keep_declaration_order() {
        let mut graph = RenderGraph::new();
        let a = texture(&mut graph, "a");
        let b = texture(&mut graph, "b");
        let c = texture(&mut graph, "c");

        graph.add_pass(DeclaringPass::new("first", &[], &[a]), PassType::Graphics, 8, 8);
        graph.add_pass(DeclaringPass::new("second", &[], &[b]), PassType::Compute, 8, 8);
        graph.add_pass(DeclaringPass::new("third", &[], &[c]), PassType::Graphics, 8, 8);

        for _ in 0..3 {
            let compiled = graph.compile().unwrap();
            assert_eq!(names(&graph, &compiled), ["first", "second", "third"]);
        }
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut graph = RenderGraph::new();
        let x = texture(&mut graph, "x");
        let y = texture(&mut graph, "y");

        graph.add_pass(DeclaringPass::new("a", &[x], &[y]), PassType::Graphics, 8, 8);
        graph.add_pass(DeclaringPass::new("b", &[y], &[x]), PassType::Graphics, 8, 8);

        match graph.compile() {
            Err(GraphError::Cycle { passes }) => assert_eq!(passes, ["a", "b"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_read_write_same_resource_is_not_a_cycle() {
        let mut graph = RenderGraph::new();
        let x = texture(&mut graph, "x");
        graph.add_pass(DeclaringPass::new("rmw", &[x], &[x]), PassType::Graphics, 8, 8);
        assert!(graph.compile().is_ok());
    }

    #[test]
    fn test_unknown_resource() {
        let mut graph = RenderGraph::new();
        let bogus = ResourceId(42);
        graph.add_pass(DeclaringPass::new("broken", &[bogus], &[]), PassType::Graphics, 8, 8);

        assert_eq!(
            graph.compile().unwrap_err(),
            GraphError::UnknownResource {
                pass: "broken".into(),
                resource: bogus
            }
        );
    }

    #[test]
    fn test_resource_lifetimes() {
        let mut graph = RenderGraph::new();
        let swapchain = graph.register_external("swapchain");
        let depth = texture(&mut graph, "depth");
        let ao = texture(&mut graph, "ao");
        let unused = texture(&mut graph, "unused");

        graph.add_pass(DeclaringPass::new("geometry", &[], &[depth]), PassType::Graphics, 8, 8);
        graph.add_pass(DeclaringPass::new("ssao", &[depth], &[ao]), PassType::Graphics, 8, 8);
        graph.add_pass(DeclaringPass::new("post", &[ao], &[swapchain]), PassType::Graphics, 8, 8);

        let compiled = graph.compile().unwrap();
        assert_eq!(
            compiled.resource_lifetimes[&depth],
            ResourceLifetime {
                first_use: 0,
                last_use: 1
            }
        );
        assert!(compiled.is_resource_alive(ao, 2));
        assert!(!compiled.is_resource_alive(ao, 0));
        assert!(!compiled.is_used(unused));
    }

    #[test]
    fn test_setup_can_create_resources() {
        struct Creating;
        impl RenderPass for Creating {
            fn name(&self) -> &str {
                "creating"
            }
            fn setup(&mut self, ctx: &mut PassSetupContext) {
                let (w, h) = ctx.screen_size();
                assert_eq!((w, h), (64, 32));
                let half = ctx.create_texture_relative(
                    "half",
                    TextureSize::Relative {
                        width_scale: 0.5,
                        height_scale: 0.5,
                    },
                    TextureFormat::Rgba8Unorm,
                    TextureUsage::RENDER_ATTACHMENT,
                );
                ctx.write(half, ResourceUsage::RenderTarget);
            }
            fn execute(&self, _ctx: &mut PassExecuteContext) {}
        }

        let mut graph = RenderGraph::new();
        graph.add_pass(Creating, PassType::Graphics, 64, 32);

        let Some(VirtualResource::Texture(tex)) = graph.resources().iter().next() else {
            panic!("expected a texture");
        };
        assert_eq!((tex.desc.width, tex.desc.height), (32, 16));
        assert!(graph.compile().is_ok());
    }
}
