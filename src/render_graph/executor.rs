//! Render graph executor

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::graph::*;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::collections::HashMap;

/// Executor for running the compiled render graph
///
/// Owns the GPU objects backing graph resources. They live until
/// [`cleanup`](Self::cleanup), which the caller must only invoke once the GPU
/// is idle.
pub struct RenderGraphExecutor {
    /// Allocated textures mapped by resource ID
    allocated_textures: HashMap<ResourceId, TextureHandle>,

    /// Views of allocated textures merged with external views for the frame
    texture_views: HashMap<ResourceId, TextureViewHandle>,

    /// Allocated buffers mapped by resource ID
    allocated_buffers: HashMap<ResourceId, BufferHandle>,

    external_ids: Vec<(ResourceId, String)>,
}

impl RenderGraphExecutor {
    pub fn new() -> Self {
        Self {
            allocated_textures: HashMap::new(),
            texture_views: HashMap::new(),
            allocated_buffers: HashMap::new(),
            external_ids: Vec::new(),
        }
    }

    /// Set an external texture view (e.g., swapchain image)
    pub fn set_external_view(&mut self, resource: ResourceId, view: TextureViewHandle) {
        self.texture_views.insert(resource, view);
    }

    /// Allocate every resource that at least one pass uses
    pub fn allocate_resources<B: GraphicsBackend>(
        &mut self,
        graph: &RenderGraph,
        compiled: &CompiledGraph,
        backend: &mut B,
    ) -> BackendResult<()> {
        for resource in graph.resources().iter() {
            if let VirtualResource::External { id, name } = resource {
                if !self.external_ids.iter().any(|(e, _)| e == id) {
                    self.external_ids.push((*id, name.clone()));
                }
                continue;
            }

            if !compiled.is_used(resource.id()) {
                log::debug!("Skipping unused graph resource '{}'", resource.name());
                continue;
            }

            match resource {
                VirtualResource::Texture(tex) => {
                    if !self.allocated_textures.contains_key(&tex.id) {
                        let handle = backend.create_texture(&tex.desc)?;
                        let view = backend.create_texture_view(handle)?;
                        self.allocated_textures.insert(tex.id, handle);
                        self.texture_views.insert(tex.id, view);
                        log::debug!(
                            "Allocated texture '{}' {}x{} {:?}",
                            tex.name,
                            tex.desc.width,
                            tex.desc.height,
                            tex.desc.format
                        );
                    }
                }
                VirtualResource::Buffer(buf) => {
                    if !self.allocated_buffers.contains_key(&buf.id) {
                        let handle = backend.create_buffer(&buf.desc)?;
                        self.allocated_buffers.insert(buf.id, handle);
                        log::debug!("Allocated buffer '{}' ({} bytes)", buf.name, buf.desc.size);
                    }
                }
                VirtualResource::External { .. } => {}
            }
        }

        Ok(())
    }

    /// Let every pass create its pipelines and bind groups
    pub fn prepare_passes<B: GraphicsBackend>(
        &self,
        graph: &mut RenderGraph,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> BackendResult<()> {
        let swapchain_format = backend.swapchain_format();
        for pass in graph.passes_mut() {
            let mut ctx = PassPrepareContext {
                backend: backend as &mut dyn GraphicsBackend,
                swapchain_format,
                width,
                height,
                resource_textures: &self.texture_views,
                resource_buffers: &self.allocated_buffers,
            };
            pass.prepare(&mut ctx)?;
        }
        Ok(())
    }

    /// Execute the render graph
    ///
    /// Fails without recording anything if an external resource has no view.
    pub fn execute<B: GraphicsBackend>(
        &self,
        graph: &RenderGraph,
        compiled: &CompiledGraph,
        backend: &mut B,
        frame: &FrameInfo,
    ) -> Result<(), GraphError> {
        if let Some((_, name)) = self
            .external_ids
            .iter()
            .find(|(id, _)| !self.texture_views.contains_key(id))
        {
            return Err(GraphError::UnboundExternal { name: name.clone() });
        }

        for &pass_id in &compiled.pass_order {
            if let Some(pass) = graph.get_pass(pass_id) {
                let mut ctx = PassExecuteContext {
                    backend: backend as &mut dyn GraphicsBackend,
                    frame,
                    resource_textures: &self.texture_views,
                    resource_buffers: &self.allocated_buffers,
                };

                pass.execute(&mut ctx);
            }
        }

        Ok(())
    }

    /// Forget the external views of the finished frame
    pub fn clear_external_views(&mut self) {
        for (id, _) in &self.external_ids {
            self.texture_views.remove(id);
        }
    }

    pub fn allocated_texture_count(&self) -> usize {
        self.allocated_textures.len()
    }

    pub fn allocated_buffer_count(&self) -> usize {
        self.allocated_buffers.len()
    }

    /// Clean up allocated resources
    pub fn cleanup<B: GraphicsBackend>(&mut self, backend: &mut B) {
        for (id, handle) in self.allocated_textures.drain() {
            if let Some(view) = self.texture_views.remove(&id) {
                backend.destroy_texture_view(view);
            }
            backend.destroy_texture(handle);
        }

        for (_, handle) in self.allocated_buffers.drain() {
            backend.destroy_buffer(handle);
        }

        self.texture_views.clear();
        self.external_ids.clear();
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
    use crate::backend::mock::MockBackend;
    use crate::render_graph::graph::tests::DeclaringPass;

    struct DrawingPass {
        label: &'static str,
        target: ResourceId,
        prepared: bool,
    }

    impl RenderPass for DrawingPass {
        fn name(&self) -> &str {
            self.label
        }

        fn setup(&mut self, ctx: &mut PassSetupContext) {
            ctx.write(self.target, ResourceUsage::RenderTarget);
        }

        fn prepare(&mut self, ctx: &mut PassPrepareContext) -> BackendResult<()> {
            self.prepared = true;
            ctx.backend()
                .create_bind_group_layout(&[])
                .map(|_| ())
        }

        fn execute(&self, ctx: &mut PassExecuteContext) {
            assert!(self.prepared, "execute before prepare");
            let Some(view) = ctx.get_texture(self.target) else {
                return;
            };
            let backend = ctx.backend();
            backend.begin_render_pass(&RenderPassDescriptor {
                label: Some(self.label.into()),
                color_attachments: vec![ColorAttachment {
                    view,
                    resolve_target: None,
                    load_op: LoadOp::Clear([0.0; 4]),
                    store_op: StoreOp::Store,
                }],
                depth_stencil_attachment: None,
            });
            backend.draw(0..3, 0..1);
            backend.end_render_pass();
        }
    }

    fn frame() -> FrameInfo {
        FrameInfo {
            slot: 0,
            frame_index: 1,
            time: 0.0,
            width: 16,
            height: 16,
        }
    }

    #[test]
    fn test_allocates_only_used_resources() {
        let mut graph = RenderGraph::new();
        let used = graph.create_texture("used", TextureDescriptor::default());
        graph.create_texture("unused", TextureDescriptor::default());
        graph.add_pass(DeclaringPass::new("p", &[], &[used]), PassType::Graphics, 16, 16);

        let compiled = graph.compile().unwrap();
        let mut backend = MockBackend::new(16, 16);
        let mut executor = RenderGraphExecutor::new();
        executor
            .allocate_resources(&graph, &compiled, &mut backend)
            .unwrap();

        assert_eq!(executor.allocated_texture_count(), 1);
        assert_eq!(backend.live_textures.len(), 1);

        // Allocation is idempotent
        executor
            .allocate_resources(&graph, &compiled, &mut backend)
            .unwrap();
        assert_eq!(backend.live_textures.len(), 1);
    }

    #[test]
    fn test_execute_requires_bound_externals() {
        let mut graph = RenderGraph::new();
        let swapchain = graph.register_external("swapchain");
        graph.add_pass(
            DrawingPass {
                label: "post",
                target: swapchain,
                prepared: false,
            },
            PassType::Graphics,
            16,
            16,
        );

        let compiled = graph.compile().unwrap();
        let mut backend = MockBackend::new(16, 16);
        let mut executor = RenderGraphExecutor::new();
        executor
            .allocate_resources(&graph, &compiled, &mut backend)
            .unwrap();
        executor
            .prepare_passes(&mut graph, &mut backend, 16, 16)
            .unwrap();

        assert_eq!(
            executor.execute(&graph, &compiled, &mut backend, &frame()),
            Err(GraphError::UnboundExternal {
                name: "swapchain".into()
            })
        );
        assert!(backend.calls.is_empty());

        let view = backend.begin_frame().unwrap().swapchain_view;
        executor.set_external_view(swapchain, view);
        executor
            .execute(&graph, &compiled, &mut backend, &frame())
            .unwrap();
        assert!(backend.calls.contains(&"begin_render_pass post".to_string()));

        executor.clear_external_views();
        assert!(executor
            .execute(&graph, &compiled, &mut backend, &frame())
            .is_err());
    }

    #[test]
    fn test_passes_run_in_compiled_order() {
        let mut graph = RenderGraph::new();
        let swapchain = graph.register_external("swapchain");
        let hdr = graph.create_texture("hdr", TextureDescriptor::default());

        graph.add_pass(DeclaringPass::new("reader", &[hdr], &[swapchain]), PassType::Graphics, 16, 16);
        graph.add_pass(
            DrawingPass {
                label: "writer",
                target: hdr,
                prepared: false,
            },
            PassType::Graphics,
            16,
            16,
        );

        let compiled = graph.compile().unwrap();
        let mut backend = MockBackend::new(16, 16);
        let mut executor = RenderGraphExecutor::new();
        executor
            .allocate_resources(&graph, &compiled, &mut backend)
            .unwrap();
        executor
            .prepare_passes(&mut graph, &mut backend, 16, 16)
            .unwrap();
        executor.set_external_view(swapchain, TextureViewHandle(999));
        executor
            .execute(&graph, &compiled, &mut backend, &frame())
            .unwrap();

        assert_eq!(
            backend.calls,
            ["begin_render_pass writer", "draw 0..3 0..1", "end_render_pass"]
        );
    }

    #[test]
    fn test_cleanup_destroys_everything() {
        let mut graph = RenderGraph::new();
        let tex = graph.create_texture("tex", TextureDescriptor::default());
        let buf = graph.create_buffer(
            "buf",
            BufferDescriptor {
                label: None,
                size: 64,
                usage: BufferUsage::STORAGE | BufferUsage::VERTEX,
                mapped_at_creation: false,
            },
        );
        graph.add_pass(DeclaringPass::new("p", &[buf], &[tex]), PassType::Graphics, 16, 16);

        let compiled = graph.compile().unwrap();
        let mut backend = MockBackend::new(16, 16);
        let mut executor = RenderGraphExecutor::new();
        executor
            .allocate_resources(&graph, &compiled, &mut backend)
            .unwrap();
        assert_eq!(executor.allocated_buffer_count(), 1);

        executor.cleanup(&mut backend);
        assert!(backend.live_textures.is_empty());
        assert!(backend.live_views.is_empty());
        assert!(backend.live_buffers.is_empty());
        assert_eq!(executor.allocated_texture_count(), 0);
    }
}
