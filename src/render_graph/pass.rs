//! Render pass definitions for the render graph

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::resource::*;
use std::collections::HashMap;

/// Unique identifier for a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

/// Per-frame values handed to every pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    /// Frame slot returned by `FramePipeline::begin_frame`; selects which
    /// copy of per-frame uniform data the pass binds.
    pub slot: usize,
    pub frame_index: u64,
    /// Seconds since the engine started
    pub time: f32,
    pub width: u32,
    pub height: u32,
}

/// Context for setting up pass resources
pub struct PassSetupContext<'a> {
    pub(crate) registry: &'a mut ResourceRegistry,
    pub(crate) inputs: &'a mut Vec<ResourceAccess>,
    pub(crate) outputs: &'a mut Vec<ResourceAccess>,
    pub(crate) screen_width: u32,
    pub(crate) screen_height: u32,
}

impl<'a> PassSetupContext<'a> {
    /// Create a new texture resource
    pub fn create_texture(&mut self, name: &str, desc: TextureDescriptor) -> ResourceId {
        self.registry.add_texture(name, desc)
    }

    /// Create a texture with size relative to screen
    pub fn create_texture_relative(
        &mut self,
        name: &str,
        size: TextureSize,
        format: TextureFormat,
        usage: TextureUsage,
    ) -> ResourceId {
        let desc = relative_texture_desc(name, size, format, usage, self.screen_width, self.screen_height);
        self.registry.add_texture(name, desc)
    }

    /// Create a new buffer resource
    pub fn create_buffer(&mut self, name: &str, desc: BufferDescriptor) -> ResourceId {
        self.registry.add_buffer(name, desc)
    }

    /// Declare that this pass reads from a resource
    pub fn read(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.inputs.push(ResourceAccess { resource, usage });
    }

    /// Declare that this pass writes to a resource
    pub fn write(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.outputs.push(ResourceAccess { resource, usage });
    }

    /// Get screen dimensions
    pub fn screen_size(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }
}

pub(crate) fn relative_texture_desc(
    name: &str,
    size: TextureSize,
    format: TextureFormat,
    usage: TextureUsage,
    screen_width: u32,
    screen_height: u32,
) -> TextureDescriptor {
    let (width, height) = size.resolve(screen_width, screen_height);
    TextureDescriptor {
        label: Some(name.to_string()),
        width,
        height,
        format,
        usage,
        ..Default::default()
    }
}

/// Context for creating pipelines and bind groups once graph resources exist.
///
/// Runs after allocation and before the first execution of a freshly built
/// graph; never per frame.
pub struct PassPrepareContext<'a> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub swapchain_format: TextureFormat,
    pub width: u32,
    pub height: u32,
    pub resource_textures: &'a HashMap<ResourceId, TextureViewHandle>,
    pub resource_buffers: &'a HashMap<ResourceId, BufferHandle>,
}

impl<'a> PassPrepareContext<'a> {
    pub fn backend(&mut self) -> &mut dyn GraphicsBackend {
        &mut *self.backend
    }

    /// View of a graph-owned texture. Externals are not bound yet at
    /// prepare time and return `None`.
    pub fn get_texture(&self, resource: ResourceId) -> Option<TextureViewHandle> {
        self.resource_textures.get(&resource).copied()
    }

    pub fn get_buffer(&self, resource: ResourceId) -> Option<BufferHandle> {
        self.resource_buffers.get(&resource).copied()
    }
}

/// Context for executing a render pass
pub struct PassExecuteContext<'a> {
    pub backend: &'a mut dyn GraphicsBackend,
    pub frame: &'a FrameInfo,
    pub resource_textures: &'a HashMap<ResourceId, TextureViewHandle>,
    pub resource_buffers: &'a HashMap<ResourceId, BufferHandle>,
}

impl<'a> PassExecuteContext<'a> {
    pub fn backend(&mut self) -> &mut dyn GraphicsBackend {
        &mut *self.backend
    }

    /// Get a texture view handle for a resource
    pub fn get_texture(&self, resource: ResourceId) -> Option<TextureViewHandle> {
        self.resource_textures.get(&resource).copied()
    }

    /// Get a buffer handle for a resource
    pub fn get_buffer(&self, resource: ResourceId) -> Option<BufferHandle> {
        self.resource_buffers.get(&resource).copied()
    }

    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }
}

/// Trait for render passes
pub trait RenderPass: Send + Sync {
    /// Get the pass name for debugging
    fn name(&self) -> &str;

    /// Setup phase - declare resources and dependencies
    fn setup(&mut self, ctx: &mut PassSetupContext);

    /// Create GPU objects that depend on allocated graph resources
    fn prepare(&mut self, _ctx: &mut PassPrepareContext) -> BackendResult<()> {
        Ok(())
    }

    /// Execute phase - record commands
    fn execute(&self, ctx: &mut PassExecuteContext);

    /// Destroy what `prepare` created. Only called once the GPU is idle.
    fn release(&mut self, _backend: &mut dyn GraphicsBackend) {}
}

/// Type of render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassType {
    /// Graphics render pass
    Graphics,
    /// Compute pass
    Compute,
}

/// Metadata about a pass in the graph
#[derive(Debug)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub pass_type: PassType,
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

    /// Every resource this pass touches
    pub fn accesses(&self) -> impl Iterator<Item = &ResourceAccess> {
        self.inputs.iter().chain(self.outputs.iter())
    }
}
