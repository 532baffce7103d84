//! Virtual resources for the render graph

use crate::backend::types::*;

/// Unique identifier for a render graph resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

/// Virtual texture resource in the render graph
#[derive(Debug, Clone)]
pub struct VirtualTexture {
    pub id: ResourceId,
    pub desc: TextureDescriptor,
    pub name: String,
}

/// Virtual buffer resource in the render graph
#[derive(Debug, Clone)]
pub struct VirtualBuffer {
    pub id: ResourceId,
    pub desc: BufferDescriptor,
    pub name: String,
}

/// Resource type enumeration
#[derive(Debug, Clone)]
pub enum VirtualResource {
    Texture(VirtualTexture),
    Buffer(VirtualBuffer),
    /// Owned outside the graph (swapchain image, baked environment map).
    /// Its view is bound every frame with `set_external_view`.
    External { id: ResourceId, name: String },
}

impl VirtualResource {
    pub fn id(&self) -> ResourceId {
        match self {
            VirtualResource::Texture(t) => t.id,
            VirtualResource::Buffer(b) => b.id,
            VirtualResource::External { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            VirtualResource::Texture(t) => &t.name,
            VirtualResource::Buffer(b) => &b.name,
            VirtualResource::External { name, .. } => name,
        }
    }

    pub fn is_external(&self) -> bool {
        matches!(self, VirtualResource::External { .. })
    }
}

/// Declared resources plus the id counter, shared by the graph and the
/// setup context of each pass.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    resources: Vec<VirtualResource>,
    next_id: u32,
}

impl ResourceRegistry {
    fn next_id(&mut self) -> ResourceId {
        let id = ResourceId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn add_texture(&mut self, name: &str, desc: TextureDescriptor) -> ResourceId {
        let id = self.next_id();
        self.resources.push(VirtualResource::Texture(VirtualTexture {
            id,
            desc,
            name: name.to_string(),
        }));
        id
    }

    pub fn add_buffer(&mut self, name: &str, desc: BufferDescriptor) -> ResourceId {
        let id = self.next_id();
        self.resources.push(VirtualResource::Buffer(VirtualBuffer {
            id,
            desc,
            name: name.to_string(),
        }));
        id
    }

    pub fn add_external(&mut self, name: &str) -> ResourceId {
        let id = self.next_id();
        self.resources.push(VirtualResource::External {
            id,
            name: name.to_string(),
        });
        id
    }

    pub fn get(&self, id: ResourceId) -> Option<&VirtualResource> {
        self.resources.iter().find(|r| r.id() == id)
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.get(id).is_some()
    }

    pub fn find_external(&self, name: &str) -> Option<ResourceId> {
        self.resources
            .iter()
            .find(|r| r.is_external() && r.name() == name)
            .map(VirtualResource::id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &VirtualResource> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// How a pass uses a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUsage {
    /// Read as a texture (sampled)
    TextureRead,
    /// Write as a render target
    RenderTarget,
    /// Read/write as storage texture
    StorageRead,
    StorageWrite,
    StorageReadWrite,
    /// Depth/stencil attachment
    DepthStencilRead,
    DepthStencilWrite,
    /// Read as uniform buffer
    UniformBuffer,
    /// Read as vertex input
    VertexBuffer,
    /// Read/write as storage buffer
    StorageBufferRead,
    StorageBufferWrite,
}

/// Resource access declaration for a pass
#[derive(Debug, Clone)]
pub struct ResourceAccess {
    pub resource: ResourceId,
    pub usage: ResourceUsage,
}

impl ResourceAccess {
    pub fn is_read(&self) -> bool {
        matches!(
            self.usage,
            ResourceUsage::TextureRead
                | ResourceUsage::StorageRead
                | ResourceUsage::StorageReadWrite
                | ResourceUsage::DepthStencilRead
                | ResourceUsage::UniformBuffer
                | ResourceUsage::VertexBuffer
                | ResourceUsage::StorageBufferRead
        )
    }

    pub fn is_write(&self) -> bool {
        matches!(
            self.usage,
            ResourceUsage::RenderTarget
                | ResourceUsage::StorageWrite
                | ResourceUsage::StorageReadWrite
                | ResourceUsage::DepthStencilWrite
                | ResourceUsage::StorageBufferWrite
        )
    }
}

/// Describes texture dimensions that can be relative to screen size
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TextureSize {
    /// Absolute size in pixels
    Absolute { width: u32, height: u32 },
    /// Relative to screen size (1.0 = full screen)
    Relative { width_scale: f32, height_scale: f32 },
}

impl Default for TextureSize {
    fn default() -> Self {
        TextureSize::Relative {
            width_scale: 1.0,
            height_scale: 1.0,
        }
    }
}

impl TextureSize {
    pub const FULL: Self = TextureSize::Relative {
        width_scale: 1.0,
        height_scale: 1.0,
    };

    /// Resolve to pixels. Never returns a zero extent.
    pub fn resolve(&self, screen_width: u32, screen_height: u32) -> (u32, u32) {
        let (width, height) = match self {
            TextureSize::Absolute { width, height } => (*width, *height),
            TextureSize::Relative {
                width_scale,
                height_scale,
            } => (
                ((screen_width as f32) * width_scale) as u32,
                ((screen_height as f32) * height_scale) as u32,
            ),
        };
        (width.max(1), height.max(1))
    }
}
