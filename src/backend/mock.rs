//! Recording backend for GPU-free tests

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::frame::{Fence, FenceWaiter};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

/// Backend that records what passes and the executor ask of it.
#[derive(Default)]
pub struct MockBackend {
    pub size: (u32, u32),
    pub calls: Vec<String>,
    pub live_textures: HashMap<u64, TextureDescriptor>,
    pub live_views: Vec<u64>,
    pub live_buffers: HashMap<u64, Vec<u8>>,
    pub pipelines_created: usize,
    /// Samplers, bind groups, layouts and pipelines destroyed so far
    pub released: usize,
    pub fail_acquire: Option<fn() -> BackendError>,
    /// Fence waits and texture destruction, in the order they happened
    pub lifecycle: RefCell<Vec<String>>,
    next_id: u64,
    next_fence: u64,
}

impl MockBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            next_id: 1,
            ..Default::default()
        }
    }

    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn buffer_bytes(&self, buffer: BufferHandle) -> &[u8] {
        &self.live_buffers[&buffer.0]
    }
}

/// Completes every submission as soon as it is waited on
impl FenceWaiter for MockBackend {
    fn wait_fence(&self, fence: &Fence) {
        self.lifecycle
            .borrow_mut()
            .push(format!("wait_fence {}", fence.id()));
        fence.signal();
    }
}

impl GraphicsBackend for MockBackend {
    fn new(_window: Arc<winit::window::Window>, _vsync: bool) -> BackendResult<Self> {
        Err(BackendError::InitializationFailed("mock backend has no surface".into()))
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.calls.push(format!("resize {width}x{height}"));
    }

    fn surface_size(&self) -> (u32, u32) {
        self.size
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        if let Some(err) = self.fail_acquire {
            return Err(err());
        }
        self.calls.push("begin_frame".into());
        let view = TextureViewHandle(self.id());
        Ok(FrameContext {
            swapchain_view: view,
            width: self.size.0,
            height: self.size.1,
        })
    }

    fn end_frame(&mut self) -> BackendResult<Fence> {
        self.calls.push("end_frame".into());
        self.next_fence += 1;
        Ok(Fence::new_unsignaled(self.next_fence))
    }

    fn swapchain_format(&self) -> TextureFormat {
        TextureFormat::Bgra8UnormSrgb
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let id = self.id();
        self.live_buffers.insert(id, vec![0; desc.size as usize]);
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        _desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let id = self.id();
        self.live_buffers.insert(id, data.to_vec());
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let bytes = self
            .live_buffers
            .get_mut(&buffer.0)
            .expect("write to unknown buffer");
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let id = self.id();
        self.live_textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn create_texture_view_with(
        &mut self,
        texture: TextureHandle,
        _desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        if !self.live_textures.contains_key(&texture.0) {
            return Err(BackendError::InvalidHandle(format!("{texture:?}")));
        }
        let id = self.id();
        self.live_views.push(id);
        Ok(TextureViewHandle(id))
    }

    fn write_texture(&mut self, _texture: TextureHandle, _data: &[u8], width: u32, height: u32) {
        self.calls.push(format!("write_texture {width}x{height}"));
    }

    fn create_sampler(&mut self, _desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        Ok(SamplerHandle(self.id()))
    }

    fn create_bind_group_layout(
        &mut self,
        _entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        Ok(BindGroupLayoutHandle(self.id()))
    }

    fn create_bind_group(
        &mut self,
        _layout: BindGroupLayoutHandle,
        _entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        Ok(BindGroupHandle(self.id()))
    }

    fn create_render_pipeline(
        &mut self,
        _desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        self.pipelines_created += 1;
        Ok(RenderPipelineHandle(self.id()))
    }

    fn create_compute_pipeline(
        &mut self,
        _desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        self.pipelines_created += 1;
        Ok(ComputePipelineHandle(self.id()))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.calls.push(format!(
            "begin_render_pass {}",
            desc.label.as_deref().unwrap_or("?")
        ));
    }

    fn end_render_pass(&mut self) {
        self.calls.push("end_render_pass".into());
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.calls
            .push(format!("begin_compute_pass {}", label.unwrap_or("?")));
    }

    fn end_compute_pass(&mut self) {
        self.calls.push("end_compute_pass".into());
    }

    fn set_render_pipeline(&mut self, _pipeline: RenderPipelineHandle) {}

    fn set_compute_pipeline(&mut self, _pipeline: ComputePipelineHandle) {}

    fn set_bind_group(&mut self, index: u32, _bind_group: BindGroupHandle, dynamic_offsets: &[u32]) {
        self.calls
            .push(format!("set_bind_group {index} {dynamic_offsets:?}"));
    }

    fn set_vertex_buffer(&mut self, _slot: u32, _buffer: BufferHandle, _offset: u64) {}

    fn set_index_buffer(&mut self, _buffer: BufferHandle, _offset: u64, _format: IndexFormat) {}

    fn set_viewport(&mut self, _x: f32, _y: f32, _w: f32, _h: f32, _min: f32, _max: f32) {}


    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        self.calls.push(format!("draw {vertices:?} {instances:?}"));
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        _base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        self.calls
            .push(format!("draw_indexed {indices:?} {instances:?}"));
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.calls.push(format!("dispatch {x} {y} {z}"));
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.live_buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.lifecycle
            .get_mut()
            .push(format!("destroy_texture {}", texture.0));
        self.live_textures.remove(&texture.0);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.live_views.retain(|v| *v != view.0);
    }

    fn destroy_sampler(&mut self, _sampler: SamplerHandle) {
        self.released += 1;
    }

    fn destroy_bind_group(&mut self, _bind_group: BindGroupHandle) {
        self.released += 1;
    }

    fn destroy_bind_group_layout(&mut self, _layout: BindGroupLayoutHandle) {
        self.released += 1;
    }

    fn destroy_render_pipeline(&mut self, _pipeline: RenderPipelineHandle) {
        self.released += 1;
    }

    fn destroy_compute_pipeline(&mut self, _pipeline: ComputePipelineHandle) {
        self.released += 1;
    }
}
