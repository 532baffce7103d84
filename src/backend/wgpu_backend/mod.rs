//! wgpu backend implementation

mod commands;
mod convert;
mod pool;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::frame::{Fence, FenceWaiter, FrameTimings, SharedFrameTimings};
use commands::{ComputeCommand, OpenPass, PendingComputePass, PendingRenderPass, RenderCommand};
use parking_lot::Mutex;
use pool::ResourcePool;
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;

/// Submission that may still be executing on the GPU
struct InFlight {
    fence: Fence,
    index: wgpu::SubmissionIndex,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,

    // Swapchain image acquired for the current frame and the handle id
    // standing in for its view
    current_texture: Option<wgpu::SurfaceTexture>,
    current_view: Option<(u64, wgpu::TextureView)>,

    buffers: ResourcePool<wgpu::Buffer>,
    textures: ResourcePool<wgpu::Texture>,
    texture_views: ResourcePool<wgpu::TextureView>,
    samplers: ResourcePool<wgpu::Sampler>,
    bind_group_layouts: ResourcePool<wgpu::BindGroupLayout>,
    bind_groups: ResourcePool<wgpu::BindGroup>,
    render_pipelines: ResourcePool<wgpu::RenderPipeline>,
    compute_pipelines: ResourcePool<wgpu::ComputePipeline>,

    encoder: Option<wgpu::CommandEncoder>,
    open_pass: OpenPass,

    next_fence_id: u64,
    in_flight: Mutex<HashMap<u64, InFlight>>,
    timings: SharedFrameTimings,
}

fn clamp_to_limit(width: u32, height: u32, max_size: u32) -> (u32, u32) {
    if width > max_size || height > max_size {
        let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
        (
            ((width as f32 * scale) as u32).clamp(1, max_size),
            ((height as f32 * scale) as u32).clamp(1, max_size),
        )
    } else {
        (width.max(1), height.max(1))
    }
}

impl WgpuBackend {
    pub async fn new_async(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        let (instance, surface, adapter) = Self::request_adapter(window.clone()).await?;

        let info = adapter.get_info();
        log::info!("Selected GPU: {} ({:?} backend)", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Demo Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        let size = window.inner_size();
        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .filter(|f| convert::texture_format_from_wgpu(*f).is_some())
            .find(|f| f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| {
                BackendError::SwapchainCreationFailed("Surface reports no formats".into())
            })?;

        let (width, height) =
            clamp_to_limit(size.width, size.height, device.limits().max_texture_dimension_2d);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: if vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);
        log::debug!("Surface configured: {}x{} {:?}", width, height, format);

        Ok(Self {
            instance,
            surface,
            adapter,
            device,
            queue,
            surface_config,
            current_texture: None,
            current_view: None,
            buffers: ResourcePool::new(),
            textures: ResourcePool::new(),
            texture_views: ResourcePool::new(),
            samplers: ResourcePool::new(),
            bind_group_layouts: ResourcePool::new(),
            bind_groups: ResourcePool::new(),
            render_pipelines: ResourcePool::new(),
            compute_pipelines: ResourcePool::new(),
            encoder: None,
            open_pass: OpenPass::None,
            next_fence_id: 1,
            in_flight: Mutex::new(HashMap::new()),
            timings: FrameTimings::shared(),
        })
    }

    async fn request_adapter(
        window: Arc<winit::window::Window>,
    ) -> BackendResult<(wgpu::Instance, wgpu::Surface<'static>, wgpu::Adapter)> {
        // On Windows, prefer Vulkan over D3D12 unless WGPU_BACKEND overrides it
        let preferred = if std::env::var("WGPU_BACKEND").is_ok() || !cfg!(target_os = "windows") {
            wgpu::Backends::all()
        } else {
            wgpu::Backends::VULKAN
        };

        let mut candidates = vec![preferred];
        if preferred != wgpu::Backends::all() {
            candidates.push(wgpu::Backends::all());
        }

        for backends in candidates {
            let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
                backends,
                ..Default::default()
            });
            let surface = instance
                .create_surface(window.clone())
                .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;

            let adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: wgpu::PowerPreference::HighPerformance,
                    compatible_surface: Some(&surface),
                    force_fallback_adapter: false,
                })
                .await;

            match adapter {
                Some(adapter) => return Ok((instance, surface, adapter)),
                None => log::warn!("No adapter for {:?}, trying next backend set", backends),
            }
        }

        Err(BackendError::InitializationFailed(
            "No suitable adapter found".into(),
        ))
    }

    fn resolve_view(&self, handle: TextureViewHandle) -> Option<&wgpu::TextureView> {
        match &self.current_view {
            Some((id, view)) if *id == handle.0 => Some(view),
            _ => self.texture_views.get(handle.0),
        }
    }

    fn color_attachments(
        &self,
        desc: &RenderPassDescriptor,
    ) -> Vec<Option<wgpu::RenderPassColorAttachment<'_>>> {
        desc.color_attachments
            .iter()
            .map(|att| {
                let Some(view) = self.resolve_view(att.view) else {
                    log::warn!("Missing color attachment view {:?}", att.view);
                    return None;
                };
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: att.resolve_target.and_then(|h| self.resolve_view(h)),
                    ops: wgpu::Operations {
                        load: convert::load_op(&att.load_op, |c| wgpu::Color {
                            r: c[0] as f64,
                            g: c[1] as f64,
                            b: c[2] as f64,
                            a: c[3] as f64,
                        }),
                        store: convert::store_op(att.store_op),
                    },
                })
            })
            .collect()
    }

    fn depth_attachment(
        &self,
        desc: &RenderPassDescriptor,
    ) -> Option<wgpu::RenderPassDepthStencilAttachment<'_>> {
        let att = desc.depth_stencil_attachment.as_ref()?;
        Some(wgpu::RenderPassDepthStencilAttachment {
            view: self.resolve_view(att.view)?,
            depth_ops: Some(wgpu::Operations {
                load: convert::load_op(&att.depth_load_op, |_| att.depth_clear_value),
                store: convert::store_op(att.depth_store_op),
            }),
            stencil_ops: None,
        })
    }

    fn replay_render<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>, commands: &[RenderCommand]) {
        for cmd in commands {
            match cmd {
                RenderCommand::SetPipeline(handle) => {
                    if let Some(pipeline) = self.render_pipelines.get(handle.0) {
                        pass.set_pipeline(pipeline);
                    }
                }
                RenderCommand::SetBindGroup {
                    index,
                    bind_group,
                    offsets,
                } => {
                    if let Some(bg) = self.bind_groups.get(bind_group.0) {
                        pass.set_bind_group(*index, bg, offsets);
                    }
                }
                RenderCommand::SetVertexBuffer {
                    slot,
                    buffer,
                    offset,
                } => {
                    if let Some(buf) = self.buffers.get(buffer.0) {
                        pass.set_vertex_buffer(*slot, buf.slice(*offset..));
                    }
                }
                RenderCommand::SetIndexBuffer {
                    buffer,
                    offset,
                    format,
                } => {
                    if let Some(buf) = self.buffers.get(buffer.0) {
                        pass.set_index_buffer(buf.slice(*offset..), convert::index_format(*format));
                    }
                }
                RenderCommand::SetViewport {
                    x,
                    y,
                    width,
                    height,
                    min_depth,
                    max_depth,
                } => pass.set_viewport(*x, *y, *width, *height, *min_depth, *max_depth),
                RenderCommand::Draw {
                    vertices,
                    instances,
                } => pass.draw(vertices.clone(), instances.clone()),
                RenderCommand::DrawIndexed {
                    indices,
                    base_vertex,
                    instances,
                } => pass.draw_indexed(indices.clone(), *base_vertex, instances.clone()),
            }
        }
    }

    fn flush_render_pass(&mut self, pending: PendingRenderPass) {
        let Some(mut encoder) = self.encoder.take() else {
            log::warn!("Render pass ended outside a frame");
            return;
        };

        {
            let color_attachments = self.color_attachments(&pending.descriptor);
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: pending.descriptor.label.as_deref(),
                color_attachments: &color_attachments,
                depth_stencil_attachment: self.depth_attachment(&pending.descriptor),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.replay_render(&mut pass, &pending.commands);
        }

        self.encoder = Some(encoder);
    }

    fn flush_compute_pass(&mut self, pending: PendingComputePass) {
        let Some(mut encoder) = self.encoder.take() else {
            log::warn!("Compute pass ended outside a frame");
            return;
        };

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: pending.label.as_deref(),
                timestamp_writes: None,
            });

            for cmd in &pending.commands {
                match cmd {
                    ComputeCommand::SetPipeline(handle) => {
                        if let Some(pipeline) = self.compute_pipelines.get(handle.0) {
                            pass.set_pipeline(pipeline);
                        }
                    }
                    ComputeCommand::SetBindGroup {
                        index,
                        bind_group,
                        offsets,
                    } => {
                        if let Some(bg) = self.bind_groups.get(bind_group.0) {
                            pass.set_bind_group(*index, bg, offsets);
                        }
                    }
                    ComputeCommand::Dispatch { x, y, z } => pass.dispatch_workgroups(*x, *y, *z),
                }
            }
        }

        self.encoder = Some(encoder);
    }

    fn create_shader(&self, label: Option<&str>, source: &str) -> wgpu::ShaderModule {
        self.device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label,
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
    }

    fn pipeline_layout(&self, layouts: &[BindGroupLayoutHandle]) -> BackendResult<wgpu::PipelineLayout> {
        let layouts = layouts
            .iter()
            .map(|h| {
                self.bind_group_layouts
                    .get(h.0)
                    .ok_or_else(|| BackendError::InvalidHandle(format!("{h:?}")))
            })
            .collect::<BackendResult<Vec<_>>>()?;

        Ok(self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            }))
    }
}

impl GraphicsBackend for WgpuBackend {
    fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let (width, height) =
            clamp_to_limit(width, height, self.device.limits().max_texture_dimension_2d);
        self.surface_config.width = width;
        self.surface_config.height = height;
        self.surface.configure(&self.device, &self.surface_config);
        log::debug!("Surface reconfigured to {}x{}", width, height);
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        let output = self.surface.get_current_texture().map_err(|e| match e {
            wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated => BackendError::SurfaceLost,
            wgpu::SurfaceError::OutOfMemory => BackendError::OutOfMemory,
            other => BackendError::AcquireImageFailed(other.to_string()),
        })?;

        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let view_id = self.texture_views.reserve_id();
        self.current_view = Some((view_id, view));
        self.current_texture = Some(output);

        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                }),
        );

        Ok(FrameContext {
            swapchain_view: TextureViewHandle(view_id),
            width: self.surface_config.width,
            height: self.surface_config.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<Fence> {
        let fence_id = self.next_fence_id;
        self.next_fence_id += 1;

        if self.open_pass.is_open() {
            log::warn!("Frame ended with an open pass; its commands are discarded");
            self.open_pass = OpenPass::None;
        }

        let Some(encoder) = self.encoder.take() else {
            // Nothing recorded, nothing for the GPU to finish
            self.current_view = None;
            self.current_texture = None;
            return Ok(Fence::new_signaled(fence_id));
        };

        let fence = Fence::new_unsignaled(fence_id);
        let index = self.queue.submit(std::iter::once(encoder.finish()));

        let signal = fence.clone();
        let timings = Arc::clone(&self.timings);
        self.queue.on_submitted_work_done(move || {
            let latency = signal.submitted_at().elapsed();
            signal.signal();
            timings.lock().record_gpu_latency(latency);
        });

        {
            let mut in_flight = self.in_flight.lock();
            in_flight.retain(|_, f| !f.fence.is_signaled());
            in_flight.insert(
                fence_id,
                InFlight {
                    fence: fence.clone(),
                    index,
                },
            );
        }

        self.current_view = None;
        if let Some(texture) = self.current_texture.take() {
            texture.present();
        }

        // Run completion callbacks for earlier submissions without blocking
        let _ = self.device.poll(wgpu::Maintain::Poll);

        Ok(fence)
    }

    fn swapchain_format(&self) -> TextureFormat {
        convert::texture_format_from_wgpu(self.surface_config.format)
            .unwrap_or(TextureFormat::Bgra8UnormSrgb)
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: convert::buffer_usage(desc.usage),
            mapped_at_creation: desc.mapped_at_creation,
        });
        Ok(BufferHandle(self.buffers.insert(buffer)))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        if data.is_empty() {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} has no contents",
                desc.label
            )));
        }
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: desc.label.as_deref(),
                contents: data,
                usage: convert::buffer_usage(desc.usage),
            });
        Ok(BufferHandle(self.buffers.insert(buffer)))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        match self.buffers.get(buffer.0) {
            Some(buf) => self.queue.write_buffer(buf, offset, data),
            None => log::warn!("write_buffer on unknown {:?}", buffer),
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero extent {}x{}",
                desc.label, desc.width, desc.height
            )));
        }

        let (dimension, depth_or_array_layers) = if desc.depth > 1 {
            (wgpu::TextureDimension::D3, desc.depth)
        } else {
            (wgpu::TextureDimension::D2, desc.array_layers.max(1))
        };

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers,
            },
            mip_level_count: desc.mip_levels.max(1),
            sample_count: 1,
            dimension,
            format: convert::texture_format(desc.format),
            usage: convert::texture_usage(desc.usage),
            view_formats: &[],
        });
        Ok(TextureHandle(self.textures.insert(texture)))
    }

    fn create_texture_view_with(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let tex = self
            .textures
            .get(texture.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{texture:?}")))?;

        let view = tex.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(convert::view_dimension(desc.dimension)),
            base_array_layer: desc.base_array_layer,
            array_layer_count: desc.array_layer_count,
            ..Default::default()
        });
        Ok(TextureViewHandle(self.texture_views.insert(view)))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        let Some(tex) = self.textures.get(texture.0) else {
            log::warn!("write_texture on unknown {:?}", texture);
            return;
        };
        let bytes_per_pixel = convert::texture_format_from_wgpu(tex.format())
            .map_or(4, |f| f.bytes_per_pixel());

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: tex,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * bytes_per_pixel),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let sampler = self.device.create_sampler(&convert::sampler(desc));
        Ok(SamplerHandle(self.samplers.insert(sampler)))
    }

    fn create_bind_group_layout(
        &mut self,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let entries: Vec<wgpu::BindGroupLayoutEntry> = entries
            .iter()
            .map(|e| wgpu::BindGroupLayoutEntry {
                binding: e.binding,
                visibility: convert::shader_stages(e.visibility),
                ty: convert::binding_type(&e.ty),
                count: None,
            })
            .collect();

        let layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: None,
                entries: &entries,
            });
        Ok(BindGroupLayoutHandle(self.bind_group_layouts.insert(layout)))
    }

    fn create_bind_group(
        &mut self,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let layout_ref = self
            .bind_group_layouts
            .get(layout.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{layout:?}")))?;

        let wgpu_entries = entries
            .iter()
            .map(|(binding, entry)| {
                let resource = match entry {
                    BindGroupEntry::Buffer {
                        buffer,
                        offset,
                        size,
                    } => wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: self
                            .buffers
                            .get(buffer.0)
                            .ok_or_else(|| BackendError::InvalidHandle(format!("{buffer:?}")))?,
                        offset: *offset,
                        size: size.and_then(wgpu::BufferSize::new),
                    }),
                    BindGroupEntry::Texture(view) => {
                        wgpu::BindingResource::TextureView(
                            self.resolve_view(*view)
                                .ok_or_else(|| BackendError::InvalidHandle(format!("{view:?}")))?,
                        )
                    }
                    BindGroupEntry::Sampler(sampler) => wgpu::BindingResource::Sampler(
                        self.samplers
                            .get(sampler.0)
                            .ok_or_else(|| BackendError::InvalidHandle(format!("{sampler:?}")))?,
                    ),
                };
                Ok(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource,
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout: layout_ref,
            entries: &wgpu_entries,
        });
        Ok(BindGroupHandle(self.bind_groups.insert(bind_group)))
    }

    fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let shader = self.create_shader(desc.label.as_deref(), &desc.shader);
        let layout = self.pipeline_layout(&desc.bind_group_layouts)?;

        let attributes: Vec<Vec<wgpu::VertexAttribute>> = desc
            .vertex_layouts
            .iter()
            .map(|layout| {
                layout
                    .attributes
                    .iter()
                    .map(|a| wgpu::VertexAttribute {
                        format: convert::vertex_format(a.format),
                        offset: a.offset,
                        shader_location: a.location,
                    })
                    .collect()
            })
            .collect();

        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = desc
            .vertex_layouts
            .iter()
            .zip(&attributes)
            .map(|(layout, attrs)| wgpu::VertexBufferLayout {
                array_stride: layout.array_stride,
                step_mode: match layout.step_mode {
                    VertexStepMode::Vertex => wgpu::VertexStepMode::Vertex,
                    VertexStepMode::Instance => wgpu::VertexStepMode::Instance,
                },
                attributes: attrs,
            })
            .collect();

        let targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .color_targets
            .iter()
            .map(|t| Some(convert::color_target(t)))
            .collect();

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: desc.label.as_deref(),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: &desc.vertex_entry,
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: desc
                    .fragment_entry
                    .as_deref()
                    .map(|entry_point| wgpu::FragmentState {
                        module: &shader,
                        entry_point,
                        targets: &targets,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                primitive: convert::primitive_state(desc),
                depth_stencil: desc.depth_stencil.as_ref().map(convert::depth_stencil),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });

        log::debug!("Created render pipeline {:?}", desc.label);
        Ok(RenderPipelineHandle(self.render_pipelines.insert(pipeline)))
    }

    fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        let shader = self.create_shader(desc.label.as_deref(), &desc.shader);
        let layout = self.pipeline_layout(&desc.bind_group_layouts)?;

        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: desc.label.as_deref(),
                layout: Some(&layout),
                module: &shader,
                entry_point: &desc.entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            });

        log::debug!("Created compute pipeline {:?}", desc.label);
        Ok(ComputePipelineHandle(self.compute_pipelines.insert(pipeline)))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        self.open_pass = OpenPass::Render(PendingRenderPass {
            descriptor: desc.clone(),
            commands: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) {
        match std::mem::take(&mut self.open_pass) {
            OpenPass::Render(pending) => self.flush_render_pass(pending),
            other => {
                log::warn!("end_render_pass without an open render pass");
                self.open_pass = other;
            }
        }
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.open_pass = OpenPass::Compute(PendingComputePass {
            label: label.map(str::to_string),
            commands: Vec::new(),
        });
    }

    fn end_compute_pass(&mut self) {
        match std::mem::take(&mut self.open_pass) {
            OpenPass::Compute(pending) => self.flush_compute_pass(pending),
            other => {
                log::warn!("end_compute_pass without an open compute pass");
                self.open_pass = other;
            }
        }
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.open_pass.record_render(RenderCommand::SetPipeline(pipeline));
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.open_pass.record_compute(ComputeCommand::SetPipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle, dynamic_offsets: &[u32]) {
        let offsets = dynamic_offsets.to_vec();
        if let OpenPass::Compute(_) = self.open_pass {
            self.open_pass.record_compute(ComputeCommand::SetBindGroup {
                index,
                bind_group,
                offsets,
            });
        } else {
            self.open_pass.record_render(RenderCommand::SetBindGroup {
                index,
                bind_group,
                offsets,
            });
        }
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.open_pass.record_render(RenderCommand::SetVertexBuffer {
            slot,
            buffer,
            offset,
        });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, offset: u64, format: IndexFormat) {
        self.open_pass.record_render(RenderCommand::SetIndexBuffer {
            buffer,
            offset,
            format,
        });
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32) {
        self.open_pass.record_render(RenderCommand::SetViewport {
            x,
            y,
            width,
            height,
            min_depth,
            max_depth,
        });
    }

    fn draw(&mut self, vertices: std::ops::Range<u32>, instances: std::ops::Range<u32>) {
        self.open_pass
            .record_render(RenderCommand::Draw { vertices, instances });
    }

    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    ) {
        self.open_pass.record_render(RenderCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.open_pass
            .record_compute(ComputeCommand::Dispatch { x, y, z });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(texture.0);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.texture_views.remove(view.0);
    }

    fn destroy_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(sampler.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(bind_group.0);
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) {
        self.bind_group_layouts.remove(layout.0);
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.render_pipelines.remove(pipeline.0);
    }

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.compute_pipelines.remove(pipeline.0);
    }
}

impl FenceWaiter for WgpuBackend {
    /// Block on the submission behind `fence`, then run pending callbacks.
    fn wait_fence(&self, fence: &Fence) {
        if fence.is_signaled() {
            return;
        }

        let entry = self.in_flight.lock().remove(&fence.id());
        let maintain = match entry {
            Some(entry) => wgpu::Maintain::WaitForSubmissionIndex(entry.index),
            None => wgpu::Maintain::Wait,
        };
        let _ = self.device.poll(maintain);

        // Callbacks run inside poll; a fence unknown to this backend would
        // otherwise never complete.
        if !fence.is_signaled() {
            log::trace!("Fence {} completed without callback", fence.id());
            fence.signal();
        }
    }
}

// Access for the egui overlay and diagnostics
impl WgpuBackend {
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    pub fn wgpu_surface_format(&self) -> wgpu::TextureFormat {
        self.surface_config.format
    }

    /// GPU completion timings collected from submission callbacks
    pub fn timings(&self) -> SharedFrameTimings {
        Arc::clone(&self.timings)
    }

    /// Get device, queue, and encoder together for operations that need all three.
    pub fn device_queue_encoder(
        &mut self,
    ) -> (&wgpu::Device, &wgpu::Queue, Option<&mut wgpu::CommandEncoder>) {
        (&self.device, &self.queue, self.encoder.as_mut())
    }

    /// Draw egui primitives on top of `target`, keeping its contents.
    pub fn render_egui(
        &mut self,
        renderer: &egui_wgpu::Renderer,
        paint_jobs: &[egui::ClippedPrimitive],
        screen_descriptor: &egui_wgpu::ScreenDescriptor,
        target: TextureViewHandle,
    ) {
        let Some(mut encoder) = self.encoder.take() else {
            return;
        };

        if let Some(view) = self.resolve_view(target) {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            renderer.render(&mut pass, paint_jobs, screen_descriptor);
        }

        self.encoder = Some(encoder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_keeps_small_sizes() {
        assert_eq!(clamp_to_limit(800, 600, 8192), (800, 600));
        assert_eq!(clamp_to_limit(0, 600, 8192), (1, 600));
    }

    #[test]
    fn test_clamp_preserves_aspect_ratio() {
        let (w, h) = clamp_to_limit(16384, 8192, 8192);
        assert_eq!(w, 8192);
        assert_eq!(h, 4096);
    }
}
