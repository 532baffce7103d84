//! Reusable render passes
//!
//! Each demo scene assembles its frame from these passes plus a few
//! scene-specific geometry passes:
//! 1. Shadow / environment / grass generation - produce inputs
//! 2. Geometry - draw the scene into an HDR target
//! 3. SSAO and tonemapping - fullscreen post-processing into the swapchain

pub mod cube_from_sphere;
pub mod grass;
pub mod postprocess;
pub mod shadow;
pub mod ssao;

pub use cube_from_sphere::CubeFromSpherePass;
pub use grass::GrassGeneratePass;
pub use postprocess::{TonemapOperator, TonemappingPass};
pub use shadow::{ShadowCaster, ShadowPass};
pub use ssao::SsaoPass;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::shader_types::shader_source;

/// Format of the intermediate colour targets
pub const HDR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Vertex stage drawing one triangle that covers the screen.
///
/// Draw with `draw(0..3, 0..1)` and no vertex buffers.
pub const FULLSCREEN_VS: &str = r#"
struct FullscreenOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_fullscreen(@builtin(vertex_index) vertex_index: u32) -> FullscreenOutput {
    var output: FullscreenOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}
"#;

/// GPU objects a pass creates in `prepare` and destroys in `release`
#[derive(Debug, Default)]
pub struct PassObjects {
    layouts: Vec<BindGroupLayoutHandle>,
    bind_groups: Vec<BindGroupHandle>,
    samplers: Vec<SamplerHandle>,
    render_pipelines: Vec<RenderPipelineHandle>,
    compute_pipelines: Vec<ComputePipelineHandle>,
    buffers: Vec<BufferHandle>,
}

impl PassObjects {
    pub fn layout(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        entries: &[BindGroupLayoutEntry],
    ) -> BackendResult<BindGroupLayoutHandle> {
        let handle = backend.create_bind_group_layout(entries)?;
        self.layouts.push(handle);
        Ok(handle)
    }

    pub fn bind_group(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let handle = backend.create_bind_group(layout, entries)?;
        self.bind_groups.push(handle);
        Ok(handle)
    }

    pub fn sampler(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        desc: &SamplerDescriptor,
    ) -> BackendResult<SamplerHandle> {
        let handle = backend.create_sampler(desc)?;
        self.samplers.push(handle);
        Ok(handle)
    }

    pub fn render_pipeline(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        desc: &RenderPipelineDescriptor,
    ) -> BackendResult<RenderPipelineHandle> {
        let handle = backend.create_render_pipeline(desc)?;
        self.render_pipelines.push(handle);
        Ok(handle)
    }

    pub fn compute_pipeline(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        desc: &ComputePipelineDescriptor,
    ) -> BackendResult<ComputePipelineHandle> {
        let handle = backend.create_compute_pipeline(desc)?;
        self.compute_pipelines.push(handle);
        Ok(handle)
    }

    pub fn buffer_init(
        &mut self,
        backend: &mut dyn GraphicsBackend,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let handle = backend.create_buffer_init(desc, data)?;
        self.buffers.push(handle);
        Ok(handle)
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
            && self.bind_groups.is_empty()
            && self.samplers.is_empty()
            && self.render_pipelines.is_empty()
            && self.compute_pipelines.is_empty()
            && self.buffers.is_empty()
    }

    /// Destroy everything, dependents first
    pub fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        for handle in self.bind_groups.drain(..) {
            backend.destroy_bind_group(handle);
        }
        for handle in self.render_pipelines.drain(..) {
            backend.destroy_render_pipeline(handle);
        }
        for handle in self.compute_pipelines.drain(..) {
            backend.destroy_compute_pipeline(handle);
        }
        for handle in self.layouts.drain(..) {
            backend.destroy_bind_group_layout(handle);
        }
        for handle in self.samplers.drain(..) {
            backend.destroy_sampler(handle);
        }
        for handle in self.buffers.drain(..) {
            backend.destroy_buffer(handle);
        }
    }
}

pub fn layout_entry(binding: u32, visibility: ShaderStageFlags, ty: BindingType) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility,
        ty,
    }
}

pub fn float_texture_entry(binding: u32, view_dimension: TextureViewDimension) -> BindGroupLayoutEntry {
    layout_entry(
        binding,
        ShaderStageFlags::FRAGMENT,
        BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: true },
            view_dimension,
        },
    )
}

pub fn sampler_entry(binding: u32) -> BindGroupLayoutEntry {
    layout_entry(
        binding,
        ShaderStageFlags::FRAGMENT,
        BindingType::Sampler { comparison: false },
    )
}

/// Pipeline drawing `Vertex` meshes with back-face culling.
///
/// `shader` is a body appended to the shared WGSL declarations and must
/// define `vs_main`, plus `fs_main` when colour targets are given.
pub fn mesh_pipeline(
    label: &str,
    shader: &str,
    bind_group_layouts: Vec<BindGroupLayoutHandle>,
    color_formats: &[TextureFormat],
    depth: Option<DepthStencilState>,
) -> RenderPipelineDescriptor {
    RenderPipelineDescriptor {
        label: Some(label.to_string()),
        shader: shader_source(shader),
        vertex_entry: "vs_main".into(),
        fragment_entry: (!color_formats.is_empty()).then(|| "fs_main".to_string()),
        vertex_layouts: vec![Vertex::layout()],
        bind_group_layouts,
        primitive_topology: PrimitiveTopology::TriangleList,
        front_face: FrontFace::Ccw,
        cull_mode: CullMode::Back,
        depth_stencil: depth,
        color_targets: color_formats
            .iter()
            .map(|&format| ColorTargetState {
                format,
                blend: None,
                write_mask: ColorWrites::ALL,
            })
            .collect(),
    }
}

/// Pipeline running `fs_main` over a fullscreen triangle
pub fn fullscreen_pipeline(
    label: &str,
    fragment: &str,
    bind_group_layouts: Vec<BindGroupLayoutHandle>,
    color_format: TextureFormat,
) -> RenderPipelineDescriptor {
    let mut desc = mesh_pipeline(
        label,
        &format!("{FULLSCREEN_VS}{fragment}"),
        bind_group_layouts,
        &[color_format],
        None,
    );
    desc.vertex_entry = "vs_fullscreen".into();
    desc.vertex_layouts.clear();
    desc.cull_mode = CullMode::None;
    desc
}

/// Colour attachment cleared to `clear` and stored
pub fn clear_attachment(view: TextureViewHandle, clear: [f32; 4]) -> ColorAttachment {
    ColorAttachment {
        view,
        resolve_target: None,
        load_op: LoadOp::Clear(clear),
        store_op: StoreOp::Store,
    }
}

/// Depth attachment cleared to the far plane
pub fn depth_attachment(view: TextureViewHandle) -> DepthStencilAttachment {
    DepthStencilAttachment {
        view,
        depth_load_op: LoadOp::Clear([1.0, 0.0, 0.0, 0.0]),
        depth_store_op: StoreOp::Store,
        depth_clear_value: 1.0,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;

    #[test]
    fn release_destroys_everything_once() {
        let mut backend = MockBackend::new(1, 1);
        let mut objects = PassObjects::default();

        let layout = objects.layout(&mut backend, &[]).unwrap();
        objects.bind_group(&mut backend, layout, &[]).unwrap();
        objects
            .sampler(&mut backend, &SamplerDescriptor::default())
            .unwrap();
        objects
            .buffer_init(
                &mut backend,
                &BufferDescriptor {
                    label: None,
                    size: 4,
                    usage: BufferUsage::UNIFORM,
                    mapped_at_creation: false,
                },
                &[0; 4],
            )
            .unwrap();
        assert!(!objects.is_empty());

        objects.release(&mut backend);
        assert!(objects.is_empty());
        assert_eq!(backend.released, 3);
        assert!(backend.live_buffers.is_empty());

        objects.release(&mut backend);
        assert_eq!(backend.released, 3);
    }

    #[test]
    fn fullscreen_pipeline_has_no_vertex_input() {
        let desc = fullscreen_pipeline("post", "@fragment fn fs_main() {}", vec![], HDR_FORMAT);
        assert!(desc.vertex_layouts.is_empty());
        assert_eq!(desc.vertex_entry, "vs_fullscreen");
        assert_eq!(desc.fragment_entry.as_deref(), Some("fs_main"));
        assert!(desc.shader.contains("struct Uniforms"));
    }

    #[test]
    fn depth_only_pipeline_skips_fragment_stage() {
        let desc = mesh_pipeline(
            "shadow",
            "",
            vec![],
            &[],
            Some(DepthStencilState::depth_test(DEPTH_FORMAT)),
        );
        assert!(desc.fragment_entry.is_none());
        assert!(desc.color_targets.is_empty());
    }
}
