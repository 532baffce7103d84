//! Tonemapping and composite into the swapchain

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::pipeline::{clear_attachment, fullscreen_pipeline, layout_entry, PassObjects};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use bytemuck::{Pod, Zeroable};
use std::str::FromStr;

/// Tonemapping operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TonemapOperator {
    Reinhard,
    #[default]
    Aces,
    /// Clamp only
    None,
}

impl TonemapOperator {
    fn shader_id(self) -> u32 {
        match self {
            TonemapOperator::Reinhard => 0,
            TonemapOperator::Aces => 1,
            TonemapOperator::None => 2,
        }
    }
}

impl FromStr for TonemapOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reinhard" => Ok(Self::Reinhard),
            "aces" => Ok(Self::Aces),
            "none" => Ok(Self::None),
            other => Err(format!("unknown tonemap operator '{other}'")),
        }
    }
}

/// Uniform block of the tonemapping shader
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct TonemapParams {
    pub exposure: f32,
    pub operator: u32,
    /// 1 when the target is not an sRGB format and the shader must encode
    pub apply_gamma: u32,
    /// 1 when an ambient occlusion texture is bound
    pub use_ao: u32,
}

/// Tonemapping post-processing pass
///
/// Reads the HDR colour target and, for scenes with SSAO, the occlusion
/// texture, and writes display-ready colour into `output`.
pub struct TonemappingPass {
    pub operator: TonemapOperator,
    pub exposure: f32,
    hdr: ResourceId,
    ao: Option<ResourceId>,
    output: ResourceId,
    objects: PassObjects,
    pipeline: Option<RenderPipelineHandle>,
    bind_group: Option<BindGroupHandle>,
}

impl TonemappingPass {
    pub fn new(hdr: ResourceId, output: ResourceId) -> Self {
        Self {
            operator: TonemapOperator::default(),
            exposure: 1.0,
            hdr,
            ao: None,
            output,
            objects: PassObjects::default(),
            pipeline: None,
            bind_group: None,
        }
    }

    /// Multiply the scene colour by an occlusion texture (red channel)
    pub fn with_ambient_occlusion(mut self, ao: ResourceId) -> Self {
        self.ao = Some(ao);
        self
    }

    pub fn with_operator(mut self, operator: TonemapOperator, exposure: f32) -> Self {
        self.operator = operator;
        self.exposure = exposure;
        self
    }

    pub fn params(&self, target: TextureFormat) -> TonemapParams {
        TonemapParams {
            exposure: self.exposure,
            operator: self.operator.shader_id(),
            apply_gamma: u32::from(!target.is_srgb()),
            use_ao: u32::from(self.ao.is_some()),
        }
    }
}

impl RenderPass for TonemappingPass {
    fn name(&self) -> &str {
        "Tonemapping"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.hdr, ResourceUsage::TextureRead);
        if let Some(ao) = self.ao {
            ctx.read(ao, ResourceUsage::TextureRead);
        }
        ctx.write(self.output, ResourceUsage::RenderTarget);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> BackendResult<()> {
        let hdr = ctx
            .get_texture(self.hdr)
            .ok_or_else(|| BackendError::InvalidHandle("tonemapping input".into()))?;
        // Without SSAO the HDR view stands in so the layout stays the same
        let ao = match self.ao {
            Some(ao) => ctx
                .get_texture(ao)
                .ok_or_else(|| BackendError::InvalidHandle("ambient occlusion".into()))?,
            None => hdr,
        };
        let format = ctx.swapchain_format;
        let params = self.params(format);
        let backend = ctx.backend();

        let texture = |binding| {
            layout_entry(
                binding,
                ShaderStageFlags::FRAGMENT,
                BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D2,
                },
            )
        };
        let layout = self.objects.layout(
            backend,
            &[
                texture(0),
                texture(1),
                layout_entry(2, ShaderStageFlags::FRAGMENT, BindingType::Sampler { comparison: false }),
                layout_entry(3, ShaderStageFlags::FRAGMENT, BindingType::UniformBuffer),
            ],
        )?;

        self.pipeline = Some(self.objects.render_pipeline(
            backend,
            &fullscreen_pipeline("Tonemapping Pipeline", TONEMAPPING_SHADER, vec![layout], format),
        )?);

        let sampler = self
            .objects
            .sampler(backend, &SamplerDescriptor::default())?;
        let params_buffer = self.objects.buffer_init(
            backend,
            &BufferDescriptor {
                label: Some("tonemap_params".into()),
                size: std::mem::size_of::<TonemapParams>() as u64,
                usage: BufferUsage::UNIFORM,
                mapped_at_creation: false,
            },
            bytemuck::bytes_of(&params),
        )?;

        self.bind_group = Some(self.objects.bind_group(
            backend,
            layout,
            &[
                (0, BindGroupEntry::Texture(hdr)),
                (1, BindGroupEntry::Texture(ao)),
                (2, BindGroupEntry::Sampler(sampler)),
                (
                    3,
                    BindGroupEntry::Buffer {
                        buffer: params_buffer,
                        offset: 0,
                        size: None,
                    },
                ),
            ],
        )?);

        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) {
        let (Some(view), Some(pipeline), Some(bind_group)) =
            (ctx.get_texture(self.output), self.pipeline, self.bind_group)
        else {
            return;
        };
        let (width, height) = (ctx.width(), ctx.height());
        let backend = ctx.backend();

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Tonemapping".into()),
            color_attachments: vec![clear_attachment(view, [0.0, 0.0, 0.0, 1.0])],
            depth_stencil_attachment: None,
        });
        backend.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
        backend.set_render_pipeline(pipeline);
        backend.set_bind_group(0, bind_group, &[]);
        backend.draw(0..3, 0..1);
        backend.end_render_pass();
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.objects.release(backend);
        self.pipeline = None;
        self.bind_group = None;
    }
}

const TONEMAPPING_SHADER: &str = r#"
struct TonemapParams {
    exposure: f32,
    operator: u32,
    apply_gamma: u32,
    use_ao: u32,
};

@group(0) @binding(0) var hdr_texture: texture_2d<f32>;
@group(0) @binding(1) var ao_texture: texture_2d<f32>;
@group(0) @binding(2) var linear_sampler: sampler;
@group(0) @binding(3) var<uniform> params: TonemapParams;

fn aces_tonemap(color: vec3<f32>) -> vec3<f32> {
    let a = 2.51;
    let b = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    return saturate((color * (a * color + b)) / (color * (c * color + d) + e));
}

fn reinhard_tonemap(color: vec3<f32>) -> vec3<f32> {
    return color / (color + vec3<f32>(1.0));
}

@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    var color = textureSample(hdr_texture, linear_sampler, input.uv).rgb;
    let ao = textureSample(ao_texture, linear_sampler, input.uv).r;
    if (params.use_ao == 1u) {
        color = color * ao;
    }
    color = color * params.exposure;

    var mapped: vec3<f32>;
    switch params.operator {
        case 0u: { mapped = reinhard_tonemap(color); }
        case 1u: { mapped = aces_tonemap(color); }
        default: { mapped = saturate(color); }
    }

    if (params.apply_gamma == 1u) {
        mapped = pow(mapped, vec3<f32>(1.0 / 2.2));
    }
    return vec4<f32>(mapped, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::pipeline::test_support::run_graph;
    use crate::pipeline::HDR_FORMAT;
    use crate::render_graph::graph::tests::DeclaringPass;
    use crate::render_graph::RenderGraph;
    use rstest::rstest;

    #[rstest]
    #[case(TextureFormat::Bgra8UnormSrgb, 0)]
    #[case(TextureFormat::Bgra8Unorm, 1)]
    fn gamma_only_for_linear_targets(#[case] format: TextureFormat, #[case] apply_gamma: u32) {
        let pass = TonemappingPass::new(ResourceId(0), ResourceId(1));
        assert_eq!(pass.params(format).apply_gamma, apply_gamma);
        assert_eq!(pass.params(format).use_ao, 0);
    }

    #[rstest]
    #[case("ACES", TonemapOperator::Aces)]
    #[case("reinhard", TonemapOperator::Reinhard)]
    #[case("none", TonemapOperator::None)]
    fn parses_operator_names(#[case] name: &str, #[case] expected: TonemapOperator) {
        assert_eq!(name.parse::<TonemapOperator>(), Ok(expected));
    }

    #[test]
    fn params_match_wgsl_block() {
        assert_eq!(std::mem::size_of::<TonemapParams>(), 16);
        assert!(TONEMAPPING_SHADER.contains("use_ao: u32"));
    }

    #[test]
    fn composites_into_the_swapchain_last() {
        let mut backend = MockBackend::new(40, 30);
        let mut graph = RenderGraph::new();
        let swapchain = graph.register_external("swapchain");
        let hdr = graph.create_texture(
            "hdr",
            TextureDescriptor {
                format: HDR_FORMAT,
                ..Default::default()
            },
        );
        let ao = graph.create_texture("ao", TextureDescriptor::default());
        graph.add_pass(
            TonemappingPass::new(hdr, swapchain).with_ambient_occlusion(ao),
            PassType::Graphics,
            40,
            30,
        );
        graph.add_pass(DeclaringPass::new("ssao", &[], &[ao]), PassType::Graphics, 40, 30);
        graph.add_pass(DeclaringPass::new("geometry", &[], &[hdr]), PassType::Graphics, 40, 30);

        let compiled = graph.compile().unwrap();
        let last = *compiled.pass_order.last().unwrap();
        assert_eq!(graph.get_pass(last).unwrap().name(), "Tonemapping");

        run_graph(&mut graph, &mut backend, 0, &[("swapchain", TextureViewHandle(500))]);
        assert_eq!(
            backend.calls,
            [
                "begin_render_pass Tonemapping",
                "set_bind_group 0 []",
                "draw 0..3 0..1",
                "end_render_pass",
            ]
        );
    }

    #[test]
    fn missing_input_fails_prepare() {
        let mut backend = MockBackend::new(8, 8);
        let mut graph = RenderGraph::new();
        let swapchain = graph.register_external("swapchain");
        let hdr = graph.register_external("hdr");
        graph.add_pass(TonemappingPass::new(hdr, swapchain), PassType::Graphics, 8, 8);

        let compiled = graph.compile().unwrap();
        let mut executor = crate::render_graph::RenderGraphExecutor::new();
        executor
            .allocate_resources(&graph, &compiled, &mut backend)
            .unwrap();
        assert!(matches!(
            executor.prepare_passes(&mut graph, &mut backend, 8, 8),
            Err(BackendError::InvalidHandle(_))
        ));
    }
}
