//! Depth-only shadow map pass
//!
//! Renders every caster from the sun into an absolute-size depth texture
//! that later passes sample with a comparison sampler.

use super::*;
use crate::frame::UniformRing;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::resources::GpuMesh;
use crate::shader_types::{buffer_index, ShadowLightUniform, Uniforms};

/// A mesh drawn into the shadow map, with the `Uniforms` entry holding its
/// model matrix.
#[derive(Debug, Clone, Copy)]
pub struct ShadowCaster {
    pub mesh: GpuMesh,
    pub entry: usize,
}

pub struct ShadowPass {
    shadow_map: ResourceId,
    uniforms: UniformRing<Uniforms>,
    light: UniformRing<ShadowLightUniform>,
    casters: Vec<ShadowCaster>,
    objects: PassObjects,
    pipeline: Option<RenderPipelineHandle>,
    bind_group: Option<BindGroupHandle>,
}

impl ShadowPass {
    /// Constant depth bias against shadow acne
    pub const DEPTH_BIAS: i32 = 2;
    pub const DEPTH_BIAS_SLOPE: f32 = 2.0;

    pub fn new(
        shadow_map: ResourceId,
        uniforms: UniformRing<Uniforms>,
        light: UniformRing<ShadowLightUniform>,
        casters: Vec<ShadowCaster>,
    ) -> Self {
        Self {
            shadow_map,
            uniforms,
            light,
            casters,
            objects: PassObjects::default(),
            pipeline: None,
            bind_group: None,
        }
    }

    /// Descriptor for the depth texture this pass renders into
    pub fn shadow_map_desc(size: u32) -> TextureDescriptor {
        TextureDescriptor {
            label: Some("shadow_map".into()),
            width: size,
            height: size,
            format: DEPTH_FORMAT,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            ..Default::default()
        }
    }
}

impl RenderPass for ShadowPass {
    fn name(&self) -> &str {
        "Shadow Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.write(self.shadow_map, ResourceUsage::DepthStencilWrite);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> BackendResult<()> {
        let backend = ctx.backend();

        let layout = self.objects.layout(
            backend,
            &[
                layout_entry(
                    buffer_index::UNIFORMS,
                    ShaderStageFlags::VERTEX,
                    self.uniforms.binding_type(),
                ),
                layout_entry(
                    buffer_index::SHADOW_LIGHT,
                    ShaderStageFlags::VERTEX,
                    self.light.binding_type(),
                ),
            ],
        )?;

        let mut depth = DepthStencilState::depth_test(DEPTH_FORMAT);
        depth.depth_bias = Self::DEPTH_BIAS;
        depth.depth_bias_slope_scale = Self::DEPTH_BIAS_SLOPE;

        self.pipeline = Some(self.objects.render_pipeline(
            backend,
            &mesh_pipeline("Shadow Pipeline", SHADOW_SHADER, vec![layout], &[], Some(depth)),
        )?);

        self.bind_group = Some(self.objects.bind_group(
            backend,
            layout,
            &[
                (buffer_index::UNIFORMS, self.uniforms.binding()),
                (buffer_index::SHADOW_LIGHT, self.light.binding()),
            ],
        )?);

        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) {
        let (Some(view), Some(pipeline), Some(bind_group)) =
            (ctx.get_texture(self.shadow_map), self.pipeline, self.bind_group)
        else {
            return;
        };
        let slot = ctx.frame.slot;
        let backend = ctx.backend();

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Shadow Pass".into()),
            color_attachments: vec![],
            depth_stencil_attachment: Some(depth_attachment(view)),
        });
        backend.set_render_pipeline(pipeline);

        let light_offset = self.light.offset(slot, 0);
        for caster in &self.casters {
            backend.set_bind_group(
                0,
                bind_group,
                &[self.uniforms.offset(slot, caster.entry), light_offset],
            );
            caster.mesh.draw(backend, 0..1);
        }

        backend.end_render_pass();
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.objects.release(backend);
        self.pipeline = None;
        self.bind_group = None;
    }
}

const SHADOW_SHADER: &str = r#"
@group(0) @binding(2) var<uniform> uniforms: Uniforms;
@group(0) @binding(4) var<uniform> light: ShadowLightUniform;

@vertex
fn vs_main(input: VertexInput) -> @builtin(position) vec4<f32> {
    return light.projection * light.view * uniforms.model * vec4<f32>(input.position, 1.0);
}
"#;

/// WGSL helpers for receivers; expects `shadow_map` and `shadow_sampler`
/// bindings and a `light` uniform in scope.
pub const SHADOW_SAMPLING: &str = r#"
fn shadow_factor(world_position: vec3<f32>) -> f32 {
    let light_clip = light.projection * light.view * vec4<f32>(world_position, 1.0);
    let ndc = light_clip.xyz / light_clip.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if (uv.x < 0.0 || uv.x > 1.0 || uv.y < 0.0 || uv.y > 1.0 || ndc.z > 1.0) {
        return 1.0;
    }

    // 3x3 percentage-closer filtering
    let texel = 1.0 / vec2<f32>(textureDimensions(shadow_map));
    var lit = 0.0;
    for (var x = -1; x <= 1; x++) {
        for (var y = -1; y <= 1; y++) {
            let offset = vec2<f32>(f32(x), f32(y)) * texel;
            lit += textureSampleCompareLevel(shadow_map, shadow_sampler, uv + offset, ndc.z);
        }
    }
    return lit / 9.0;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::pipeline::test_support::run_graph;
    use crate::render_graph::RenderGraph;
    use crate::resources::Mesh;

    #[test]
    fn shader_bindings_follow_buffer_indices() {
        assert!(SHADOW_SHADER.contains(&format!(
            "@binding({}) var<uniform> uniforms",
            buffer_index::UNIFORMS
        )));
        assert!(SHADOW_SHADER.contains(&format!(
            "@binding({}) var<uniform> light",
            buffer_index::SHADOW_LIGHT
        )));
    }

    #[test]
    fn draws_each_caster_with_its_slot_offsets() {
        let mut backend = MockBackend::new(64, 64);
        let uniforms = UniformRing::<Uniforms>::new(&mut backend, "uniforms", 2, 2).unwrap();
        let light = UniformRing::<ShadowLightUniform>::new(&mut backend, "light", 2, 1).unwrap();
        let mesh = GpuMesh::upload(&mut backend, &Mesh::cube()).unwrap();

        let mut graph = RenderGraph::new();
        let shadow_map = graph.create_texture("shadow_map", ShadowPass::shadow_map_desc(256));
        graph.add_pass(
            ShadowPass::new(
                shadow_map,
                uniforms,
                light,
                vec![
                    ShadowCaster { mesh, entry: 0 },
                    ShadowCaster { mesh, entry: 1 },
                ],
            ),
            PassType::Graphics,
            64,
            64,
        );

        run_graph(&mut graph, &mut backend, 1, &[]);

        let light_offset = light.offset(1, 0);
        assert_eq!(
            backend.calls,
            [
                "begin_render_pass Shadow Pass".to_string(),
                format!("set_bind_group 0 {:?}", [uniforms.offset(1, 0), light_offset]),
                "draw_indexed 0..36 0..1".to_string(),
                format!("set_bind_group 0 {:?}", [uniforms.offset(1, 1), light_offset]),
                "draw_indexed 0..36 0..1".to_string(),
                "end_render_pass".to_string(),
            ]
        );
        let map = backend
            .live_textures
            .values()
            .find(|d| d.label.as_deref() == Some("shadow_map"))
            .unwrap();
        assert_eq!((map.width, map.height), (256, 256));
    }
}
