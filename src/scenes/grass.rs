//! Field of wind-blown grass blades
//!
//! A compute pass regenerates every blade each frame into a graph-owned
//! vertex buffer, which the draw pass renders over a ground plane.

use super::*;
use crate::frame::UniformRing;
use crate::pipeline::grass::GRASS_FIELD_SIZE;
use crate::pipeline::*;
use crate::resources::{GpuMesh, Mesh};
use crate::scene::{CameraController, OrbitController};
use crate::shader_types::{buffer_index, Uniforms, GRASS_VERTEX_COUNT};
use glam::{Mat4, Vec3};

const GROUND: usize = 0;
const BLADES: usize = 1;

const SKY_CLEAR: [f32; 4] = [0.55, 0.72, 0.95, 1.0];

pub struct GrassScene {
    camera: Camera,
    controller: OrbitController,
    uniforms: UniformRing<Uniforms>,
    ground: GpuMesh,
    tonemap: Tonemap,
}

impl GrassScene {
    pub fn new(backend: &mut dyn GraphicsBackend, config: &EngineConfig) -> BackendResult<Self> {
        let controller = OrbitController::new(Vec3::new(0.0, 0.5, 0.0), 18.0)
            .with_angles(20.0, 18.0)
            .above_ground()
            .with_auto_rotate(0.1);
        let mut camera = Camera::default();
        controller.apply(&mut camera);

        Ok(Self {
            camera,
            controller,
            uniforms: UniformRing::new(backend, "grass_uniforms", config.frames_in_flight, 2)?,
            ground: GpuMesh::upload(backend, &Mesh::plane(GRASS_FIELD_SIZE, GRASS_FIELD_SIZE, 1))?,
            tonemap: Tonemap::from_config(config),
        })
    }
}

impl DemoScene for GrassScene {
    fn kind(&self) -> SceneKind {
        SceneKind::Grass
    }

    fn update(&mut self, dt: f32, input: &CameraInput) {
        self.controller.update(&mut self.camera, input, dt);
    }

    fn write_uniforms(&mut self, backend: &mut dyn GraphicsBackend, frame: &FrameInfo) {
        self.camera.set_aspect(frame.width, frame.height);
        let uniforms = self
            .camera
            .uniforms(Mat4::IDENTITY, frame.time, frame.width, frame.height);
        // Blades are generated in world space, so both entries share a model
        self.uniforms.write(backend, frame.slot, GROUND, &uniforms);
        self.uniforms.write(backend, frame.slot, BLADES, &uniforms);
    }

    fn build_graph(&mut self, width: u32, height: u32, _swapchain_format: TextureFormat) -> RenderGraph {
        let mut graph = RenderGraph::new();
        let targets = SceneTargets::declare(&mut graph, width, height);
        let blades = graph.create_buffer("grass_vertices", GrassGeneratePass::vertex_buffer_desc());

        graph.add_pass(
            GrassGeneratePass::new(blades, self.uniforms, BLADES),
            PassType::Compute,
            width,
            height,
        );
        graph.add_pass(
            GrassDrawPass {
                targets,
                blades,
                uniforms: self.uniforms,
                ground: self.ground,
                objects: PassObjects::default(),
                pipelines: None,
                bind_group: None,
            },
            PassType::Graphics,
            width,
            height,
        );
        graph.add_pass(self.tonemap.pass(&targets), PassType::Graphics, width, height);
        graph
    }

    fn camera(&self) -> &Camera {
        &self.camera
    }

    fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        self.ground.destroy(backend);
        backend.destroy_buffer(self.uniforms.buffer());
    }
}

struct GrassDrawPass {
    targets: SceneTargets,
    blades: ResourceId,
    uniforms: UniformRing<Uniforms>,
    ground: GpuMesh,
    objects: PassObjects,
    /// Ground, then blades
    pipelines: Option<(RenderPipelineHandle, RenderPipelineHandle)>,
    bind_group: Option<BindGroupHandle>,
}

impl RenderPass for GrassDrawPass {
    fn name(&self) -> &str {
        "Grass Draw Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.blades, ResourceUsage::VertexBuffer);
        ctx.write(self.targets.hdr, ResourceUsage::RenderTarget);
        ctx.write(self.targets.depth, ResourceUsage::DepthStencilWrite);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> BackendResult<()> {
        let backend = ctx.backend();
        let layout = self.objects.layout(
            backend,
            &[layout_entry(
                buffer_index::UNIFORMS,
                ShaderStageFlags::VERTEX_FRAGMENT,
                self.uniforms.binding_type(),
            )],
        )?;

        let ground = self.objects.render_pipeline(
            backend,
            &mesh_pipeline(
                "Grass Ground Pipeline",
                &format!("{LIT_VERTEX}{GROUND_FRAGMENT}"),
                vec![layout],
                &[HDR_FORMAT],
                Some(DepthStencilState::depth_test(DEPTH_FORMAT)),
            ),
        )?;
        // Blades are single quads seen from both sides
        let mut blade_desc = mesh_pipeline(
            "Grass Blade Pipeline",
            &format!("{LIT_VERTEX}{BLADE_FRAGMENT}"),
            vec![layout],
            &[HDR_FORMAT],
            Some(DepthStencilState::depth_test(DEPTH_FORMAT)),
        );
        blade_desc.cull_mode = CullMode::None;
        let blades = self.objects.render_pipeline(backend, &blade_desc)?;
        self.pipelines = Some((ground, blades));

        self.bind_group = Some(self.objects.bind_group(
            backend,
            layout,
            &[(buffer_index::UNIFORMS, self.uniforms.binding())],
        )?);

        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) {
        let (Some(hdr), Some(depth), Some(blades)) = (
            ctx.get_texture(self.targets.hdr),
            ctx.get_texture(self.targets.depth),
            ctx.get_buffer(self.blades),
        ) else {
            return;
        };
        let (Some((ground_pipeline, blade_pipeline)), Some(bind_group)) = (self.pipelines, self.bind_group)
        else {
            return;
        };
        let slot = ctx.frame.slot;
        let backend = ctx.backend();

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Grass Draw Pass".into()),
            color_attachments: vec![clear_attachment(hdr, SKY_CLEAR)],
            depth_stencil_attachment: Some(depth_attachment(depth)),
        });

        backend.set_render_pipeline(ground_pipeline);
        backend.set_bind_group(0, bind_group, &[self.uniforms.offset(slot, GROUND)]);
        self.ground.draw(backend, 0..1);

        backend.set_render_pipeline(blade_pipeline);
        backend.set_bind_group(0, bind_group, &[self.uniforms.offset(slot, BLADES)]);
        backend.set_vertex_buffer(0, blades, 0);
        backend.draw(0..GRASS_VERTEX_COUNT, 0..1);

        backend.end_render_pass();
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.objects.release(backend);
        self.pipelines = None;
        self.bind_group = None;
    }
}

const LIT_VERTEX: &str = r#"
@group(0) @binding(2) var<uniform> uniforms: Uniforms;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) normal: vec3<f32>,
};

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    output.position = uniforms.projection * uniforms.view * uniforms.model * vec4<f32>(input.position, 1.0);
    output.uv = input.uv;
    output.normal = (uniforms.model * vec4<f32>(input.normal, 0.0)).xyz;
    return output;
}

const SUN: vec3<f32> = vec3<f32>(0.32, 0.8, -0.5);
"#;

const GROUND_FRAGMENT: &str = r#"
@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let diffuse = max(dot(normalize(input.normal), normalize(SUN)), 0.0);
    let soil = vec3<f32>(0.16, 0.12, 0.07);
    return vec4<f32>(soil * (0.3 + diffuse), 1.0);
}
"#;

const BLADE_FRAGMENT: &str = r#"
@fragment
fn fs_main(input: VertexOutput, @builtin(front_facing) front: bool) -> @location(0) vec4<f32> {
    var n = normalize(input.normal);
    if (!front) {
        n = -n;
    }
    let diffuse = max(dot(n, normalize(SUN)), 0.0);
    // uv.y is 1 at the root and 0 at the tip
    let base = mix(vec3<f32>(0.35, 0.6, 0.12), vec3<f32>(0.05, 0.22, 0.03), input.uv.y);
    return vec4<f32>(base * (0.35 + diffuse), 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::scenes::SceneSlot;

    #[test]
    fn blades_are_generated_then_drawn() {
        let mut backend = MockBackend::new(160, 90);
        let config = EngineConfig::default();
        let mut slot = SceneSlot::new(Box::new(GrassScene::new(&mut backend, &config).unwrap()));
        let frame = FrameInfo {
            slot: 0,
            frame_index: 0,
            time: 0.0,
            width: 160,
            height: 90,
        };

        slot.scene_mut().write_uniforms(&mut backend, &frame);
        backend.calls.clear();
        slot.render(&mut backend, &frame, TextureViewHandle(321)).unwrap();

        let offset = |entry| crate::scenes::tests::uniform_offset(2, 0, entry);
        assert_eq!(
            &backend.calls[..10],
            [
                "begin_compute_pass Grass Generate Pass".to_string(),
                format!("set_bind_group 0 [{}]", offset(BLADES)),
                format!("dispatch {} 1 1", crate::shader_types::THREADGROUPS_PER_MESHGRID),
                "end_compute_pass".to_string(),
                "begin_render_pass Grass Draw Pass".to_string(),
                format!("set_bind_group 0 [{}]", offset(GROUND)),
                "draw_indexed 0..6 0..1".to_string(),
                format!("set_bind_group 0 [{}]", offset(BLADES)),
                format!("draw 0..{GRASS_VERTEX_COUNT} 0..1"),
                "end_render_pass".to_string(),
            ]
        );
    }

    #[test]
    fn blade_buffer_lives_with_the_graph() {
        let mut backend = MockBackend::new(64, 64);
        let mut slot = SceneSlot::new(Box::new(
            GrassScene::new(&mut backend, &EngineConfig::default()).unwrap(),
        ));
        let frame = FrameInfo {
            slot: 0,
            frame_index: 0,
            time: 0.0,
            width: 64,
            height: 64,
        };
        slot.render(&mut backend, &frame, TextureViewHandle(1)).unwrap();
        let blade_bytes = GRASS_VERTEX_COUNT as usize * 32;
        assert!(backend.live_buffers.values().any(|b| b.len() == blade_bytes));

        slot.destroy(&mut backend);
        assert!(backend.live_buffers.is_empty());
    }
}
