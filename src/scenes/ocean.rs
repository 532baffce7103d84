//! Open ocean under a procedural sky
//!
//! The water plane is displaced in the vertex stage by a sum of Gerstner
//! waves driven by `uniforms.time`; the fragment stage blends deep water and
//! the reflected sky with a Fresnel term.

use super::*;
use crate::frame::UniformRing;
use crate::pipeline::*;
use crate::resources::{GpuMesh, Mesh};
use crate::scene::{CameraController, OrbitController};
use crate::shader_types::{buffer_index, Uniforms};
use glam::{Mat4, Vec3};

pub struct OceanScene {
    camera: Camera,
    controller: OrbitController,
    uniforms: UniformRing<Uniforms>,
    water: GpuMesh,
    tonemap: Tonemap,
}

impl OceanScene {
    pub fn new(backend: &mut dyn GraphicsBackend, config: &EngineConfig) -> BackendResult<Self> {
        let controller = OrbitController::new(Vec3::ZERO, 24.0)
            .with_angles(0.0, 12.0)
            .above_ground()
            .with_auto_rotate(0.05);
        let mut camera = Camera::default();
        controller.apply(&mut camera);

        Ok(Self {
            camera,
            controller,
            uniforms: UniformRing::new(backend, "ocean_uniforms", config.frames_in_flight, 1)?,
            water: GpuMesh::upload(backend, &Mesh::plane(200.0, 200.0, 256))?,
            tonemap: Tonemap::from_config(config),
        })
    }
}

impl DemoScene for OceanScene {
    fn kind(&self) -> SceneKind {
        SceneKind::Ocean
    }

    fn update(&mut self, dt: f32, input: &CameraInput) {
        self.controller.update(&mut self.camera, input, dt);
    }

    fn write_uniforms(&mut self, backend: &mut dyn GraphicsBackend, frame: &FrameInfo) {
        self.camera.set_aspect(frame.width, frame.height);
        let uniforms = self
            .camera
            .uniforms(Mat4::IDENTITY, frame.time, frame.width, frame.height);
        self.uniforms.write(backend, frame.slot, 0, &uniforms);
    }

    fn build_graph(&mut self, width: u32, height: u32, _swapchain_format: TextureFormat) -> RenderGraph {
        let mut graph = RenderGraph::new();
        let targets = SceneTargets::declare(&mut graph, width, height);
        graph.add_pass(
            OceanPass {
                targets,
                uniforms: self.uniforms,
                water: self.water,
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
        self.water.destroy(backend);
        backend.destroy_buffer(self.uniforms.buffer());
    }
}

/// Sky background followed by the water surface
struct OceanPass {
    targets: SceneTargets,
    uniforms: UniformRing<Uniforms>,
    water: GpuMesh,
    objects: PassObjects,
    /// Sky, then water
    pipelines: Option<(RenderPipelineHandle, RenderPipelineHandle)>,
    bind_group: Option<BindGroupHandle>,
}

impl RenderPass for OceanPass {
    fn name(&self) -> &str {
        "Ocean Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
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

        let mut sky = fullscreen_pipeline(
            "Ocean Sky Pipeline",
            &format!("{UNIFORMS_BINDING}{CAMERA_WGSL}{SKY_WGSL}{SKY_SHADER}"),
            vec![layout],
            HDR_FORMAT,
        );
        sky.depth_stencil = Some(background_depth());
        let sky = self.objects.render_pipeline(backend, &sky)?;

        let water = self.objects.render_pipeline(
            backend,
            &mesh_pipeline(
                "Ocean Water Pipeline",
                &format!("{UNIFORMS_BINDING}{CAMERA_WGSL}{SKY_WGSL}{WATER_SHADER}"),
                vec![layout],
                &[HDR_FORMAT],
                Some(DepthStencilState::depth_test(DEPTH_FORMAT)),
            ),
        )?;
        self.pipelines = Some((sky, water));

        self.bind_group = Some(self.objects.bind_group(
            backend,
            layout,
            &[(buffer_index::UNIFORMS, self.uniforms.binding())],
        )?);

        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) {
        let (Some(hdr), Some(depth)) = (
            ctx.get_texture(self.targets.hdr),
            ctx.get_texture(self.targets.depth),
        ) else {
            return;
        };
        let (Some((sky, water)), Some(bind_group)) = (self.pipelines, self.bind_group) else {
            return;
        };
        let offset = self.uniforms.offset(ctx.frame.slot, 0);
        let backend = ctx.backend();

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Ocean Pass".into()),
            color_attachments: vec![clear_attachment(hdr, [0.0, 0.0, 0.0, 1.0])],
            depth_stencil_attachment: Some(depth_attachment(depth)),
        });
        backend.set_bind_group(0, bind_group, &[offset]);

        backend.set_render_pipeline(sky);
        backend.draw(0..3, 0..1);

        backend.set_render_pipeline(water);
        self.water.draw(backend, 0..1);

        backend.end_render_pass();
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.objects.release(backend);
        self.pipelines = None;
        self.bind_group = None;
    }
}

const UNIFORMS_BINDING: &str = r#"
@group(0) @binding(2) var<uniform> uniforms: Uniforms;
"#;

const SKY_SHADER: &str = r#"
@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(sky_color(view_ray(input.uv)), 1.0);
}
"#;

const WATER_SHADER: &str = r#"
const WAVE_COUNT: u32 = 4u;

struct Wave {
    direction: vec2<f32>,
    steepness: f32,
    wavelength: f32,
};

fn wave(i: u32) -> Wave {
    switch i {
        case 0u: { return Wave(vec2<f32>(1.0, 0.0), 0.25, 60.0); }
        case 1u: { return Wave(vec2<f32>(0.0, 1.0), 0.25, 31.0); }
        case 2u: { return Wave(vec2<f32>(1.0, 1.0), 0.15, 18.0); }
        default: { return Wave(vec2<f32>(-0.6, 0.8), 0.1, 7.0); }
    }
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) normal: vec3<f32>,
};

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var position = input.position;
    var tangent = vec3<f32>(1.0, 0.0, 0.0);
    var binormal = vec3<f32>(0.0, 0.0, 1.0);

    for (var i = 0u; i < WAVE_COUNT; i++) {
        let w = wave(i);
        let d = normalize(w.direction);
        let k = 6.2831853 / w.wavelength;
        let c = sqrt(9.8 / k);
        let f = k * (dot(d, input.position.xz) - c * uniforms.time);
        let a = w.steepness / k;

        position += vec3<f32>(d.x * a * cos(f), a * sin(f), d.y * a * cos(f));
        tangent += vec3<f32>(
            -d.x * d.x * w.steepness * sin(f),
            d.x * w.steepness * cos(f),
            -d.x * d.y * w.steepness * sin(f),
        );
        binormal += vec3<f32>(
            -d.x * d.y * w.steepness * sin(f),
            d.y * w.steepness * cos(f),
            -d.y * d.y * w.steepness * sin(f),
        );
    }

    var output: VertexOutput;
    let world = uniforms.model * vec4<f32>(position, 1.0);
    output.position = uniforms.projection * uniforms.view * world;
    output.world_position = world.xyz;
    output.normal = normalize(cross(binormal, tangent));
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let n = normalize(input.normal);
    let to_eye = normalize(camera_position() - input.world_position);
    let fresnel = 0.02 + 0.98 * pow(1.0 - max(dot(n, to_eye), 0.0), 5.0);

    let deep = vec3<f32>(0.01, 0.07, 0.12);
    let reflected = sky_color(reflect(-to_eye, n));
    return vec4<f32>(mix(deep, reflected, fresnel), 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::scenes::SceneSlot;

    #[test]
    fn shaders_bind_uniforms_where_the_layout_does() {
        assert!(UNIFORMS_BINDING.contains(&format!("@binding({})", buffer_index::UNIFORMS)));
        assert!(WATER_SHADER.contains("fn vs_main"));
        assert!(WATER_SHADER.contains("uniforms.time"));
    }

    #[test]
    fn sky_and_water_share_one_pass() {
        let mut backend = MockBackend::new(200, 100);
        let config = EngineConfig::default();
        let mut slot = SceneSlot::new(Box::new(OceanScene::new(&mut backend, &config).unwrap()));
        let frame = FrameInfo {
            slot: 1,
            frame_index: 7,
            time: 3.0,
            width: 200,
            height: 100,
        };

        slot.scene_mut().write_uniforms(&mut backend, &frame);
        backend.calls.clear();
        slot.render(&mut backend, &frame, TextureViewHandle(900)).unwrap();

        let offset = crate::scenes::tests::uniform_offset(1, 1, 0);
        assert_eq!(
            &backend.calls[..5],
            [
                "begin_render_pass Ocean Pass".to_string(),
                format!("set_bind_group 0 [{offset}]"),
                "draw 0..3 0..1".to_string(),
                format!("draw_indexed 0..{} 0..1", 256 * 256 * 6),
                "end_render_pass".to_string(),
            ]
        );
        assert_eq!(backend.calls[5], "begin_render_pass Tonemapping");
    }
}
