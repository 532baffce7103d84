//! Mirror-like objects inside an environment cube map
//!
//! The cube map is baked once from an equirectangular panorama (loaded from
//! disk or generated) and then used both as the skybox and as the source of
//! every reflection.

use super::*;
use crate::frame::UniformRing;
use crate::pipeline::*;
use crate::resources::{GpuMesh, GpuTexture, Mesh, TextureData};
use crate::scene::{CameraController, OrbitController};
use crate::shader_types::{buffer_index, texture_index, Uniforms};
use glam::{Mat4, Quat, Vec3};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Graph name of the baked environment cube
pub const ENVIRONMENT: &str = "environment";
const ENVIRONMENT_SIZE: u32 = 512;
const OBJECTS: usize = 3;

/// Model matrices of the sphere, torus and cube at `time`
fn object_models(time: f32) -> [Mat4; OBJECTS] {
    [
        Mat4::from_translation(Vec3::new(-3.0, 1.2, 0.0)),
        Mat4::from_rotation_translation(
            Quat::from_rotation_x(time * 0.7) * Quat::from_rotation_y(time * 0.4),
            Vec3::new(0.0, 1.5, 0.0),
        ),
        Mat4::from_scale_rotation_translation(
            Vec3::splat(1.4),
            Quat::from_rotation_y(time * 0.5),
            Vec3::new(3.0, 1.2, 0.0),
        ),
    ]
}

struct Environment {
    texture: TextureHandle,
    faces: [TextureViewHandle; 6],
    cube: TextureViewHandle,
    equirect: GpuTexture,
    baked: Arc<AtomicBool>,
}

pub struct ReflectionScene {
    camera: Camera,
    controller: OrbitController,
    uniforms: UniformRing<Uniforms>,
    meshes: [GpuMesh; OBJECTS],
    environment: Environment,
    tonemap: Tonemap,
}

impl ReflectionScene {
    pub fn new(backend: &mut dyn GraphicsBackend, config: &EngineConfig) -> BackendResult<Self> {
        let panorama = TextureData::load_or_else(config.assets.environment.as_deref(), || {
            TextureData::sky(1024, 512, Vec3::new(0.32, 0.38, -0.87))
        });
        let equirect = GpuTexture::create(backend, &panorama)?;

        let texture = backend.create_texture(&TextureDescriptor::cube(
            "environment",
            ENVIRONMENT_SIZE,
            HDR_FORMAT,
        ))?;
        let mut faces = [TextureViewHandle(0); 6];
        for (layer, face) in faces.iter_mut().enumerate() {
            *face = backend.create_texture_view_with(texture, &TextureViewDescriptor::layer(layer as u32))?;
        }
        let cube = backend.create_texture_view_with(texture, &TextureViewDescriptor::cube())?;

        let controller = OrbitController::new(Vec3::new(0.0, 1.2, 0.0), 10.0)
            .with_angles(15.0, 10.0)
            .with_auto_rotate(0.2);
        let mut camera = Camera::default();
        controller.apply(&mut camera);

        Ok(Self {
            camera,
            controller,
            uniforms: UniformRing::new(backend, "reflection_uniforms", config.frames_in_flight, OBJECTS)?,
            meshes: [
                GpuMesh::upload(backend, &Mesh::sphere(48, 32))?,
                GpuMesh::upload(backend, &Mesh::torus(1.0, 0.35, 48, 24))?,
                GpuMesh::upload(backend, &Mesh::cube())?,
            ],
            environment: Environment {
                texture,
                faces,
                cube,
                equirect,
                baked: Arc::new(AtomicBool::new(false)),
            },
            tonemap: Tonemap::from_config(config),
        })
    }
}

impl DemoScene for ReflectionScene {
    fn kind(&self) -> SceneKind {
        SceneKind::Reflections
    }

    fn update(&mut self, dt: f32, input: &CameraInput) {
        self.controller.update(&mut self.camera, input, dt);
    }

    fn write_uniforms(&mut self, backend: &mut dyn GraphicsBackend, frame: &FrameInfo) {
        self.camera.set_aspect(frame.width, frame.height);
        for (entry, model) in object_models(frame.time).into_iter().enumerate() {
            let uniforms = self.camera.uniforms(model, frame.time, frame.width, frame.height);
            self.uniforms.write(backend, frame.slot, entry, &uniforms);
        }
    }

    fn build_graph(&mut self, width: u32, height: u32, _swapchain_format: TextureFormat) -> RenderGraph {
        let mut graph = RenderGraph::new();
        let targets = SceneTargets::declare(&mut graph, width, height);
        let environment = graph.register_external(ENVIRONMENT);

        graph.add_pass(
            CubeFromSpherePass::new(
                environment,
                self.environment.faces,
                self.environment.equirect.view,
                HDR_FORMAT,
                Arc::clone(&self.environment.baked),
            ),
            PassType::Graphics,
            width,
            height,
        );
        graph.add_pass(
            ReflectionPass {
                targets,
                environment,
                environment_view: self.environment.cube,
                uniforms: self.uniforms,
                meshes: self.meshes,
                objects: PassObjects::default(),
                pipelines: None,
                bind_groups: None,
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

    fn external_views(&self) -> Vec<(&'static str, TextureViewHandle)> {
        vec![(ENVIRONMENT, self.environment.cube)]
    }

    fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        for mesh in &self.meshes {
            mesh.destroy(backend);
        }
        let environment = &self.environment;
        for &face in &environment.faces {
            backend.destroy_texture_view(face);
        }
        backend.destroy_texture_view(environment.cube);
        backend.destroy_texture(environment.texture);
        environment.equirect.destroy(backend);
        backend.destroy_buffer(self.uniforms.buffer());
    }
}

/// Skybox plus reflective objects, both sampling the environment cube
struct ReflectionPass {
    targets: SceneTargets,
    /// Orders this pass after the bake
    environment: ResourceId,
    environment_view: TextureViewHandle,
    uniforms: UniformRing<Uniforms>,
    meshes: [GpuMesh; OBJECTS],
    objects: PassObjects,
    /// Skybox, then objects
    pipelines: Option<(RenderPipelineHandle, RenderPipelineHandle)>,
    bind_groups: Option<(BindGroupHandle, BindGroupHandle)>,
}

impl RenderPass for ReflectionPass {
    fn name(&self) -> &str {
        "Reflection Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.environment, ResourceUsage::TextureRead);
        ctx.write(self.targets.hdr, ResourceUsage::RenderTarget);
        ctx.write(self.targets.depth, ResourceUsage::DepthStencilWrite);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> BackendResult<()> {
        let backend = ctx.backend();
        let buffers = self.objects.layout(
            backend,
            &[layout_entry(
                buffer_index::UNIFORMS,
                ShaderStageFlags::VERTEX_FRAGMENT,
                self.uniforms.binding_type(),
            )],
        )?;
        let textures = self.objects.layout(
            backend,
            &[
                float_texture_entry(texture_index::COLOR, TextureViewDimension::Cube),
                sampler_entry(texture_index::sampler(texture_index::COLOR)),
            ],
        )?;

        let mut skybox = fullscreen_pipeline(
            "Skybox Pipeline",
            &format!("{BINDINGS}{CAMERA_WGSL}{SKYBOX_SHADER}"),
            vec![buffers, textures],
            HDR_FORMAT,
        );
        skybox.depth_stencil = Some(background_depth());
        let skybox = self.objects.render_pipeline(backend, &skybox)?;
        let mirrors = self.objects.render_pipeline(
            backend,
            &mesh_pipeline(
                "Reflection Pipeline",
                &format!("{BINDINGS}{CAMERA_WGSL}{MIRROR_SHADER}"),
                vec![buffers, textures],
                &[HDR_FORMAT],
                Some(DepthStencilState::depth_test(DEPTH_FORMAT)),
            ),
        )?;
        self.pipelines = Some((skybox, mirrors));

        let sampler = self
            .objects
            .sampler(backend, &SamplerDescriptor::default())?;
        let buffer_group = self.objects.bind_group(
            backend,
            buffers,
            &[(buffer_index::UNIFORMS, self.uniforms.binding())],
        )?;
        let texture_group = self.objects.bind_group(
            backend,
            textures,
            &[
                (texture_index::COLOR, BindGroupEntry::Texture(self.environment_view)),
                (
                    texture_index::sampler(texture_index::COLOR),
                    BindGroupEntry::Sampler(sampler),
                ),
            ],
        )?;
        self.bind_groups = Some((buffer_group, texture_group));

        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) {
        let (Some(hdr), Some(depth)) = (
            ctx.get_texture(self.targets.hdr),
            ctx.get_texture(self.targets.depth),
        ) else {
            return;
        };
        let (Some((skybox, mirrors)), Some((buffer_group, texture_group))) = (self.pipelines, self.bind_groups)
        else {
            return;
        };
        let slot = ctx.frame.slot;
        let backend = ctx.backend();

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Reflection Pass".into()),
            color_attachments: vec![clear_attachment(hdr, [0.0, 0.0, 0.0, 1.0])],
            depth_stencil_attachment: Some(depth_attachment(depth)),
        });
        backend.set_bind_group(1, texture_group, &[]);

        // Any entry carries the camera for the skybox
        backend.set_render_pipeline(skybox);
        backend.set_bind_group(0, buffer_group, &[self.uniforms.offset(slot, 0)]);
        backend.draw(0..3, 0..1);

        backend.set_render_pipeline(mirrors);
        for (entry, mesh) in self.meshes.iter().enumerate() {
            backend.set_bind_group(0, buffer_group, &[self.uniforms.offset(slot, entry)]);
            mesh.draw(backend, 0..1);
        }

        backend.end_render_pass();
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.objects.release(backend);
        self.pipelines = None;
        self.bind_groups = None;
    }
}

const BINDINGS: &str = r#"
@group(0) @binding(2) var<uniform> uniforms: Uniforms;
@group(1) @binding(0) var environment: texture_cube<f32>;
@group(1) @binding(8) var environment_sampler: sampler;
"#;

const SKYBOX_SHADER: &str = r#"
@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(textureSample(environment, environment_sampler, view_ray(input.uv)).rgb, 1.0);
}
"#;

const MIRROR_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) normal: vec3<f32>,
};

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    let world = uniforms.model * vec4<f32>(input.position, 1.0);
    output.position = uniforms.projection * uniforms.view * world;
    output.world_position = world.xyz;
    output.normal = (uniforms.model * vec4<f32>(input.normal, 0.0)).xyz;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let n = normalize(input.normal);
    let incident = normalize(input.world_position - camera_position());
    let reflected = textureSample(environment, environment_sampler, reflect(incident, n)).rgb;
    // Slight tint so the objects stand out against the sky
    return vec4<f32>(reflected * vec3<f32>(0.95, 0.93, 0.9), 1.0);
}
"#;
