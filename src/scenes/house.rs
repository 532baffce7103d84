//! Textured house on a lawn, lit by the sun with shadow mapping and SSAO
//!
//! shadow map -> geometry (HDR colour, view normals + depth) -> SSAO ->
//! tonemap with occlusion -> swapchain

use super::*;
use crate::frame::UniformRing;
use crate::pipeline::shadow::SHADOW_SAMPLING;
use crate::pipeline::ssao::AO_FORMAT;
use crate::pipeline::*;
use crate::resources::{GpuMesh, GpuTexture, Mesh, TextureData};
use crate::scene::{CameraController, DirectionalLight, OrbitController};
use crate::shader_types::{buffer_index, texture_index, ShadowLightUniform, Uniforms};
use glam::{Mat4, Vec3};

const HOUSE: usize = 0;
const GROUND: usize = 1;
/// Radius around the origin the shadow map covers
const SHADOW_RADIUS: f32 = 16.0;

pub struct HouseScene {
    camera: Camera,
    controller: OrbitController,
    light: DirectionalLight,
    uniforms: UniformRing<Uniforms>,
    shadow_light: UniformRing<ShadowLightUniform>,
    house: GpuMesh,
    ground: GpuMesh,
    house_texture: GpuTexture,
    ground_texture: GpuTexture,
    shadow_map_size: u32,
    tonemap: Tonemap,
}

impl HouseScene {
    pub fn new(backend: &mut dyn GraphicsBackend, config: &EngineConfig) -> BackendResult<Self> {
        let house_mesh = match config.assets.house_model.as_deref() {
            Some(path) => Mesh::from_obj(path).unwrap_or_else(|err| {
                log::warn!("Could not load '{}': {err}; using procedural house", path.display());
                Mesh::house()
            }),
            None => Mesh::house(),
        };
        let house_data =
            TextureData::load_or_else(config.assets.house_texture.as_deref(), || TextureData::bricks(256));
        let ground_data = TextureData::solid_color([88, 128, 64, 255], "lawn");

        let controller = OrbitController::new(Vec3::new(0.0, 2.0, 0.0), 14.0)
            .with_angles(40.0, 22.0)
            .above_ground()
            .with_auto_rotate(0.15);
        let mut camera = Camera::default();
        controller.apply(&mut camera);

        Ok(Self {
            camera,
            controller,
            light: DirectionalLight::new(Vec3::new(-0.6, -1.0, -0.4), Vec3::new(1.0, 0.95, 0.85), 2.5),
            uniforms: UniformRing::new(backend, "house_uniforms", config.frames_in_flight, 2)?,
            shadow_light: UniformRing::new(backend, "house_shadow_light", config.frames_in_flight, 1)?,
            house: GpuMesh::upload(backend, &house_mesh)?,
            ground: GpuMesh::upload(backend, &Mesh::plane(40.0, 40.0, 1))?,
            house_texture: GpuTexture::create(backend, &house_data)?,
            ground_texture: GpuTexture::create(backend, &ground_data)?,
            shadow_map_size: config.shadow_map_size,
            tonemap: Tonemap::from_config(config),
        })
    }
}

impl DemoScene for HouseScene {
    fn kind(&self) -> SceneKind {
        SceneKind::House
    }

    fn update(&mut self, dt: f32, input: &CameraInput) {
        self.controller.update(&mut self.camera, input, dt);
    }

    fn write_uniforms(&mut self, backend: &mut dyn GraphicsBackend, frame: &FrameInfo) {
        self.camera.set_aspect(frame.width, frame.height);
        for entry in [HOUSE, GROUND] {
            let uniforms = self
                .camera
                .uniforms(Mat4::IDENTITY, frame.time, frame.width, frame.height);
            self.uniforms.write(backend, frame.slot, entry, &uniforms);
        }
        self.shadow_light.write(
            backend,
            frame.slot,
            0,
            &self.light.shadow_uniform(Vec3::ZERO, SHADOW_RADIUS),
        );
    }

    fn build_graph(&mut self, width: u32, height: u32, _swapchain_format: TextureFormat) -> RenderGraph {
        let mut graph = RenderGraph::new();
        let targets = SceneTargets::declare(&mut graph, width, height);
        let sampled = TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING;
        let shadow_map = graph.create_texture("shadow_map", ShadowPass::shadow_map_desc(self.shadow_map_size));
        let normal_depth =
            graph.create_texture_relative("normal_depth", TextureSize::FULL, HDR_FORMAT, sampled, width, height);
        let ao = graph.create_texture_relative("ao", TextureSize::FULL, AO_FORMAT, sampled, width, height);

        graph.add_pass(
            ShadowPass::new(
                shadow_map,
                self.uniforms,
                self.shadow_light,
                vec![ShadowCaster {
                    mesh: self.house,
                    entry: HOUSE,
                }],
            ),
            PassType::Graphics,
            width,
            height,
        );
        graph.add_pass(
            HouseGeometryPass {
                targets,
                normal_depth,
                shadow_map,
                uniforms: self.uniforms,
                light: self.shadow_light,
                draws: vec![
                    (self.house, HOUSE, self.house_texture.view),
                    (self.ground, GROUND, self.ground_texture.view),
                ],
                objects: PassObjects::default(),
                pipeline: None,
                bind_groups: None,
            },
            PassType::Graphics,
            width,
            height,
        );
        graph.add_pass(
            SsaoPass::new(normal_depth, ao, self.uniforms, HOUSE),
            PassType::Graphics,
            width,
            height,
        );
        graph.add_pass(
            self.tonemap.pass(&targets).with_ambient_occlusion(ao),
            PassType::Graphics,
            width,
            height,
        );
        graph
    }

    fn camera(&self) -> &Camera {
        &self.camera
    }

    fn destroy(&mut self, backend: &mut dyn GraphicsBackend) {
        self.house.destroy(backend);
        self.ground.destroy(backend);
        self.house_texture.destroy(backend);
        self.ground_texture.destroy(backend);
        backend.destroy_buffer(self.uniforms.buffer());
        backend.destroy_buffer(self.shadow_light.buffer());
    }
}

/// Lit, shadowed and textured geometry plus the normal/depth buffer for SSAO
struct HouseGeometryPass {
    targets: SceneTargets,
    normal_depth: ResourceId,
    shadow_map: ResourceId,
    uniforms: UniformRing<Uniforms>,
    light: UniformRing<ShadowLightUniform>,
    /// Mesh, uniform entry and diffuse texture of each object
    draws: Vec<(GpuMesh, usize, TextureViewHandle)>,
    objects: PassObjects,
    pipeline: Option<RenderPipelineHandle>,
    /// Shared buffer group, then one texture group per draw
    bind_groups: Option<(BindGroupHandle, Vec<BindGroupHandle>)>,
}

impl RenderPass for HouseGeometryPass {
    fn name(&self) -> &str {
        "House Geometry Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.shadow_map, ResourceUsage::TextureRead);
        ctx.write(self.targets.hdr, ResourceUsage::RenderTarget);
        ctx.write(self.normal_depth, ResourceUsage::RenderTarget);
        ctx.write(self.targets.depth, ResourceUsage::DepthStencilWrite);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> BackendResult<()> {
        let shadow_map = ctx
            .get_texture(self.shadow_map)
            .ok_or_else(|| BackendError::InvalidHandle("shadow map".into()))?;
        let backend = ctx.backend();

        let buffers = self.objects.layout(
            backend,
            &[
                layout_entry(
                    buffer_index::UNIFORMS,
                    ShaderStageFlags::VERTEX_FRAGMENT,
                    self.uniforms.binding_type(),
                ),
                layout_entry(
                    buffer_index::SHADOW_LIGHT,
                    ShaderStageFlags::VERTEX_FRAGMENT,
                    self.light.binding_type(),
                ),
            ],
        )?;
        let textures = self.objects.layout(
            backend,
            &[
                layout_entry(
                    texture_index::SHADOW_MAP,
                    ShaderStageFlags::FRAGMENT,
                    BindingType::Texture {
                        sample_type: TextureSampleType::Depth,
                        view_dimension: TextureViewDimension::D2,
                    },
                ),
                layout_entry(
                    texture_index::sampler(texture_index::SHADOW_MAP),
                    ShaderStageFlags::FRAGMENT,
                    BindingType::Sampler { comparison: true },
                ),
                float_texture_entry(texture_index::DIFFUSE, TextureViewDimension::D2),
                sampler_entry(texture_index::sampler(texture_index::DIFFUSE)),
            ],
        )?;

        self.pipeline = Some(self.objects.render_pipeline(
            backend,
            &mesh_pipeline(
                "House Geometry Pipeline",
                &format!("{HOUSE_SHADER}{SHADOW_SAMPLING}"),
                vec![buffers, textures],
                &[HDR_FORMAT, HDR_FORMAT],
                Some(DepthStencilState::depth_test(DEPTH_FORMAT)),
            ),
        )?);

        let shadow_sampler = self
            .objects
            .sampler(backend, &SamplerDescriptor::shadow_comparison("shadow"))?;
        let diffuse_sampler = self
            .objects
            .sampler(backend, &SamplerDescriptor::repeating("diffuse"))?;

        let buffer_group = self.objects.bind_group(
            backend,
            buffers,
            &[
                (buffer_index::UNIFORMS, self.uniforms.binding()),
                (buffer_index::SHADOW_LIGHT, self.light.binding()),
            ],
        )?;
        let mut texture_groups = Vec::with_capacity(self.draws.len());
        for &(_, _, diffuse) in &self.draws {
            texture_groups.push(self.objects.bind_group(
                backend,
                textures,
                &[
                    (texture_index::SHADOW_MAP, BindGroupEntry::Texture(shadow_map)),
                    (
                        texture_index::sampler(texture_index::SHADOW_MAP),
                        BindGroupEntry::Sampler(shadow_sampler),
                    ),
                    (texture_index::DIFFUSE, BindGroupEntry::Texture(diffuse)),
                    (
                        texture_index::sampler(texture_index::DIFFUSE),
                        BindGroupEntry::Sampler(diffuse_sampler),
                    ),
                ],
            )?);
        }
        self.bind_groups = Some((buffer_group, texture_groups));

        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) {
        let (Some(hdr), Some(normal_depth), Some(depth)) = (
            ctx.get_texture(self.targets.hdr),
            ctx.get_texture(self.normal_depth),
            ctx.get_texture(self.targets.depth),
        ) else {
            return;
        };
        let (Some(pipeline), Some((buffer_group, texture_groups))) = (self.pipeline, &self.bind_groups) else {
            return;
        };
        let slot = ctx.frame.slot;
        let backend = ctx.backend();

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("House Geometry Pass".into()),
            color_attachments: vec![
                clear_attachment(hdr, [0.45, 0.62, 0.85, 1.0]),
                // Background: facing the camera, far away
                clear_attachment(normal_depth, [0.0, 0.0, 1.0, 1000.0]),
            ],
            depth_stencil_attachment: Some(depth_attachment(depth)),
        });
        backend.set_render_pipeline(pipeline);

        let light_offset = self.light.offset(slot, 0);
        for (&(mesh, entry, _), &texture_group) in self.draws.iter().zip(texture_groups) {
            backend.set_bind_group(0, *buffer_group, &[self.uniforms.offset(slot, entry), light_offset]);
            backend.set_bind_group(1, texture_group, &[]);
            mesh.draw(backend, 0..1);
        }

        backend.end_render_pass();
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.objects.release(backend);
        self.pipeline = None;
        self.bind_groups = None;
    }
}

const HOUSE_SHADER: &str = r#"
@group(0) @binding(2) var<uniform> uniforms: Uniforms;
@group(0) @binding(4) var<uniform> light: ShadowLightUniform;
@group(1) @binding(1) var shadow_map: texture_depth_2d;
@group(1) @binding(9) var shadow_sampler: sampler_comparison;
@group(1) @binding(4) var diffuse: texture_2d<f32>;
@group(1) @binding(12) var diffuse_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) normal: vec3<f32>,
    @location(3) view_normal: vec3<f32>,
    @location(4) view_depth: f32,
};

struct GeometryOutput {
    @location(0) color: vec4<f32>,
    @location(1) normal_depth: vec4<f32>,
};

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    let world = uniforms.model * vec4<f32>(input.position, 1.0);
    let view_position = uniforms.view * world;
    output.position = uniforms.projection * view_position;
    output.world_position = world.xyz;
    output.uv = input.uv;
    output.normal = (uniforms.model * vec4<f32>(input.normal, 0.0)).xyz;
    output.view_normal = (uniforms.model_view * vec4<f32>(input.normal, 0.0)).xyz;
    output.view_depth = -view_position.z;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> GeometryOutput {
    let albedo = textureSample(diffuse, diffuse_sampler, input.uv).rgb;
    let normal = normalize(input.normal);
    let n_dot_l = max(dot(normal, -light.direction), 0.0);
    let shadow = shadow_factor(input.world_position);

    let ambient = vec3<f32>(0.22, 0.26, 0.34);
    let sun = vec3<f32>(1.0, 0.95, 0.85) * 2.5;

    var output: GeometryOutput;
    output.color = vec4<f32>(albedo * (ambient + sun * n_dot_l * shadow), 1.0);
    output.normal_depth = vec4<f32>(normalize(input.view_normal), input.view_depth);
    return output;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::scenes::SceneSlot;

    fn frame(slot: usize) -> FrameInfo {
        FrameInfo {
            slot,
            frame_index: slot as u64,
            time: 0.5,
            width: 320,
            height: 240,
        }
    }

    #[test]
    fn shader_bindings_follow_indices() {
        for (binding, name) in [
            (texture_index::SHADOW_MAP, "shadow_map"),
            (texture_index::sampler(texture_index::SHADOW_MAP), "shadow_sampler"),
            (texture_index::DIFFUSE, "diffuse"),
            (texture_index::sampler(texture_index::DIFFUSE), "diffuse_sampler"),
        ] {
            assert!(HOUSE_SHADER.contains(&format!("@group(1) @binding({binding}) var {name}:")));
        }
    }

    #[test]
    fn frame_runs_shadow_geometry_ssao_tonemap() {
        let mut backend = MockBackend::new(320, 240);
        let config = EngineConfig::default();
        let mut slot = SceneSlot::new(Box::new(HouseScene::new(&mut backend, &config).unwrap()));

        slot.scene_mut().write_uniforms(&mut backend, &frame(1));
        backend.calls.clear();
        slot.render(&mut backend, &frame(1), TextureViewHandle(777)).unwrap();

        let passes: Vec<_> = backend
            .calls
            .iter()
            .filter_map(|c| c.strip_prefix("begin_render_pass "))
            .collect();
        assert_eq!(
            passes,
            ["Shadow Pass", "House Geometry Pass", "SSAO Pass", "Tonemapping"]
        );

        let shadow_map = backend
            .live_textures
            .values()
            .find(|d| d.label.as_deref() == Some("shadow_map"))
            .unwrap();
        assert_eq!(shadow_map.width, config.shadow_map_size);
    }

    #[test]
    fn uniforms_land_in_the_frame_slot() {
        let mut backend = MockBackend::new(320, 240);
        let config = EngineConfig::default();
        let mut scene = HouseScene::new(&mut backend, &config).unwrap();

        scene.write_uniforms(&mut backend, &frame(2));
        let bytes = backend.buffer_bytes(scene.uniforms.buffer());
        let stride = scene.uniforms.layout().stride() as usize;
        let written = &bytes[scene.uniforms.offset(2, GROUND) as usize..][..stride];
        let untouched = &bytes[scene.uniforms.offset(0, GROUND) as usize..][..stride];
        assert!(written.iter().any(|&b| b != 0));
        assert!(untouched.iter().all(|&b| b == 0));
    }

    #[test]
    fn destroy_frees_scene_buffers() {
        let mut backend = MockBackend::new(64, 64);
        let mut scene = HouseScene::new(&mut backend, &EngineConfig::default()).unwrap();
        scene.destroy(&mut backend);
        assert!(backend.live_buffers.is_empty());
        assert!(backend.live_textures.is_empty());
    }
}
