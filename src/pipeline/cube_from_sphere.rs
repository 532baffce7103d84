//! Equirectangular to cube map conversion
//!
//! Runs once: the first execution renders all six faces and flips the shared
//! `baked` flag, later executions record nothing. The flag lives with the
//! scene, so rebuilding the graph after a resize does not bake again.

use super::*;
use crate::frame::UniformRing;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::shader_types::{buffer_index, texture_index, CubeFromSphereUniform};
use glam::{Mat4, Vec3};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Face order of wgpu cube textures: +X, -X, +Y, -Y, +Z, -Z
pub const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

/// 90 degree cameras looking down each cube face from the origin
pub fn cube_face_uniforms() -> [CubeFromSphereUniform; 6] {
    let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 10.0);
    CUBE_FACES.map(|(forward, up)| CubeFromSphereUniform {
        projection,
        view: Mat4::look_at_rh(Vec3::ZERO, forward, up),
    })
}

pub struct CubeFromSpherePass {
    environment: ResourceId,
    face_views: [TextureViewHandle; 6],
    equirect: TextureViewHandle,
    format: TextureFormat,
    baked: Arc<AtomicBool>,
    objects: PassObjects,
    faces: Option<UniformRing<CubeFromSphereUniform>>,
    pipeline: Option<RenderPipelineHandle>,
    bind_groups: Option<(BindGroupHandle, BindGroupHandle)>,
}

impl CubeFromSpherePass {
    /// `environment` is the graph resource standing for the cube texture
    /// whose per-face views are `face_views`.
    pub fn new(
        environment: ResourceId,
        face_views: [TextureViewHandle; 6],
        equirect: TextureViewHandle,
        format: TextureFormat,
        baked: Arc<AtomicBool>,
    ) -> Self {
        Self {
            environment,
            face_views,
            equirect,
            format,
            baked,
            objects: PassObjects::default(),
            faces: None,
            pipeline: None,
            bind_groups: None,
        }
    }
}

impl RenderPass for CubeFromSpherePass {
    fn name(&self) -> &str {
        "Cube From Sphere Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.write(self.environment, ResourceUsage::RenderTarget);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> BackendResult<()> {
        if self.baked.load(Ordering::Acquire) {
            return Ok(());
        }
        let backend = ctx.backend();

        let faces = UniformRing::<CubeFromSphereUniform>::new(backend, "cube_faces", 1, 6)?;
        for (face, uniform) in cube_face_uniforms().iter().enumerate() {
            faces.write(backend, 0, face, uniform);
        }
        self.faces = Some(faces);

        let buffers = self.objects.layout(
            backend,
            &[layout_entry(
                buffer_index::CUBE_FROM_SPHERE,
                ShaderStageFlags::FRAGMENT,
                faces.binding_type(),
            )],
        )?;
        let textures = self.objects.layout(
            backend,
            &[
                float_texture_entry(texture_index::COLOR, TextureViewDimension::D2),
                sampler_entry(texture_index::sampler(texture_index::COLOR)),
            ],
        )?;

        self.pipeline = Some(self.objects.render_pipeline(
            backend,
            &fullscreen_pipeline(
                "Cube From Sphere Pipeline",
                CUBE_FROM_SPHERE_SHADER,
                vec![buffers, textures],
                self.format,
            ),
        )?);

        let sampler = self
            .objects
            .sampler(backend, &SamplerDescriptor::repeating("equirect"))?;
        let buffer_group = self.objects.bind_group(
            backend,
            buffers,
            &[(buffer_index::CUBE_FROM_SPHERE, faces.binding())],
        )?;
        let texture_group = self.objects.bind_group(
            backend,
            textures,
            &[
                (texture_index::COLOR, BindGroupEntry::Texture(self.equirect)),
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
        let (Some(faces), Some(pipeline), Some((buffer_group, texture_group))) =
            (self.faces, self.pipeline, self.bind_groups)
        else {
            return;
        };
        if self.baked.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("Baking environment cube map");

        let backend = ctx.backend();
        for (face, &view) in self.face_views.iter().enumerate() {
            backend.begin_render_pass(&RenderPassDescriptor {
                label: Some(format!("Cube Face {face}")),
                color_attachments: vec![clear_attachment(view, [0.0, 0.0, 0.0, 1.0])],
                depth_stencil_attachment: None,
            });
            backend.set_render_pipeline(pipeline);
            backend.set_bind_group(0, buffer_group, &[faces.offset(0, face)]);
            backend.set_bind_group(1, texture_group, &[]);
            backend.draw(0..3, 0..1);
            backend.end_render_pass();
        }
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.objects.release(backend);
        if let Some(faces) = self.faces.take() {
            backend.destroy_buffer(faces.buffer());
        }
        self.pipeline = None;
        self.bind_groups = None;
    }
}

const CUBE_FROM_SPHERE_SHADER: &str = r#"
const PI: f32 = 3.14159265;

@group(0) @binding(7) var<uniform> face: CubeFromSphereUniform;
@group(1) @binding(0) var equirect: texture_2d<f32>;
@group(1) @binding(8) var equirect_sampler: sampler;

@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let ndc = vec2<f32>(input.uv.x * 2.0 - 1.0, 1.0 - input.uv.y * 2.0);
    // Inverse view rotation applied to the view-space ray
    let rotation = transpose(mat3x3<f32>(face.view[0].xyz, face.view[1].xyz, face.view[2].xyz));
    let ray = vec3<f32>(ndc.x / face.projection[0][0], ndc.y / face.projection[1][1], -1.0);
    let dir = normalize(rotation * ray);

    let uv = vec2<f32>(atan2(dir.x, -dir.z) / (2.0 * PI) + 0.5, acos(clamp(dir.y, -1.0, 1.0)) / PI);
    return vec4<f32>(textureSampleLevel(equirect, equirect_sampler, uv, 0.0).rgb, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::pipeline::test_support::run_graph;
    use crate::render_graph::RenderGraph;

    #[test]
    fn each_face_looks_down_its_axis() {
        for ((forward, _), uniform) in CUBE_FACES.iter().zip(cube_face_uniforms()) {
            let clip = uniform.projection * uniform.view * forward.extend(1.0);
            assert!(clip.x.abs() < 1e-5 && clip.y.abs() < 1e-5);
            assert!(clip.w > 0.0);
        }
    }

    fn environment_graph(baked: &Arc<AtomicBool>) -> RenderGraph {
        let mut graph = RenderGraph::new();
        let environment = graph.register_external("environment");
        let views = [1, 2, 3, 4, 5, 6].map(TextureViewHandle);
        graph.add_pass(
            CubeFromSpherePass::new(
                environment,
                views,
                TextureViewHandle(7),
                HDR_FORMAT,
                Arc::clone(baked),
            ),
            PassType::Graphics,
            16,
            16,
        );
        graph
    }

    #[test]
    fn bakes_once_across_graph_rebuilds() {
        let mut backend = MockBackend::new(16, 16);
        let baked = Arc::new(AtomicBool::new(false));
        let externals = [("environment", TextureViewHandle(100))];

        let mut graph = environment_graph(&baked);
        run_graph(&mut graph, &mut backend, 0, &externals);
        let face_passes = backend
            .calls
            .iter()
            .filter(|c| c.starts_with("begin_render_pass Cube Face"))
            .count();
        assert_eq!(face_passes, 6);
        assert!(backend.calls.contains(&format!("set_bind_group 0 [{}]", 5 * 256)));
        assert!(baked.load(Ordering::Acquire));

        // Second frame of the same graph
        let mut graph = graph;
        run_graph(&mut graph, &mut backend, 1, &externals);
        assert!(backend.calls.is_empty());

        // Rebuilt graph (e.g. after resize) skips pipeline creation too
        graph.release_passes(&mut backend);
        let pipelines = backend.pipelines_created;
        let mut rebuilt = environment_graph(&baked);
        run_graph(&mut rebuilt, &mut backend, 0, &externals);
        assert!(backend.calls.is_empty());
        assert_eq!(backend.pipelines_created, pipelines);
    }
}
