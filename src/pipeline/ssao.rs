//! Screen-space ambient occlusion
//!
//! Reads view-space normals and linear depth written by the geometry pass
//! and estimates how much of the hemisphere above each pixel is blocked,
//! using `NUM_SSAO_SAMPLES` kernel samples rotated by a 4x4 tile of
//! `NUM_NOISE_SAMPLES` random vectors.

use super::*;
use crate::frame::UniformRing;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::shader_types::{buffer_index, texture_index, Uniforms, NUM_NOISE_SAMPLES, NUM_SSAO_SAMPLES};
use glam::{Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Format of the occlusion target; only the red channel is used
pub const AO_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

pub struct SsaoPass {
    normal_depth: ResourceId,
    output: ResourceId,
    uniforms: UniformRing<Uniforms>,
    camera_entry: usize,
    objects: PassObjects,
    pipeline: Option<RenderPipelineHandle>,
    bind_groups: Option<(BindGroupHandle, BindGroupHandle)>,
}

impl SsaoPass {
    pub fn new(
        normal_depth: ResourceId,
        output: ResourceId,
        uniforms: UniformRing<Uniforms>,
        camera_entry: usize,
    ) -> Self {
        Self {
            normal_depth,
            output,
            uniforms,
            camera_entry,
            objects: PassObjects::default(),
            pipeline: None,
            bind_groups: None,
        }
    }
}

const KERNEL_SEED: u64 = 0x9E37_79B9;
const NOISE_SEED: u64 = 0x85EB_CA6B;

/// Hemisphere samples around +Z, denser close to the origin.
/// `w` carries the radius scale the shader applies.
pub fn ssao_kernel() -> Vec<Vec4> {
    let mut rng = StdRng::seed_from_u64(KERNEL_SEED);
    (0..NUM_SSAO_SAMPLES)
        .map(|i| {
            let dir = Vec3::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(0.0..1.0),
            )
            .try_normalize()
            .unwrap_or(Vec3::Z);
            let t = i as f32 / NUM_SSAO_SAMPLES as f32;
            let scale = 0.1 + 0.9 * t * t;
            (dir * scale * rng.gen_range(0.1f32..1.0)).extend(scale)
        })
        .collect()
}

/// Random rotation vectors in the tangent plane
pub fn ssao_noise() -> Vec<Vec4> {
    let mut rng = StdRng::seed_from_u64(NOISE_SEED);
    (0..NUM_NOISE_SAMPLES)
        .map(|_| {
            Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), 0.0)
                .try_normalize()
                .unwrap_or(Vec3::X)
                .extend(0.0)
        })
        .collect()
}

impl RenderPass for SsaoPass {
    fn name(&self) -> &str {
        "SSAO Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.read(self.normal_depth, ResourceUsage::TextureRead);
        ctx.write(self.output, ResourceUsage::RenderTarget);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> BackendResult<()> {
        let normal_depth = ctx
            .get_texture(self.normal_depth)
            .ok_or_else(|| BackendError::InvalidHandle("SSAO normal/depth input".into()))?;
        let backend = ctx.backend();

        let uniform_desc = |label: &str, size: usize| BufferDescriptor {
            label: Some(label.to_string()),
            size: size as u64,
            usage: BufferUsage::UNIFORM,
            mapped_at_creation: false,
        };
        let noise = ssao_noise();
        let noise = self.objects.buffer_init(
            backend,
            &uniform_desc("ssao_noise", noise.len() * 16),
            bytemuck::cast_slice(&noise),
        )?;
        let kernel = ssao_kernel();
        let kernel = self.objects.buffer_init(
            backend,
            &uniform_desc("ssao_samples", kernel.len() * 16),
            bytemuck::cast_slice(&kernel),
        )?;

        let buffers = self.objects.layout(
            backend,
            &[
                layout_entry(
                    buffer_index::UNIFORMS,
                    ShaderStageFlags::FRAGMENT,
                    self.uniforms.binding_type(),
                ),
                layout_entry(buffer_index::NOISE, ShaderStageFlags::FRAGMENT, BindingType::UniformBuffer),
                layout_entry(
                    buffer_index::SSAO_SAMPLES,
                    ShaderStageFlags::FRAGMENT,
                    BindingType::UniformBuffer,
                ),
            ],
        )?;
        let textures = self.objects.layout(
            backend,
            &[layout_entry(
                texture_index::NORMAL_MAP,
                ShaderStageFlags::FRAGMENT,
                BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    view_dimension: TextureViewDimension::D2,
                },
            )],
        )?;

        self.pipeline = Some(self.objects.render_pipeline(
            backend,
            &fullscreen_pipeline("SSAO Pipeline", SSAO_SHADER, vec![buffers, textures], AO_FORMAT),
        )?);

        let whole = |buffer| BindGroupEntry::Buffer {
            buffer,
            offset: 0,
            size: None,
        };
        let buffer_group = self.objects.bind_group(
            backend,
            buffers,
            &[
                (buffer_index::UNIFORMS, self.uniforms.binding()),
                (buffer_index::NOISE, whole(noise)),
                (buffer_index::SSAO_SAMPLES, whole(kernel)),
            ],
        )?;
        let texture_group = self.objects.bind_group(
            backend,
            textures,
            &[(texture_index::NORMAL_MAP, BindGroupEntry::Texture(normal_depth))],
        )?;
        self.bind_groups = Some((buffer_group, texture_group));

        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) {
        let (Some(output), Some(pipeline), Some((buffer_group, texture_group))) =
            (ctx.get_texture(self.output), self.pipeline, self.bind_groups)
        else {
            return;
        };
        let offset = self.uniforms.offset(ctx.frame.slot, self.camera_entry);
        let backend = ctx.backend();

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("SSAO Pass".into()),
            color_attachments: vec![clear_attachment(output, [1.0; 4])],
            depth_stencil_attachment: None,
        });
        backend.set_render_pipeline(pipeline);
        backend.set_bind_group(0, buffer_group, &[offset]);
        backend.set_bind_group(1, texture_group, &[]);
        backend.draw(0..3, 0..1);
        backend.end_render_pass();
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.objects.release(backend);
        self.pipeline = None;
        self.bind_groups = None;
    }
}

const SSAO_SHADER: &str = r#"
const NUM_SAMPLES: u32 = 8u;
const RADIUS: f32 = 0.5;
const BIAS: f32 = 0.025;

@group(0) @binding(2) var<uniform> uniforms: Uniforms;
@group(0) @binding(5) var<uniform> noise: array<vec4<f32>, 16>;
@group(0) @binding(6) var<uniform> samples: array<vec4<f32>, 8>;
@group(1) @binding(3) var normal_depth: texture_2d<f32>;

fn view_position(uv: vec2<f32>, depth: f32) -> vec3<f32> {
    let ndc = vec2<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);
    return vec3<f32>(
        ndc.x * depth / uniforms.projection[0][0],
        ndc.y * depth / uniforms.projection[1][1],
        -depth,
    );
}

fn load(uv: vec2<f32>) -> vec4<f32> {
    let size = vec2<i32>(textureDimensions(normal_depth));
    let coord = clamp(vec2<i32>(uv * vec2<f32>(size)), vec2<i32>(0), size - 1);
    return textureLoad(normal_depth, coord, 0);
}

@fragment
fn fs_main(input: FullscreenOutput) -> @location(0) vec4<f32> {
    let center = load(input.uv);
    if (center.w <= 0.0) {
        return vec4<f32>(1.0);
    }
    let position = view_position(input.uv, center.w);
    let normal = normalize(center.xyz);

    let pixel = vec2<u32>(input.position.xy);
    let random = noise[(pixel.x % 4u) + 4u * (pixel.y % 4u)].xyz;
    let tangent = normalize(random - normal * dot(random, normal));
    let bitangent = cross(normal, tangent);
    let tbn = mat3x3<f32>(tangent, bitangent, normal);

    var occlusion = 0.0;
    for (var i = 0u; i < NUM_SAMPLES; i++) {
        let sample_pos = position + tbn * samples[i].xyz * RADIUS;
        let clip = uniforms.projection * vec4<f32>(sample_pos, 1.0);
        let ndc = clip.xy / clip.w;
        let sample_uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
        let scene_depth = load(sample_uv).w;
        let range = smoothstep(0.0, 1.0, RADIUS / abs(center.w - scene_depth));
        if (scene_depth > 0.0 && scene_depth <= -sample_pos.z - BIAS) {
            occlusion += range;
        }
    }

    let ao = 1.0 - occlusion / f32(NUM_SAMPLES);
    return vec4<f32>(ao, ao, ao, 1.0);
}
"#;
