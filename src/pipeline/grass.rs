//! Grass blade generation
//!
//! wgpu has no mesh shaders, so a compute pass plays the object and mesh
//! stages: every thread builds one blade of `NUM_QUADS_PER_SHAPE` stacked
//! quads and writes its `NUM_VERTICES_PER_SHAPE` vertices into a storage
//! buffer. The geometry pass then binds that buffer as a plain vertex buffer.

use super::*;
use crate::frame::UniformRing;
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::shader_types::*;

/// Side length of the square patch of ground the blades cover
pub const GRASS_FIELD_SIZE: f32 = 32.0;

pub struct GrassGeneratePass {
    vertices: ResourceId,
    uniforms: UniformRing<Uniforms>,
    entry: usize,
    objects: PassObjects,
    pipeline: Option<ComputePipelineHandle>,
    bind_group: Option<BindGroupHandle>,
}

impl GrassGeneratePass {
    /// `vertices` must be a buffer declared with [`Self::vertex_buffer_desc`].
    /// `entry` selects the `Uniforms` copy whose `time` drives the wind.
    pub fn new(vertices: ResourceId, uniforms: UniformRing<Uniforms>, entry: usize) -> Self {
        Self {
            vertices,
            uniforms,
            entry,
            objects: PassObjects::default(),
            pipeline: None,
            bind_group: None,
        }
    }

    /// Storage buffer holding one `Vertex` per generated grass vertex
    pub fn vertex_buffer_desc() -> BufferDescriptor {
        BufferDescriptor {
            label: Some("grass_vertices".into()),
            size: GRASS_VERTEX_COUNT as u64 * std::mem::size_of::<Vertex>() as u64,
            usage: BufferUsage::STORAGE | BufferUsage::VERTEX,
            mapped_at_creation: false,
        }
    }
}

impl RenderPass for GrassGeneratePass {
    fn name(&self) -> &str {
        "Grass Generate Pass"
    }

    fn setup(&mut self, ctx: &mut PassSetupContext) {
        ctx.write(self.vertices, ResourceUsage::StorageBufferWrite);
    }

    fn prepare(&mut self, ctx: &mut PassPrepareContext) -> BackendResult<()> {
        let vertices = ctx
            .get_buffer(self.vertices)
            .ok_or_else(|| BackendError::InvalidHandle("grass vertex buffer".into()))?;
        let backend = ctx.backend();

        let layout = self.objects.layout(
            backend,
            &[
                layout_entry(
                    buffer_index::MESH_POSITIONS,
                    ShaderStageFlags::COMPUTE,
                    BindingType::StorageBuffer { read_only: false },
                ),
                layout_entry(
                    buffer_index::UNIFORMS,
                    ShaderStageFlags::COMPUTE,
                    self.uniforms.binding_type(),
                ),
            ],
        )?;

        self.pipeline = Some(self.objects.compute_pipeline(
            backend,
            &ComputePipelineDescriptor {
                label: Some("Grass Generate Pipeline".into()),
                shader: shader_source(&grass_shader()),
                entry_point: "generate_grass".into(),
                bind_group_layouts: vec![layout],
            },
        )?);

        self.bind_group = Some(self.objects.bind_group(
            backend,
            layout,
            &[
                (
                    buffer_index::MESH_POSITIONS,
                    BindGroupEntry::Buffer {
                        buffer: vertices,
                        offset: 0,
                        size: None,
                    },
                ),
                (buffer_index::UNIFORMS, self.uniforms.binding()),
            ],
        )?);

        Ok(())
    }

    fn execute(&self, ctx: &mut PassExecuteContext) {
        let (Some(pipeline), Some(bind_group)) = (self.pipeline, self.bind_group) else {
            return;
        };
        let offset = self.uniforms.offset(ctx.frame.slot, self.entry);
        let backend = ctx.backend();

        backend.begin_compute_pass(Some("Grass Generate Pass"));
        backend.set_compute_pipeline(pipeline);
        backend.set_bind_group(0, bind_group, &[offset]);
        backend.dispatch_compute(THREADGROUPS_PER_MESHGRID, 1, 1);
        backend.end_compute_pass();
    }

    fn release(&mut self, backend: &mut dyn GraphicsBackend) {
        self.objects.release(backend);
        self.pipeline = None;
        self.bind_group = None;
    }
}

fn grass_shader() -> String {
    format!(
        r#"
const SHAPES_X: u32 = {shapes_x}u;
const SHAPES: u32 = {shapes}u;
const QUADS: u32 = {quads}u;
const VERTS_PER_QUAD: u32 = {verts_per_quad}u;
const VERTS_PER_SHAPE: u32 = {verts_per_shape}u;
const FIELD_SIZE: f32 = {field_size:.1};
// position.xyz uv.xy normal.xyz
const FLOATS_PER_VERTEX: u32 = 8u;

@group(0) @binding(0) var<storage, read_write> vertices: array<f32>;
@group(0) @binding(2) var<uniform> uniforms: Uniforms;

fn hash(n: u32) -> f32 {{
    var x = n * 747796405u + 2891336453u;
    x = ((x >> ((x >> 28u) + 4u)) ^ x) * 277803737u;
    x = (x >> 22u) ^ x;
    return f32(x) / 4294967295.0;
}}

fn write_vertex(index: u32, position: vec3<f32>, uv: vec2<f32>, normal: vec3<f32>) {{
    let base = index * FLOATS_PER_VERTEX;
    vertices[base + 0u] = position.x;
    vertices[base + 1u] = position.y;
    vertices[base + 2u] = position.z;
    vertices[base + 3u] = uv.x;
    vertices[base + 4u] = uv.y;
    vertices[base + 5u] = normal.x;
    vertices[base + 6u] = normal.y;
    vertices[base + 7u] = normal.z;
}}

@compute @workgroup_size({threads})
fn generate_grass(@builtin(global_invocation_id) id: vec3<u32>) {{
    let shape = id.x;
    if (shape >= SHAPES) {{
        return;
    }}

    let cell = vec2<f32>(f32(shape % SHAPES_X), f32(shape / SHAPES_X));
    let jitter = vec2<f32>(hash(shape * 3u), hash(shape * 3u + 1u)) - 0.5;
    let spacing = FIELD_SIZE / f32(SHAPES_X);
    let root = vec3<f32>(
        (cell.x + 0.5 + jitter.x) * spacing - FIELD_SIZE * 0.5,
        0.0,
        (cell.y + 0.5 + jitter.y) * spacing - FIELD_SIZE * 0.5,
    );

    let angle = hash(shape * 3u + 2u) * 6.2831853;
    let side = vec3<f32>(cos(angle), 0.0, sin(angle));
    let facing = vec3<f32>(-side.z, 0.0, side.x);
    let height = 0.6 + hash(shape * 7u) * 0.6;
    let width = 0.08;
    let sway = sin(uniforms.time * 1.7 + root.x * 0.35 + root.z * 0.2) * 0.25;

    for (var quad = 0u; quad < QUADS; quad++) {{
        let t0 = f32(quad) / f32(QUADS);
        let t1 = f32(quad + 1u) / f32(QUADS);
        // Blades taper and bend further toward the tip
        let bend0 = facing * (sway * t0 * t0);
        let bend1 = facing * (sway * t1 * t1);
        let w0 = width * (1.0 - t0);
        let w1 = width * (1.0 - t1);

        let bl = root + bend0 - side * w0 + vec3<f32>(0.0, height * t0, 0.0);
        let br = root + bend0 + side * w0 + vec3<f32>(0.0, height * t0, 0.0);
        let tl = root + bend1 - side * w1 + vec3<f32>(0.0, height * t1, 0.0);
        let tr = root + bend1 + side * w1 + vec3<f32>(0.0, height * t1, 0.0);
        let normal = normalize(cross(tr - bl, br - bl));

        let first = shape * VERTS_PER_SHAPE + quad * VERTS_PER_QUAD;
        write_vertex(first + 0u, bl, vec2<f32>(0.0, 1.0 - t0), normal);
        write_vertex(first + 1u, br, vec2<f32>(1.0, 1.0 - t0), normal);
        write_vertex(first + 2u, tr, vec2<f32>(1.0, 1.0 - t1), normal);
        write_vertex(first + 3u, bl, vec2<f32>(0.0, 1.0 - t0), normal);
        write_vertex(first + 4u, tr, vec2<f32>(1.0, 1.0 - t1), normal);
        write_vertex(first + 5u, tl, vec2<f32>(0.0, 1.0 - t1), normal);
    }}
}}
"#,
        shapes_x = NUM_SHAPES_X,
        shapes = NUM_SHAPES,
        quads = NUM_QUADS_PER_SHAPE,
        verts_per_quad = NUM_VERTS_PER_QUAD,
        verts_per_shape = NUM_VERTICES_PER_SHAPE,
        field_size = GRASS_FIELD_SIZE,
        threads = MESH_THREADS_PER_THREADGROUP,
    )
}
