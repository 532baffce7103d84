//! Mesh data structures and generation

use super::{AssetError, AssetResult};
use crate::backend::traits::*;
use crate::backend::types::*;
use glam::{Vec2, Vec3};
use std::f32::consts::{PI, TAU};
use std::path::Path;

/// A mesh with vertex and index data
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Distance from the origin to the farthest vertex
    pub fn bounding_radius(&self) -> f32 {
        self.vertices
            .iter()
            .map(|v| v.position.length())
            .fold(0.0, f32::max)
    }

    /// Append another mesh, offsetting its indices
    pub fn merge(&mut self, other: &Mesh) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.indices.extend(other.indices.iter().map(|i| i + base));
    }

    /// Append a quad `a b c d` (counter-clockwise seen from the front)
    fn push_quad(&mut self, corners: [Vec3; 4], normal: Vec3, uv_scale: Vec2) {
        let base = self.vertices.len() as u32;
        let uvs = [
            Vec2::new(0.0, uv_scale.y),
            Vec2::new(uv_scale.x, uv_scale.y),
            Vec2::new(uv_scale.x, 0.0),
            Vec2::ZERO,
        ];
        for (position, uv) in corners.into_iter().zip(uvs) {
            self.vertices.push(Vertex::new(position, uv, normal));
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    fn push_triangle(&mut self, corners: [Vec3; 3], uvs: [Vec2; 3]) {
        let normal = (corners[1] - corners[0])
            .cross(corners[2] - corners[0])
            .normalize();
        let base = self.vertices.len() as u32;
        for (position, uv) in corners.into_iter().zip(uvs) {
            self.vertices.push(Vertex::new(position, uv, normal));
        }
        self.indices.extend_from_slice(&[base, base + 1, base + 2]);
    }

    /// Axis-aligned box centered at origin
    pub fn cuboid(size: Vec3, uv_scale: Vec2) -> Self {
        let mut mesh = Mesh::new("cuboid");
        let h = size / 2.0;

        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
        ];

        for (normal, right, up) in faces {
            let center = normal * h;
            let r = right * h;
            let u = up * h;
            mesh.push_quad(
                [center - r - u, center + r - u, center + r + u, center - r + u],
                normal,
                uv_scale,
            );
        }

        mesh
    }

    /// Unit cube centered at origin
    pub fn cube() -> Self {
        let mut mesh = Self::cuboid(Vec3::ONE, Vec2::ONE);
        mesh.name = "cube".into();
        mesh
    }

    /// UV sphere of radius 1
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut mesh = Mesh::new("sphere");

        for ring in 0..=rings {
            let phi = ring as f32 * PI / rings as f32;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for segment in 0..=segments {
                let theta = segment as f32 * TAU / segments as f32;
                let normal = Vec3::new(ring_radius * theta.cos(), y, ring_radius * theta.sin());
                let uv = Vec2::new(
                    segment as f32 / segments as f32,
                    ring as f32 / rings as f32,
                );
                mesh.vertices.push(Vertex::new(normal, uv, normal));
            }
        }

        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;
                mesh.indices.extend_from_slice(&[
                    current,
                    current + 1,
                    next,
                    current + 1,
                    next + 1,
                    next,
                ]);
            }
        }

        mesh
    }

    /// Subdivided plane on the XZ axis, facing +Y
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut mesh = Mesh::new("plane");
        let subdivisions = subdivisions.max(1);

        let step_x = width / subdivisions as f32;
        let step_z = depth / subdivisions as f32;

        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                let position = Vec3::new(
                    -width / 2.0 + x as f32 * step_x,
                    0.0,
                    -depth / 2.0 + z as f32 * step_z,
                );
                let uv = Vec2::new(
                    x as f32 / subdivisions as f32,
                    z as f32 / subdivisions as f32,
                );
                mesh.vertices.push(Vertex::new(position, uv, Vec3::Y));
            }
        }

        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * (subdivisions + 1) + x;
                let next = current + subdivisions + 1;
                mesh.indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }

        mesh
    }

    /// Torus in the XZ plane
    pub fn torus(major_radius: f32, minor_radius: f32, segments: u32, sides: u32) -> Self {
        let mut mesh = Mesh::new("torus");

        for i in 0..=segments {
            let u = i as f32 / segments as f32;
            let theta = u * TAU;
            let ring_center = Vec3::new(theta.cos(), 0.0, theta.sin()) * major_radius;

            for j in 0..=sides {
                let v = j as f32 / sides as f32;
                let phi = v * TAU;
                let normal = Vec3::new(
                    phi.cos() * theta.cos(),
                    phi.sin(),
                    phi.cos() * theta.sin(),
                );
                mesh.vertices.push(Vertex::new(
                    ring_center + normal * minor_radius,
                    Vec2::new(u, v),
                    normal,
                ));
            }
        }

        for i in 0..segments {
            for j in 0..sides {
                let current = i * (sides + 1) + j;
                let next = current + sides + 1;
                mesh.indices.extend_from_slice(&[
                    current,
                    current + 1,
                    next,
                    current + 1,
                    next + 1,
                    next,
                ]);
            }
        }

        mesh
    }

    /// Box walls with a pyramid roof, standing on y = 0
    ///
    /// Used when no OBJ model is configured.
    pub fn house() -> Self {
        let mut mesh = Mesh::new("house");

        let mut walls = Self::cuboid(Vec3::new(4.0, 3.0, 3.0), Vec2::new(2.0, 1.5));
        for v in &mut walls.vertices {
            v.position.y += 1.5;
        }
        mesh.merge(&walls);

        let apex = Vec3::new(0.0, 5.0, 0.0);
        let eaves = [
            Vec3::new(-2.3, 3.0, 1.8),
            Vec3::new(2.3, 3.0, 1.8),
            Vec3::new(2.3, 3.0, -1.8),
            Vec3::new(-2.3, 3.0, -1.8),
        ];
        for i in 0..4 {
            mesh.push_triangle(
                [eaves[i], eaves[(i + 1) % 4], apex],
                [Vec2::new(0.0, 1.0), Vec2::new(1.0, 1.0), Vec2::new(0.5, 0.0)],
            );
        }

        mesh
    }

    /// Load and merge every model of an OBJ file
    pub fn from_obj<P: AsRef<Path>>(path: P) -> AssetResult<Self> {
        let path = path.as_ref();
        let (models, _materials) = tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS)?;

        let mut mesh = Mesh::new(&path.display().to_string());
        for model in &models {
            let part = &model.mesh;
            let count = part.positions.len() / 3;
            let base = mesh.vertices.len() as u32;

            for i in 0..count {
                let position = Vec3::from_slice(&part.positions[i * 3..i * 3 + 3]);
                let normal = if part.normals.len() >= (i + 1) * 3 {
                    Vec3::from_slice(&part.normals[i * 3..i * 3 + 3])
                } else {
                    Vec3::ZERO
                };
                // OBJ texture space has its origin at the bottom left
                let uv = if part.texcoords.len() >= (i + 1) * 2 {
                    Vec2::new(part.texcoords[i * 2], 1.0 - part.texcoords[i * 2 + 1])
                } else {
                    Vec2::ZERO
                };
                mesh.vertices.push(Vertex::new(position, uv, normal));
            }
            mesh.indices.extend(part.indices.iter().map(|i| i + base));

            if part.normals.is_empty() {
                mesh.compute_normals(base as usize);
            }
        }

        if mesh.indices.is_empty() {
            return Err(AssetError::EmptyMesh(path.display().to_string()));
        }

        log::info!(
            "Loaded OBJ '{}': {} vertices, {} triangles",
            mesh.name,
            mesh.vertex_count(),
            mesh.triangle_count()
        );
        Ok(mesh)
    }

    /// Area-weighted smooth normals for vertices from `first_vertex` on
    pub fn compute_normals(&mut self, first_vertex: usize) {
        for v in &mut self.vertices[first_vertex..] {
            v.normal = Vec3::ZERO;
        }

        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            if a < first_vertex || b < first_vertex || c < first_vertex {
                continue;
            }
            let face = (self.vertices[b].position - self.vertices[a].position)
                .cross(self.vertices[c].position - self.vertices[a].position);
            for i in [a, b, c] {
                self.vertices[i].normal += face;
            }
        }

        for v in &mut self.vertices[first_vertex..] {
            v.normal = v.normal.normalize_or_zero();
        }
    }

    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }
}

/// Vertex and index buffers of an uploaded mesh
#[derive(Debug, Clone, Copy)]
pub struct GpuMesh {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

impl GpuMesh {
    pub fn upload<B: GraphicsBackend + ?Sized>(backend: &mut B, mesh: &Mesh) -> BackendResult<Self> {
        let vertex_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} vertices", mesh.name)),
                size: mesh.vertex_bytes().len() as u64,
                usage: BufferUsage::VERTEX,
                mapped_at_creation: false,
            },
            mesh.vertex_bytes(),
        )?;
        let index_buffer = backend.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{} indices", mesh.name)),
                size: mesh.index_bytes().len() as u64,
                usage: BufferUsage::INDEX,
                mapped_at_creation: false,
            },
            mesh.index_bytes(),
        )?;

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count() as u32,
        })
    }

    /// Bind both buffers and draw `instances`
    pub fn draw(&self, backend: &mut dyn GraphicsBackend, instances: std::ops::Range<u32>) {
        backend.set_vertex_buffer(0, self.vertex_buffer, 0);
        backend.set_index_buffer(self.index_buffer, 0, IndexFormat::Uint32);
        backend.draw_indexed(0..self.index_count, 0, instances);
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        backend.destroy_buffer(self.vertex_buffer);
        backend.destroy_buffer(self.index_buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use rstest::rstest;
    use std::io::Write;

    fn assert_valid(mesh: &Mesh) {
        assert_eq!(mesh.indices.len() % 3, 0);
        assert!(mesh
            .indices
            .iter()
            .all(|&i| (i as usize) < mesh.vertices.len()));
        assert!(mesh
            .vertices
            .iter()
            .all(|v| (v.normal.length() - 1.0).abs() < 1e-3));
    }

    /// Triangles wind counter-clockwise when seen from the side their
    /// vertex normals point to.
    fn assert_outward_winding(mesh: &Mesh) {
        for tri in mesh.indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|k| mesh.vertices[tri[k] as usize]);
            let face = (b.position - a.position).cross(c.position - a.position);
            if face.length_squared() < 1e-10 {
                continue;
            }
            let normal = a.normal + b.normal + c.normal;
            assert!(face.dot(normal) > 0.0, "inward triangle in {}", mesh.name);
        }
    }

    #[rstest]
    #[case::cube(Mesh::cube(), 24, 12)]
    #[case::plane(Mesh::plane(10.0, 10.0, 4), 25, 32)]
    #[case::sphere(Mesh::sphere(8, 4), 45, 64)]
    #[case::torus(Mesh::torus(1.0, 0.25, 8, 4), 45, 64)]
    fn test_generated_meshes(#[case] mesh: Mesh, #[case] vertices: usize, #[case] triangles: usize) {
        assert_eq!(mesh.vertex_count(), vertices);
        assert_eq!(mesh.triangle_count(), triangles);
        assert_valid(&mesh);
    }

    #[rstest]
    #[case(Mesh::cube())]
    #[case(Mesh::sphere(16, 8))]
    #[case(Mesh::torus(1.0, 0.3, 16, 8))]
    #[case(Mesh::house())]
    fn test_faces_wind_outward(#[case] mesh: Mesh) {
        assert_outward_winding(&mesh);
    }

    #[test]
    fn test_house_stands_on_ground() {
        let house = Mesh::house();
        assert_valid(&house);
        let min_y = house
            .vertices
            .iter()
            .map(|v| v.position.y)
            .fold(f32::MAX, f32::min);
        assert!(min_y.abs() < 1e-6);
        assert!(house.bounding_radius() >= 5.0);
    }

    #[test]
    fn test_load_obj_without_normals() {
        let mut file = tempfile::Builder::new().suffix(".obj").tempfile().unwrap();
        writeln!(
            file,
            "v 0 0 0\nv 1 0 0\nv 0 0 -1\nvt 0 0\nvt 1 0\nvt 0 1\nf 1/1 2/2 3/3"
        )
        .unwrap();

        let mesh = Mesh::from_obj(file.path()).unwrap();
        assert_eq!(mesh.triangle_count(), 1);
        assert!(mesh.vertices[0].normal.abs_diff_eq(Vec3::Y, 1e-5));
        // Flipped V
        assert_eq!(mesh.vertices[2].uv, Vec2::new(0.0, 0.0));
        assert_eq!(mesh.vertices[0].uv, Vec2::new(0.0, 1.0));
    }

    #[test]
    fn test_missing_obj_is_an_error() {
        assert!(Mesh::from_obj("/definitely/not/here.obj").is_err());
    }

    #[test]
    fn test_upload_creates_both_buffers() {
        let mut backend = MockBackend::new(1, 1);
        let mesh = Mesh::cube();
        let gpu = GpuMesh::upload(&mut backend, &mesh).unwrap();

        assert_eq!(gpu.index_count, 36);
        assert_eq!(backend.buffer_bytes(gpu.vertex_buffer).len(), 24 * 32);

        gpu.destroy(&mut backend);
        assert!(backend.live_buffers.is_empty());
    }
}
