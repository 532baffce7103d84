//! Types and constants shared between Rust and the WGSL shaders
//!
//! Struct layouts follow WGSL's uniform address space rules, so every
//! `#[repr(C)]` type here can be uploaded with `bytemuck::bytes_of`.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

/// Quads making up one grass blade
pub const NUM_QUADS_PER_SHAPE: u32 = 4;
/// Non-indexed vertices per quad (two triangles)
pub const NUM_VERTS_PER_QUAD: u32 = 6;
pub const NUM_PRIMS_PER_SHAPE: u32 = NUM_QUADS_PER_SHAPE * 2;
pub const NUM_VERTICES_PER_SHAPE: u32 = NUM_VERTS_PER_QUAD * NUM_QUADS_PER_SHAPE;

pub const NUM_SHAPES_X: u32 = 64;
pub const NUM_SHAPES_Y: u32 = 64;
pub const NUM_SHAPES: u32 = NUM_SHAPES_X * NUM_SHAPES_Y;

/// Grass generation threads per workgroup (one blade per thread)
pub const MESH_THREADS_PER_THREADGROUP: u32 = 1 << 3;
pub const THREADGROUPS_PER_MESHGRID: u32 =
    (NUM_SHAPES + MESH_THREADS_PER_THREADGROUP - 1) / MESH_THREADS_PER_THREADGROUP;

/// Total vertices written by one grass generation dispatch
pub const GRASS_VERTEX_COUNT: u32 = NUM_SHAPES * NUM_VERTICES_PER_SHAPE;

pub const NUM_NOISE_SAMPLES: u32 = 16;
pub const NUM_SSAO_SAMPLES: u32 = 8;

/// Binding numbers of buffers in bind group 0
pub mod buffer_index {
    pub const MESH_POSITIONS: u32 = 0;
    pub const MESH_GENERICS: u32 = 1;
    pub const UNIFORMS: u32 = 2;
    pub const MESH_BYTES: u32 = 3;
    pub const SHADOW_LIGHT: u32 = 4;
    pub const NOISE: u32 = 5;
    pub const SSAO_SAMPLES: u32 = 6;
    pub const CUBE_FROM_SPHERE: u32 = 7;
}

/// Binding numbers of textures in bind group 1
pub mod texture_index {
    pub const COLOR: u32 = 0;
    pub const SHADOW_MAP: u32 = 1;
    pub const DEPTH_MAP: u32 = 2;
    pub const NORMAL_MAP: u32 = 3;
    pub const DIFFUSE: u32 = 4;

    /// Samplers sit at `texture + SAMPLER_OFFSET` in the same group
    pub const SAMPLER_OFFSET: u32 = 8;

    pub const fn sampler(texture: u32) -> u32 {
        texture + SAMPLER_OFFSET
    }
}

/// Per-draw camera and animation state
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Uniforms {
    pub projection: Mat4,
    pub model: Mat4,
    pub view: Mat4,
    pub model_view: Mat4,
    pub time: f32,
    pub _pad: f32,
    pub screen_size: Vec2,
}

impl Uniforms {
    pub fn new(projection: Mat4, view: Mat4, model: Mat4, time: f32, screen_size: Vec2) -> Self {
        Self {
            projection,
            model,
            view,
            model_view: view * model,
            time,
            _pad: 0.0,
            screen_size,
        }
    }
}

impl Default for Uniforms {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY, 0.0, Vec2::ONE)
    }
}

/// Light-space transform used by shadow casters and receivers
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShadowLightUniform {
    pub projection: Mat4,
    pub view: Mat4,
    /// Normalized direction the light travels in
    pub direction: Vec3,
    pub _pad: f32,
}

/// Camera looking down one cube face during the environment bake
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CubeFromSphereUniform {
    pub projection: Mat4,
    pub view: Mat4,
}

/// WGSL declarations matching the structs above, prepended to every shader.
pub const WGSL_SHARED: &str = r#"
struct Uniforms {
    projection: mat4x4<f32>,
    model: mat4x4<f32>,
    view: mat4x4<f32>,
    model_view: mat4x4<f32>,
    time: f32,
    screen_size: vec2<f32>,
};

struct ShadowLightUniform {
    projection: mat4x4<f32>,
    view: mat4x4<f32>,
    direction: vec3<f32>,
};

struct CubeFromSphereUniform {
    projection: mat4x4<f32>,
    view: mat4x4<f32>,
};

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) normal: vec3<f32>,
};
"#;

/// Join the shared declarations with a pass's own shader body
pub fn shader_source(body: &str) -> String {
    let mut source = String::with_capacity(WGSL_SHARED.len() + body.len());
    source.push_str(WGSL_SHARED);
    source.push_str(body);
    source
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn uniforms_match_wgsl_layout() {
        // WGSL: vec2 aligns to 8, struct size rounds to 16
        assert_eq!(offset_of!(Uniforms, time), 256);
        assert_eq!(offset_of!(Uniforms, screen_size), 264);
        assert_eq!(size_of::<Uniforms>(), 272);
    }

    #[test]
    fn shadow_light_matches_wgsl_layout() {
        assert_eq!(offset_of!(ShadowLightUniform, direction), 128);
        assert_eq!(size_of::<ShadowLightUniform>(), 144);
        assert_eq!(size_of::<CubeFromSphereUniform>(), 128);
    }

    #[test]
    fn grass_dispatch_covers_every_shape() {
        assert_eq!(NUM_SHAPES, 4096);
        assert_eq!(NUM_VERTICES_PER_SHAPE, 24);
        assert_eq!(NUM_PRIMS_PER_SHAPE, 8);
        assert_eq!(THREADGROUPS_PER_MESHGRID, 512);
        assert!(THREADGROUPS_PER_MESHGRID * MESH_THREADS_PER_THREADGROUP >= NUM_SHAPES);
    }

    #[test]
    fn model_view_is_precomputed() {
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -5.0));
        let model = Mat4::from_scale(Vec3::splat(2.0));
        let uniforms = Uniforms::new(Mat4::IDENTITY, view, model, 1.5, Vec2::new(800.0, 600.0));
        assert_eq!(uniforms.model_view, view * model);
        assert_eq!(uniforms.time, 1.5);
    }

    #[test]
    fn sampler_bindings_do_not_collide_with_textures() {
        let textures = [
            texture_index::COLOR,
            texture_index::SHADOW_MAP,
            texture_index::DEPTH_MAP,
            texture_index::NORMAL_MAP,
            texture_index::DIFFUSE,
        ];
        for t in textures {
            assert!(!textures.contains(&texture_index::sampler(t)));
        }
    }
}
