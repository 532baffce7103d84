//! Sun light and its shadow projection

use crate::shader_types::ShadowLightUniform;
use glam::{Mat4, Vec3};

/// Directional light (like the sun)
#[derive(Debug, Clone, PartialEq)]
pub struct DirectionalLight {
    /// Direction the light travels in
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self::new(Vec3::new(-0.5, -1.0, -0.3), Vec3::ONE, 1.0)
    }
}

impl DirectionalLight {
    pub fn new(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            direction: direction.normalize(),
            color,
            intensity,
        }
    }

    /// Light-space transform whose orthographic box encloses a sphere of
    /// `radius` around `center`.
    pub fn shadow_uniform(&self, center: Vec3, radius: f32) -> ShadowLightUniform {
        let eye = center - self.direction * radius * 2.0;
        let up = if self.direction.abs_diff_eq(Vec3::Y, 1e-3)
            || self.direction.abs_diff_eq(-Vec3::Y, 1e-3)
        {
            Vec3::Z
        } else {
            Vec3::Y
        };

        ShadowLightUniform {
            projection: Mat4::orthographic_rh(-radius, radius, -radius, radius, 0.1, radius * 4.0),
            view: Mat4::look_at_rh(eye, center, up),
            direction: self.direction,
            _pad: 0.0,
        }
    }
}
