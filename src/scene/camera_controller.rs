//! Orbit camera control
//!
//! Each demo scene owns an [`OrbitController`] that circles a point of
//! interest. With no input the camera drifts around at `auto_rotate_speed`;
//! dragging with the left mouse button takes over.

use glam::{Vec2, Vec3};
use std::f32::consts::{FRAC_PI_2, FRAC_PI_6, TAU};

use super::Camera;

/// Input state gathered from window events for one frame
#[derive(Debug, Clone, Default)]
pub struct CameraInput {
    /// Movement keys (WASD, QE for up/down)
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,

    /// Sprint modifier (shift)
    pub sprint: bool,

    /// Mouse delta since last frame (in pixels)
    pub mouse_delta: Vec2,

    /// Mouse scroll delta (positive = scroll up)
    pub scroll_delta: f32,

    /// Left mouse button held
    pub dragging: bool,
}

impl CameraInput {
    /// Reset per-frame deltas (call after update)
    pub fn reset_deltas(&mut self) {
        self.mouse_delta = Vec2::ZERO;
        self.scroll_delta = 0.0;
    }

    fn is_active(&self) -> bool {
        self.dragging
            || self.scroll_delta != 0.0
            || self.forward
            || self.backward
            || self.left
            || self.right
            || self.up
            || self.down
    }
}

/// Camera controller trait
pub trait CameraController {
    /// Update the camera based on input and delta time
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32);

    /// Reset the controller to its initial state
    fn reset(&mut self);
}

/// Rotates around a target point at a fixed distance.
///
/// - Mouse drag: orbit around target
/// - Scroll: zoom in/out
/// - WASD / QE: pan the target point
#[derive(Debug, Clone)]
pub struct OrbitController {
    pub target: Vec3,
    pub distance: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    /// Horizontal angle in radians
    pub azimuth: f32,
    /// Vertical angle in radians
    pub elevation: f32,
    pub min_elevation: f32,
    pub max_elevation: f32,
    /// Radians per pixel of mouse drag
    pub orbit_sensitivity: f32,
    pub zoom_factor: f32,
    pub pan_speed: f32,
    /// Radians per second while idle
    pub auto_rotate_speed: f32,
    initial: (Vec3, f32, f32, f32),
}

impl Default for OrbitController {
    fn default() -> Self {
        Self::new(Vec3::ZERO, 10.0)
    }
}

impl OrbitController {
    pub fn new(target: Vec3, distance: f32) -> Self {
        Self {
            target,
            distance,
            min_distance: 1.0,
            max_distance: 100.0,
            azimuth: 0.0,
            elevation: FRAC_PI_6,
            min_elevation: -FRAC_PI_2 + 0.05,
            max_elevation: FRAC_PI_2 - 0.05,
            orbit_sensitivity: 0.005,
            zoom_factor: 1.1,
            pan_speed: 5.0,
            auto_rotate_speed: 0.1,
            initial: (target, distance, 0.0, FRAC_PI_6),
        }
    }

    pub fn with_angles(mut self, azimuth_degrees: f32, elevation_degrees: f32) -> Self {
        self.azimuth = azimuth_degrees.to_radians();
        self.elevation = elevation_degrees
            .to_radians()
            .clamp(self.min_elevation, self.max_elevation);
        self.initial = (self.target, self.distance, self.azimuth, self.elevation);
        self
    }

    /// Keep the camera above the horizon (ground-based scenes)
    pub fn above_ground(mut self) -> Self {
        self.min_elevation = 0.05;
        self.elevation = self.elevation.max(self.min_elevation);
        self.initial.3 = self.initial.3.max(self.min_elevation);
        self
    }

    pub fn with_auto_rotate(mut self, radians_per_second: f32) -> Self {
        self.auto_rotate_speed = radians_per_second;
        self
    }

    pub fn position(&self) -> Vec3 {
        let x = self.distance * self.elevation.cos() * self.azimuth.cos();
        let y = self.distance * self.elevation.sin();
        let z = self.distance * self.elevation.cos() * self.azimuth.sin();
        self.target + Vec3::new(x, y, z)
    }

    /// Place `camera` at the current orbit position
    pub fn apply(&self, camera: &mut Camera) {
        camera.position = self.position();
        camera.target = self.target;
    }

    fn pan_axes(&self) -> (Vec3, Vec3) {
        let forward = -Vec3::new(self.azimuth.cos(), 0.0, self.azimuth.sin());
        let right = Vec3::new(-self.azimuth.sin(), 0.0, self.azimuth.cos());
        (forward, right)
    }
}

impl CameraController for OrbitController {
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32) {
        if input.scroll_delta > 0.0 {
            self.distance /= self.zoom_factor;
        } else if input.scroll_delta < 0.0 {
            self.distance *= self.zoom_factor;
        }
        self.distance = self.distance.clamp(self.min_distance, self.max_distance);

        if input.dragging && input.mouse_delta != Vec2::ZERO {
            self.azimuth += input.mouse_delta.x * self.orbit_sensitivity;
            self.elevation += input.mouse_delta.y * self.orbit_sensitivity;
        } else if !input.is_active() {
            self.azimuth += self.auto_rotate_speed * dt;
        }
        self.elevation = self.elevation.clamp(self.min_elevation, self.max_elevation);
        self.azimuth %= TAU;

        let (forward, right) = self.pan_axes();
        let mut pan = Vec3::ZERO;
        if input.forward {
            pan += forward;
        }
        if input.backward {
            pan -= forward;
        }
        if input.right {
            pan += right;
        }
        if input.left {
            pan -= right;
        }
        if input.up {
            pan += Vec3::Y;
        }
        if input.down {
            pan -= Vec3::Y;
        }

        if pan.length_squared() > 0.0 {
            let speed = if input.sprint {
                self.pan_speed * 2.0
            } else {
                self.pan_speed
            };
            self.target += pan.normalize() * speed * dt;
        }

        self.apply(camera);
    }

    fn reset(&mut self) {
        let (target, distance, azimuth, elevation) = self.initial;
        self.target = target;
        self.distance = distance;
        self.azimuth = azimuth;
        self.elevation = elevation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn idle_camera_auto_rotates() {
        let mut controller = OrbitController::new(Vec3::ZERO, 10.0).with_auto_rotate(1.0);
        let mut camera = Camera::default();

        controller.update(&mut camera, &CameraInput::default(), 0.5);

        assert!((controller.azimuth - 0.5).abs() < 1e-6);
        assert!((camera.position.distance(Vec3::ZERO) - 10.0).abs() < 1e-4);
        assert_eq!(camera.target, Vec3::ZERO);
    }

    #[test]
    fn drag_overrides_auto_rotation() {
        let mut controller = OrbitController::new(Vec3::ZERO, 10.0).with_auto_rotate(1.0);
        let mut camera = Camera::default();
        let input = CameraInput {
            dragging: true,
            mouse_delta: Vec2::new(100.0, 0.0),
            ..Default::default()
        };

        controller.update(&mut camera, &input, 1.0);

        assert!((controller.azimuth - 0.5).abs() < 1e-6);
    }

    #[rstest]
    #[case(1.0, 10.0 / 1.1)]
    #[case(-1.0, 10.0 * 1.1)]
    fn scroll_zooms(#[case] scroll: f32, #[case] expected: f32) {
        let mut controller = OrbitController::new(Vec3::ZERO, 10.0);
        let input = CameraInput {
            scroll_delta: scroll,
            ..Default::default()
        };
        controller.update(&mut Camera::default(), &input, 0.016);
        assert!((controller.distance - expected).abs() < 1e-4);
    }

    #[test]
    fn elevation_stays_above_ground() {
        let mut controller = OrbitController::new(Vec3::ZERO, 10.0).above_ground();
        let input = CameraInput {
            dragging: true,
            mouse_delta: Vec2::new(0.0, -10_000.0),
            ..Default::default()
        };
        let mut camera = Camera::default();
        controller.update(&mut camera, &input, 0.016);

        assert_eq!(controller.elevation, controller.min_elevation);
        assert!(camera.position.y > 0.0);
    }

    #[rstest]
    #[case::angles_first(OrbitController::new(Vec3::ZERO, 10.0).with_angles(30.0, -20.0).above_ground())]
    #[case::ground_first(OrbitController::new(Vec3::ZERO, 10.0).above_ground().with_angles(30.0, -20.0))]
    fn reset_stays_above_ground(#[case] mut controller: OrbitController) {
        assert_eq!(controller.elevation, controller.min_elevation);

        let input = CameraInput {
            dragging: true,
            mouse_delta: Vec2::new(0.0, 200.0),
            ..Default::default()
        };
        controller.update(&mut Camera::default(), &input, 0.016);
        controller.reset();

        assert_eq!(controller.elevation, controller.min_elevation);
    }

    #[test]
    fn reset_restores_initial_orbit() {
        let mut controller = OrbitController::new(Vec3::Y, 8.0).with_angles(45.0, 20.0);
        controller.update(&mut Camera::default(), &CameraInput::default(), 3.0);
        controller.reset();
        assert!((controller.azimuth - 45f32.to_radians()).abs() < 1e-6);
        assert_eq!(controller.target, Vec3::Y);
    }
}
