//! Multipass rendering demo on a render graph
//!
//! Four scenes are cycled on a timer, each rendered by its own render graph:
//! - **House**: shadow mapping, SSAO and a textured (optionally OBJ) model
//! - **Ocean**: Gerstner waves under a procedural sky
//! - **Grass**: blades generated every frame by a compute pass
//! - **Reflections**: an environment cube baked once from a panorama
//!
//! # Features
//! - Render graph ordering passes by the resources they read and write
//! - Multiple frames in flight with per-slot uniform rings and fences
//! - Handle-based GPU abstraction implemented on wgpu
//! - egui overlay with frame timings and a scene picker

pub mod backend;
pub mod egui_integration;
pub mod engine;
pub mod frame;
pub mod pipeline;
pub mod render_graph;
pub mod resources;
pub mod scene;
pub mod scenes;
pub mod shader_types;
pub mod window;

pub use egui_integration::WgpuEguiIntegration;
pub use engine::{Engine, EngineError, EngineResult};
pub use scenes::SceneKind;
pub use window::Window;

// Re-export wgpu backend for direct access
pub use backend::wgpu_backend::WgpuBackend;

use pipeline::TonemapOperator;
use std::path::PathBuf;
use thiserror::Error;

/// Invalid [`EngineConfig`] value
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("frames in flight must be between 1 and 3, got {0}")]
    FramesInFlight(usize),
    #[error("window size must be non-zero, got {width}x{height}")]
    WindowSize { width: u32, height: u32 },
    #[error("shadow map size must be a power of two between 256 and 8192, got {0}")]
    ShadowMapSize(u32),
    #[error("scene duration must be a non-negative number of seconds, got {0}")]
    SceneDuration(f32),
    #[error("exposure must be positive, got {0}")]
    Exposure(f32),
}

/// Optional files replacing the procedural assets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetPaths {
    /// OBJ model for the house scene
    pub house_model: Option<PathBuf>,
    /// Diffuse texture for the house
    pub house_texture: Option<PathBuf>,
    /// Equirectangular panorama for the reflection scene
    pub environment: Option<PathBuf>,
}

/// Configuration for initializing the demo
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    /// Frames the CPU may record ahead of the GPU (1-3)
    pub frames_in_flight: usize,
    pub start_scene: SceneKind,
    /// Seconds before advancing to the next scene; 0 disables cycling
    pub scene_duration: f32,
    /// Edge length of the house scene's shadow map
    pub shadow_map_size: u32,
    pub assets: AssetPaths,
    /// Show the egui overlay at startup
    pub overlay: bool,
    pub tonemap: TonemapOperator,
    pub exposure: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Multipass Demo".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            frames_in_flight: frame::DEFAULT_FRAMES_IN_FLIGHT,
            start_scene: SceneKind::House,
            scene_duration: 10.0,
            shadow_map_size: 2048,
            assets: AssetPaths::default(),
            overlay: true,
            tonemap: TonemapOperator::default(),
            exposure: 1.0,
        }
    }
}

impl EngineConfig {
    pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=Self::MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(ConfigError::FramesInFlight(self.frames_in_flight));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::WindowSize {
                width: self.width,
                height: self.height,
            });
        }
        if !self.shadow_map_size.is_power_of_two() || !(256..=8192).contains(&self.shadow_map_size) {
            return Err(ConfigError::ShadowMapSize(self.shadow_map_size));
        }
        // NaN fails both comparisons
        if !(self.scene_duration >= 0.0 && self.scene_duration.is_finite()) {
            return Err(ConfigError::SceneDuration(self.scene_duration));
        }
        if !(self.exposure > 0.0 && self.exposure.is_finite()) {
            return Err(ConfigError::Exposure(self.exposure));
        }
        Ok(())
    }
}
