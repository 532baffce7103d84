//! egui debug overlay
//!
//! [`overlay`] builds the UI from engine state without touching the GPU;
//! [`WgpuEguiIntegration`] feeds it window input and draws it with wgpu.

pub mod overlay;
mod wgpu;

pub use self::overlay::{show_overlay, OverlayAction, OverlayStats, OverlayVisibility};
pub use self::wgpu::WgpuEguiIntegration;
