//! Post-processing effects
//!
//! Fullscreen passes that read the HDR scene colour and write the final
//! image into the swapchain.

mod tonemapping;

pub use tonemapping::{TonemapOperator, TonemapParams, TonemappingPass};
