//! Cameras and lights shared by the demo scenes

mod camera;
mod camera_controller;
mod light;

pub use camera::*;
pub use camera_controller::*;
pub use light::*;
