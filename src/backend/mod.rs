//! Backend abstraction layer
//!
//! The [`GraphicsBackend`] trait and its wgpu implementation.

pub mod traits;
pub mod types;
pub mod wgpu_backend;

#[cfg(test)]
pub(crate) mod mock;

pub use traits::*;
pub use types::*;
