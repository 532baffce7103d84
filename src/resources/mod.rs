//! Meshes and textures used by the demo scenes
//!
//! Everything can be generated procedurally; OBJ models and images on disk
//! are optional replacements.

mod mesh;
mod texture;

pub use mesh::*;
pub use texture::*;

use thiserror::Error;

/// Asset loading error
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Failed to load image: {0}")]
    Image(#[from] image::ImageError),
    #[error("Failed to load OBJ: {0}")]
    Obj(#[from] tobj::LoadError),
    #[error("Mesh '{0}' has no triangles")]
    EmptyMesh(String),
}

pub type AssetResult<T> = Result<T, AssetError>;
