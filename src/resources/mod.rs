//! CPU-side assets and their GPU residency.
//!
//! Meshes, textures, and materials are built or loaded on the CPU first,
//! then uploaded through the backend; a model ties the uploaded pieces
//! together for drawing.

mod material;
mod mesh;
mod model;
mod texture;

pub use material::*;
pub use mesh::*;
pub use model::*;
pub use texture::*;
