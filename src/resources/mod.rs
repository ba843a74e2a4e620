//! Resource management
//!
//! Imported models, materials and textures, and the CPU side of their GPU records.

mod material;
mod mesh;
mod model;
mod texture;

pub use material::*;
pub use mesh::*;
pub use model::*;
pub use texture::*;
