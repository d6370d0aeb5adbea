//! Resource management
//!
//! Handles loading and management of programs, meshes, models, textures and materials.

mod assets;
mod material;
mod mesh;
mod model;
mod program;
mod texture;

pub use assets::*;
pub use material::*;
pub use mesh::*;
pub use program::*;
pub use texture::*;
