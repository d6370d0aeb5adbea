//! Mesh geometry on the GPU: vertex layouts, shared buffers and the VAO cache.

pub mod buffer;
pub mod layout;
pub mod vao;

pub use buffer::{GeometryBuffer, GeometryBuilder, Submesh};
pub use layout::{match_layout, ShaderAttribute, SubmeshLayout, VertexAttribute};
pub use vao::{SubmeshKey, Vao, VaoCache};
