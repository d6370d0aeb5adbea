//! Per-frame uniform storage

mod arena;
mod packer;

pub use arena::{ArenaFrame, BlockWriter, UniformArena, UniformRange};
pub use packer::{FrameUniformPacker, FrameUniforms, GlobalsHeader, ObjectBlock};
