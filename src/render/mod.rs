//! Offscreen rendering and compositing

pub mod composite;
pub mod pass;
pub mod shaders;
pub mod target;

pub use composite::OffscreenComposite;
pub use pass::{FrameBindings, FrameRenderer, FrameStats, PassState};
pub use target::OffscreenTarget;
