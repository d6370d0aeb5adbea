//! Backend abstraction layer
//!
//! Provides the [`GraphicsBackend`] trait the renderer is written against, the
//! wgpu implementation used on screen, and a recording dummy used by tests.

pub mod dummy;
pub mod release;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use release::{GpuResource, Owned, ReleaseQueue};
pub use traits::*;
pub use types::*;
