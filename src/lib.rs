//! Arena Renderer - a small offscreen-composited renderer
//!
//! Meshes are drawn into an offscreen framebuffer and composited to the
//! window through a full-screen quad. Two pieces carry the GPU state:
//!
//! - a per-(submesh, program) cache of vertex arrays that reconciles each
//!   program's vertex inputs with the submesh's interleaved layout
//! - a linear uniform arena that packs the camera, the lights and every
//!   object's transforms into one buffer each frame
//!
//! Rendering goes through the [`backend::GraphicsBackend`] trait, implemented
//! with wgpu for windows and by a recording dummy backend for tests.

pub mod backend;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod render;
pub mod resources;
pub mod scene;
pub mod uniforms;
pub mod window;

pub use backend::wgpu_backend::WgpuBackend;
pub use engine::Engine;
pub use error::{AssetError, RenderError, RenderResult};
pub use window::Window;

use backend::TextureFormat;

/// Configuration for initializing the renderer
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    /// Offscreen clear color
    pub clear_color: [f32; 4],
    /// Uniform arena size in bytes, capped by the device's uniform block limit
    pub uniform_arena_size: Option<usize>,
    /// Maximum number of lights packed per frame
    pub max_lights: usize,
    /// Color format of the offscreen target
    pub offscreen_format: TextureFormat,
    /// Relink programs whose files change on disk
    pub hot_reload: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Arena Renderer".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            clear_color: [0.1, 0.1, 0.1, 1.0],
            uniform_arena_size: None,
            max_lights: 16,
            offscreen_format: TextureFormat::Rgba8Unorm,
            hot_reload: false,
        }
    }
}
