//! Error types for the renderer.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;

/// Failures while loading programs, textures and models.
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Asset not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to load OBJ {}: {source}", path.display())]
    Obj {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },

    #[error("Shader '{name}' failed to parse: {message}")]
    Shader { name: String, message: String },

    #[error("Shader '{name}' has no entry point '{entry}'")]
    MissingEntryPoint { name: String, entry: String },
}

/// Errors raised by the core renderer.
#[derive(Error, Debug)]
pub enum RenderError {
    /// A program input has no attribute at the same location in the submesh layout
    #[error("Vertex layout mismatch: no submesh attribute at location {location}")]
    LayoutMismatch { location: u8 },

    #[error("Uniform arena overflow: {requested} bytes at head {head} exceed capacity {capacity}")]
    ArenaOverflow {
        head: usize,
        requested: usize,
        capacity: usize,
    },

    #[error("Failed to create {what}: {source}")]
    ResourceCreation {
        what: &'static str,
        #[source]
        source: BackendError,
    },

    #[error("Framebuffer incomplete: {0}")]
    FramebufferIncomplete(String),

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl RenderError {
    pub(crate) fn creation(what: &'static str) -> impl FnOnce(BackendError) -> RenderError {
        move |source| RenderError::ResourceCreation { what, source }
    }
}

pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_message_names_sizes() {
        let err = RenderError::ArenaOverflow {
            head: 48,
            requested: 48,
            capacity: 64,
        };
        assert_eq!(
            err.to_string(),
            "Uniform arena overflow: 48 bytes at head 48 exceed capacity 64"
        );
    }

    #[test]
    fn test_backend_error_converts() {
        let err: RenderError = BackendError::SurfaceLost.into();
        assert!(matches!(err, RenderError::Backend(BackendError::SurfaceLost)));
    }
}
