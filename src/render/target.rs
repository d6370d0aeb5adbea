//! Offscreen framebuffer the scene is drawn into before compositing.

use crate::backend::{
    BackendError, GraphicsBackend, Owned, TextureDescriptor, TextureFormat, TextureHandle,
    TextureUsage, TextureViewHandle,
};
use crate::error::{RenderError, RenderResult};

/// Color and depth attachments of matching size
#[derive(Debug)]
pub struct OffscreenTarget {
    color: Owned<TextureHandle>,
    color_view: Owned<TextureViewHandle>,
    depth: Owned<TextureHandle>,
    depth_view: Owned<TextureViewHandle>,
    width: u32,
    height: u32,
    format: TextureFormat,
}

fn incomplete(attachment: &'static str) -> impl FnOnce(BackendError) -> RenderError {
    move |e| RenderError::FramebufferIncomplete(format!("{} attachment: {}", attachment, e))
}

impl OffscreenTarget {
    pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> RenderResult<Self> {
        let queue = backend.release_queue();

        let color = backend
            .create_texture(&TextureDescriptor {
                label: Some("Offscreen Color".to_string()),
                width,
                height,
                format,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            })
            .map_err(incomplete("color"))?;
        let color = Owned::new(color, queue.clone());
        let color_view = backend
            .create_texture_view(color.handle())
            .map_err(incomplete("color"))?;
        let color_view = Owned::new(color_view, queue.clone());

        let depth = backend
            .create_texture(&TextureDescriptor {
                label: Some("Offscreen Depth".to_string()),
                width,
                height,
                format: Self::DEPTH_FORMAT,
                usage: TextureUsage::RENDER_ATTACHMENT,
            })
            .map_err(incomplete("depth"))?;
        let depth = Owned::new(depth, queue.clone());
        let depth_view = backend
            .create_texture_view(depth.handle())
            .map_err(incomplete("depth"))?;
        let depth_view = Owned::new(depth_view, queue);

        log::debug!("Created {}x{} offscreen target ({:?})", width, height, format);

        Ok(Self {
            color,
            color_view,
            depth,
            depth_view,
            width,
            height,
            format,
        })
    }

    /// Replace the attachments with ones of the new size. The old ones are
    /// released at the next garbage collection. On failure the target is unchanged.
    pub fn resize<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> RenderResult<()> {
        if (width, height) == (self.width, self.height) {
            return Ok(());
        }
        *self = Self::new(backend, width, height, self.format)?;
        Ok(())
    }

    pub fn color_texture(&self) -> TextureHandle {
        self.color.handle()
    }

    pub fn color_view(&self) -> TextureViewHandle {
        self.color_view.handle()
    }

    pub fn depth_texture(&self) -> TextureHandle {
        self.depth.handle()
    }

    pub fn depth_view(&self) -> TextureViewHandle {
        self.depth_view.handle()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;

    #[test]
    fn test_resize_releases_old_attachments() {
        let mut backend = DummyBackend::new(64, 64);
        let mut target = OffscreenTarget::new(&mut backend, 64, 64, TextureFormat::Rgba8Unorm).unwrap();
        let old = (target.color_texture(), target.depth_view());

        target.resize(&mut backend, 128, 32).unwrap();
        backend.collect_garbage();

        assert_eq!(target.size(), (128, 32));
        assert!(!backend.is_live(old.0));
        assert!(!backend.is_live(old.1));
        assert!(backend.is_live(target.color_view()));
    }

    #[test]
    fn test_zero_size_is_incomplete() {
        let mut backend = DummyBackend::new(64, 64);
        let err = OffscreenTarget::new(&mut backend, 0, 64, TextureFormat::Rgba8Unorm).unwrap_err();
        assert!(matches!(err, RenderError::FramebufferIncomplete(_)));
    }
}
