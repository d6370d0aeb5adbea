//! Deferred release of GPU resources.
//!
//! Handles created through a [`GraphicsBackend`] are plain ids. Wrapping one in
//! [`Owned`] ties its lifetime to a Rust value: when the owner drops, the handle
//! is pushed onto the backend's [`ReleaseQueue`] instead of being destroyed on
//! the spot, because recorded commands may still reference it.
//!
//! ```text
//! On Drop(Owned<H>):
//!   1. Don't call destroy_*
//!   2. Push GpuResource::from(handle) onto the ReleaseQueue
//!
//! On collect_garbage() (once per frame, and on resize):
//!   1. Drain the queue
//!   2. destroy_* every drained handle
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::traits::{
    BufferHandle, GraphicsBackend, ProgramHandle, TextureHandle, TextureViewHandle,
    VertexArrayHandle,
};

/// A GPU resource pending destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuResource {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    TextureView(TextureViewHandle),
    Program(ProgramHandle),
    VertexArray(VertexArrayHandle),
}

impl GpuResource {
    /// Destroy the resource on `backend` immediately.
    pub fn destroy<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        match self {
            GpuResource::Buffer(h) => backend.destroy_buffer(h),
            GpuResource::Texture(h) => backend.destroy_texture(h),
            GpuResource::TextureView(h) => backend.destroy_texture_view(h),
            GpuResource::Program(h) => backend.destroy_program(h),
            GpuResource::VertexArray(h) => backend.destroy_vertex_array(h),
        }
    }
}

macro_rules! impl_from_handle {
    ($($handle:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$handle> for GpuResource {
                fn from(handle: $handle) -> Self {
                    GpuResource::$variant(handle)
                }
            }
        )*
    };
}

impl_from_handle! {
    BufferHandle => Buffer,
    TextureHandle => Texture,
    TextureViewHandle => TextureView,
    ProgramHandle => Program,
    VertexArrayHandle => VertexArray,
}

/// Queue of resources whose owners have been dropped.
///
/// Cloning shares the same queue.
#[derive(Clone, Default)]
pub struct ReleaseQueue {
    pending: Arc<Mutex<Vec<GpuResource>>>,
}

impl ReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, resource: GpuResource) {
        self.pending.lock().push(resource);
    }

    /// Take every pending resource, oldest first.
    pub fn drain(&self) -> Vec<GpuResource> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drain the queue and destroy everything in it on `backend`.
    pub fn destroy_pending<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) -> usize {
        let pending = self.drain();
        let count = pending.len();
        for resource in pending {
            resource.destroy(backend);
        }
        if count > 0 {
            log::trace!("Released {} GPU resources", count);
        }
        count
    }
}

impl fmt::Debug for ReleaseQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseQueue")
            .field("pending", &self.len())
            .finish()
    }
}

/// A handle whose resource is released when this value drops.
pub struct Owned<H>
where
    H: Copy + Into<GpuResource>,
{
    handle: H,
    queue: ReleaseQueue,
}

impl<H> Owned<H>
where
    H: Copy + Into<GpuResource>,
{
    pub fn new(handle: H, queue: ReleaseQueue) -> Self {
        Self { handle, queue }
    }

    pub fn handle(&self) -> H {
        self.handle
    }
}

impl<H> Drop for Owned<H>
where
    H: Copy + Into<GpuResource>,
{
    fn drop(&mut self) {
        self.queue.push(self.handle.into());
    }
}

impl<H> fmt::Debug for Owned<H>
where
    H: Copy + Into<GpuResource> + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_enqueues_handle() {
        let queue = ReleaseQueue::new();
        let owned = Owned::new(BufferHandle(7), queue.clone());
        assert!(queue.is_empty());

        drop(owned);
        assert_eq!(queue.drain(), vec![GpuResource::Buffer(BufferHandle(7))]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_preserves_drop_order() {
        let queue = ReleaseQueue::new();
        let a = Owned::new(TextureHandle(1), queue.clone());
        let b = Owned::new(TextureViewHandle(2), queue.clone());
        drop(b);
        drop(a);

        assert_eq!(
            queue.drain(),
            vec![
                GpuResource::TextureView(TextureViewHandle(2)),
                GpuResource::Texture(TextureHandle(1)),
            ]
        );
    }
}
