//! Linear, alignment-aware uniform allocator backed by one GPU buffer.
//!
//! A frame opens a write scope with [`UniformArena::begin_frame`], pushes
//! blocks through the returned [`ArenaFrame`], and the scope uploads the
//! written prefix of the staging copy when it ends. The arena cannot be
//! reopened while a frame guard is alive.

use bytemuck::Pod;

use crate::backend::{BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend, Owned};
use crate::error::{RenderError, RenderResult};

/// A byte range of the arena buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformRange {
    pub offset: u64,
    pub size: u64,
}

impl UniformRange {
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }

    pub fn overlaps(&self, other: &UniformRange) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

pub struct UniformArena {
    buffer: Owned<BufferHandle>,
    capacity: usize,
    head: usize,
    staging: Vec<u8>,
}

impl UniformArena {
    /// Allocate the GPU buffer. `capacity` is rounded down to a multiple of 4.
    pub fn new<B: GraphicsBackend + ?Sized>(backend: &mut B, capacity: usize) -> RenderResult<Self> {
        let capacity = (capacity & !3).max(4);
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(
                "Uniform Arena",
                capacity as u64,
                BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            ))
            .map_err(RenderError::creation("uniform arena"))?;
        log::debug!("Created uniform arena of {} bytes", capacity);

        Ok(Self {
            buffer: Owned::new(buffer, backend.release_queue()),
            capacity,
            head: 0,
            staging: vec![0; capacity],
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes written by the last (or current) frame.
    pub fn head(&self) -> usize {
        self.head
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer.handle()
    }

    /// Open the frame's write scope and reset the head to zero.
    pub fn begin_frame<'a, B: GraphicsBackend + ?Sized>(
        &'a mut self,
        backend: &'a mut B,
    ) -> ArenaFrame<'a, B> {
        self.head = 0;
        ArenaFrame {
            arena: self,
            backend,
        }
    }
}

impl std::fmt::Debug for UniformArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformArena")
            .field("buffer", &self.buffer.handle())
            .field("capacity", &self.capacity)
            .field("head", &self.head)
            .finish()
    }
}

/// Write scope of one frame. Uploads `[0, head)` when it ends.
pub struct ArenaFrame<'a, B: GraphicsBackend + ?Sized> {
    arena: &'a mut UniformArena,
    backend: &'a mut B,
}

impl<'a, B: GraphicsBackend + ?Sized> ArenaFrame<'a, B> {
    pub fn head(&self) -> usize {
        self.arena.head
    }

    pub fn capacity(&self) -> usize {
        self.arena.capacity
    }

    pub fn buffer(&self) -> BufferHandle {
        self.arena.buffer()
    }

    fn overflow(&self, requested: usize) -> RenderError {
        RenderError::ArenaOverflow {
            head: self.arena.head,
            requested,
            capacity: self.arena.capacity,
        }
    }

    /// Move the head to the next multiple of `alignment`, zero-filling the gap.
    pub fn align_head(&mut self, alignment: usize) -> RenderResult<usize> {
        let head = self.arena.head;
        let aligned = head.next_multiple_of(alignment.max(1));
        if aligned > self.arena.capacity {
            return Err(self.overflow(aligned - head));
        }
        self.arena.staging[head..aligned].fill(0);
        self.arena.head = aligned;
        Ok(aligned)
    }

    /// Copy `bytes` at the head and advance past them.
    pub fn push(&mut self, bytes: &[u8]) -> RenderResult<UniformRange> {
        let head = self.arena.head;
        let end = head
            .checked_add(bytes.len())
            .filter(|end| *end <= self.arena.capacity)
            .ok_or_else(|| self.overflow(bytes.len()))?;
        self.arena.staging[head..end].copy_from_slice(bytes);
        self.arena.head = end;
        Ok(UniformRange {
            offset: head as u64,
            size: bytes.len() as u64,
        })
    }

    pub fn push_pod<T: Pod>(&mut self, value: &T) -> RenderResult<UniformRange> {
        self.push(bytemuck::bytes_of(value))
    }

    /// Align and open a block. The block borrows the frame until it finishes.
    pub fn begin_block(&mut self, alignment: usize) -> RenderResult<BlockWriter<'_, 'a, B>> {
        let start = self.align_head(alignment)?;
        Ok(BlockWriter { frame: self, start })
    }

    /// Close the write scope and upload what was written.
    pub fn end_frame(self) {}

    fn upload(&mut self) {
        let len = self.arena.head.next_multiple_of(4).min(self.arena.capacity);
        if len == 0 {
            return;
        }
        let head = self.arena.head;
        self.arena.staging[head..len].fill(0);
        log::trace!("Uploading {} uniform bytes", len);
        self.backend
            .write_buffer(self.arena.buffer(), 0, &self.arena.staging[..len]);
    }
}

impl<B: GraphicsBackend + ?Sized> Drop for ArenaFrame<'_, B> {
    fn drop(&mut self) {
        self.upload();
    }
}

/// A contiguous block of one or more pushes.
pub struct BlockWriter<'f, 'a, B: GraphicsBackend + ?Sized> {
    frame: &'f mut ArenaFrame<'a, B>,
    start: usize,
}

impl<B: GraphicsBackend + ?Sized> BlockWriter<'_, '_, B> {
    pub fn push(&mut self, bytes: &[u8]) -> RenderResult<()> {
        self.frame.push(bytes).map(|_| ())
    }

    pub fn push_pod<T: Pod>(&mut self, value: &T) -> RenderResult<()> {
        self.push(bytemuck::bytes_of(value))
    }

    /// Align inside the block, e.g. before an array element.
    pub fn align(&mut self, alignment: usize) -> RenderResult<()> {
        self.frame.align_head(alignment).map(|_| ())
    }

    pub fn finish(self) -> UniformRange {
        UniformRange {
            offset: self.start as u64,
            size: (self.frame.head() - self.start) as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use rstest::rstest;

    #[test]
    fn test_global_then_objects() {
        let mut backend = DummyBackend::new(16, 16);
        let mut arena = UniformArena::new(&mut backend, 65536).unwrap();
        let mut frame = arena.begin_frame(&mut backend);

        frame.align_head(16).unwrap();
        let global = frame.push(&[1; 48]).unwrap();
        assert_eq!(global, UniformRange { offset: 0, size: 48 });

        let mut objects = Vec::new();
        for _ in 0..2 {
            frame.align_head(256).unwrap();
            objects.push(frame.push(&[2; 128]).unwrap());
        }
        assert_eq!(objects[0], UniformRange { offset: 256, size: 128 });
        assert_eq!(objects[1], UniformRange { offset: 512, size: 128 });
        assert!(!objects[0].overlaps(&objects[1]));
        assert_eq!(frame.head(), 640);
    }

    #[test]
    fn test_overflow_leaves_head() {
        let mut backend = DummyBackend::new(16, 16);
        let mut arena = UniformArena::new(&mut backend, 64).unwrap();
        let mut frame = arena.begin_frame(&mut backend);

        frame.push(&[0; 48]).unwrap();
        let err = frame.push(&[0; 48]).unwrap_err();
        assert!(matches!(
            err,
            RenderError::ArenaOverflow {
                head: 48,
                requested: 48,
                capacity: 64
            }
        ));
        assert_eq!(frame.head(), 48);
    }

    #[test]
    fn test_align_past_capacity_fails() {
        let mut backend = DummyBackend::new(16, 16);
        let mut arena = UniformArena::new(&mut backend, 300).unwrap();
        let mut frame = arena.begin_frame(&mut backend);

        frame.push(&[0; 4]).unwrap();
        assert!(frame.align_head(256).is_ok());
        frame.push(&[0; 4]).unwrap();
        assert!(frame.align_head(256).is_err());
        assert_eq!(frame.head(), 260);
    }

    #[rstest]
    #[case(16)]
    #[case(256)]
    fn test_align_head(#[case] alignment: usize) {
        let mut backend = DummyBackend::new(16, 16);
        let mut arena = UniformArena::new(&mut backend, 4096).unwrap();
        let mut frame = arena.begin_frame(&mut backend);

        let mut last = 0;
        for len in [3usize, 17, 64, 1] {
            frame.push(&vec![0xAB; len]).unwrap();
            let head = frame.align_head(alignment).unwrap();
            assert_eq!(head % alignment, 0);
            assert!(head >= last);
            last = head;
        }
    }

    #[test]
    fn test_block_spans_its_pushes() {
        let mut backend = DummyBackend::new(16, 16);
        let mut arena = UniformArena::new(&mut backend, 1024).unwrap();
        let mut frame = arena.begin_frame(&mut backend);
        frame.push(&[0; 4]).unwrap();

        let mut block = frame.begin_block(16).unwrap();
        block.push_pod(&[1.0f32; 3]).unwrap();
        block.push_pod(&7u32).unwrap();
        block.align(16).unwrap();
        block.push(&[9; 8]).unwrap();
        let range = block.finish();

        assert_eq!(range, UniformRange { offset: 16, size: 24 });
    }

    #[test]
    fn test_end_frame_uploads_and_next_frame_resets() {
        let mut backend = DummyBackend::new(16, 16);
        let mut arena = UniformArena::new(&mut backend, 64).unwrap();
        let buffer = arena.buffer();

        let mut frame = arena.begin_frame(&mut backend);
        frame.push(&[5; 6]).unwrap();
        frame.end_frame();

        assert_eq!(arena.head(), 6);
        assert_eq!(&backend.buffer_contents(buffer).unwrap()[..8], &[5, 5, 5, 5, 5, 5, 0, 0]);

        let frame = arena.begin_frame(&mut backend);
        assert_eq!(frame.head(), 0);
    }
}
