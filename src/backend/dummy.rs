//! Dummy GPU backend for testing and headless runs.
//!
//! This backend doesn't perform actual GPU operations. It hands out handles,
//! keeps buffer contents in memory and records every command it receives, so
//! tests can assert on draw order, bound ranges and resource lifetimes without
//! GPU hardware.

use std::collections::{HashMap, HashSet};
use std::ops::Range;

use super::release::{GpuResource, ReleaseQueue};
use super::traits::*;
use super::types::*;

/// A command recorded by [`DummyBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginRenderPass {
        label: Option<String>,
        color: Vec<TextureViewHandle>,
        depth: Option<TextureViewHandle>,
        clear: Option<[f32; 4]>,
    },
    EndRenderPass,
    SetProgram(ProgramHandle),
    SetVertexArray(VertexArrayHandle),
    BindUniformRange {
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    BindTexture {
        unit: u32,
        view: TextureViewHandle,
    },
    SetViewport {
        width: f32,
        height: f32,
    },
    DrawIndexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
}

/// Creation and destruction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyCounters {
    pub buffers_created: usize,
    pub textures_created: usize,
    pub views_created: usize,
    pub programs_created: usize,
    pub vertex_arrays_created: usize,
    pub vertex_arrays_destroyed: usize,
    pub destroyed: usize,
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    limits: DeviceLimits,
    width: u32,
    height: u32,
    next_id: u64,
    swapchain_view: TextureViewHandle,
    release_queue: ReleaseQueue,
    buffers: HashMap<u64, Vec<u8>>,
    vertex_arrays: HashMap<u64, VertexArrayDescriptor>,
    programs: HashMap<u64, ProgramDescriptor>,
    live: HashSet<GpuResource>,
    commands: Vec<RecordedCommand>,
    counters: DummyCounters,
    in_pass: bool,
    frames: u64,
    /// Make every `create_vertex_array` call fail
    pub fail_vertex_arrays: bool,
    /// Make every `create_program` call fail
    pub fail_programs: bool,
}

impl DummyBackend {
    /// Create a new dummy backend with default limits.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_limits(width, height, DeviceLimits::default())
    }

    pub fn with_limits(width: u32, height: u32, limits: DeviceLimits) -> Self {
        log::trace!("DummyBackend: created {}x{} with {:?}", width, height, limits);
        Self {
            limits,
            width,
            height,
            next_id: 1,
            swapchain_view: TextureViewHandle(0),
            release_queue: ReleaseQueue::new(),
            buffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
            programs: HashMap::new(),
            live: HashSet::new(),
            commands: Vec::new(),
            counters: DummyCounters::default(),
            in_pass: false,
            frames: 0,
            fail_vertex_arrays: false,
            fail_programs: false,
        }
    }

    /// Get the backend name.
    pub fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, command: RecordedCommand) {
        self.commands.push(command);
    }

    /// Every command recorded since the last [`take_commands`](Self::take_commands).
    pub fn commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<RecordedCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Recorded indexed draws, in submission order.
    pub fn draws(&self) -> Vec<Range<u32>> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::DrawIndexed { indices, .. } => Some(indices.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn counters(&self) -> DummyCounters {
        self.counters
    }

    /// Whether the resource has been created and not yet destroyed.
    pub fn is_live(&self, resource: impl Into<GpuResource>) -> bool {
        self.live.contains(&resource.into())
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// In-memory contents of a buffer.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(Vec::as_slice)
    }

    pub fn vertex_array(&self, handle: VertexArrayHandle) -> Option<&VertexArrayDescriptor> {
        self.vertex_arrays.get(&handle.0)
    }

    pub fn program(&self, handle: ProgramHandle) -> Option<&ProgramDescriptor> {
        self.programs.get(&handle.0)
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames
    }
}

impl GraphicsBackend for DummyBackend {
    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn release_queue(&self) -> ReleaseQueue {
        self.release_queue.clone()
    }

    fn collect_garbage(&mut self) {
        let queue = self.release_queue.clone();
        queue.destroy_pending(self);
    }

    fn resize(&mut self, width: u32, height: u32) {
        log::trace!("DummyBackend: resize to {}x{}", width, height);
        self.width = width.max(1);
        self.height = height.max(1);
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        Ok(FrameContext {
            swapchain_view: self.swapchain_view,
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.frames += 1;
        Ok(())
    }

    fn swapchain_format(&self) -> TextureFormat {
        TextureFormat::Bgra8UnormSrgb
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let handle = BufferHandle(self.next_id());
        self.buffers.insert(handle.0, vec![0; desc.size as usize]);
        self.live.insert(handle.into());
        self.counters.buffers_created += 1;
        Ok(handle)
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let handle = self.create_buffer(&BufferDescriptor {
            size: data.len() as u64,
            ..desc.clone()
        })?;
        self.write_buffer(handle, 0, data);
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        if let Some(contents) = self.buffers.get_mut(&buffer.0) {
            let start = offset as usize;
            let end = start + data.len();
            if end > contents.len() {
                log::error!(
                    "DummyBackend: write of {} bytes at {} overruns buffer of {}",
                    data.len(),
                    offset,
                    contents.len()
                );
                return;
            }
            contents[start..end].copy_from_slice(data);
        }
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{})",
            desc.label,
            desc.width,
            desc.height
        );
        let max = self.limits.max_texture_dimension;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{}x{} outside 1..={}",
                desc.width, desc.height, max
            )));
        }
        let handle = TextureHandle(self.next_id());
        self.live.insert(handle.into());
        self.counters.textures_created += 1;
        Ok(handle)
    }

    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle> {
        if !self.is_live(texture) {
            return Err(BackendError::TextureCreationFailed(format!(
                "no texture {:?}",
                texture
            )));
        }
        let handle = TextureViewHandle(self.next_id());
        self.live.insert(handle.into());
        self.counters.views_created += 1;
        Ok(handle)
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        log::trace!(
            "DummyBackend: writing {} bytes to {:?} ({}x{})",
            data.len(),
            texture,
            width,
            height
        );
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        if self.fail_programs {
            return Err(BackendError::ProgramCreationFailed(format!(
                "{:?} rejected",
                desc.label
            )));
        }
        log::trace!("DummyBackend: creating program {:?}", desc.label);
        let handle = ProgramHandle(self.next_id());
        self.programs.insert(handle.0, desc.clone());
        self.live.insert(handle.into());
        self.counters.programs_created += 1;
        Ok(handle)
    }

    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDescriptor,
    ) -> BackendResult<VertexArrayHandle> {
        if self.fail_vertex_arrays {
            return Err(BackendError::VertexArrayCreationFailed(format!(
                "{:?} rejected",
                desc.label
            )));
        }
        log::trace!(
            "DummyBackend: creating vertex array {:?} ({} attributes)",
            desc.label,
            desc.attributes.len()
        );
        let handle = VertexArrayHandle(self.next_id());
        self.vertex_arrays.insert(handle.0, desc.clone());
        self.live.insert(handle.into());
        self.counters.vertex_arrays_created += 1;
        Ok(handle)
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        if self.in_pass {
            log::warn!("DummyBackend: render pass begun while another is open");
        }
        self.in_pass = true;
        let clear = desc.color_attachments.first().and_then(|a| match a.load_op {
            LoadOp::Clear(color) => Some(color),
            LoadOp::Load => None,
        });
        self.record(RecordedCommand::BeginRenderPass {
            label: desc.label.clone(),
            color: desc.color_attachments.iter().map(|a| a.view).collect(),
            depth: desc.depth_stencil_attachment.as_ref().map(|d| d.view),
            clear,
        });
    }

    fn end_render_pass(&mut self) {
        self.in_pass = false;
        self.record(RecordedCommand::EndRenderPass);
    }

    fn set_program(&mut self, program: ProgramHandle) {
        self.record(RecordedCommand::SetProgram(program));
    }

    fn set_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        self.record(RecordedCommand::SetVertexArray(vertex_array));
    }

    fn bind_uniform_range(&mut self, slot: u32, buffer: BufferHandle, offset: u64, size: u64) {
        self.record(RecordedCommand::BindUniformRange {
            slot,
            buffer,
            offset,
            size,
        });
    }

    fn bind_texture(&mut self, unit: u32, view: TextureViewHandle) {
        self.record(RecordedCommand::BindTexture { unit, view });
    }

    fn set_viewport(&mut self, _x: f32, _y: f32, width: f32, height: f32, _min: f32, _max: f32) {
        self.record(RecordedCommand::SetViewport { width, height });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.record(RecordedCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
        if self.live.remove(&buffer.into()) {
            self.counters.destroyed += 1;
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if self.live.remove(&texture.into()) {
            self.counters.destroyed += 1;
        }
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        if self.live.remove(&view.into()) {
            self.counters.destroyed += 1;
        }
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
        if self.live.remove(&program.into()) {
            self.counters.destroyed += 1;
        }
    }

    fn destroy_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        self.vertex_arrays.remove(&vertex_array.0);
        if self.live.remove(&vertex_array.into()) {
            self.counters.destroyed += 1;
            self.counters.vertex_arrays_destroyed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::release::Owned;

    #[test]
    fn test_write_buffer_updates_contents() {
        let mut backend = DummyBackend::new(64, 64);
        let buffer = backend
            .create_buffer(&BufferDescriptor::new("test", 8, BufferUsage::UNIFORM))
            .unwrap();
        backend.write_buffer(buffer, 4, &[1, 2, 3, 4]);
        assert_eq!(
            backend.buffer_contents(buffer).unwrap(),
            &[0, 0, 0, 0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn test_texture_outside_limits_fails() {
        let mut backend = DummyBackend::new(64, 64);
        let desc = TextureDescriptor {
            width: 0,
            ..Default::default()
        };
        assert!(backend.create_texture(&desc).is_err());
    }

    #[test]
    fn test_collect_garbage_destroys_dropped_owners() {
        let mut backend = DummyBackend::new(64, 64);
        let texture = backend.create_texture(&TextureDescriptor::default()).unwrap();
        let owned = Owned::new(texture, backend.release_queue());

        drop(owned);
        assert!(backend.is_live(texture));

        backend.collect_garbage();
        assert!(!backend.is_live(texture));
        assert_eq!(backend.counters().destroyed, 1);
    }
}
