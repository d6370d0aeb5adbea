//! Core backend abstraction traits
//!
//! These traits define the interface that the wgpu and dummy backends implement.
//! Binding follows a fixed convention shared by every program: uniform slots
//! occupy the first bind groups (slot `n` is group `n`), texture units follow
//! them (unit `n` is group `uniform_blocks.len() + n`).

use crate::backend::release::ReleaseQueue;
use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create program: {0}")]
    ProgramCreationFailed(String),
    #[error("Failed to create vertex array: {0}")]
    VertexArrayCreationFailed(String),
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a texture view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewHandle(pub(crate) u64);

/// Handle to a linked shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u64);

/// Handle to a vertex array (a submesh's buffer layout bound to one program)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexArrayHandle(pub(crate) u64);

/// Device limits the core sizes and aligns its uniform arena with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Largest uniform block a single binding may cover, in bytes
    pub max_uniform_block_size: u64,
    /// Required alignment of a bound uniform range's start offset
    pub uniform_offset_alignment: u64,
    /// Largest 2D texture edge
    pub max_texture_dimension: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_uniform_block_size: 65536,
            uniform_offset_alignment: 256,
            max_texture_dimension: 8192,
        }
    }
}

/// Render pipeline state a program is linked with
#[derive(Debug, Clone)]
pub struct ProgramDescriptor {
    pub label: Option<String>,
    /// WGSL source holding both stages
    pub source: String,
    pub vertex_entry: String,
    pub fragment_entry: String,
    /// Minimum binding size of each uniform slot, indexed by slot
    pub uniform_blocks: Vec<u64>,
    /// Number of sampled texture units
    pub texture_units: u32,
    pub color_target: ColorTargetState,
    pub depth_stencil: Option<DepthStencilState>,
    pub cull_mode: CullMode,
}

/// One enabled float attribute of a vertex array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexArrayAttribute {
    pub index: u32,
    pub component_count: u32,
    /// Byte pointer into the vertex buffer, base offset included
    pub pointer: u64,
}

/// Everything needed to bind a submesh's bytes to a program's inputs
#[derive(Debug, Clone)]
pub struct VertexArrayDescriptor {
    pub label: Option<String>,
    pub program: ProgramHandle,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    /// Byte offset of the submesh inside the shared vertex buffer
    pub base_offset: u64,
    pub stride: u64,
    pub attributes: Vec<VertexArrayAttribute>,
    pub index_format: IndexFormat,
}

#[derive(Debug, Clone)]
pub struct DepthStencilState {
    pub format: TextureFormat,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareFunction,
}

#[derive(Debug, Clone)]
pub struct ColorTargetState {
    pub format: TextureFormat,
    pub blend: Option<BlendState>,
}

/// Color attachment for render pass
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub view: TextureViewHandle,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    Discard,
}

/// Depth stencil attachment for render pass
#[derive(Debug, Clone)]
pub struct DepthStencilAttachment {
    pub view: TextureViewHandle,
    pub depth_load_op: LoadOp,
    pub depth_store_op: StoreOp,
    pub depth_clear_value: f32,
}

/// Render pass descriptor
#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
}

/// Frame context returned when beginning a frame
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub swapchain_view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Limits reported by the device
    fn limits(&self) -> DeviceLimits;

    /// Queue that owned handles enqueue themselves on when dropped
    fn release_queue(&self) -> ReleaseQueue;

    /// Destroy every resource whose owner has been dropped
    fn collect_garbage(&mut self);

    /// Resize the swapchain
    fn resize(&mut self, width: u32, height: u32);

    /// Get the actual surface size (may be clamped by device limits)
    fn surface_size(&self) -> (u32, u32);

    /// Begin a new frame
    fn begin_frame(&mut self) -> BackendResult<FrameContext>;

    /// End and present the frame
    fn end_frame(&mut self) -> BackendResult<()>;

    /// Get the swapchain format
    fn swapchain_format(&self) -> TextureFormat;

    // Resource creation

    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Create a buffer with initial data
    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8])
        -> BackendResult<BufferHandle>;

    /// Write data to a buffer
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]);

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Create a texture view
    fn create_texture_view(&mut self, texture: TextureHandle) -> BackendResult<TextureViewHandle>;

    /// Write data to a texture
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32);

    /// Compile and link a program
    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle>;

    /// Build a vertex array for one (submesh, program) pair
    fn create_vertex_array(
        &mut self,
        desc: &VertexArrayDescriptor,
    ) -> BackendResult<VertexArrayHandle>;

    // Command recording

    /// Begin a render pass
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor);

    /// End the current render pass
    fn end_render_pass(&mut self);

    /// Select the program subsequent binds and draws use
    fn set_program(&mut self, program: ProgramHandle);

    /// Bind vertex/index buffers and attribute state of a vertex array
    fn set_vertex_array(&mut self, vertex_array: VertexArrayHandle);

    /// Bind `size` bytes of `buffer` starting at `offset` to a uniform slot
    fn bind_uniform_range(&mut self, slot: u32, buffer: BufferHandle, offset: u64, size: u64);

    /// Bind a texture view (with the default sampler) to a texture unit
    fn bind_texture(&mut self, unit: u32, view: TextureViewHandle);

    /// Set viewport
    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, min_depth: f32, max_depth: f32);

    /// Draw indexed primitives
    fn draw_indexed(
        &mut self,
        indices: std::ops::Range<u32>,
        base_vertex: i32,
        instances: std::ops::Range<u32>,
    );

    // Resource cleanup

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Destroy a texture
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Destroy a texture view
    fn destroy_texture_view(&mut self, view: TextureViewHandle);

    /// Destroy a program
    fn destroy_program(&mut self, program: ProgramHandle);

    /// Destroy a vertex array
    fn destroy_vertex_array(&mut self, vertex_array: VertexArrayHandle);
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn size(&self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}
