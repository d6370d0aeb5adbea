//! GPU-resident vertex and index storage shared by the submeshes of a mesh.

use crate::backend::{
    BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend, IndexFormat, Owned,
};
use crate::error::{RenderError, RenderResult};

use super::layout::{SubmeshLayout, COMPONENT_SIZE};

/// A view into a [`GeometryBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub struct Submesh {
    pub layout: SubmeshLayout,
    /// Byte offset of the first vertex in the vertex buffer
    pub vertex_offset: u64,
    /// Byte offset of the first index in the index buffer
    pub index_offset: u64,
    pub index_count: u32,
}

impl Submesh {
    /// Index range to draw, in index units.
    pub fn index_range(&self, format: IndexFormat) -> std::ops::Range<u32> {
        let first = (self.index_offset / format.size()) as u32;
        first..first + self.index_count
    }
}

/// Owns a mesh's vertex and index buffers. Immutable after upload.
#[derive(Debug)]
pub struct GeometryBuffer {
    vertex: Owned<BufferHandle>,
    index: Owned<BufferHandle>,
    vertex_bytes: u64,
    index_bytes: u64,
}

impl GeometryBuffer {
    pub fn vertex_buffer(&self) -> BufferHandle {
        self.vertex.handle()
    }

    pub fn index_buffer(&self) -> BufferHandle {
        self.index.handle()
    }

    pub fn index_format(&self) -> IndexFormat {
        IndexFormat::Uint32
    }

    pub fn vertex_bytes(&self) -> u64 {
        self.vertex_bytes
    }

    pub fn index_bytes(&self) -> u64 {
        self.index_bytes
    }
}

/// Accumulates submeshes into one vertex and one index stream.
#[derive(Debug, Default)]
pub struct GeometryBuilder {
    vertices: Vec<f32>,
    indices: Vec<u32>,
    submeshes: Vec<Submesh>,
}

impl GeometryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one submesh. `vertices` is interleaved per `layout`; `indices` are
    /// local to this submesh.
    pub fn push_submesh(&mut self, layout: SubmeshLayout, vertices: &[f32], indices: &[u32]) -> usize {
        let vertex_offset = (self.vertices.len() * COMPONENT_SIZE as usize) as u64;
        let index_offset = (self.indices.len() * std::mem::size_of::<u32>()) as u64;

        let floats = layout.floats_per_vertex();
        if floats > 0 && vertices.len() % floats != 0 {
            log::warn!(
                "Submesh vertex data ({} floats) is not a multiple of the {}-float stride",
                vertices.len(),
                floats
            );
        }

        self.vertices.extend_from_slice(vertices);
        self.indices.extend_from_slice(indices);
        self.submeshes.push(Submesh {
            layout,
            vertex_offset,
            index_offset,
            index_count: indices.len() as u32,
        });
        self.submeshes.len() - 1
    }

    pub fn submeshes(&self) -> &[Submesh] {
        &self.submeshes
    }

    pub fn is_empty(&self) -> bool {
        self.submeshes.is_empty()
    }

    /// Upload both streams and hand back the buffer with its submesh views.
    pub fn upload<B: GraphicsBackend + ?Sized>(
        self,
        backend: &mut B,
        label: &str,
    ) -> RenderResult<(GeometryBuffer, Vec<Submesh>)> {
        let vertex_data: &[u8] = bytemuck::cast_slice(&self.vertices);
        let index_data: &[u8] = bytemuck::cast_slice(&self.indices);
        let queue = backend.release_queue();

        let vertex = backend
            .create_buffer_init(
                &BufferDescriptor::new(
                    format!("{} Vertices", label),
                    vertex_data.len() as u64,
                    BufferUsage::VERTEX | BufferUsage::COPY_DST,
                ),
                vertex_data,
            )
            .map_err(RenderError::creation("vertex buffer"))?;
        let vertex = Owned::new(vertex, queue.clone());

        let index = backend
            .create_buffer_init(
                &BufferDescriptor::new(
                    format!("{} Indices", label),
                    index_data.len() as u64,
                    BufferUsage::INDEX | BufferUsage::COPY_DST,
                ),
                index_data,
            )
            .map_err(RenderError::creation("index buffer"))?;
        let index = Owned::new(index, queue);

        log::debug!(
            "Uploaded geometry '{}': {} submeshes, {} vertex bytes, {} index bytes",
            label,
            self.submeshes.len(),
            vertex_data.len(),
            index_data.len()
        );

        Ok((
            GeometryBuffer {
                vertex,
                index,
                vertex_bytes: vertex_data.len() as u64,
                index_bytes: index_data.len() as u64,
            },
            self.submeshes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;

    fn triangle() -> (Vec<f32>, Vec<u32>) {
        let vertices = vec![
            0.0, 0.0, 0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 1.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, 1.0,
        ];
        (vertices, vec![0, 1, 2])
    }

    #[test]
    fn test_submesh_offsets_accumulate() {
        let layout = SubmeshLayout::new().with_attribute(0, 3).with_attribute(2, 2);
        let (vertices, indices) = triangle();

        let mut builder = GeometryBuilder::new();
        builder.push_submesh(layout.clone(), &vertices, &indices);
        builder.push_submesh(layout, &vertices, &indices);

        let second = &builder.submeshes()[1];
        assert_eq!(second.vertex_offset, 3 * 20);
        assert_eq!(second.index_offset, 12);
        assert_eq!(second.index_range(IndexFormat::Uint32), 3..6);
    }

    #[test]
    fn test_upload_creates_two_buffers() {
        let mut backend = DummyBackend::new(16, 16);
        let layout = SubmeshLayout::new().with_attribute(0, 3).with_attribute(2, 2);
        let (vertices, indices) = triangle();

        let mut builder = GeometryBuilder::new();
        builder.push_submesh(layout, &vertices, &indices);
        let (geometry, submeshes) = builder.upload(&mut backend, "Triangle").unwrap();

        assert_eq!(submeshes.len(), 1);
        assert_eq!(geometry.vertex_bytes(), 60);
        assert_eq!(geometry.index_bytes(), 12);
        assert_eq!(
            backend.buffer_contents(geometry.index_buffer()).unwrap(),
            bytemuck::cast_slice::<u32, u8>(&[0, 1, 2])
        );
        assert_eq!(backend.counters().buffers_created, 2);
    }
}
