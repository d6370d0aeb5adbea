//! Per (submesh, program) cache of vertex arrays.

use std::collections::HashMap;

use crate::backend::{
    GraphicsBackend, Owned, ProgramHandle, VertexArrayAttribute, VertexArrayDescriptor,
    VertexArrayHandle,
};
use crate::error::{RenderError, RenderResult};
use crate::resources::{MeshId, Program};

use super::buffer::{GeometryBuffer, Submesh};
use super::layout::match_layout;

/// Identifies one submesh of one mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubmeshKey {
    pub mesh: MeshId,
    pub submesh: usize,
}

/// A vertex array built for one program.
#[derive(Debug)]
pub struct Vao {
    handle: Owned<VertexArrayHandle>,
    program: ProgramHandle,
}

impl Vao {
    pub fn handle(&self) -> VertexArrayHandle {
        self.handle.handle()
    }

    pub fn program(&self) -> ProgramHandle {
        self.program
    }
}

#[derive(Debug, Default)]
pub struct VaoCache {
    entries: HashMap<SubmeshKey, Vec<Vao>>,
    created: usize,
}

impl VaoCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the vertex array binding `submesh` to `program`, building it on
    /// first use.
    ///
    /// A layout mismatch or backend failure leaves the cache untouched.
    pub fn get_or_create<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        key: SubmeshKey,
        geometry: &GeometryBuffer,
        submesh: &Submesh,
        program: &Program,
    ) -> RenderResult<VertexArrayHandle> {
        let program_handle = program.handle();
        if let Some(vao) = self
            .entries
            .get(&key)
            .and_then(|vaos| vaos.iter().find(|v| v.program == program_handle))
        {
            return Ok(vao.handle());
        }

        let matched = match_layout(program.inputs(), &submesh.layout)?;
        let attributes = matched
            .iter()
            .map(|a| VertexArrayAttribute {
                index: a.location as u32,
                component_count: a.component_count as u32,
                pointer: a.byte_offset as u64 + submesh.vertex_offset,
            })
            .collect();

        let desc = VertexArrayDescriptor {
            label: Some(format!(
                "{} mesh {} submesh {}",
                program.name(),
                key.mesh.index(),
                key.submesh
            )),
            program: program_handle,
            vertex_buffer: geometry.vertex_buffer(),
            index_buffer: geometry.index_buffer(),
            base_offset: submesh.vertex_offset,
            stride: submesh.layout.stride() as u64,
            attributes,
            index_format: geometry.index_format(),
        };

        let handle = backend
            .create_vertex_array(&desc)
            .map_err(RenderError::creation("vertex array"))?;
        log::debug!("Created VAO {:?} for {:?}", handle, desc.label);

        self.created += 1;
        self.entries.entry(key).or_default().push(Vao {
            handle: Owned::new(handle, backend.release_queue()),
            program: program_handle,
        });
        Ok(handle)
    }

    /// Vertex arrays cached for a submesh.
    pub fn vaos(&self, key: SubmeshKey) -> &[Vao] {
        self.entries.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of vertex arrays ever built.
    pub fn created(&self) -> usize {
        self.created
    }

    /// Number of vertex arrays currently cached.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every vertex array built for `program`. Returns how many were dropped.
    pub fn evict_program(&mut self, program: ProgramHandle) -> usize {
        let mut evicted = 0;
        self.entries.retain(|_, vaos| {
            let before = vaos.len();
            vaos.retain(|v| v.program != program);
            evicted += before - vaos.len();
            !vaos.is_empty()
        });
        if evicted > 0 {
            log::debug!("Evicted {} VAOs of program {:?}", evicted, program);
        }
        evicted
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::geometry::{GeometryBuilder, SubmeshLayout};
    use crate::render::shaders::SCENE_SHADER;
    use crate::resources::ProgramTarget;

    fn setup(
        backend: &mut DummyBackend,
        layout: SubmeshLayout,
    ) -> (GeometryBuffer, Vec<Submesh>, Program) {
        let mut builder = GeometryBuilder::new();
        let vertices = vec![0.0; layout.floats_per_vertex() * 3];
        builder.push_submesh(layout.clone(), &vertices, &[0, 1, 2]);
        builder.push_submesh(layout, &vertices, &[0, 2, 1]);
        let (geometry, submeshes) = builder.upload(backend, "Test").unwrap();
        let program =
            Program::from_source(backend, "mesh", SCENE_SHADER, None, ProgramTarget::offscreen())
                .unwrap();
        (geometry, submeshes, program)
    }

    fn standard() -> SubmeshLayout {
        SubmeshLayout::new()
            .with_attribute(0, 3)
            .with_attribute(1, 3)
            .with_attribute(2, 2)
    }

    fn key(submesh: usize) -> SubmeshKey {
        SubmeshKey {
            mesh: MeshId(0),
            submesh,
        }
    }

    #[test]
    fn test_second_lookup_hits_cache() {
        let mut backend = DummyBackend::new(16, 16);
        let (geometry, submeshes, program) = setup(&mut backend, standard());
        let mut cache = VaoCache::new();

        let first = cache
            .get_or_create(&mut backend, key(0), &geometry, &submeshes[0], &program)
            .unwrap();
        let second = cache
            .get_or_create(&mut backend, key(0), &geometry, &submeshes[0], &program)
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(backend.counters().vertex_arrays_created, 1);
        assert_eq!(cache.created(), 1);
    }

    #[test]
    fn test_pointers_include_submesh_base_offset() {
        let mut backend = DummyBackend::new(16, 16);
        let (geometry, submeshes, program) = setup(&mut backend, standard());
        let mut cache = VaoCache::new();

        let handle = cache
            .get_or_create(&mut backend, key(1), &geometry, &submeshes[1], &program)
            .unwrap();
        let desc = backend.vertex_array(handle).unwrap();

        assert_eq!(desc.base_offset, 96);
        assert_eq!(desc.stride, 32);
        let pointers: Vec<(u32, u64)> = desc.attributes.iter().map(|a| (a.index, a.pointer)).collect();
        assert_eq!(pointers, vec![(0, 96), (1, 108), (2, 120)]);
    }

    #[test]
    fn test_mismatch_caches_nothing() {
        let mut backend = DummyBackend::new(16, 16);
        let layout = SubmeshLayout::new().with_attribute(0, 3).with_attribute(1, 3);
        let (geometry, submeshes, program) = setup(&mut backend, layout);
        let mut cache = VaoCache::new();

        let err = cache
            .get_or_create(&mut backend, key(0), &geometry, &submeshes[0], &program)
            .unwrap_err();
        assert!(matches!(err, RenderError::LayoutMismatch { location: 2 }));
        assert!(cache.is_empty());
        assert_eq!(backend.counters().vertex_arrays_created, 0);
    }

    #[test]
    fn test_backend_failure_caches_nothing() {
        let mut backend = DummyBackend::new(16, 16);
        let (geometry, submeshes, program) = setup(&mut backend, standard());
        backend.fail_vertex_arrays = true;
        let mut cache = VaoCache::new();

        let err = cache
            .get_or_create(&mut backend, key(0), &geometry, &submeshes[0], &program)
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::ResourceCreation {
                what: "vertex array",
                ..
            }
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_program_releases_vertex_arrays() {
        let mut backend = DummyBackend::new(16, 16);
        let (geometry, submeshes, program) = setup(&mut backend, standard());
        let mut cache = VaoCache::new();
        for (i, submesh) in submeshes.iter().enumerate() {
            cache
                .get_or_create(&mut backend, key(i), &geometry, submesh, &program)
                .unwrap();
        }
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.evict_program(program.handle()), 2);
        assert!(cache.is_empty());
        backend.collect_garbage();
        assert_eq!(backend.counters().vertex_arrays_destroyed, 2);
    }
}
