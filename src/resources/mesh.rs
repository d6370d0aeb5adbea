//! Mesh data structures and generation

use glam::{Vec2, Vec3};

use crate::backend::GraphicsBackend;
use crate::error::RenderResult;
use crate::geometry::{GeometryBuffer, GeometryBuilder, Submesh, SubmeshLayout};

use super::{MaterialId, MeshId};

/// Attribute locations shared by loaded and generated meshes
pub const POSITION_LOCATION: u8 = 0;
pub const NORMAL_LOCATION: u8 = 1;
pub const TEXCOORD_LOCATION: u8 = 2;

/// CPU-side interleaved vertices of one submesh
#[derive(Debug, Clone)]
pub struct MeshData {
    pub name: String,
    pub layout: SubmeshLayout,
    pub vertices: Vec<f32>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(name: &str, layout: SubmeshLayout) -> Self {
        Self {
            name: name.to_string(),
            layout,
            vertices: Vec::new(),
            indices: Vec::new(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        match self.layout.floats_per_vertex() {
            0 => 0,
            floats => self.vertices.len() / floats,
        }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Screen-filling quad in clip space: position(3) at 0, texcoord(2) at 2
    pub fn quad() -> Self {
        let layout = SubmeshLayout::new()
            .with_attribute(POSITION_LOCATION, 3)
            .with_attribute(TEXCOORD_LOCATION, 2);
        let mut data = Self::new("quad", layout);
        #[rustfmt::skip]
        data.vertices.extend_from_slice(&[
            -1.0, -1.0, 0.0, 0.0, 0.0,
             1.0, -1.0, 0.0, 1.0, 0.0,
             1.0,  1.0, 0.0, 1.0, 1.0,
            -1.0,  1.0, 0.0, 0.0, 1.0,
        ]);
        data.indices.extend_from_slice(&[0, 1, 2, 0, 2, 3]);
        data
    }

    /// Unit cube centered at origin with normals and texcoords
    pub fn cube() -> Self {
        let layout = SubmeshLayout::new()
            .with_attribute(POSITION_LOCATION, 3)
            .with_attribute(NORMAL_LOCATION, 3)
            .with_attribute(TEXCOORD_LOCATION, 2);
        let mut data = Self::new("cube", layout);

        let faces = [Vec3::Z, -Vec3::Z, Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y];
        let corners = [
            Vec2::new(-0.5, -0.5),
            Vec2::new(0.5, -0.5),
            Vec2::new(0.5, 0.5),
            Vec2::new(-0.5, 0.5),
        ];
        for normal in faces {
            // Right-handed basis so every face winds counter-clockwise from outside
            let up = if normal.y.abs() > 0.9 { Vec3::Z } else { Vec3::Y };
            let right = up.cross(normal);
            let up = normal.cross(right);

            let base = data.vertex_count() as u32;
            for corner in corners {
                let position = normal * 0.5 + right * corner.x + up * corner.y;
                data.vertices.extend_from_slice(&position.to_array());
                data.vertices.extend_from_slice(&normal.to_array());
                data.vertices.extend_from_slice(&[corner.x + 0.5, corner.y + 0.5]);
            }
            data.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        data
    }
}

/// GPU geometry of a mesh: one shared buffer, one view per submesh
#[derive(Debug)]
pub struct Mesh {
    pub name: String,
    geometry: GeometryBuffer,
    submeshes: Vec<Submesh>,
}

impl Mesh {
    /// Upload every part into one geometry buffer, one submesh per part.
    pub fn upload<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        name: &str,
        parts: &[MeshData],
    ) -> RenderResult<Self> {
        let mut builder = GeometryBuilder::new();
        for part in parts {
            builder.push_submesh(part.layout.clone(), &part.vertices, &part.indices);
        }
        let (geometry, submeshes) = builder.upload(backend, name)?;

        Ok(Self {
            name: name.to_string(),
            geometry,
            submeshes,
        })
    }

    pub fn geometry(&self) -> &GeometryBuffer {
        &self.geometry
    }

    pub fn submeshes(&self) -> &[Submesh] {
        &self.submeshes
    }
}

/// A mesh plus the material of each of its submeshes
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub name: String,
    pub mesh: MeshId,
    /// Indexed by submesh
    pub materials: Vec<MaterialId>,
}

impl Model {
    pub fn material(&self, submesh: usize) -> Option<MaterialId> {
        self.materials.get(submesh).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;

    #[test]
    fn test_cube_faces_point_outward() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.triangle_count(), 12);

        let position = |i: u32| {
            let at = i as usize * 8;
            Vec3::from_slice(&cube.vertices[at..at + 3])
        };
        for triangle in cube.indices.chunks(3) {
            let (a, b, c) = (position(triangle[0]), position(triangle[1]), position(triangle[2]));
            let face_normal = (b - a).cross(c - a);
            assert!(face_normal.dot(a) > 0.0);
        }
    }

    #[test]
    fn test_upload_keeps_one_submesh_per_part() {
        let mut backend = DummyBackend::new(16, 16);
        let mesh = Mesh::upload(&mut backend, "parts", &[MeshData::cube(), MeshData::quad()]).unwrap();

        assert_eq!(mesh.submeshes().len(), 2);
        assert_eq!(mesh.submeshes()[1].vertex_offset, 24 * 32);
        assert_eq!(mesh.submeshes()[1].layout.stride(), 20);
        assert_eq!(backend.counters().buffers_created, 2);
    }
}
