//! Wavefront OBJ loading

use std::path::{Path, PathBuf};

use glam::Vec3;

use crate::backend::GraphicsBackend;
use crate::error::{AssetError, RenderResult};
use crate::geometry::SubmeshLayout;

use super::mesh::{MeshData, NORMAL_LOCATION, POSITION_LOCATION, TEXCOORD_LOCATION};
use super::{Assets, Material, MaterialId, Model, ModelId, TextureId};

/// Interleave one OBJ object into a submesh. Normals and texcoords are only
/// stored when the object has them.
fn interleave(model: &tobj::Model) -> MeshData {
    let mesh = &model.mesh;
    let vertex_count = mesh.positions.len() / 3;
    let has_normals = mesh.normals.len() == vertex_count * 3 && vertex_count > 0;
    let has_texcoords = mesh.texcoords.len() == vertex_count * 2 && vertex_count > 0;

    let mut layout = SubmeshLayout::new().with_attribute(POSITION_LOCATION, 3);
    if has_normals {
        layout = layout.with_attribute(NORMAL_LOCATION, 3);
    }
    if has_texcoords {
        layout = layout.with_attribute(TEXCOORD_LOCATION, 2);
    }

    let mut data = MeshData::new(&model.name, layout);
    data.vertices.reserve(vertex_count * data.layout.floats_per_vertex());
    for i in 0..vertex_count {
        data.vertices.extend_from_slice(&mesh.positions[i * 3..i * 3 + 3]);
        if has_normals {
            data.vertices.extend_from_slice(&mesh.normals[i * 3..i * 3 + 3]);
        }
        if has_texcoords {
            data.vertices.extend_from_slice(&mesh.texcoords[i * 2..i * 2 + 2]);
        }
    }
    data.indices.extend_from_slice(&mesh.indices);
    data
}

impl Assets {
    fn material_texture<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        directory: &Path,
        name: Option<&String>,
    ) -> Option<TextureId> {
        let path = directory.join(name?);
        match self.load_texture(backend, &path) {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("Material texture skipped: {}", e);
                None
            }
        }
    }

    fn convert_material<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        directory: &Path,
        source: &tobj::Material,
    ) -> Material {
        let mut material = Material::new(&source.name)
            .with_shininess(source.shininess.unwrap_or(0.0));
        if let Some(diffuse) = source.diffuse {
            material.albedo = Vec3::from(diffuse);
        }
        if let Some(emissive) = source.emissive {
            material.emissive = Vec3::from(emissive);
        }

        material.albedo_texture =
            self.material_texture(backend, directory, source.diffuse_texture.as_ref());
        material.emissive_texture =
            self.material_texture(backend, directory, source.unknown_param.get("map_Ke"));
        material.specular_texture =
            self.material_texture(backend, directory, source.specular_texture.as_ref());
        material.normal_texture =
            self.material_texture(backend, directory, source.unknown_param.get("norm"));
        material.bump_texture =
            self.material_texture(backend, directory, source.normal_texture.as_ref());
        material
    }

    /// Load an OBJ file: one mesh holding a submesh per object, one material
    /// per submesh. Textures are resolved relative to the file's directory.
    pub fn load_model<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        path: impl AsRef<Path>,
    ) -> RenderResult<ModelId> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AssetError::NotFound(path.to_path_buf()).into());
        }

        let (objects, materials) = tobj::load_obj(
            path,
            &tobj::LoadOptions {
                triangulate: true,
                single_index: true,
                ..Default::default()
            },
        )
        .map_err(|source| AssetError::Obj {
            path: path.to_path_buf(),
            source,
        })?;

        let directory = path.parent().map(Path::to_path_buf).unwrap_or_else(PathBuf::new);
        let materials = materials.unwrap_or_else(|e| {
            log::warn!("No materials for {}: {}", path.display(), e);
            Vec::new()
        });
        let material_ids: Vec<MaterialId> = materials
            .iter()
            .map(|m| {
                let material = self.convert_material(backend, &directory, m);
                self.add_material(material)
            })
            .collect();

        let mut parts = Vec::new();
        let mut part_materials = Vec::new();
        for object in &objects {
            if object.mesh.indices.is_empty() {
                log::warn!("Skipping empty object '{}' in {}", object.name, path.display());
                continue;
            }
            parts.push(interleave(object));
            let material = match object.mesh.material_id.and_then(|i| material_ids.get(i)) {
                Some(id) => *id,
                None => self.default_material(),
            };
            part_materials.push(material);
        }
        if parts.is_empty() {
            return Err(AssetError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, "no geometry"),
            }
            .into());
        }

        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("model")
            .to_string();
        let mesh = self.add_mesh(backend, &name, &parts)?;

        log::info!(
            "Loaded model '{}': {} submeshes, {} materials",
            name,
            parts.len(),
            material_ids.len()
        );

        Ok(self.add_model(Model {
            name,
            mesh,
            materials: part_materials,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;

    const TWO_TRIANGLES: &str = "\
mtllib scene.mtl
o first
v 0 0 0
v 1 0 0
v 0 1 0
vn 0 0 1
vt 0 0
vt 1 0
vt 0 1
usemtl red
f 1/1/1 2/2/1 3/3/1
o second
v 0 0 1
v 1 0 1
v 0 1 1
f 4 5 6
";

    const MATERIALS: &str = "\
newmtl red
Kd 1 0 0
Ns 50
Ke 0.5 0.5 0
";

    #[test]
    fn test_objects_become_submeshes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scene.obj"), TWO_TRIANGLES).unwrap();
        std::fs::write(dir.path().join("scene.mtl"), MATERIALS).unwrap();

        let mut backend = DummyBackend::new(16, 16);
        let mut assets = Assets::new(&mut backend).unwrap();
        let id = assets
            .load_model(&mut backend, dir.path().join("scene.obj"))
            .unwrap();

        let model = assets.model(id).unwrap();
        let mesh = assets.mesh(model.mesh).unwrap();
        assert_eq!(mesh.submeshes().len(), 2);
        assert_eq!(mesh.submeshes()[0].layout.stride(), 32);
        assert_eq!(mesh.submeshes()[1].layout.stride(), 12);
        assert_eq!(mesh.submeshes()[1].vertex_offset, 3 * 32);

        let red = assets.material(model.materials[0]).unwrap();
        assert_eq!(red.albedo, Vec3::X);
        assert_eq!(red.smoothness, 0.5);
        assert_eq!(red.emissive, Vec3::new(0.5, 0.5, 0.0));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let mut backend = DummyBackend::new(16, 16);
        let mut assets = Assets::new(&mut backend).unwrap();
        let err = assets.load_model(&mut backend, "nowhere.obj").unwrap_err();
        assert!(matches!(
            err,
            crate::error::RenderError::Asset(AssetError::NotFound(_))
        ));
    }
}
