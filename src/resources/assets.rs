//! Asset storage addressed by typed indices.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::backend::{GraphicsBackend, TextureViewHandle};
use crate::error::RenderResult;
use crate::geometry::VaoCache;

use super::{Material, Mesh, MeshData, Model, Program, ProgramTarget, Texture, TextureData};

macro_rules! asset_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub(crate) usize);

            impl $name {
                pub fn index(self) -> usize {
                    self.0
                }
            }
        )*
    };
}

asset_id! {
    /// Index of a [`Model`]
    ModelId,
    /// Index of a [`Mesh`]
    MeshId,
    /// Index of a [`Material`]
    MaterialId,
    /// Index of a [`Texture`]
    TextureId,
    /// Index of a [`Program`]
    ProgramId,
}

/// Owns every loaded asset. Assets live until the `Assets` is dropped.
#[derive(Debug)]
pub struct Assets {
    programs: Vec<Program>,
    textures: Vec<Texture>,
    texture_paths: HashMap<PathBuf, TextureId>,
    materials: Vec<Material>,
    meshes: Vec<Mesh>,
    models: Vec<Model>,
    white: TextureId,
    black: TextureId,
    normal: TextureId,
    magenta: TextureId,
    default_material: MaterialId,
}

impl Assets {
    /// Create the store with the built-in solid textures and a default material.
    pub fn new<B: GraphicsBackend + ?Sized>(backend: &mut B) -> RenderResult<Self> {
        let mut textures = Vec::new();
        let mut builtin = |data: TextureData| -> RenderResult<TextureId> {
            textures.push(Texture::create(&mut *backend, &data)?);
            Ok(TextureId(textures.len() - 1))
        };
        let white = builtin(TextureData::white())?;
        let black = builtin(TextureData::black())?;
        let normal = builtin(TextureData::default_normal())?;
        let magenta = builtin(TextureData::magenta())?;

        Ok(Self {
            programs: Vec::new(),
            textures,
            texture_paths: HashMap::new(),
            materials: vec![Material::default()],
            meshes: Vec::new(),
            models: Vec::new(),
            white,
            black,
            normal,
            magenta,
            default_material: MaterialId(0),
        })
    }

    // Programs

    /// Load a WGSL file whose entry points are `vs_{name}` and `fs_{name}`.
    pub fn load_program<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        path: impl AsRef<Path>,
        name: &str,
        target: ProgramTarget,
    ) -> RenderResult<ProgramId> {
        let program = Program::from_file(backend, path.as_ref(), name, target)?;
        Ok(self.add_program(program))
    }

    /// Link a program from in-memory source
    pub fn add_program_source<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        name: &str,
        source: &str,
        target: ProgramTarget,
    ) -> RenderResult<ProgramId> {
        let program = Program::from_source(backend, name, source, None, target)?;
        Ok(self.add_program(program))
    }

    pub fn add_program(&mut self, program: Program) -> ProgramId {
        self.programs.push(program);
        ProgramId(self.programs.len() - 1)
    }

    pub fn program(&self, id: ProgramId) -> Option<&Program> {
        self.programs.get(id.0)
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Relink every program whose file changed on disk. The new program keeps
    /// its id; vertex arrays of the old one are evicted. A program that fails
    /// to relink stays as it was. Returns the number of programs swapped.
    pub fn reload_changed_programs<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        vao_cache: &mut VaoCache,
    ) -> usize {
        let mut reloaded = 0;
        for program in self.programs.iter_mut().filter(|p| p.is_stale()) {
            match program.relink(backend) {
                Ok(relinked) => {
                    let old = std::mem::replace(program, relinked);
                    vao_cache.evict_program(old.handle());
                    log::info!("Reloaded program '{}'", program.name());
                    reloaded += 1;
                }
                Err(e) => {
                    log::warn!("Keeping previous '{}': {}", program.name(), e);
                    program.mark_seen();
                }
            }
        }
        reloaded
    }

    // Textures

    /// Load an image file, or return the id it was already loaded under.
    pub fn load_texture<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        path: impl AsRef<Path>,
    ) -> RenderResult<TextureId> {
        let path = path.as_ref();
        if let Some(id) = self.texture_paths.get(path) {
            return Ok(*id);
        }

        let data = TextureData::from_file(path)?;
        let mut texture = Texture::create(backend, &data)?;
        texture.path = Some(path.to_path_buf());
        let id = self.add_texture(texture);
        self.texture_paths.insert(path.to_path_buf(), id);
        Ok(id)
    }

    pub fn add_texture(&mut self, texture: Texture) -> TextureId {
        self.textures.push(texture);
        TextureId(self.textures.len() - 1)
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id.0)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn white_texture(&self) -> TextureId {
        self.white
    }

    pub fn black_texture(&self) -> TextureId {
        self.black
    }

    pub fn normal_texture(&self) -> TextureId {
        self.normal
    }

    pub fn magenta_texture(&self) -> TextureId {
        self.magenta
    }

    /// View sampled as the albedo of a submesh, white when there is none.
    pub fn albedo_view(&self, material: Option<MaterialId>) -> Option<TextureViewHandle> {
        let texture = material
            .and_then(|id| self.material(id))
            .and_then(|m| m.albedo_texture)
            .unwrap_or(self.white);
        self.texture(texture).map(Texture::view)
    }

    // Materials

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0)
    }

    pub fn default_material(&self) -> MaterialId {
        self.default_material
    }

    // Meshes and models

    /// Upload parts as one mesh sharing a single geometry buffer
    pub fn add_mesh<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        name: &str,
        parts: &[MeshData],
    ) -> RenderResult<MeshId> {
        let mesh = Mesh::upload(backend, name, parts)?;
        self.meshes.push(mesh);
        Ok(MeshId(self.meshes.len() - 1))
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id.0)
    }

    pub fn add_model(&mut self, model: Model) -> ModelId {
        self.models.push(model);
        ModelId(self.models.len() - 1)
    }

    /// Wrap a mesh in a model using the default material for every submesh.
    pub fn add_mesh_model(&mut self, name: &str, mesh: MeshId) -> ModelId {
        let submeshes = self.mesh(mesh).map_or(0, |m| m.submeshes().len());
        self.add_model(Model {
            name: name.to_string(),
            mesh,
            materials: vec![self.default_material; submeshes],
        })
    }

    pub fn model(&self, id: ModelId) -> Option<&Model> {
        self.models.get(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::error::{AssetError, RenderError};
    use crate::render::shaders::SCENE_SHADER;

    #[test]
    fn test_builtin_textures_exist() {
        let mut backend = DummyBackend::new(16, 16);
        let assets = Assets::new(&mut backend).unwrap();
        assert_eq!(assets.texture_count(), 4);
        assert_eq!(
            assets.albedo_view(None),
            Some(assets.texture(assets.white_texture()).unwrap().view())
        );
    }

    #[test]
    fn test_texture_paths_are_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pixel.png");
        image::RgbaImage::new(2, 2).save(&path).unwrap();

        let mut backend = DummyBackend::new(16, 16);
        let mut assets = Assets::new(&mut backend).unwrap();
        let first = assets.load_texture(&mut backend, &path).unwrap();
        let second = assets.load_texture(&mut backend, &path).unwrap();

        assert_eq!(first, second);
        assert_eq!(assets.texture_count(), 5);
    }

    #[test]
    fn test_missing_texture_is_not_found() {
        let mut backend = DummyBackend::new(16, 16);
        let mut assets = Assets::new(&mut backend).unwrap();
        let err = assets.load_texture(&mut backend, "missing.png").unwrap_err();
        assert!(matches!(err, RenderError::Asset(AssetError::NotFound(_))));
    }

    #[test]
    fn test_reload_keeps_old_program_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.wgsl");
        std::fs::write(&path, SCENE_SHADER).unwrap();

        let mut backend = DummyBackend::new(16, 16);
        let mut assets = Assets::new(&mut backend).unwrap();
        let id = assets
            .load_program(&mut backend, &path, "mesh", ProgramTarget::offscreen())
            .unwrap();
        let before = assets.program(id).unwrap().handle();

        std::fs::write(&path, "not wgsl").unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let mut cache = VaoCache::new();
        assert_eq!(assets.reload_changed_programs(&mut backend, &mut cache), 0);
        assert_eq!(assets.program(id).unwrap().handle(), before);
        assert!(!assets.program(id).unwrap().is_stale());
    }

    #[test]
    fn test_reload_swaps_changed_program() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.wgsl");
        std::fs::write(&path, SCENE_SHADER).unwrap();

        let mut backend = DummyBackend::new(16, 16);
        let mut assets = Assets::new(&mut backend).unwrap();
        let id = assets
            .load_program(&mut backend, &path, "mesh", ProgramTarget::offscreen())
            .unwrap();
        let before = assets.program(id).unwrap().handle();

        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let mut cache = VaoCache::new();
        assert_eq!(assets.reload_changed_programs(&mut backend, &mut cache), 1);
        assert_ne!(assets.program(id).unwrap().handle(), before);

        backend.collect_garbage();
        assert!(!backend.is_live(before));
    }
}
