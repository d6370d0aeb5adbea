//! WGSL programs and their reflected interface.
//!
//! A program named `name` is one WGSL module with a `vs_{name}` vertex entry
//! point and an `fs_{name}` fragment entry point. After parsing, the module
//! is reflected for:
//!
//! - the vertex inputs (location and float component count), in declaration order
//! - the uniform blocks, which must occupy bind groups `0..n`, one buffer at binding 0 each
//! - the sampled textures, which must occupy groups `n..n + t`, texture at binding 0
//!   and sampler at binding 1

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use naga::{AddressSpace, Binding, ShaderStage, TypeInner};

use crate::backend::{
    BlendState, ColorTargetState, CompareFunction, CullMode, DepthStencilState, GraphicsBackend,
    Owned, ProgramDescriptor, ProgramHandle, TextureFormat,
};
use crate::error::{AssetError, RenderError, RenderResult};
use crate::geometry::ShaderAttribute;

/// Attachment formats and blending a program is linked against
#[derive(Debug, Clone, Copy)]
pub struct ProgramTarget {
    pub color_format: TextureFormat,
    pub depth_format: Option<TextureFormat>,
    pub blend: Option<BlendState>,
}

impl ProgramTarget {
    /// Default offscreen target: RGBA8 color with a 32-bit float depth buffer
    pub fn offscreen() -> Self {
        Self::offscreen_with(TextureFormat::Rgba8Unorm)
    }

    pub fn offscreen_with(color_format: TextureFormat) -> Self {
        Self {
            color_format,
            depth_format: Some(TextureFormat::Depth32Float),
            blend: None,
        }
    }

    /// Alpha-blended draw straight into the swapchain
    pub fn composite(swapchain_format: TextureFormat) -> Self {
        Self {
            color_format: swapchain_format,
            depth_format: None,
            blend: Some(BlendState::alpha_blending()),
        }
    }
}

/// What reflection found in a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramInterface {
    pub inputs: Vec<ShaderAttribute>,
    /// Size of each uniform block, indexed by bind group
    pub uniform_blocks: Vec<u64>,
    pub texture_units: u32,
}

fn shader_error(name: &str, message: impl Into<String>) -> AssetError {
    AssetError::Shader {
        name: name.to_string(),
        message: message.into(),
    }
}

fn component_count(name: &str, location: u32, inner: &TypeInner) -> Result<u8, AssetError> {
    let scalar = match *inner {
        TypeInner::Scalar(scalar) => Some((scalar, 1)),
        TypeInner::Vector { size, scalar } => Some((scalar, size as u8)),
        _ => None,
    };
    match scalar {
        Some((scalar, count)) if scalar.kind == naga::ScalarKind::Float && scalar.width == 4 => {
            Ok(count)
        }
        _ => Err(shader_error(
            name,
            format!("vertex input at location {} is not f32 or vecN<f32>", location),
        )),
    }
}

fn vertex_inputs(
    name: &str,
    module: &naga::Module,
    entry: &naga::EntryPoint,
) -> Result<Vec<ShaderAttribute>, AssetError> {
    let mut inputs = Vec::new();
    let mut push = |binding: &Option<Binding>, ty: naga::Handle<naga::Type>| {
        if let Some(Binding::Location { location, .. }) = binding {
            let count = component_count(name, *location, &module.types[ty].inner)?;
            let location = u8::try_from(*location)
                .map_err(|_| shader_error(name, format!("location {} out of range", location)))?;
            inputs.push(ShaderAttribute::new(location, count));
        }
        Ok::<(), AssetError>(())
    };

    for argument in &entry.function.arguments {
        match &module.types[argument.ty].inner {
            TypeInner::Struct { members, .. } if argument.binding.is_none() => {
                for member in members {
                    push(&member.binding, member.ty)?;
                }
            }
            _ => push(&argument.binding, argument.ty)?,
        }
    }
    Ok(inputs)
}

/// Parse, validate and reflect a WGSL module.
pub fn reflect(name: &str, source: &str) -> Result<ProgramInterface, AssetError> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| shader_error(name, e.emit_to_string(source)))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(&module)
        .map_err(|e| shader_error(name, format!("Validation error: {e}")))?;

    let find_entry = |stage: ShaderStage, entry: String| {
        module
            .entry_points
            .iter()
            .find(|ep| ep.stage == stage && ep.name == entry)
            .ok_or(AssetError::MissingEntryPoint {
                name: name.to_string(),
                entry,
            })
    };
    let vertex = find_entry(ShaderStage::Vertex, format!("vs_{}", name))?;
    find_entry(ShaderStage::Fragment, format!("fs_{}", name))?;

    let mut uniforms = BTreeMap::new();
    let mut textures = BTreeSet::new();
    for (_, global) in module.global_variables.iter() {
        let Some(binding) = &global.binding else {
            continue;
        };
        let inner = &module.types[global.ty].inner;
        match (global.space, inner) {
            (AddressSpace::Uniform, _) => {
                if binding.binding != 0 {
                    return Err(shader_error(
                        name,
                        format!("uniform block in group {} must use binding 0", binding.group),
                    ));
                }
                uniforms.insert(binding.group, inner.size(module.to_ctx()) as u64);
            }
            (AddressSpace::Handle, TypeInner::Image { .. }) => {
                if binding.binding != 0 {
                    return Err(shader_error(
                        name,
                        format!("texture in group {} must use binding 0", binding.group),
                    ));
                }
                textures.insert(binding.group);
            }
            _ => {}
        }
    }

    let uniform_count = uniforms.len() as u32;
    if uniforms.keys().copied().ne(0..uniform_count) {
        return Err(shader_error(
            name,
            format!("uniform blocks must occupy groups 0..{}", uniform_count),
        ));
    }
    let texture_units = textures.len() as u32;
    if textures
        .iter()
        .copied()
        .ne(uniform_count..uniform_count + texture_units)
    {
        return Err(shader_error(
            name,
            format!(
                "textures must occupy groups {}..{}",
                uniform_count,
                uniform_count + texture_units
            ),
        ));
    }

    Ok(ProgramInterface {
        inputs: vertex_inputs(name, &module, vertex)?,
        uniform_blocks: uniforms.into_values().collect(),
        texture_units,
    })
}

/// A linked program with its reflected interface
#[derive(Debug)]
pub struct Program {
    handle: Owned<ProgramHandle>,
    name: String,
    interface: ProgramInterface,
    target: ProgramTarget,
    path: Option<PathBuf>,
    modified: Option<SystemTime>,
}

impl Program {
    /// Reflect and link a program from WGSL source.
    pub fn from_source<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        name: &str,
        source: &str,
        path: Option<&Path>,
        target: ProgramTarget,
    ) -> RenderResult<Self> {
        let interface = reflect(name, source)?;

        let desc = ProgramDescriptor {
            label: Some(name.to_string()),
            source: source.to_string(),
            vertex_entry: format!("vs_{}", name),
            fragment_entry: format!("fs_{}", name),
            uniform_blocks: interface.uniform_blocks.clone(),
            texture_units: interface.texture_units,
            color_target: ColorTargetState {
                format: target.color_format,
                blend: target.blend,
            },
            depth_stencil: target.depth_format.map(|format| DepthStencilState {
                format,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
            }),
            cull_mode: CullMode::None,
        };
        let handle = backend
            .create_program(&desc)
            .map_err(RenderError::creation("program"))?;

        log::info!(
            "Linked program '{}': {} inputs, {} uniform blocks, {} texture units",
            name,
            interface.inputs.len(),
            interface.uniform_blocks.len(),
            interface.texture_units
        );

        Ok(Self {
            handle: Owned::new(handle, backend.release_queue()),
            name: name.to_string(),
            interface,
            target,
            path: path.map(Path::to_path_buf),
            modified: path.and_then(modified_time),
        })
    }

    /// Read and link a program file, remembering its modification time.
    pub fn from_file<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        path: &Path,
        name: &str,
        target: ProgramTarget,
    ) -> RenderResult<Self> {
        let source = read_source(path)?;
        Self::from_source(backend, name, &source, Some(path), target)
    }

    /// Whether the backing file changed since this program was linked.
    pub fn is_stale(&self) -> bool {
        match (&self.path, self.modified) {
            (Some(path), Some(linked)) => modified_time(path).is_some_and(|now| now > linked),
            _ => false,
        }
    }

    /// Accept the file's current modification time without relinking.
    pub fn mark_seen(&mut self) {
        if let Some(path) = &self.path {
            self.modified = modified_time(path).or(self.modified);
        }
    }

    /// Link the current file contents as a new program with the same target.
    pub fn relink<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) -> RenderResult<Self> {
        match &self.path {
            Some(path) => Self::from_file(backend, path, &self.name, self.target),
            None => Err(AssetError::Shader {
                name: self.name.clone(),
                message: "program has no source file".to_string(),
            }
            .into()),
        }
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle.handle()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inputs(&self) -> &[ShaderAttribute] {
        &self.interface.inputs
    }

    pub fn uniform_blocks(&self) -> &[u64] {
        &self.interface.uniform_blocks
    }

    pub fn texture_units(&self) -> u32 {
        self.interface.texture_units
    }

    pub fn target(&self) -> ProgramTarget {
        self.target
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn read_source(path: &Path) -> Result<String, AssetError> {
    std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            AssetError::NotFound(path.to_path_buf())
        } else {
            AssetError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::render::shaders::{BLIT_SHADER, SCENE_SHADER};

    #[test]
    fn test_scene_program_interface() {
        let interface = reflect("mesh", SCENE_SHADER).unwrap();
        assert_eq!(
            interface.inputs,
            vec![
                ShaderAttribute::new(0, 3),
                ShaderAttribute::new(1, 3),
                ShaderAttribute::new(2, 2)
            ]
        );
        assert_eq!(interface.uniform_blocks, vec![1040, 128]);
        assert_eq!(interface.texture_units, 1);
    }

    #[test]
    fn test_blit_program_interface() {
        let interface = reflect("blit", BLIT_SHADER).unwrap();
        assert_eq!(
            interface.inputs,
            vec![ShaderAttribute::new(0, 3), ShaderAttribute::new(2, 2)]
        );
        assert!(interface.uniform_blocks.is_empty());
        assert_eq!(interface.texture_units, 1);
    }

    #[test]
    fn test_wrong_name_misses_entry_point() {
        let err = reflect("textured", SCENE_SHADER).unwrap_err();
        assert!(matches!(
            err,
            AssetError::MissingEntryPoint { ref entry, .. } if entry == "vs_textured"
        ));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = reflect("mesh", "fn vs_mesh( {").unwrap_err();
        assert!(matches!(err, AssetError::Shader { .. }));
    }

    #[test]
    fn test_uniform_gap_is_rejected() {
        let source = r#"
struct Block { value: vec4<f32> }
@group(1) @binding(0) var<uniform> block: Block;

@vertex
fn vs_gap(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 1.0) * block.value;
}

@fragment
fn fs_gap() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#;
        let err = reflect("gap", source).unwrap_err();
        assert!(matches!(err, AssetError::Shader { .. }));
    }

    #[test]
    fn test_file_program_tracks_staleness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.wgsl");
        std::fs::write(&path, SCENE_SHADER).unwrap();

        let mut backend = DummyBackend::new(16, 16);
        let program =
            Program::from_file(&mut backend, &path, "mesh", ProgramTarget::offscreen()).unwrap();
        assert_eq!(program.path(), Some(path.as_path()));
        assert!(program.modified().is_some());
        assert!(!program.is_stale());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let mut backend = DummyBackend::new(16, 16);
        let err = Program::from_file(
            &mut backend,
            Path::new("missing.wgsl"),
            "mesh",
            ProgramTarget::offscreen(),
        )
        .unwrap_err();
        assert!(matches!(err, RenderError::Asset(AssetError::NotFound(_))));
    }
}
