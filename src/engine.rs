//! Frame driver tying the asset store, the uniform arena and the passes together

use std::path::Path;

use crate::backend::GraphicsBackend;
use crate::error::{RenderError, RenderResult};
use crate::geometry::VaoCache;
use crate::render::shaders::SCENE_SHADER;
use crate::render::{FrameBindings, FrameRenderer, FrameStats, OffscreenComposite, OffscreenTarget};
use crate::resources::{Assets, ModelId, ProgramId, ProgramTarget};
use crate::scene::{CameraController, CameraInput, RenderContext};
use crate::uniforms::{FrameUniformPacker, FrameUniforms, UniformArena};
use crate::EngineConfig;

/// The renderer for one surface
pub struct Engine<B: GraphicsBackend> {
    backend: B,
    config: EngineConfig,
    assets: Assets,
    context: RenderContext,
    vao_cache: VaoCache,
    arena: UniformArena,
    packer: FrameUniformPacker,
    packed: Option<FrameUniforms>,
    target: OffscreenTarget,
    composite: OffscreenComposite,
    renderer: FrameRenderer,
    scene_program: ProgramId,
    width: u32,
    height: u32,
}

impl<B: GraphicsBackend> Engine<B> {
    /// Create every GPU resource the frame needs. The display size comes from
    /// the backend's surface.
    pub fn init(mut backend: B, config: EngineConfig) -> RenderResult<Self> {
        let (width, height) = backend.surface_size();
        let limits = backend.limits();

        let max_block = usize::try_from(limits.max_uniform_block_size).unwrap_or(usize::MAX);
        let capacity = config.uniform_arena_size.map_or(max_block, |size| size.min(max_block));
        let arena = UniformArena::new(&mut backend, capacity)?;
        let packer = FrameUniformPacker::new(&limits, config.max_lights);

        let mut assets = Assets::new(&mut backend)?;
        let scene_program = assets.add_program_source(
            &mut backend,
            "mesh",
            SCENE_SHADER,
            ProgramTarget::offscreen_with(config.offscreen_format),
        )?;
        let composite = OffscreenComposite::new(&mut backend, &mut assets)?;
        let target = OffscreenTarget::new(&mut backend, width, height, config.offscreen_format)?;

        let mut context = RenderContext::new();
        context.camera.set_aspect(width as f32, height as f32);

        log::info!(
            "Engine initialized: {}x{}, uniform arena {} bytes, object alignment {}",
            width,
            height,
            arena.capacity(),
            packer.object_alignment()
        );

        Ok(Self {
            backend,
            renderer: FrameRenderer::new(config.clear_color),
            config,
            assets,
            context,
            vao_cache: VaoCache::new(),
            arena,
            packer,
            packed: None,
            target,
            composite,
            scene_program,
            width,
            height,
        })
    }

    /// Write the camera, lights and object transforms into the uniform arena.
    pub fn pack_frame(&mut self) -> RenderResult<FrameUniforms> {
        self.packed = None;
        let packed = self
            .packer
            .pack(
                &mut self.arena,
                &mut self.backend,
                &self.context.camera,
                &self.context.lights,
                &mut self.context.objects,
            )
            .inspect_err(|e| log::error!("Frame packing failed: {}", e))?;
        self.packed = Some(packed);
        Ok(packed)
    }

    /// Draw the packed frame offscreen, composite it and present. Packs first
    /// if [`pack_frame`](Self::pack_frame) was not called since the last frame.
    pub fn render_frame(&mut self) -> RenderResult<FrameStats> {
        if self.config.hot_reload {
            self.assets
                .reload_changed_programs(&mut self.backend, &mut self.vao_cache);
        }
        let packed = match self.packed.take() {
            Some(packed) => packed,
            None => {
                let packed = self.pack_frame()?;
                self.packed = None;
                packed
            }
        };

        let frame = self.backend.begin_frame()?;
        let mut stats = FrameStats {
            uniform_bytes: packed.bytes,
            ..Default::default()
        };

        self.renderer.offscreen_pass(
            &mut self.backend,
            &self.target,
            &self.assets,
            &mut self.vao_cache,
            FrameBindings {
                buffer: self.arena.buffer(),
                global: packed.global,
            },
            &self.context.objects,
            &mut stats,
        )?;
        self.renderer.composite_pass(
            &mut self.backend,
            frame.swapchain_view,
            (frame.width, frame.height),
            &self.target,
            &self.composite,
            &self.assets,
            &mut self.vao_cache,
            &mut stats,
        )?;

        self.backend.end_frame()?;
        self.backend.collect_garbage();

        if stats.skipped_submeshes > 0 {
            log::debug!("{} submeshes skipped this frame", stats.skipped_submeshes);
        }
        Ok(stats)
    }

    /// Resize the surface and recreate the offscreen attachments. Zero sizes
    /// (minimized windows) are ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.backend.resize(width, height);
        let (width, height) = self.backend.surface_size();
        self.target.resize(&mut self.backend, width, height)?;
        self.context.camera.set_aspect(width as f32, height as f32);
        self.width = width;
        self.height = height;
        self.backend.collect_garbage();
        log::debug!("Resized to {}x{}", width, height);
        Ok(())
    }

    /// Advance the camera with a controller.
    pub fn update_camera(
        &mut self,
        controller: &mut dyn CameraController,
        input: &CameraInput,
        dt: f32,
    ) {
        controller.update(&mut self.context.camera, input, dt);
    }

    /// Load a program linked against the offscreen target.
    pub fn load_program(&mut self, path: impl AsRef<Path>, name: &str) -> RenderResult<ProgramId> {
        let target = ProgramTarget::offscreen_with(self.config.offscreen_format);
        self.assets
            .load_program(&mut self.backend, path, name, target)
    }

    pub fn load_model(&mut self, path: impl AsRef<Path>) -> RenderResult<ModelId> {
        self.assets.load_model(&mut self.backend, path)
    }

    /// Program used for objects that don't bring their own
    pub fn scene_program(&self) -> ProgramId {
        self.scene_program
    }

    pub fn assets(&self) -> &Assets {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut Assets {
        &mut self.assets
    }

    /// Split borrow for loading assets directly through the backend
    pub fn assets_and_backend(&mut self) -> (&mut Assets, &mut B) {
        (&mut self.assets, &mut self.backend)
    }

    pub fn context(&self) -> &RenderContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut RenderContext {
        &mut self.context
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn vao_cache(&self) -> &VaoCache {
        &self.vao_cache
    }

    pub fn arena(&self) -> &UniformArena {
        &self.arena
    }

    pub fn target(&self) -> &OffscreenTarget {
        &self.target
    }

    pub fn composite(&self) -> &OffscreenComposite {
        &self.composite
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl<B: GraphicsBackend> std::fmt::Debug for Engine<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("arena", &self.arena)
            .field("objects", &self.context.objects.len())
            .finish()
    }
}

/// `true` for errors that only lose the current frame.
pub fn is_frame_recoverable(error: &RenderError) -> bool {
    matches!(
        error,
        RenderError::Backend(crate::backend::BackendError::SurfaceLost)
            | RenderError::Backend(crate::backend::BackendError::AcquireImageFailed(_))
    )
}
