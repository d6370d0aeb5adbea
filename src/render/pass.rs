//! Per-frame draw submission.
//!
//! A frame moves through `Idle -> OffscreenPass -> CompositePass -> Idle`.
//! The offscreen pass draws every object's submeshes into the offscreen
//! target; the composite pass copies that target to the swapchain.

use crate::backend::{
    BufferHandle, ColorAttachment, DepthStencilAttachment, GraphicsBackend, LoadOp,
    RenderPassDescriptor, StoreOp, TextureViewHandle,
};
use crate::error::{RenderError, RenderResult};
use crate::geometry::{SubmeshKey, VaoCache};
use crate::resources::Assets;
use crate::scene::GameObject;
use crate::uniforms::UniformRange;

use super::composite::OffscreenComposite;
use super::target::OffscreenTarget;

/// Uniform slot of the frame globals
pub const GLOBAL_SLOT: u32 = 0;
/// Uniform slot of the per-object block
pub const OBJECT_SLOT: u32 = 1;
/// Texture unit every program samples its albedo or color input from
pub const ALBEDO_UNIT: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassState {
    #[default]
    Idle,
    OffscreenPass,
    CompositePass,
}

/// Counters of one rendered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub draw_calls: usize,
    pub skipped_submeshes: usize,
    pub vaos_created: usize,
    pub uniform_bytes: usize,
}

/// The packed uniforms the offscreen pass binds from
#[derive(Debug, Clone, Copy)]
pub struct FrameBindings {
    pub buffer: BufferHandle,
    pub global: UniformRange,
}

#[derive(Debug, Default)]
pub struct FrameRenderer {
    state: PassState,
    clear_color: [f32; 4],
}

impl FrameRenderer {
    pub fn new(clear_color: [f32; 4]) -> Self {
        Self {
            state: PassState::Idle,
            clear_color,
        }
    }

    pub fn state(&self) -> PassState {
        self.state
    }

    pub fn set_clear_color(&mut self, clear_color: [f32; 4]) {
        self.clear_color = clear_color;
    }

    fn transition(&mut self, from: PassState, to: PassState) -> RenderResult<()> {
        if self.state != from {
            return Err(RenderError::FramebufferIncomplete(format!(
                "cannot enter {:?} from {:?}",
                to, self.state
            )));
        }
        self.state = to;
        Ok(())
    }

    /// Draw `objects` into the offscreen target, in object then submesh order.
    #[allow(clippy::too_many_arguments)]
    pub fn offscreen_pass<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        target: &OffscreenTarget,
        assets: &Assets,
        vao_cache: &mut VaoCache,
        bindings: FrameBindings,
        objects: &[GameObject],
        stats: &mut FrameStats,
    ) -> RenderResult<()> {
        self.transition(PassState::Idle, PassState::OffscreenPass)?;

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Offscreen Pass".to_string()),
            color_attachments: vec![ColorAttachment {
                view: target.color_view(),
                load_op: LoadOp::Clear(self.clear_color),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: target.depth_view(),
                depth_load_op: LoadOp::Clear([1.0; 4]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });
        let (width, height) = target.size();
        backend.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);

        let created_before = vao_cache.created();
        for object in objects {
            self.draw_object(backend, assets, vao_cache, bindings, object, stats);
        }
        stats.vaos_created += vao_cache.created() - created_before;

        backend.end_render_pass();
        Ok(())
    }

    fn draw_object<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        assets: &Assets,
        vao_cache: &mut VaoCache,
        bindings: FrameBindings,
        object: &GameObject,
        stats: &mut FrameStats,
    ) {
        let Some(model) = assets.model(object.model) else {
            log::warn!("'{}' has no model {:?}, skipped", object.name, object.model);
            return;
        };
        let Some(mesh) = assets.mesh(model.mesh) else {
            log::warn!("'{}' has no mesh {:?}, skipped", object.name, model.mesh);
            return;
        };
        let submeshes = mesh.submeshes();
        let (Some(program), Some(range)) = (assets.program(object.program), object.uniform_range)
        else {
            log::warn!(
                "'{}' has no program or uniform range, {} submeshes skipped",
                object.name,
                submeshes.len()
            );
            stats.skipped_submeshes += submeshes.len();
            return;
        };

        backend.set_program(program.handle());
        backend.bind_uniform_range(
            GLOBAL_SLOT,
            bindings.buffer,
            bindings.global.offset,
            bindings.global.size,
        );
        backend.bind_uniform_range(OBJECT_SLOT, bindings.buffer, range.offset, range.size);

        let geometry = mesh.geometry();
        for (index, submesh) in submeshes.iter().enumerate() {
            let key = SubmeshKey {
                mesh: model.mesh,
                submesh: index,
            };
            let vao = match vao_cache.get_or_create(backend, key, geometry, submesh, program) {
                Ok(vao) => vao,
                Err(e) => {
                    log::warn!("'{}' submesh {} skipped: {}", object.name, index, e);
                    stats.skipped_submeshes += 1;
                    continue;
                }
            };
            backend.set_vertex_array(vao);

            if program.texture_units() > ALBEDO_UNIT {
                if let Some(view) = assets.albedo_view(model.material(index)) {
                    backend.bind_texture(ALBEDO_UNIT, view);
                }
            }

            let indices = submesh.index_range(geometry.index_format());
            log::trace!("Draw '{}' submesh {} indices {:?}", object.name, index, indices);
            backend.draw_indexed(indices, 0, 0..1);
            stats.draw_calls += 1;
        }
    }

    /// Copy the offscreen color attachment to the swapchain view.
    #[allow(clippy::too_many_arguments)]
    pub fn composite_pass<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        swapchain_view: TextureViewHandle,
        size: (u32, u32),
        target: &OffscreenTarget,
        composite: &OffscreenComposite,
        assets: &Assets,
        vao_cache: &mut VaoCache,
        stats: &mut FrameStats,
    ) -> RenderResult<()> {
        self.transition(PassState::OffscreenPass, PassState::CompositePass)?;

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Composite Pass".to_string()),
            color_attachments: vec![ColorAttachment {
                view: swapchain_view,
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });
        backend.set_viewport(0.0, 0.0, size.0 as f32, size.1 as f32, 0.0, 1.0);

        let created_before = vao_cache.created();
        match composite.draw(backend, target, assets, vao_cache) {
            Ok(()) => stats.draw_calls += 1,
            Err(e) => {
                log::warn!("Composite skipped: {}", e);
                stats.skipped_submeshes += 1;
            }
        }
        stats.vaos_created += vao_cache.created() - created_before;

        backend.end_render_pass();
        self.state = PassState::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;

    #[test]
    fn test_composite_requires_offscreen_first() {
        let mut backend = DummyBackend::new(32, 32);
        let mut assets = Assets::new(&mut backend).unwrap();
        let composite = OffscreenComposite::new(&mut backend, &mut assets).unwrap();
        let target =
            OffscreenTarget::new(&mut backend, 32, 32, crate::backend::TextureFormat::Rgba8Unorm)
                .unwrap();
        let mut renderer = FrameRenderer::new([0.0; 4]);
        let mut stats = FrameStats::default();

        let result = renderer.composite_pass(
            &mut backend,
            TextureViewHandle(0),
            (32, 32),
            &target,
            &composite,
            &assets,
            &mut VaoCache::new(),
            &mut stats,
        );
        assert!(result.is_err());
        assert_eq!(renderer.state(), PassState::Idle);
        assert!(backend.commands().is_empty());
    }
}
