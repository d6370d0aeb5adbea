//! Full-screen quad that presents the offscreen color attachment.

use crate::backend::GraphicsBackend;
use crate::error::{RenderError, RenderResult};
use crate::geometry::{SubmeshKey, VaoCache};
use crate::resources::{Assets, MeshData, MeshId, ProgramId, ProgramTarget};

use super::pass::ALBEDO_UNIT;
use super::shaders::BLIT_SHADER;
use super::target::OffscreenTarget;

#[derive(Debug, Clone, Copy)]
pub struct OffscreenComposite {
    program: ProgramId,
    quad: MeshId,
}

impl OffscreenComposite {
    /// Register the quad mesh and the blit program.
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        assets: &mut Assets,
    ) -> RenderResult<Self> {
        let target = ProgramTarget::composite(backend.swapchain_format());
        let program = assets.add_program_source(backend, "blit", BLIT_SHADER, target)?;
        let quad = assets.add_mesh(backend, "Composite Quad", &[MeshData::quad()])?;
        Ok(Self { program, quad })
    }

    pub fn program(&self) -> ProgramId {
        self.program
    }

    pub fn quad(&self) -> MeshId {
        self.quad
    }

    pub(crate) fn draw<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        target: &OffscreenTarget,
        assets: &Assets,
        vao_cache: &mut VaoCache,
    ) -> RenderResult<()> {
        let (Some(program), Some(mesh)) = (assets.program(self.program), assets.mesh(self.quad))
        else {
            return Err(RenderError::FramebufferIncomplete(
                "composite program or quad missing".to_string(),
            ));
        };
        let Some(submesh) = mesh.submeshes().first() else {
            return Err(RenderError::FramebufferIncomplete("composite quad is empty".to_string()));
        };

        let key = SubmeshKey {
            mesh: self.quad,
            submesh: 0,
        };
        let vao = vao_cache.get_or_create(backend, key, mesh.geometry(), submesh, program)?;

        backend.set_program(program.handle());
        backend.set_vertex_array(vao);
        backend.bind_texture(ALBEDO_UNIT, target.color_view());
        backend.draw_indexed(submesh.index_range(mesh.geometry().index_format()), 0, 0..1);
        Ok(())
    }
}
