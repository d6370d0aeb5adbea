//! Writes the camera, the light list and every object's transforms into the
//! uniform arena once per frame.

use bytemuck::{Pod, Zeroable};

use crate::backend::{DeviceLimits, GraphicsBackend};
use crate::error::RenderResult;
use crate::scene::{Camera, GameObject, Light};

use super::arena::{UniformArena, UniformRange};

/// Leading part of the global block, followed by the lights.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GlobalsHeader {
    pub camera_position: [f32; 3],
    pub light_count: u32,
}

/// Per-object block.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ObjectBlock {
    pub model: [[f32; 4]; 4],
    pub model_view_projection: [[f32; 4]; 4],
}

/// Ranges produced by one [`FrameUniformPacker::pack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameUniforms {
    pub global: UniformRange,
    /// Arena head after packing
    pub bytes: usize,
}

#[derive(Debug, Clone)]
pub struct FrameUniformPacker {
    object_alignment: usize,
    max_lights: usize,
}

impl FrameUniformPacker {
    /// Lights are aligned to 16 bytes, objects to the device's uniform offset alignment.
    pub const LIGHT_ALIGNMENT: usize = 16;

    pub fn new(limits: &DeviceLimits, max_lights: usize) -> Self {
        Self {
            object_alignment: (limits.uniform_offset_alignment as usize).max(Self::LIGHT_ALIGNMENT),
            max_lights,
        }
    }

    pub fn object_alignment(&self) -> usize {
        self.object_alignment
    }

    pub fn max_lights(&self) -> usize {
        self.max_lights
    }

    /// Pack one frame. Each object's `uniform_range` is set on success; on
    /// overflow the ranges written before the failure stay set and the rest
    /// are `None`.
    pub fn pack<B: GraphicsBackend + ?Sized>(
        &self,
        arena: &mut UniformArena,
        backend: &mut B,
        camera: &Camera,
        lights: &[Light],
        objects: &mut [GameObject],
    ) -> RenderResult<FrameUniforms> {
        for object in objects.iter_mut() {
            object.uniform_range = None;
        }

        let active = if lights.len() > self.max_lights {
            log::warn!(
                "{} lights in the scene, only the first {} are packed",
                lights.len(),
                self.max_lights
            );
            &lights[..self.max_lights]
        } else {
            lights
        };

        let mut frame = arena.begin_frame(backend);

        let mut block = frame.begin_block(Self::LIGHT_ALIGNMENT)?;
        block.push_pod(&GlobalsHeader {
            camera_position: camera.position.to_array(),
            light_count: active.len() as u32,
        })?;
        for light in active {
            block.align(Self::LIGHT_ALIGNMENT)?;
            block.push_pod(&light.to_gpu_data())?;
        }
        let global = block.finish();

        let view_projection = camera.view_projection_matrix();
        for object in objects.iter_mut() {
            let model = object.transform.matrix();
            let data = ObjectBlock {
                model: model.to_cols_array_2d(),
                model_view_projection: (view_projection * model).to_cols_array_2d(),
            };
            frame.align_head(self.object_alignment)?;
            object.uniform_range = Some(frame.push_pod(&data)?);
        }

        let bytes = frame.head();
        frame.end_frame();
        log::trace!(
            "Packed {} lights and {} objects into {} uniform bytes",
            active.len(),
            objects.len(),
            bytes
        );

        Ok(FrameUniforms { global, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;
    use crate::error::RenderError;
    use crate::resources::{ModelId, ProgramId};
    use crate::scene::Transform;
    use glam::Vec3;

    fn objects(count: usize) -> Vec<GameObject> {
        (0..count)
            .map(|i| {
                GameObject::new(format!("object {}", i), ModelId(0), ProgramId(0))
                    .with_transform(Transform::from_position(Vec3::new(i as f32, 0.0, 0.0)))
            })
            .collect()
    }

    #[test]
    fn test_block_sizes() {
        assert_eq!(std::mem::size_of::<GlobalsHeader>(), 16);
        assert_eq!(std::mem::size_of::<ObjectBlock>(), 128);
    }

    #[test]
    fn test_ranges_are_aligned_and_disjoint() {
        let mut backend = DummyBackend::new(16, 16);
        let mut arena = UniformArena::new(&mut backend, 65536).unwrap();
        let packer = FrameUniformPacker::new(&backend.limits(), 16);
        let lights = vec![
            Light::directional(Vec3::NEG_Y, Vec3::ONE),
            Light::point(Vec3::Y, Vec3::ONE),
        ];
        let mut objects = objects(3);

        let packed = packer
            .pack(&mut arena, &mut backend, &Camera::default(), &lights, &mut objects)
            .unwrap();

        assert_eq!(packed.global, UniformRange { offset: 0, size: 16 + 2 * 64 });
        let ranges: Vec<UniformRange> = objects.iter().map(|o| o.uniform_range.unwrap()).collect();
        assert_eq!(ranges[0], UniformRange { offset: 256, size: 128 });
        assert_eq!(ranges[1], UniformRange { offset: 512, size: 128 });
        assert_eq!(ranges[2], UniformRange { offset: 768, size: 128 });
        assert_eq!(packed.bytes, 896);
    }

    #[test]
    fn test_header_is_uploaded() {
        let mut backend = DummyBackend::new(16, 16);
        let mut arena = UniformArena::new(&mut backend, 4096).unwrap();
        let packer = FrameUniformPacker::new(&backend.limits(), 16);
        let camera = Camera::new(Vec3::new(1.0, 2.0, 3.0), Vec3::ZERO);
        let lights = vec![Light::point(Vec3::ZERO, Vec3::ONE)];

        packer
            .pack(&mut arena, &mut backend, &camera, &lights, &mut [])
            .unwrap();

        let contents = backend.buffer_contents(arena.buffer()).unwrap();
        let header: GlobalsHeader = bytemuck::pod_read_unaligned(&contents[..16]);
        assert_eq!(header.camera_position, [1.0, 2.0, 3.0]);
        assert_eq!(header.light_count, 1);
    }

    #[test]
    fn test_excess_lights_are_truncated() {
        let mut backend = DummyBackend::new(16, 16);
        let mut arena = UniformArena::new(&mut backend, 4096).unwrap();
        let packer = FrameUniformPacker::new(&backend.limits(), 2);
        let lights = vec![Light::point(Vec3::ZERO, Vec3::ONE); 5];

        let packed = packer
            .pack(&mut arena, &mut backend, &Camera::default(), &lights, &mut [])
            .unwrap();
        assert_eq!(packed.global.size, 16 + 2 * 64);
    }

    #[test]
    fn test_overflow_surfaces_and_clears_later_ranges() {
        let mut backend = DummyBackend::new(16, 16);
        let mut arena = UniformArena::new(&mut backend, 512).unwrap();
        let packer = FrameUniformPacker::new(&backend.limits(), 16);
        let mut objects = objects(3);
        objects[2].uniform_range = Some(UniformRange { offset: 0, size: 1 });

        let err = packer
            .pack(&mut arena, &mut backend, &Camera::default(), &[], &mut objects)
            .unwrap_err();

        assert!(matches!(err, RenderError::ArenaOverflow { .. }));
        assert!(objects[0].uniform_range.is_some());
        assert!(objects[1].uniform_range.is_none());
        assert!(objects[2].uniform_range.is_none());
    }
}
