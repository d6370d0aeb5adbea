//! Light types for the scene

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightKind {
    Directional,
    Point,
}

impl LightKind {
    /// Value of the `kind` field the shaders switch on
    pub fn gpu_id(self) -> u32 {
        match self {
            LightKind::Directional => 0,
            LightKind::Point => 1,
        }
    }
}

/// A light source. Directional lights ignore `position`, point lights ignore `direction`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    pub direction: Vec3,
    pub position: Vec3,
}

impl Light {
    pub fn directional(direction: Vec3, color: Vec3) -> Self {
        Self {
            kind: LightKind::Directional,
            color,
            direction: direction.normalize_or_zero(),
            position: Vec3::ZERO,
        }
    }

    pub fn point(position: Vec3, color: Vec3) -> Self {
        Self {
            kind: LightKind::Point,
            color,
            direction: Vec3::ZERO,
            position,
        }
    }

    /// Convert to GPU data format
    pub fn to_gpu_data(&self) -> GpuLight {
        GpuLight {
            kind: self.kind.gpu_id(),
            _pad0: [0; 3],
            color: self.color.to_array(),
            _pad1: 0.0,
            direction: self.direction.to_array(),
            _pad2: 0.0,
            position: self.position.to_array(),
            _pad3: 0.0,
        }
    }
}

/// GPU layout of a light: every vec3 starts on a 16-byte boundary.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuLight {
    pub kind: u32,
    pub _pad0: [u32; 3],
    pub color: [f32; 3],
    pub _pad1: f32,
    pub direction: [f32; 3],
    pub _pad2: f32,
    pub position: [f32; 3],
    pub _pad3: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_light_layout() {
        assert_eq!(std::mem::size_of::<GpuLight>(), 64);
        assert_eq!(std::mem::offset_of!(GpuLight, color), 16);
        assert_eq!(std::mem::offset_of!(GpuLight, direction), 32);
        assert_eq!(std::mem::offset_of!(GpuLight, position), 48);
    }

    #[test]
    fn test_directional_light_is_normalized() {
        let light = Light::directional(Vec3::new(0.0, -2.0, 0.0), Vec3::ONE);
        assert_eq!(light.direction, Vec3::NEG_Y);
        assert_eq!(light.to_gpu_data().kind, 0);
    }
}
