//! Object transforms

use glam::{Mat4, Quat, Vec3};

/// Position, rotation and scale of an object in 3D space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Get the model matrix for this transform
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Translate by an offset
    pub fn translate(&mut self, offset: Vec3) {
        self.position += offset;
    }

    /// Rotate around an axis
    pub fn rotate_axis(&mut self, axis: Vec3, angle: f32) {
        let delta = Quat::from_axis_angle(axis, angle);
        self.rotation = delta * self.rotation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_applies_scale_then_translation() {
        let transform = Transform {
            position: Vec3::new(1.0, 0.0, 0.0),
            scale: Vec3::splat(2.0),
            ..Default::default()
        };
        let p = transform.matrix().transform_point3(Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(p, Vec3::new(3.0, 2.0, 0.0));
    }

    #[test]
    fn test_rotate_axis_accumulates() {
        let mut transform = Transform::new();
        transform.rotate_axis(Vec3::Y, std::f32::consts::FRAC_PI_2);
        transform.rotate_axis(Vec3::Y, std::f32::consts::FRAC_PI_2);
        let p = transform.matrix().transform_point3(Vec3::X);
        assert!((p - Vec3::NEG_X).length() < 1e-5);
    }
}
