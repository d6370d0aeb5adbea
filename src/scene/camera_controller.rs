//! Camera controller system
//!
//! Provides abstract camera control with implementations for:
//! - FreeFly: WASD movement, mouse look, shift to sprint
//! - Orbit: Rotate around a target point, optionally on its own ("display rotate")

use glam::{Vec2, Vec3};

use super::Camera;

/// Input state for camera controllers
#[derive(Debug, Clone, Default)]
pub struct CameraInput {
    /// Movement keys (WASD, QE for up/down)
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,

    /// Sprint modifier (shift)
    pub sprint: bool,

    /// Mouse delta since last frame (in pixels)
    pub mouse_delta: Vec2,

    /// Mouse scroll delta (positive = scroll up)
    pub scroll_delta: f32,

    /// Whether mouse look is active (e.g., right mouse button held)
    pub mouse_look_active: bool,
}

impl CameraInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset per-frame deltas (call after update)
    pub fn reset_deltas(&mut self) {
        self.mouse_delta = Vec2::ZERO;
        self.scroll_delta = 0.0;
    }

    fn movement(&self, forward: Vec3, right: Vec3) -> Vec3 {
        let mut direction = Vec3::ZERO;
        if self.forward {
            direction += forward;
        }
        if self.backward {
            direction -= forward;
        }
        if self.right {
            direction += right;
        }
        if self.left {
            direction -= right;
        }
        if self.up {
            direction += Vec3::Y;
        }
        if self.down {
            direction -= Vec3::Y;
        }
        direction.normalize_or_zero()
    }
}

/// Abstract camera controller trait
pub trait CameraController {
    /// Update the camera based on input and delta time
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32);

    /// Get the controller name for debugging
    fn name(&self) -> &'static str;
}

/// Free-fly camera controller (FPS-style)
pub struct FreeFlyController {
    /// Current yaw angle (horizontal rotation) in radians
    pub yaw: f32,
    /// Current pitch angle (vertical rotation) in radians
    pub pitch: f32,
    /// Movement speed in units per second
    pub speed: f32,
    /// Movement speed while sprint is held
    pub sprint_speed: f32,
    /// Mouse sensitivity (radians per pixel)
    pub mouse_sensitivity: f32,
}

impl Default for FreeFlyController {
    fn default() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            speed: 20.0,
            sprint_speed: 40.0,
            mouse_sensitivity: 0.003,
        }
    }
}

impl FreeFlyController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a controller already looking where the camera looks
    pub fn from_camera(camera: &Camera) -> Self {
        let mut controller = Self::default();
        controller.sync_with_camera(camera);
        controller
    }

    /// Initialize yaw/pitch from camera's current orientation
    pub fn sync_with_camera(&mut self, camera: &Camera) {
        let forward = camera.forward();
        if forward == Vec3::ZERO {
            return;
        }
        self.yaw = forward.z.atan2(forward.x);
        self.pitch = (-forward.y).clamp(-1.0, 1.0).asin();
    }

    fn forward_direction(&self) -> Vec3 {
        Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            -self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize()
    }

    fn right_direction(&self) -> Vec3 {
        Vec3::new(-self.yaw.sin(), 0.0, self.yaw.cos()).normalize()
    }
}

impl CameraController for FreeFlyController {
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32) {
        if input.mouse_look_active && input.mouse_delta != Vec2::ZERO {
            self.yaw += input.mouse_delta.x * self.mouse_sensitivity;
            self.pitch += input.mouse_delta.y * self.mouse_sensitivity;

            // Clamp pitch to avoid gimbal lock
            let max_pitch = std::f32::consts::FRAC_PI_2 - 0.01;
            self.pitch = self.pitch.clamp(-max_pitch, max_pitch);
            self.yaw %= std::f32::consts::TAU;
        }

        let forward = self.forward_direction();
        let velocity = input.movement(forward, self.right_direction());
        let speed = if input.sprint {
            self.sprint_speed
        } else {
            self.speed
        };

        camera.position += velocity * speed * dt;
        camera.target = camera.position + forward;
    }

    fn name(&self) -> &'static str {
        "FreeFly"
    }
}

/// Orbit camera controller
///
/// Keeps the camera on a sphere around `target`. Mouse drag orbits, scroll
/// zooms. With `auto_rotate` set the azimuth advances on its own.
pub struct OrbitController {
    pub target: Vec3,
    pub distance: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    /// Horizontal angle in radians
    pub azimuth: f32,
    /// Vertical angle in radians
    pub elevation: f32,
    /// Orbit sensitivity (radians per pixel)
    pub orbit_sensitivity: f32,
    /// Zoom factor per scroll unit
    pub zoom_factor: f32,
    pub auto_rotate: bool,
    /// Radians per second while auto-rotating
    pub rotate_speed: f32,
}

impl Default for OrbitController {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 10.0,
            min_distance: 0.5,
            max_distance: 500.0,
            azimuth: 0.0,
            elevation: std::f32::consts::FRAC_PI_6,
            orbit_sensitivity: 0.005,
            zoom_factor: 1.1,
            auto_rotate: false,
            rotate_speed: 0.5,
        }
    }
}

impl OrbitController {
    pub fn new(target: Vec3, distance: f32) -> Self {
        Self {
            target,
            distance,
            ..Default::default()
        }
    }

    pub fn from_camera(camera: &Camera) -> Self {
        let mut controller = Self::default();
        controller.sync_with_camera(camera);
        controller
    }

    pub fn with_auto_rotate(mut self, auto_rotate: bool) -> Self {
        self.auto_rotate = auto_rotate;
        self
    }

    /// Initialize from camera's current position and target
    pub fn sync_with_camera(&mut self, camera: &Camera) {
        self.target = camera.target;
        let offset = camera.position - camera.target;
        self.distance = offset.length().max(self.min_distance);
        self.elevation = (offset.y / self.distance).clamp(-1.0, 1.0).asin();
        self.azimuth = offset.z.atan2(offset.x);
    }

    /// Calculate camera position from orbit parameters
    fn calculate_position(&self) -> Vec3 {
        let x = self.distance * self.elevation.cos() * self.azimuth.cos();
        let y = self.distance * self.elevation.sin();
        let z = self.distance * self.elevation.cos() * self.azimuth.sin();
        self.target + Vec3::new(x, y, z)
    }
}

impl CameraController for OrbitController {
    fn update(&mut self, camera: &mut Camera, input: &CameraInput, dt: f32) {
        if input.scroll_delta > 0.0 {
            self.distance /= self.zoom_factor;
        } else if input.scroll_delta < 0.0 {
            self.distance *= self.zoom_factor;
        }
        self.distance = self.distance.clamp(self.min_distance, self.max_distance);

        if input.mouse_look_active && input.mouse_delta != Vec2::ZERO {
            self.azimuth += input.mouse_delta.x * self.orbit_sensitivity;
            self.elevation += input.mouse_delta.y * self.orbit_sensitivity;
        }
        if self.auto_rotate {
            self.azimuth += self.rotate_speed * dt;
        }

        let max_elevation = std::f32::consts::FRAC_PI_2 - 0.05;
        self.elevation = self.elevation.clamp(-max_elevation, max_elevation);
        self.azimuth %= std::f32::consts::TAU;

        camera.position = self.calculate_position();
        camera.target = self.target;
    }

    fn name(&self) -> &'static str {
        "Orbit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_fly_sprint_speed() {
        let mut camera = Camera::default();
        let mut controller = FreeFlyController::from_camera(&camera);
        let start = camera.position;
        let input = CameraInput {
            forward: true,
            sprint: true,
            ..Default::default()
        };

        controller.update(&mut camera, &input, 0.5);
        assert!(((camera.position - start).length() - 20.0).abs() < 1e-3);
    }

    #[test]
    fn test_free_fly_keeps_view_direction() {
        let mut camera = Camera::default();
        let before = camera.forward();
        let mut controller = FreeFlyController::from_camera(&camera);

        controller.update(&mut camera, &CameraInput::new(), 0.016);
        assert!((camera.forward() - before).length() < 1e-4);
    }

    #[test]
    fn test_orbit_auto_rotate_keeps_distance() {
        let mut camera = Camera::default();
        let mut controller = OrbitController::from_camera(&camera).with_auto_rotate(true);
        let distance = controller.distance;
        let before = camera.position;

        controller.update(&mut camera, &CameraInput::new(), 1.0);
        assert!(((camera.position - camera.target).length() - distance).abs() < 1e-4);
        assert!((camera.position - before).length() > 0.1);
    }
}
