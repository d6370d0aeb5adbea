//! Scene management

mod camera;
mod camera_controller;
mod light;
mod transform;

pub use camera::*;
pub use camera_controller::*;
pub use light::*;
pub use transform::*;

use glam::Vec3;

use crate::resources::{ModelId, ProgramId};
use crate::uniforms::UniformRange;

/// A drawable object: one model drawn with one program
#[derive(Debug, Clone)]
pub struct GameObject {
    pub name: String,
    pub transform: Transform,
    pub model: ModelId,
    pub program: ProgramId,
    /// Where this frame's object block lives in the uniform arena. Reset
    /// every time the frame is packed.
    pub uniform_range: Option<UniformRange>,
}

impl GameObject {
    pub fn new(name: impl Into<String>, model: ModelId, program: ProgramId) -> Self {
        Self {
            name: name.into(),
            transform: Transform::default(),
            model,
            program,
            uniform_range: None,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.transform.position = position;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.transform.scale = scale;
        self
    }
}

/// Everything a frame draws. Object order is draw order.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    pub camera: Camera,
    pub lights: Vec<Light>,
    pub objects: Vec<GameObject>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_directional_light(&mut self, direction: Vec3, color: Vec3) {
        self.lights.push(Light::directional(direction, color));
    }

    pub fn add_point_light(&mut self, position: Vec3, color: Vec3) {
        self.lights.push(Light::point(position, color));
    }

    /// Add an object and return its index
    pub fn add_object(&mut self, object: GameObject) -> usize {
        self.objects.push(object);
        self.objects.len() - 1
    }

    pub fn object(&self, index: usize) -> Option<&GameObject> {
        self.objects.get(index)
    }

    pub fn object_mut(&mut self, index: usize) -> Option<&mut GameObject> {
        self.objects.get_mut(index)
    }

    pub fn find_object(&self, name: &str) -> Option<&GameObject> {
        self.objects.iter().find(|o| o.name == name)
    }
}
