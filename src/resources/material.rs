//! Surface materials

use glam::Vec3;

use super::TextureId;

/// Material properties and texture slots. Only the albedo texture is sampled
/// by the built-in program; the others are carried for custom programs.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub albedo: Vec3,
    pub emissive: Vec3,
    /// 0 = rough, 1 = mirror
    pub smoothness: f32,

    /// Texture IDs (None means use the white fallback)
    pub albedo_texture: Option<TextureId>,
    pub emissive_texture: Option<TextureId>,
    pub specular_texture: Option<TextureId>,
    pub normal_texture: Option<TextureId>,
    pub bump_texture: Option<TextureId>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            albedo: Vec3::ONE,
            emissive: Vec3::ZERO,
            smoothness: 0.0,
            albedo_texture: None,
            emissive_texture: None,
            specular_texture: None,
            normal_texture: None,
            bump_texture: None,
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_albedo(mut self, albedo: Vec3) -> Self {
        self.albedo = albedo;
        self
    }

    pub fn with_emissive(mut self, emissive: Vec3) -> Self {
        self.emissive = emissive;
        self
    }

    pub fn with_albedo_texture(mut self, texture: TextureId) -> Self {
        self.albedo_texture = Some(texture);
        self
    }

    /// Map a Phong shininess exponent (0..=100 in the usual exporters) to smoothness.
    pub fn with_shininess(mut self, shininess: f32) -> Self {
        self.smoothness = (shininess / 100.0).clamp(0.0, 1.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shininess_maps_to_smoothness() {
        assert_eq!(Material::new("a").with_shininess(50.0).smoothness, 0.5);
        assert_eq!(Material::new("b").with_shininess(900.0).smoothness, 1.0);
    }
}
