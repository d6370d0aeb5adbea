//! Texture loading and management

use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView};

use crate::backend::{
    GraphicsBackend, Owned, TextureDescriptor, TextureFormat, TextureHandle, TextureUsage,
    TextureViewHandle,
};
use crate::error::{AssetError, RenderError, RenderResult};

/// Decoded RGBA8 pixels, first row at the bottom
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load texture from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AssetError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AssetError::NotFound(path.to_path_buf()));
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path).map_err(|source| AssetError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_image(img, &name))
    }

    /// Load texture from encoded bytes
    pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self, AssetError> {
        let img = image::load_from_memory(bytes).map_err(|source| AssetError::Image {
            path: PathBuf::from(name),
            source,
        })?;
        Ok(Self::from_image(img, name))
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        // Texture coordinates have v pointing up
        let img = img.flipv();
        let (width, height) = img.dimensions();

        Self {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data: img.to_rgba8().into_raw(),
            name: name.to_string(),
        }
    }

    /// Create a solid color texture
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8UnormSrgb,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }

    pub fn black() -> Self {
        Self::solid_color([0, 0, 0, 255], "black")
    }

    /// Flat tangent-space normal (0, 0, 1)
    pub fn default_normal() -> Self {
        Self::solid_color([128, 128, 255, 255], "default_normal")
    }

    /// Shown where a texture is missing
    pub fn magenta() -> Self {
        Self::solid_color([255, 0, 255, 255], "magenta")
    }
}

/// A texture resident on the GPU, with the view shaders sample
#[derive(Debug)]
pub struct Texture {
    texture: Owned<TextureHandle>,
    view: Owned<TextureViewHandle>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub name: String,
    /// File the texture was loaded from, if any
    pub path: Option<PathBuf>,
}

impl Texture {
    /// Create and upload texture to GPU
    pub fn create<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        data: &TextureData,
    ) -> RenderResult<Self> {
        let handle = backend
            .create_texture(&TextureDescriptor {
                label: Some(data.name.clone()),
                width: data.width,
                height: data.height,
                format: data.format,
                usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            })
            .map_err(RenderError::creation("texture"))?;
        let queue = backend.release_queue();
        let texture = Owned::new(handle, queue.clone());

        let view = backend
            .create_texture_view(handle)
            .map_err(RenderError::creation("texture view"))?;
        let view = Owned::new(view, queue);
        backend.write_texture(handle, &data.data, data.width, data.height);

        log::debug!(
            "Created texture '{}' ({}x{})",
            data.name,
            data.width,
            data.height
        );

        Ok(Self {
            texture,
            view,
            width: data.width,
            height: data.height,
            format: data.format,
            name: data.name.clone(),
            path: None,
        })
    }

    pub fn handle(&self) -> TextureHandle {
        self.texture.handle()
    }

    pub fn view(&self) -> TextureViewHandle {
        self.view.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyBackend;

    #[test]
    fn test_missing_file_is_not_found() {
        let err = TextureData::from_file("does/not/exist.png").err().unwrap();
        assert!(matches!(err, AssetError::NotFound(_)));
    }

    #[test]
    fn test_loaded_rows_are_flipped() {
        let mut img = image::RgbaImage::new(1, 2);
        img.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        img.put_pixel(0, 1, image::Rgba([0, 0, 255, 255]));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("column.png");
        img.save(&path).unwrap();

        let data = TextureData::from_file(&path).unwrap();
        assert_eq!((data.width, data.height), (1, 2));
        assert_eq!(&data.data[..4], &[0, 0, 255, 255]);
        assert_eq!(&data.data[4..], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_dropping_texture_releases_both_handles() {
        let mut backend = DummyBackend::new(16, 16);
        let texture = Texture::create(&mut backend, &TextureData::white()).unwrap();
        let (handle, view) = (texture.handle(), texture.view());

        drop(texture);
        backend.collect_garbage();
        assert!(!backend.is_live(handle));
        assert!(!backend.is_live(view));
    }
}
