//! Texture pixel data, decoded or generated on the CPU, and its GPU upload.

use crate::backend::{
    BackendResult, GraphicsBackend, TextureDescriptor, TextureFormat, TextureHandle,
    TextureUsage, TextureViewHandle,
};
use image::DynamicImage;
use std::path::Path;
use thiserror::Error;

/// Failure to get texture bytes into memory.
#[derive(Debug, Error)]
pub enum TextureError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("could not decode {name}: {source}")]
    Decode {
        name: String,
        source: image::ImageError,
    },
}

/// Tightly packed RGBA8 pixels plus the metadata the upload needs.
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Decode an image file. The texture is named after the file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TextureError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map_or_else(|| "unknown".to_string(), |n| n.to_string_lossy().into_owned());

        let bytes = std::fs::read(path).map_err(|source| TextureError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_bytes(&bytes, &name)
    }

    /// Decode an in-memory image (PNG, JPEG, anything the `image` crate
    /// recognizes).
    pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self, TextureError> {
        let img = image::load_from_memory(bytes).map_err(|source| TextureError::Decode {
            name: name.to_string(),
            source,
        })?;
        Ok(Self::from_image(img, name))
    }

    /// Flatten any decoded image to RGBA8. Color textures default to sRGB;
    /// call [`linear`](Self::linear) for data textures.
    fn from_image(img: DynamicImage, name: &str) -> Self {
        let rgba = img.into_rgba8();
        let (width, height) = rgba.dimensions();

        Self {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data: rgba.into_raw(),
            name: name.to_string(),
        }
    }

    /// Reinterpret the pixel data as linear (non-sRGB). Normal and bump
    /// maps store vectors, not colors, and must not be gamma decoded.
    pub fn linear(mut self) -> Self {
        self.format = TextureFormat::Rgba8Unorm;
        self
    }

    /// 1x1 texture of one color.
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8UnormSrgb,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    /// Neutral fallback for diffuse and specular slots.
    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }

    /// Fallback for emissive and mask slots.
    pub fn black() -> Self {
        Self::solid_color([0, 0, 0, 255], "black")
    }

    /// Create a default normal map (tangent-space +Z)
    pub fn flat_normal() -> Self {
        Self::solid_color([128, 128, 255, 255], "flat_normal").linear()
    }

    /// Square checker pattern with `cell`-pixel squares, alternating
    /// between the two colors.
    pub fn checkerboard(size: u32, cell: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let cell = cell.max(1);
        let mut data = Vec::with_capacity((size * size * 4) as usize);

        for y in 0..size {
            for x in 0..size {
                let even = (x / cell + y / cell) % 2 == 0;
                data.extend_from_slice(if even { &color1 } else { &color2 });
            }
        }

        Self {
            width: size,
            height: size,
            format: TextureFormat::Rgba8UnormSrgb,
            data,
            name: "checkerboard".to_string(),
        }
    }
}

/// A texture that lives on the GPU, with the default all-mips view.
pub struct GpuTexture {
    pub handle: TextureHandle,
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub name: String,
}

impl GpuTexture {
    /// Allocate a texture for `data`, upload the pixels, and create a view.
    pub fn create(backend: &mut dyn GraphicsBackend, data: &TextureData) -> BackendResult<Self> {
        let handle = backend.create_texture(&TextureDescriptor {
            label: Some(data.name.clone()),
            width: data.width,
            height: data.height,
            format: data.format,
            ..Default::default()
        })?;

        let view = backend.create_texture_view(handle)?;
        backend.write_texture(handle, &data.data, data.width, data.height);

        Ok(Self {
            handle,
            view,
            width: data.width,
            height: data.height,
            format: data.format,
            name: data.name.clone(),
        })
    }

    /// Release the texture and its view.
    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        backend.destroy_texture_view(self.view);
        backend.destroy_texture(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_color_is_single_pixel() {
        let texture = TextureData::solid_color([10, 20, 30, 255], "solid");
        assert_eq!((texture.width, texture.height), (1, 1));
        assert_eq!(texture.data, vec![10, 20, 30, 255]);
    }

    #[test]
    fn test_flat_normal_is_linear_up_vector() {
        let normal = TextureData::flat_normal();
        assert_eq!(normal.format, TextureFormat::Rgba8Unorm);
        assert_eq!(normal.data, vec![128, 128, 255, 255]);
    }

    #[test]
    fn test_checkerboard_alternates_at_cell_boundaries() {
        let board = TextureData::checkerboard(32, 8, [255, 0, 0, 255], [0, 0, 255, 255]);
        assert_eq!(board.data.len(), 32 * 32 * 4);
        assert_eq!(&board.data[0..4], &[255, 0, 0, 255]);
        // First pixel of the second cell in the top row.
        assert_eq!(&board.data[(8 * 4)..(8 * 4 + 4)], &[0, 0, 255, 255]);
    }

    #[test]
    fn test_from_bytes_decodes_png() {
        let img = image::RgbaImage::from_pixel(4, 2, image::Rgba([0, 128, 255, 255]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();

        let data = TextureData::from_bytes(bytes.get_ref(), "gradient").unwrap();
        assert_eq!((data.width, data.height), (4, 2));
        assert_eq!(data.format, TextureFormat::Rgba8UnormSrgb);
        assert_eq!(&data.data[0..4], &[0, 128, 255, 255]);
    }

    #[test]
    fn test_from_file_names_texture_after_file() {
        let path = std::env::temp_dir().join("deferred_engine_checker_roundtrip.png");
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255]));
        img.save(&path).unwrap();

        let data = TextureData::from_file(&path);
        std::fs::remove_file(&path).unwrap();

        let data = data.unwrap();
        assert_eq!((data.width, data.height), (2, 2));
        assert_eq!(data.name, "deferred_engine_checker_roundtrip.png");
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        let err = TextureData::from_bytes(&[0, 1, 2, 3], "junk").unwrap_err();
        assert!(matches!(err, TextureError::Decode { .. }));
    }
}
