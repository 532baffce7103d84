//! Texture loading and procedural fallbacks

use super::AssetResult;
use crate::backend::traits::*;
use crate::backend::types::*;
use glam::Vec3;
use image::{DynamicImage, GenericImageView};
use std::path::Path;

/// Tightly packed RGBA8 pixels ready for upload
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load texture from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AssetResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path)?;
        Ok(Self::from_image(img, &name))
    }

    /// Load `path` if given, otherwise or on failure use `fallback`
    pub fn load_or_else<F>(path: Option<&Path>, fallback: F) -> Self
    where
        F: FnOnce() -> Self,
    {
        let Some(path) = path else {
            return fallback();
        };
        match Self::from_file(path) {
            Ok(texture) => {
                log::info!(
                    "Loaded texture '{}' ({}x{})",
                    texture.name,
                    texture.width,
                    texture.height
                );
                texture
            }
            Err(err) => {
                log::warn!(
                    "Could not load '{}': {err}; using procedural texture",
                    path.display()
                );
                fallback()
            }
        }
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data: img.to_rgba8().into_raw(),
            name: name.to_string(),
        }
    }

    fn from_fn<F>(name: &str, width: u32, height: u32, mut pixel: F) -> Self
    where
        F: FnMut(u32, u32) -> [u8; 4],
    {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&pixel(x, y));
            }
        }
        Self {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data,
            name: name.to_string(),
        }
    }

    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self::from_fn(name, 1, 1, |_, _| color)
    }

    /// Running-bond brick pattern with light mortar lines
    pub fn bricks(size: u32) -> Self {
        let brick_h = (size / 8).max(2);
        let brick_w = brick_h * 2;
        Self::from_fn("bricks", size, size, |x, y| {
            let row = y / brick_h;
            let offset = if row % 2 == 0 { 0 } else { brick_w / 2 };
            let bx = (x + offset) % brick_w;
            let by = y % brick_h;
            if bx == 0 || by == 0 {
                [200, 195, 185, 255]
            } else {
                // Cheap per-brick tint so rows do not look uniform
                let id = (x + offset) / brick_w + row * 7;
                let tint = ((id * 37) % 24) as u8;
                [150 + tint, 60 + tint / 2, 45, 255]
            }
        })
    }

    /// Equirectangular sky: horizon gradient, ground and a sun disc
    pub fn sky(width: u32, height: u32, sun_direction: Vec3) -> Self {
        let sun = sun_direction.normalize();
        Self::from_fn("sky", width, height, |x, y| {
            let dir = equirect_direction(
                (x as f32 + 0.5) / width as f32,
                (y as f32 + 0.5) / height as f32,
            );
            let color = if dir.y >= 0.0 {
                let zenith = Vec3::new(0.15, 0.35, 0.75);
                let horizon = Vec3::new(0.75, 0.85, 0.95);
                let sky = horizon.lerp(zenith, dir.y.powf(0.5));
                if dir.dot(sun) > 0.995 {
                    Vec3::ONE
                } else {
                    sky
                }
            } else {
                Vec3::new(0.3, 0.27, 0.22)
            };
            let c = (color.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();
            [c.x as u8, c.y as u8, c.z as u8, 255]
        })
    }
}

/// Unit direction for equirectangular coordinates in [0, 1]
///
/// `u` wraps around the Y axis, `v = 0` is straight up.
pub fn equirect_direction(u: f32, v: f32) -> Vec3 {
    let phi = (u - 0.5) * std::f32::consts::TAU;
    let theta = v * std::f32::consts::PI;
    Vec3::new(theta.sin() * phi.sin(), theta.cos(), -theta.sin() * phi.cos())
}

/// GPU texture with its default view
#[derive(Debug, Clone, Copy)]
pub struct GpuTexture {
    pub handle: TextureHandle,
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
}

impl GpuTexture {
    /// Create and upload texture to GPU
    pub fn create<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        data: &TextureData,
    ) -> BackendResult<Self> {
        let handle = backend.create_texture(&TextureDescriptor {
            label: Some(data.name.clone()),
            width: data.width,
            height: data.height,
            format: data.format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            ..Default::default()
        })?;

        let view = backend.create_texture_view(handle)?;
        backend.write_texture(handle, &data.data, data.width, data.height);

        Ok(Self {
            handle,
            view,
            width: data.width,
            height: data.height,
        })
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        backend.destroy_texture_view(self.view);
        backend.destroy_texture(self.handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use rstest::rstest;

    #[test]
    fn test_procedural_sizes() {
        let bricks = TextureData::bricks(64);
        assert_eq!(bricks.data.len(), 64 * 64 * 4);
        let sky = TextureData::sky(128, 64, Vec3::new(0.0, 1.0, -1.0));
        assert_eq!(sky.data.len(), 128 * 64 * 4);
        assert!(sky.data.chunks_exact(4).all(|p| p[3] == 255));
    }

    #[rstest]
    #[case(0.5, 0.0, Vec3::Y)]
    #[case(0.5, 1.0, -Vec3::Y)]
    #[case(0.5, 0.5, -Vec3::Z)]
    #[case(0.75, 0.5, Vec3::X)]
    fn test_equirect_direction(#[case] u: f32, #[case] v: f32, #[case] expected: Vec3) {
        assert!(equirect_direction(u, v).abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn test_fallback_when_missing() {
        let texture = TextureData::load_or_else(Some(Path::new("/nope/missing.png")), || {
            TextureData::solid_color([1, 2, 3, 4], "fallback")
        });
        assert_eq!(texture.name, "fallback");

        let texture = TextureData::load_or_else(None, || TextureData::bricks(32));
        assert_eq!(texture.name, "bricks");
    }

    #[test]
    fn test_load_png_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("red.png");
        image::RgbaImage::from_pixel(2, 3, image::Rgba([255, 0, 0, 255]))
            .save(&path)
            .unwrap();

        let texture = TextureData::from_file(&path).unwrap();
        assert_eq!((texture.width, texture.height), (2, 3));
        assert_eq!(&texture.data[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_upload_writes_pixels() {
        let mut backend = MockBackend::new(1, 1);
        let gpu = GpuTexture::create(&mut backend, &TextureData::bricks(16)).unwrap();
        assert_eq!(backend.calls, ["write_texture 16x16"]);
        gpu.destroy(&mut backend);
        assert!(backend.live_textures.is_empty());
    }
}
