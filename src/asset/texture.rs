use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::{Handle, ResourceArena};
use crate::error::RenderError;

pub type TextureHandle = Handle<TextureEntry>;

/// Decoded RGBA8 pixels, kept CPU-side until first use on the GPU.
#[derive(Clone, Debug)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureImage {
    pub fn decode(path: &Path) -> Result<Self, RenderError> {
        if !path.exists() {
            return Err(RenderError::io(path, "file not found"));
        }
        let img = image::open(path).map_err(|err| RenderError::io(path, err))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }
}

pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

impl GpuTexture {
    pub fn upload(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        image: &TextureImage,
        label: Option<&str>,
    ) -> Self {
        let size = wgpu::Extent3d {
            width: image.width.max(1),
            height: image.height.max(1),
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label,
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &image.pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * size.width),
                rows_per_image: Some(size.height),
            },
            size,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }

    /// 1x1 texture bound where an optional texture is absent.
    pub fn solid(device: &wgpu::Device, queue: &wgpu::Queue, rgba: [u8; 4], label: &str) -> Self {
        let image = TextureImage {
            width: 1,
            height: 1,
            pixels: rgba.to_vec(),
        };
        Self::upload(device, queue, &image, Some(label))
    }
}

pub struct TextureEntry {
    path: PathBuf,
    image: TextureImage,
    refs: u32,
    gpu: Option<GpuTexture>,
}

impl TextureEntry {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn image(&self) -> &TextureImage {
        &self.image
    }

    pub fn ref_count(&self) -> u32 {
        self.refs
    }

    pub fn gpu(&self) -> Option<&GpuTexture> {
        self.gpu.as_ref()
    }
}

/// Reference-counted textures keyed by path. Callers hold plain handles and
/// pair every `acquire` with a `release`; the manager owns the slot table.
#[derive(Default)]
pub struct TextureManager {
    entries: ResourceArena<TextureEntry>,
    by_path: HashMap<PathBuf, TextureHandle>,
}

impl TextureManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, path: impl AsRef<Path>) -> Result<TextureHandle, RenderError> {
        let path = path.as_ref();
        if let Some(&handle) = self.by_path.get(path) {
            if let Some(entry) = self.entries.get_mut(handle) {
                entry.refs += 1;
                return Ok(handle);
            }
        }

        let image = TextureImage::decode(path)?;
        log::info!(
            "Loaded texture {:?} ({}x{})",
            path,
            image.width,
            image.height
        );
        let handle = self.entries.insert(TextureEntry {
            path: path.to_path_buf(),
            image,
            refs: 1,
            gpu: None,
        });
        self.by_path.insert(path.to_path_buf(), handle);
        Ok(handle)
    }

    /// Drops one reference. Returns `true` when this was the last one and the
    /// texture (and its GPU copy, if any) has been destroyed.
    pub fn release(&mut self, handle: TextureHandle) -> bool {
        let Some(entry) = self.entries.get_mut(handle) else {
            log::warn!("Release of stale texture handle {:?}", handle);
            return false;
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            return false;
        }

        if let Some(entry) = self.entries.release(handle) {
            self.by_path.remove(&entry.path);
            if let Some(gpu) = entry.gpu {
                gpu.texture.destroy();
            }
        }
        true
    }

    pub fn get(&self, handle: TextureHandle) -> Option<&TextureEntry> {
        self.entries.get(handle)
    }

    /// Uploads on first use and returns the GPU copy.
    pub fn gpu_texture(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        handle: TextureHandle,
    ) -> Option<&GpuTexture> {
        let entry = self.entries.get_mut(handle)?;
        if entry.gpu.is_none() {
            let label = entry.path.to_string_lossy().into_owned();
            entry.gpu = Some(GpuTexture::upload(device, queue, &entry.image, Some(&label)));
        }
        entry.gpu.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "clustered_deferred_{}_{}.png",
            name,
            std::process::id()
        ));
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]));
        img.save(&path).expect("write test png");
        path
    }

    #[test]
    fn acquire_same_path_shares_entry() {
        let path = write_png("shared");
        let mut manager = TextureManager::new();

        let a = manager.acquire(&path).unwrap();
        let b = manager.acquire(&path).unwrap();

        assert_eq!(a, b);
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get(a).unwrap().ref_count(), 2);
        assert_eq!(manager.get(a).unwrap().image().width, 2);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn last_release_frees_slot() {
        let path = write_png("release");
        let mut manager = TextureManager::new();

        let a = manager.acquire(&path).unwrap();
        let _ = manager.acquire(&path).unwrap();

        assert!(!manager.release(a));
        assert!(manager.release(a));
        assert!(manager.get(a).is_none());
        assert!(manager.is_empty());

        let again = manager.acquire(&path).unwrap();
        assert_ne!(again, a);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_file_is_io_error() {
        let mut manager = TextureManager::new();
        let err = manager
            .acquire("definitely/not/here.png")
            .expect_err("missing file must fail");
        assert!(matches!(err, RenderError::Io { .. }));
        assert!(manager.is_empty());
    }
}
