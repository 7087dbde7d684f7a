//! wgpu-backed page textures

use std::collections::HashMap;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::render::texture::{TextureAllocator, TextureHandle};
use crate::streaming::pool::{PixelBuffer, PixelFormat};

/// Allocates page textures on a wgpu device
pub struct WgpuAllocator {
    device: wgpu::Device,
    queue: wgpu::Queue,
    textures: HashMap<TextureHandle, wgpu::Texture>,
    next: u32,
}

impl WgpuAllocator {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            textures: HashMap::new(),
            next: 0,
        }
    }

    /// Look up the wgpu texture behind a handle, for binding
    pub fn texture(&self, handle: TextureHandle) -> Option<&wgpu::Texture> {
        self.textures.get(&handle)
    }

    fn texture_format(&self, format: PixelFormat) -> Result<wgpu::TextureFormat> {
        let wide = format.depth == 2;
        if wide && !self.device.features().contains(wgpu::Features::TEXTURE_FORMAT_16BIT_NORM) {
            return Err(Error::Gpu("16-bit page textures need TEXTURE_FORMAT_16BIT_NORM".into()));
        }
        match (format.channels, wide) {
            (1, false) => Ok(wgpu::TextureFormat::R8Unorm),
            (2, false) => Ok(wgpu::TextureFormat::Rg8Unorm),
            (4, false) => Ok(wgpu::TextureFormat::Rgba8Unorm),
            (1, true) => Ok(wgpu::TextureFormat::R16Unorm),
            (2, true) => Ok(wgpu::TextureFormat::Rg16Unorm),
            (4, true) => Ok(wgpu::TextureFormat::Rgba16Unorm),
            _ => Err(Error::Gpu(format!(
                "no texture format for {} channels; configure 1, 2 or 4",
                format.channels
            ))),
        }
    }
}

impl TextureAllocator for WgpuAllocator {
    fn create(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<TextureHandle> {
        let texture_format = self.texture_format(format)?;
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("thumb_page"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.next += 1;
        let handle = TextureHandle(self.next);
        self.textures.insert(handle, texture);
        log::trace!("Created page texture {:?} ({}x{} {:?})", handle, width, height, texture_format);
        Ok(handle)
    }

    fn upload(&mut self, handle: TextureHandle, pixels: &PixelBuffer) -> Result<()> {
        let texture = self
            .textures
            .get(&handle)
            .ok_or_else(|| Error::Gpu(format!("upload to unknown texture {:?}", handle)))?;
        let size = texture.size();
        if size.width != pixels.width || size.height != pixels.height {
            return Err(Error::Gpu(format!(
                "upload of {}x{} pixels into {}x{} texture",
                pixels.width, pixels.height, size.width, size.height
            )));
        }

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels.as_bytes(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(pixels.row_bytes() as u32),
                rows_per_image: Some(pixels.height),
            },
            size,
        );
        Ok(())
    }

    fn destroy(&mut self, handle: TextureHandle) {
        if let Some(texture) = self.textures.remove(&handle) {
            texture.destroy();
        }
    }

    fn live_count(&self) -> usize {
        self.textures.len()
    }
}
