//! Page texture allocation
//!
//! The cache never talks to a graphics API directly. It asks a
//! [`TextureAllocator`] for fixed-size 2D textures and uploads decoded pages
//! into them, always from the render thread.

use std::collections::HashMap;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::streaming::pool::{PixelBuffer, PixelFormat};

/// Opaque name of a GPU texture owned by an allocator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

/// Creates, fills and releases page textures
pub trait TextureAllocator {
    /// Allocate an uninitialized texture
    fn create(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<TextureHandle>;

    /// Replace the full contents of a texture
    fn upload(&mut self, handle: TextureHandle, pixels: &PixelBuffer) -> Result<()>;

    /// Release a texture. Unknown handles are ignored.
    fn destroy(&mut self, handle: TextureHandle);

    /// Number of live textures
    fn live_count(&self) -> usize;
}

struct HeadlessTexture {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

/// Allocator keeping texture contents in CPU memory
///
/// Used when no GPU is available and by tests to check what was uploaded.
#[derive(Default)]
pub struct HeadlessAllocator {
    next: u32,
    textures: HashMap<TextureHandle, HeadlessTexture>,
    uploads: u64,
}

impl HeadlessAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents of a texture
    pub fn contents(&self, handle: TextureHandle) -> Option<&[u8]> {
        self.textures.get(&handle).map(|t| t.data.as_slice())
    }

    /// Total uploads performed
    pub fn upload_count(&self) -> u64 {
        self.uploads
    }

    /// Whether a handle is live
    pub fn is_live(&self, handle: TextureHandle) -> bool {
        self.textures.contains_key(&handle)
    }
}

impl TextureAllocator for HeadlessAllocator {
    fn create(&mut self, width: u32, height: u32, format: PixelFormat) -> Result<TextureHandle> {
        self.next += 1;
        let handle = TextureHandle(self.next);
        self.textures.insert(
            handle,
            HeadlessTexture {
                width,
                height,
                format,
                data: vec![0; format.buffer_len(width, height)],
            },
        );
        Ok(handle)
    }

    fn upload(&mut self, handle: TextureHandle, pixels: &PixelBuffer) -> Result<()> {
        let texture = self
            .textures
            .get_mut(&handle)
            .ok_or_else(|| Error::Gpu(format!("upload to unknown texture {:?}", handle)))?;
        if texture.width != pixels.width
            || texture.height != pixels.height
            || texture.format != pixels.format
        {
            return Err(Error::Gpu(format!(
                "upload of {}x{} {:?} into {}x{} {:?} texture",
                pixels.width, pixels.height, pixels.format,
                texture.width, texture.height, texture.format
            )));
        }
        texture.data.copy_from_slice(&pixels.data);
        self.uploads += 1;
        Ok(())
    }

    fn destroy(&mut self, handle: TextureHandle) {
        self.textures.remove(&handle);
    }

    fn live_count(&self) -> usize {
        self.textures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_upload_roundtrip() {
        let mut alloc = HeadlessAllocator::new();
        let handle = alloc.create(2, 2, PixelFormat::RGBA8).unwrap();
        let pixels = PixelBuffer::solid(2, 2, PixelFormat::RGBA8, &[9, 8, 7, 6]);

        alloc.upload(handle, &pixels).unwrap();
        assert_eq!(alloc.contents(handle), Some(pixels.as_bytes()));
        assert_eq!(alloc.upload_count(), 1);
    }

    #[test]
    fn test_headless_rejects_mismatched_upload() {
        let mut alloc = HeadlessAllocator::new();
        let handle = alloc.create(2, 2, PixelFormat::RGBA8).unwrap();
        let pixels = PixelBuffer::new(4, 4, PixelFormat::RGBA8);
        assert!(alloc.upload(handle, &pixels).is_err());
    }

    #[test]
    fn test_headless_destroy() {
        let mut alloc = HeadlessAllocator::new();
        let a = alloc.create(1, 1, PixelFormat::RGBA8).unwrap();
        let b = alloc.create(1, 1, PixelFormat::RGBA8).unwrap();
        assert_ne!(a, b);
        alloc.destroy(a);
        assert!(!alloc.is_live(a));
        assert_eq!(alloc.live_count(), 1);
        assert!(alloc.upload(a, &PixelBuffer::new(1, 1, PixelFormat::RGBA8)).is_err());
    }
}
