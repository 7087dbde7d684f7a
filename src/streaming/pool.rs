//! Recycling pools for page memory
//!
//! - [`BufferPool`]: CPU pixel buffers shared between loader threads and the
//!   render thread. Loaders take a buffer, decode into it, and hand it over
//!   inside a loaded task; the render thread returns it after upload.
//! - [`HandlePool`]: GPU texture handles released by eviction, reused before
//!   any new texture is allocated. Owned by the render thread.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::render::TextureHandle;

/// Layout of one pixel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    /// Channels per pixel (1-4)
    pub channels: u8,
    /// Bytes per channel (1 or 2)
    pub depth: u8,
}

impl PixelFormat {
    pub const RGBA8: PixelFormat = PixelFormat { channels: 4, depth: 1 };

    pub fn new(channels: u8, depth: u8) -> Self {
        Self { channels, depth }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.channels as usize * self.depth as usize
    }

    /// Bytes needed for a `width` x `height` image
    pub fn buffer_len(&self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

/// Decoded pixels of one page, row-major, tightly packed
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("data", &format_args!("<{} bytes>", self.data.len()))
            .finish()
    }
}

impl PixelBuffer {
    /// Create a zero-filled buffer
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            data: vec![0; format.buffer_len(width, height)],
        }
    }

    /// Create a buffer filled with one pixel value
    ///
    /// `pixel` is truncated or zero-extended to the format's pixel size.
    pub fn solid(width: u32, height: u32, format: PixelFormat, pixel: &[u8]) -> Self {
        let bpp = format.bytes_per_pixel();
        let mut texel = vec![0u8; bpp];
        for (dst, src) in texel.iter_mut().zip(pixel) {
            *dst = *src;
        }
        let data = texel.repeat(width as usize * height as usize);
        Self { width, height, format, data }
    }

    /// Bytes in one row
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Thread-safe pool of same-sized pixel buffers
pub struct BufferPool {
    width: u32,
    height: u32,
    format: PixelFormat,
    /// Upper bound on idle buffers kept around
    max_idle: usize,
    avail: Mutex<Vec<PixelBuffer>>,
}

impl BufferPool {
    /// Create a pool of `width` x `height` buffers in `format`
    pub fn new(width: u32, height: u32, format: PixelFormat, max_idle: usize) -> Self {
        Self {
            width,
            height,
            format,
            max_idle,
            avail: Mutex::new(Vec::new()),
        }
    }

    /// Take a buffer, allocating if none is idle
    ///
    /// Recycled buffers keep their previous contents; decoders overwrite
    /// every byte.
    pub fn get(&self) -> PixelBuffer {
        let recycled = self
            .avail
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop();
        recycled.unwrap_or_else(|| PixelBuffer::new(self.width, self.height, self.format))
    }

    /// Return a buffer for reuse. Foreign-shaped buffers are dropped.
    pub fn put(&self, buffer: PixelBuffer) {
        if buffer.width != self.width
            || buffer.height != self.height
            || buffer.format != self.format
            || buffer.data.len() != self.format.buffer_len(self.width, self.height)
        {
            return;
        }
        let mut avail = self.avail.lock().unwrap_or_else(|e| e.into_inner());
        if avail.len() < self.max_idle {
            avail.push(buffer);
        }
    }

    /// Number of idle buffers
    pub fn idle_count(&self) -> usize {
        self.avail.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// FIFO of released GPU texture handles
#[derive(Debug, Default)]
pub struct HandlePool {
    free: VecDeque<TextureHandle>,
}

impl HandlePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Release a handle for reuse
    pub fn push(&mut self, handle: TextureHandle) {
        debug_assert!(!self.free.contains(&handle), "handle {:?} released twice", handle);
        self.free.push_back(handle);
    }

    /// Take the oldest released handle
    pub fn pop(&mut self) -> Option<TextureHandle> {
        self.free.pop_front()
    }

    pub fn len(&self) -> usize {
        self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// Remove every handle (for destruction at shutdown)
    pub fn drain(&mut self) -> impl Iterator<Item = TextureHandle> + '_ {
        self.free.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_sizes() {
        assert_eq!(PixelFormat::RGBA8.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::new(1, 2).buffer_len(4, 4), 32);
    }

    #[test]
    fn test_solid_buffer() {
        let buf = PixelBuffer::solid(2, 2, PixelFormat::new(3, 1), &[1, 2, 3, 4]);
        assert_eq!(buf.data, vec![1, 2, 3, 1, 2, 3, 1, 2, 3, 1, 2, 3]);
        assert_eq!(buf.row_bytes(), 6);
    }

    #[test]
    fn test_buffer_pool_recycles() {
        let pool = BufferPool::new(8, 8, PixelFormat::RGBA8, 4);
        let mut buf = pool.get();
        assert_eq!(buf.len(), 8 * 8 * 4);
        buf.data[0] = 42;
        pool.put(buf);
        assert_eq!(pool.idle_count(), 1);

        let again = pool.get();
        assert_eq!(again.data[0], 42);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_buffer_pool_rejects_foreign_buffers() {
        let pool = BufferPool::new(8, 8, PixelFormat::RGBA8, 4);
        pool.put(PixelBuffer::new(4, 4, PixelFormat::RGBA8));
        pool.put(PixelBuffer::new(8, 8, PixelFormat::new(1, 1)));
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn test_buffer_pool_caps_idle() {
        let pool = BufferPool::new(2, 2, PixelFormat::RGBA8, 1);
        pool.put(pool.get());
        pool.put(PixelBuffer::new(2, 2, PixelFormat::RGBA8));
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn test_handle_pool_fifo() {
        let mut pool = HandlePool::new();
        pool.push(TextureHandle(3));
        pool.push(TextureHandle(7));
        assert_eq!(pool.pop(), Some(TextureHandle(3)));
        assert_eq!(pool.pop(), Some(TextureHandle(7)));
        assert!(pool.pop().is_none());
    }
}
