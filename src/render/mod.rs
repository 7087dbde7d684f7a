//! GPU-side collaborators of the page cache

pub mod texture;
pub mod gpu;
pub mod context;

pub use texture::{TextureAllocator, TextureHandle, HeadlessAllocator};
pub use gpu::WgpuAllocator;
pub use context::GpuContext;
