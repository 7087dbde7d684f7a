//! Out-of-core page streaming
//!
//! Pages of huge spherical images are decoded on loader threads and kept in
//! a bounded set of GPU textures. Each frame the renderer walks the page
//! quadtree against its frusta ([`Walker`]), requesting what it sees from the
//! [`PageCache`], then calls [`PageCache::update`] to upload finished pages.

pub mod detail;
pub mod page;
pub mod tree;
pub mod pool;
pub mod page_set;
pub mod queue;
pub mod catalog;
pub mod loader;
pub mod cache;
pub mod walker;

pub use page::{FileId, Page, PageId, PageKey};
pub use tree::{PageTree, PixelRegion, page_region};
pub use pool::{BufferPool, HandlePool, PixelBuffer, PixelFormat};
pub use page_set::{PageSet, ResidentEntry};
pub use queue::{LoadOutcome, LoadQueue, LoadedTask, NeedQueue, NeedTask};
pub use catalog::{FileSpec, FileTable, Layout, TileSource};
pub use loader::LoaderPool;
pub use cache::{PageBinding, PageCache, StreamingStats};
pub use walker::{DrawItem, View, WalkResult, Walker};
