//! Page cache orchestrator
//!
//! The one object the renderer talks to each frame. It owns the resident
//! page set, both work queues, the loader threads and every GPU texture.
//!
//! Per page the cache moves through
//!
//! ```text
//! ABSENT -> QUEUED -> LOADED-PENDING -> RESIDENT -> ABSENT
//!                                  \-> FAILED
//! ```
//!
//! QUEUED and LOADED-PENDING are both tracked as "pending": a page is pending
//! from `add_needed` until `update` drains its result. A page is never
//! resident and pending at once, so its texture cannot be reused while a
//! loader works on it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::core::config::CacheConfig;
use crate::core::types::Result;
use crate::render::{TextureAllocator, TextureHandle};
use crate::streaming::catalog::TileSource;
use crate::streaming::loader::LoaderPool;
use crate::streaming::page::PageKey;
use crate::streaming::page_set::PageSet;
use crate::streaming::pool::{BufferPool, HandlePool, PixelBuffer};
use crate::streaming::queue::{LoadOutcome, LoadQueue, NeedQueue, NeedTask};

/// Texture to draw for a page
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageBinding {
    pub handle: TextureHandle,
    /// Page whose pixels the texture holds; `None` for the filler. When it
    /// differs from the requested page, texture coordinates must be scaled
    /// into the ancestor.
    pub source: Option<PageKey>,
}

/// Cumulative cache counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamingStats {
    /// Pages currently resident
    pub resident: usize,
    /// Pages queued or being decoded
    pub pending: usize,
    /// Pages marked unavailable
    pub failed: usize,
    /// Released textures awaiting reuse
    pub free_handles: usize,
    /// Need tasks accepted
    pub requested: u64,
    /// Pages made resident
    pub uploaded: u64,
    /// Resident pages evicted to make room
    pub evicted: u64,
    /// Decodes or uploads that failed
    pub load_failures: u64,
    /// Finished decodes dropped because nobody wanted them any more
    pub discarded: u64,
}

#[derive(Clone, Copy, Debug)]
struct Pending {
    /// Tick of the most recent request
    wanted: u64,
}

/// Bounded, asynchronously filled cache of page textures
pub struct PageCache<A: TextureAllocator> {
    config: CacheConfig,
    allocator: A,
    set: PageSet,
    handles: HandlePool,
    need: Arc<NeedQueue>,
    load: Arc<LoadQueue>,
    buffers: Arc<BufferPool>,
    loaders: LoaderPool,
    pending: HashMap<PageKey, Pending>,
    failed: HashSet<PageKey>,
    filler: TextureHandle,
    tick: u64,
    stats: StreamingStats,
    shut_down: bool,
}

/// One filler pixel in `config`'s format
fn filler_pixel(config: &CacheConfig) -> Vec<u8> {
    let channels = &config.filler_color[..config.channels as usize];
    if config.depth == 2 {
        channels.iter().flat_map(|&c| (c as u16 * 257).to_le_bytes()).collect()
    } else {
        channels.to_vec()
    }
}

impl<A: TextureAllocator> PageCache<A> {
    /// Validate `config`, create the filler texture and start the loaders
    pub fn new(config: CacheConfig, mut allocator: A, source: Arc<dyn TileSource>) -> Result<Self> {
        config.validate()?;
        let set = PageSet::new(config.capacity)?;
        let format = config.pixel_format();
        let tile = config.tile_size;

        let filler = allocator.create(tile, tile, format)?;
        allocator.upload(filler, &PixelBuffer::solid(tile, tile, format, &filler_pixel(&config)))?;

        let need = Arc::new(NeedQueue::new());
        let load = Arc::new(LoadQueue::new());
        // Enough idle buffers for every worker plus one frame of results
        let buffers = Arc::new(BufferPool::new(tile, tile, format, config.workers * 2));
        let loaders = LoaderPool::spawn(
            config.workers,
            Arc::clone(&need),
            Arc::clone(&load),
            source,
            Arc::clone(&buffers),
        )?;

        log::info!(
            "Page cache: {} pages of {}x{} ({} KiB each), {} loaders",
            config.capacity,
            tile,
            tile,
            config.page_bytes() / 1024,
            config.workers
        );

        Ok(Self {
            config,
            allocator,
            set,
            handles: HandlePool::new(),
            need,
            load,
            buffers,
            loaders,
            pending: HashMap::new(),
            failed: HashSet::new(),
            filler,
            tick: 0,
            stats: StreamingStats::default(),
            shut_down: false,
        })
    }

    /// Texture to draw for `key`: its own when resident, otherwise a stand-in.
    /// Touches whatever page supplies the texture.
    pub fn get_page(&mut self, key: PageKey) -> TextureHandle {
        self.get_binding(key).handle
    }

    /// Like [`get_page`](Self::get_page), also naming the page that supplied
    /// the texture
    pub fn get_binding(&mut self, key: PageKey) -> PageBinding {
        if let Some(binding) = self.bind_resident(key) {
            return binding;
        }
        if self.config.ancestor_fallback {
            for ancestor in key.ancestors() {
                if let Some(binding) = self.bind_resident(ancestor) {
                    return binding;
                }
            }
        }
        PageBinding {
            handle: self.filler,
            source: None,
        }
    }

    fn bind_resident(&mut self, key: PageKey) -> Option<PageBinding> {
        if !self.set.touch(key, self.tick) {
            return None;
        }
        let entry = self.set.get(key)?;
        Some(PageBinding {
            handle: entry.handle,
            source: Some(key),
        })
    }

    /// Request a page from the loaders
    ///
    /// # Arguments
    /// * `key` - Page to load
    /// * `priority` - Higher values are decoded first
    ///
    /// # Returns
    /// True if a new need task was queued; false if the page is resident,
    /// already pending, or known to be unavailable.
    pub fn add_needed(&mut self, key: PageKey, priority: i32) -> bool {
        if self.shut_down || self.set.contains(key) || self.failed.contains(&key) {
            return false;
        }
        if let Some(pending) = self.pending.get_mut(&key) {
            pending.wanted = self.tick;
            return false;
        }
        if !self.need.push(NeedTask { key, priority }) {
            return false;
        }
        log::trace!("Need page {} (priority {})", key, priority);
        self.pending.insert(key, Pending { wanted: self.tick });
        self.stats.requested += 1;
        true
    }

    /// Keep a resident page alive. Returns false if it is not resident.
    pub fn use_needed(&mut self, key: PageKey) -> bool {
        self.set.touch(key, self.tick)
    }

    /// Per-frame entry point: upload every finished decode.
    ///
    /// Never blocks on loaders. Pages stamped by later `get_page` and
    /// `use_needed` calls are stamped with `tick`.
    pub fn update(&mut self, tick: u64) {
        self.tick = self.tick.max(tick);
        let finished = self.load.drain();
        if finished.is_empty() {
            return;
        }

        let mut uploaded = 0;
        for task in finished {
            let Some(pending) = self.pending.remove(&task.key) else {
                // Result for a page flushed while its decode was queued
                if let LoadOutcome::Decoded(pixels) = task.outcome {
                    self.buffers.put(pixels);
                }
                continue;
            };

            match task.outcome {
                LoadOutcome::Failed(reason) => {
                    log::warn!("Page {} unavailable: {}", task.key, reason);
                    self.failed.insert(task.key);
                    self.stats.load_failures += 1;
                }
                LoadOutcome::Decoded(pixels) => {
                    if self.config.skip_unwanted && pending.wanted + 1 < self.tick {
                        log::trace!("Dropping unwanted page {}", task.key);
                        self.stats.discarded += 1;
                    } else if let Err(e) = self.make_resident(task.key, &pixels) {
                        log::warn!("Upload of page {} failed: {}", task.key, e);
                        self.failed.insert(task.key);
                        self.stats.load_failures += 1;
                    } else {
                        uploaded += 1;
                    }
                    self.buffers.put(pixels);
                }
            }
        }

        log::debug!(
            "Tick {}: uploaded {} pages ({} resident, {} pending)",
            self.tick,
            uploaded,
            self.set.len(),
            self.pending.len()
        );
    }

    fn make_resident(&mut self, key: PageKey, pixels: &PixelBuffer) -> Result<()> {
        if self.set.is_full() {
            if let Some(evicted) = self.set.evict() {
                self.handles.push(evicted.handle);
                self.stats.evicted += 1;
            }
        }

        let handle = match self.handles.pop() {
            Some(handle) => handle,
            None => self.allocator.create(
                self.config.tile_size,
                self.config.tile_size,
                self.config.pixel_format(),
            )?,
        };
        if let Err(e) = self.allocator.upload(handle, pixels) {
            self.handles.push(handle);
            return Err(e);
        }

        if let Some(previous) = self.set.insert(key, handle, self.tick) {
            self.handles.push(previous.handle);
        }
        self.stats.uploaded += 1;
        Ok(())
    }

    /// Drop every resident page and all queued work, and forget failures.
    ///
    /// Decodes already running are left alone; their pages stay pending and
    /// their results land on a later `update`.
    pub fn flush(&mut self) {
        let cancelled = self.need.clear();
        for task in &cancelled {
            self.pending.remove(&task.key);
        }
        let mut discarded = 0;
        for task in self.load.drain() {
            self.pending.remove(&task.key);
            if let LoadOutcome::Decoded(pixels) = task.outcome {
                self.buffers.put(pixels);
            }
            discarded += 1;
        }
        let resident = self.set.drain();
        for entry in &resident {
            self.handles.push(entry.handle);
        }
        self.failed.clear();

        log::info!(
            "Flushed page cache: {} resident, {} queued, {} finished dropped",
            resident.len(),
            cancelled.len(),
            discarded
        );
    }

    /// Stop and join the loaders, then release every texture. Idempotent;
    /// also run on drop.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let discarded = self.need.stop();
        self.loaders.join();
        // Decodes that finished after the stop are never uploaded
        let unconsumed = self.load.drain().len();
        self.pending.clear();

        for entry in self.set.drain() {
            self.allocator.destroy(entry.handle);
        }
        let free: Vec<TextureHandle> = self.handles.drain().collect();
        for handle in free {
            self.allocator.destroy(handle);
        }
        self.allocator.destroy(self.filler);

        log::info!(
            "Page cache shut down ({} queued and {} finished loads discarded)",
            discarded,
            unconsumed
        );
    }

    /// Whether the page holds a texture
    pub fn is_resident(&self, key: PageKey) -> bool {
        self.set.contains(key)
    }

    /// Whether the page is queued, being decoded, or decoded and waiting for
    /// the next `update`
    pub fn is_pending(&self, key: PageKey) -> bool {
        self.pending.contains_key(&key)
    }

    /// Whether the page failed to load since the last flush
    pub fn is_failed(&self, key: PageKey) -> bool {
        self.failed.contains(&key)
    }

    /// Number of resident pages, never more than the capacity
    pub fn resident_count(&self) -> usize {
        self.set.len()
    }

    /// Number of pages requested but not yet resident
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Resident pages, least recently used first
    pub fn resident_keys(&self) -> impl Iterator<Item = PageKey> + '_ {
        self.set.keys()
    }

    /// Texture drawn in place of missing pages
    pub fn filler(&self) -> TextureHandle {
        self.filler
    }

    /// Tick of the latest `update`
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Settings the cache was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The texture allocator, for binding resident handles
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Snapshot of the counters plus current set sizes
    pub fn stats(&self) -> StreamingStats {
        StreamingStats {
            resident: self.set.len(),
            pending: self.pending.len(),
            failed: self.failed.len(),
            free_handles: self.handles.len(),
            ..self.stats
        }
    }
}

impl<A: TextureAllocator> Drop for PageCache<A> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
