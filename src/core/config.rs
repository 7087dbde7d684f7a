//! Cache configuration
//!
//! Everything here is supplied once at construction. The cache never re-reads
//! its configuration at runtime.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::streaming::catalog::FileSpec;
use crate::streaming::pool::PixelFormat;

/// Configuration for a [`PageCache`](crate::streaming::PageCache).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of GPU-resident pages
    pub capacity: usize,
    /// Number of background loader threads
    pub workers: usize,
    /// Edge length of a page texture in pixels
    pub tile_size: u32,
    /// Channels per pixel of every page texture (1-4)
    pub channels: u8,
    /// Bytes per channel (1 or 2)
    pub depth: u8,
    /// Texel-to-pixel ratio below which a page's children are requested
    pub cutoff: f64,
    /// Pages at or above this level are always in demand (coarse base layer)
    pub min_level: u32,
    /// Serve the nearest resident ancestor instead of the filler
    pub ancestor_fallback: bool,
    /// Drop completed loads for pages nobody asked for since they were queued
    pub skip_unwanted: bool,
    /// RGBA color of the placeholder texture
    pub filler_color: [u8; 4],
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            workers: 2,
            tile_size: 256,
            channels: 4,
            depth: 1,
            cutoff: 1.0,
            min_level: 1,
            ancestor_fallback: false,
            skip_unwanted: false,
            filler_color: [128, 128, 128, 255],
        }
    }
}

impl CacheConfig {
    /// Check the configuration for programming errors.
    pub fn validate(&self) -> Result<()> {
        if self.capacity < 1 {
            return Err(Error::Config("cache capacity must be at least 1".into()));
        }
        if self.workers < 1 {
            return Err(Error::Config("loader worker count must be at least 1".into()));
        }
        if self.tile_size == 0 {
            return Err(Error::Config("tile size must be non-zero".into()));
        }
        if !(1..=4).contains(&self.channels) {
            return Err(Error::Config(format!("unsupported channel count {}", self.channels)));
        }
        if self.depth != 1 && self.depth != 2 {
            return Err(Error::Config(format!("unsupported channel depth {}", self.depth)));
        }
        if !(self.cutoff.is_finite() && self.cutoff > 0.0) {
            return Err(Error::Config(format!("cutoff must be positive, got {}", self.cutoff)));
        }
        Ok(())
    }

    /// Pixel format of page textures.
    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::new(self.channels, self.depth)
    }

    /// Size in bytes of one decoded page.
    pub fn page_bytes(&self) -> usize {
        self.pixel_format().buffer_len(self.tile_size, self.tile_size)
    }

    /// Load from a JSON file
    pub fn load_sync(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a JSON file
    pub fn save_sync(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Top-level manifest: the cache plus the files it streams from.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ThumbConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub files: Vec<FileSpec>,
    /// Inner radius of the shell the pages are draped on
    #[serde(default = "default_radius")]
    pub r0: f64,
    /// Outer radius of the shell
    #[serde(default = "default_radius")]
    pub r1: f64,
}

fn default_radius() -> f64 {
    1.0
}

impl ThumbConfig {
    /// Load a manifest from a JSON file. Relative file paths are resolved
    /// against the manifest's directory.
    pub fn load_sync(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&json)?;
        config.cache.validate()?;
        if config.r1 < config.r0 {
            return Err(Error::Config(format!(
                "outer radius {} is smaller than inner radius {}",
                config.r1, config.r0
            )));
        }
        if let Some(base) = path.parent() {
            for spec in &mut config.files {
                spec.resolve_relative(base);
            }
        }
        Ok(config)
    }
}
