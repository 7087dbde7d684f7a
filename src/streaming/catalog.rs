//! File catalog: where page pixels come from
//!
//! Each file is one equirectangular image stored in one of three layouts:
//!
//! - `pyramid`: one image file per page, addressed by a pattern whose `%d`
//!   placeholders are replaced by level, row and column in that order
//!   (`"tiles/%d/%d-%d.png"`).
//! - `image`: a single image, decoded once on first use and then cropped and
//!   resampled per page.
//! - `raw`: an uncompressed, interleaved raster in the page pixel format.
//!   Only the sampled rows of a page are read from disk.
//!
//! Pages keep the source's aspect: a page partially outside the image is
//! decoded into the top-left corner of its tile and the rest is zeroed.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use image::DynamicImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::core::config::CacheConfig;
use crate::core::error::Error;
use crate::core::types::Result;
use crate::streaming::detail::{max_level, page_span};
use crate::streaming::page::{FileId, PageId, PageKey};
use crate::streaming::pool::{PixelBuffer, PixelFormat};
use crate::streaming::tree::{PageTree, PixelRegion, page_region};

/// Produces the pixels of a page. Called from loader threads.
pub trait TileSource: Send + Sync {
    /// Decode `key` into `buffer`, overwriting every byte
    fn decode(&self, key: PageKey, buffer: &mut PixelBuffer) -> Result<()>;
}

/// Storage layout of a file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum Layout {
    Pyramid { pattern: String },
    Image { path: PathBuf },
    Raw {
        path: PathBuf,
        /// Bytes to skip before the first pixel
        #[serde(default)]
        offset: u64,
    },
}

/// One entry of the manifest
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileSpec {
    /// Full-resolution width in pixels. May be omitted for `image` files.
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(flatten)]
    pub layout: Layout,
}

impl FileSpec {
    pub fn pyramid(pattern: impl Into<String>, width: u32, height: u32) -> Self {
        Self { width, height, layout: Layout::Pyramid { pattern: pattern.into() } }
    }

    pub fn image(path: impl Into<PathBuf>) -> Self {
        Self { width: 0, height: 0, layout: Layout::Image { path: path.into() } }
    }

    pub fn raw(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self { width, height, layout: Layout::Raw { path: path.into(), offset: 0 } }
    }

    /// Make relative paths relative to `base`
    pub fn resolve_relative(&mut self, base: &Path) {
        match &mut self.layout {
            Layout::Pyramid { pattern } => {
                if Path::new(pattern.as_str()).is_relative() {
                    *pattern = base.join(pattern.as_str()).to_string_lossy().into_owned();
                }
            }
            Layout::Image { path } | Layout::Raw { path, .. } => {
                if path.is_relative() {
                    *path = base.join(&*path);
                }
            }
        }
    }
}

/// Replace successive `%d` placeholders with level, row and column
pub fn expand_pattern(pattern: &str, id: PageId) -> String {
    let mut values = [id.level, id.row, id.col].into_iter();
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut parts = pattern.split("%d");
    if let Some(first) = parts.next() {
        out.push_str(first);
    }
    for part in parts {
        match values.next() {
            Some(value) => out.push_str(&value.to_string()),
            None => out.push_str("%d"),
        }
        out.push_str(part);
    }
    out
}

struct FileEntry {
    spec: FileSpec,
    /// Whole-image decode for the `image` layout
    image: OnceLock<std::result::Result<DynamicImage, String>>,
}

impl FileEntry {
    /// Decode the whole image on first use; later calls share the result
    fn whole_image(&self, path: &Path) -> Result<&DynamicImage> {
        let decoded = self.image.get_or_init(|| {
            log::debug!("Decoding {}", path.display());
            image::open(path).map_err(|e| e.to_string())
        });
        decoded
            .as_ref()
            .map_err(|e| Error::Decode(format!("{}: {}", path.display(), e)))
    }
}

/// Files the cache streams from, indexed by [`FileId`]
pub struct FileTable {
    files: Vec<FileEntry>,
    tile_size: u32,
    format: PixelFormat,
}

impl FileTable {
    pub fn new(tile_size: u32, format: PixelFormat) -> Self {
        Self {
            files: Vec::new(),
            tile_size,
            format,
        }
    }

    /// Build a table from manifest entries, in order
    pub fn from_specs(specs: &[FileSpec], config: &CacheConfig) -> Result<Self> {
        let mut table = Self::new(config.tile_size, config.pixel_format());
        for spec in specs {
            table.add(spec.clone())?;
        }
        Ok(table)
    }

    /// Register a file. `image` files without dimensions are probed.
    pub fn add(&mut self, mut spec: FileSpec) -> Result<FileId> {
        let id = FileId::try_from(self.files.len())
            .map_err(|_| Error::Config("too many files in catalog".into()))?;

        if let Layout::Image { path } = &spec.layout {
            if spec.width == 0 || spec.height == 0 {
                let (width, height) = image::image_dimensions(path)?;
                spec.width = width;
                spec.height = height;
            }
        }
        if spec.width == 0 || spec.height == 0 {
            return Err(Error::Config(format!("file {} has no dimensions", id)));
        }

        log::info!(
            "Catalog file {}: {}x{} ({:?})",
            id,
            spec.width,
            spec.height,
            spec.layout
        );
        self.files.push(FileEntry {
            spec,
            image: OnceLock::new(),
        });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn spec(&self, file: FileId) -> Option<&FileSpec> {
        self.files.get(file as usize).map(|entry| &entry.spec)
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Page tree for every file, in file order
    pub fn trees(&self) -> Vec<PageTree> {
        self.files
            .iter()
            .enumerate()
            .map(|(id, entry)| {
                PageTree::new(id as FileId, entry.spec.width, entry.spec.height, self.tile_size)
            })
            .collect()
    }

    fn entry(&self, file: FileId) -> Result<&FileEntry> {
        self.files
            .get(file as usize)
            .ok_or_else(|| Error::Streaming(format!("unknown file {}", file)))
    }
}

/// Size inside the tile that a region occupies after scaling
fn scaled_extent(region: &PixelRegion, span: u64, tile_size: u32) -> (u32, u32) {
    let scale = |len: u64| ((len * tile_size as u64).div_ceil(span)).clamp(1, tile_size as u64) as u32;
    (scale(region.width), scale(region.height))
}

/// Interleaved bytes of `image` in `format`, 16-bit channels little-endian
fn image_bytes(image: &DynamicImage, format: PixelFormat) -> Result<Vec<u8>> {
    let wide = |raw: Vec<u16>| raw.into_iter().flat_map(u16::to_le_bytes).collect::<Vec<u8>>();
    let bytes = match (format.channels, format.depth) {
        (1, 1) => image.to_luma8().into_raw(),
        (2, 1) => image.to_luma_alpha8().into_raw(),
        (3, 1) => image.to_rgb8().into_raw(),
        (4, 1) => image.to_rgba8().into_raw(),
        (1, 2) => wide(image.to_luma16().into_raw()),
        (2, 2) => wide(image.to_luma_alpha16().into_raw()),
        (3, 2) => wide(image.to_rgb16().into_raw()),
        (4, 2) => wide(image.to_rgba16().into_raw()),
        _ => return Err(Error::Decode(format!("unsupported pixel format {:?}", format))),
    };
    Ok(bytes)
}

/// Copy `image` into the top-left of `buffer`, clipped to the buffer
fn blit(image: &DynamicImage, buffer: &mut PixelBuffer) -> Result<()> {
    let bpp = buffer.format.bytes_per_pixel();
    let src = image_bytes(image, buffer.format)?;
    let src_row = image.width() as usize * bpp;
    let dst_row = buffer.row_bytes();
    let copy = src_row.min(dst_row);
    let rows = image.height().min(buffer.height) as usize;

    let data = buffer.as_bytes_mut();
    for y in 0..rows {
        data[y * dst_row..y * dst_row + copy].copy_from_slice(&src[y * src_row..y * src_row + copy]);
    }
    Ok(())
}

fn read_raw(
    path: &Path,
    offset: u64,
    image_width: u32,
    region: &PixelRegion,
    extent: (u32, u32),
    buffer: &mut PixelBuffer,
) -> Result<()> {
    let bpp = buffer.format.bytes_per_pixel();
    let (out_w, out_h) = extent;
    let dst_row = buffer.row_bytes();
    let mut file = File::open(path)?;
    let mut row = vec![0u8; region.width as usize * bpp];

    let data = buffer.as_bytes_mut();
    for j in 0..out_h as u64 {
        // Nearest source row to the center of output row j
        let sy = region.y + ((2 * j + 1) * region.height) / (2 * out_h as u64);
        let start = offset + (sy * image_width as u64 + region.x) * bpp as u64;
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut row)?;

        let out = &mut data[j as usize * dst_row..];
        for i in 0..out_w as u64 {
            let sx = (((2 * i + 1) * region.width) / (2 * out_w as u64)) as usize;
            let dst = i as usize * bpp;
            out[dst..dst + bpp].copy_from_slice(&row[sx * bpp..sx * bpp + bpp]);
        }
    }
    Ok(())
}

impl TileSource for FileTable {
    fn decode(&self, key: PageKey, buffer: &mut PixelBuffer) -> Result<()> {
        let entry = self.entry(key.file)?;
        let spec = &entry.spec;
        if buffer.format != self.format
            || buffer.width != self.tile_size
            || buffer.height != self.tile_size
        {
            return Err(Error::Decode(format!("buffer {:?} does not fit a page", buffer)));
        }

        let region = page_region(key.page, spec.width, spec.height, self.tile_size)
            .ok_or_else(|| Error::Decode(format!("page {} lies outside its image", key)))?;
        let span = page_span(
            key.page.level,
            max_level(spec.width, spec.height, self.tile_size),
            self.tile_size,
        );
        let (out_w, out_h) = scaled_extent(&region, span, self.tile_size);

        buffer.as_bytes_mut().fill(0);
        match &spec.layout {
            Layout::Pyramid { pattern } => {
                let path = expand_pattern(pattern, key.page);
                let tile = image::open(&path)?;
                blit(&tile, buffer)
            }
            Layout::Image { path } => {
                let whole = entry.whole_image(path)?;
                let mut page = whole.crop_imm(
                    region.x as u32,
                    region.y as u32,
                    region.width as u32,
                    region.height as u32,
                );
                if (page.width(), page.height()) != (out_w, out_h) {
                    page = page.resize_exact(out_w, out_h, FilterType::Triangle);
                }
                blit(&page, buffer)
            }
            Layout::Raw { path, offset } => {
                read_raw(path, *offset, spec.width, &region, (out_w, out_h), buffer)
            }
        }
    }
}
