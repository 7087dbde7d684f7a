//! Thumb streaming demo: orbits a camera around a textured sphere and streams
//! its pages through the cache.
//!
//! Usage: cargo run --release --bin thumb-stream -- [OPTIONS]
//!
//! Options:
//!   --config <PATH>   Manifest (JSON) naming the cache settings and files.
//!                     Without one a synthetic raster is generated.
//!   --frames <N>      Frames to run (default: 240)
//!   --gpu             Upload pages to a wgpu device instead of CPU memory

use std::f64::consts::{FRAC_PI_3, PI, TAU};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thumb::core::{CacheConfig, DVec3, Result, ThumbConfig, logging};
use thumb::math::Frustum;
use thumb::render::{GpuContext, HeadlessAllocator, TextureAllocator};
use thumb::streaming::{FileSpec, FileTable, PageCache, PageTree, View, Walker};

const VIEWPORT_WIDTH: f64 = 1920.0;
const VIEWPORT_HEIGHT: f64 = 1080.0;
const SYNTHETIC_WIDTH: u32 = 4096;
const SYNTHETIC_HEIGHT: u32 = 2048;

fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    if let Err(e) = run(&args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<()> {
    let frames = parse_u64_arg(args, "--frames").unwrap_or(240);
    let use_gpu = args.iter().any(|a| a == "--gpu");

    let config = match parse_str_arg(args, "--config") {
        Some(path) => ThumbConfig::load_sync(Path::new(&path))?,
        None => synthetic_config()?,
    };
    let table = Arc::new(FileTable::from_specs(&config.files, &config.cache)?);
    let mut trees = table.trees();
    log::info!(
        "Streaming {} files, {} pages in total",
        trees.len(),
        trees.iter().map(PageTree::len).sum::<usize>()
    );

    if use_gpu {
        let gpu = pollster::block_on(GpuContext::new())?;
        stream(&config, gpu.allocator(), table, &mut trees, frames)
    } else {
        stream(&config, HeadlessAllocator::new(), table, &mut trees, frames)
    }
}

fn stream<A: TextureAllocator>(
    config: &ThumbConfig,
    allocator: A,
    table: Arc<FileTable>,
    trees: &mut [PageTree],
    frames: u64,
) -> Result<()> {
    let mut cache = PageCache::new(config.cache.clone(), allocator, table)?;
    let mut walker = Walker::new();
    let start = Instant::now();

    for frame in 1..=frames {
        // One orbit, dipping toward the surface halfway through
        let t = frame as f64 / frames.max(1) as f64;
        let altitude = config.r1 * (3.0 - 1.9 * (t * PI).sin());
        let eye = DVec3::new((t * TAU).sin(), 0.3, (t * TAU).cos()).normalize() * altitude;
        let frustum = Frustum::perspective(
            eye,
            DVec3::ZERO,
            DVec3::Y,
            FRAC_PI_3,
            VIEWPORT_WIDTH / VIEWPORT_HEIGHT,
            config.r1 * 0.001,
            config.r1 * 10.0,
            VIEWPORT_HEIGHT,
        );
        let view = View {
            frusta: vec![frustum],
            r0: config.r0,
            r1: config.r1,
            serial: frame,
            cutoff: config.cache.cutoff,
            min_level: config.cache.min_level,
        };

        let mut drawn = 0;
        for tree in trees.iter_mut() {
            drawn += walker.walk(tree, &mut cache, &view).draw.len();
        }
        cache.update(frame);

        if frame % 30 == 0 {
            let stats = cache.stats();
            log::info!(
                "Frame {}: {} drawn, {} resident, {} pending, {} uploaded, {} evicted",
                frame,
                drawn,
                stats.resident,
                stats.pending,
                stats.uploaded,
                stats.evicted
            );
        }
        std::thread::sleep(Duration::from_millis(16));
    }

    let stats = cache.stats();
    log::info!(
        "Done in {:.2}s: {} requested, {} uploaded, {} evicted, {} failed",
        start.elapsed().as_secs_f64(),
        stats.requested,
        stats.uploaded,
        stats.evicted,
        stats.load_failures
    );
    cache.shutdown();
    Ok(())
}

/// Write a latitude/longitude grid raster and describe it
fn synthetic_config() -> Result<ThumbConfig> {
    let dir = std::env::temp_dir().join("thumb-stream");
    std::fs::create_dir_all(&dir)?;
    let path: PathBuf = dir.join("grid.raw");

    let (w, h) = (SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT);
    let expected = w as u64 * h as u64 * 4;
    let current = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    if current != expected {
        log::info!("Generating {}x{} test raster at {}", w, h, path.display());
        let mut bytes = Vec::with_capacity(expected as usize);
        for y in 0..h {
            for x in 0..w {
                let line = x % 128 == 0 || y % 128 == 0;
                let shade = if line { 255 } else { ((x / 128 + y / 128) % 2 * 60 + 40) as u8 };
                bytes.extend_from_slice(&[shade, (y * 255 / h) as u8, (x * 255 / w) as u8, 255]);
            }
        }
        std::fs::write(&path, bytes)?;
    }

    Ok(ThumbConfig {
        cache: CacheConfig {
            capacity: 128,
            ..Default::default()
        },
        files: vec![FileSpec::raw(path, w, h)],
        r0: 1.0,
        r1: 1.0,
    })
}

fn parse_u64_arg(args: &[String], flag: &str) -> Option<u64> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter().position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
