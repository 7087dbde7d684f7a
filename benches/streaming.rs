use criterion::{criterion_group, criterion_main, Criterion, black_box};

use std::sync::Arc;

use thumb::core::{CacheConfig, DVec3, Result};
use thumb::math::Frustum;
use thumb::render::{HeadlessAllocator, TextureHandle};
use thumb::streaming::{
    NeedQueue, NeedTask, PageCache, PageId, PageKey, PageSet, PageTree, PixelBuffer, TileSource,
    View, Walker,
};

struct FlatSource;

impl TileSource for FlatSource {
    fn decode(&self, _key: PageKey, buffer: &mut PixelBuffer) -> Result<()> {
        buffer.as_bytes_mut().fill(128);
        Ok(())
    }
}

fn key(n: u32) -> PageKey {
    PageKey::new(0, PageId::new(10, n / 1024, n % 1024))
}

fn view(eye: DVec3, serial: u64) -> View {
    View {
        frusta: vec![Frustum::perspective(
            eye,
            DVec3::ZERO,
            DVec3::Y,
            std::f64::consts::FRAC_PI_3,
            16.0 / 9.0,
            0.001,
            10.0,
            1080.0,
        )],
        r0: 1.0,
        r1: 1.0,
        serial,
        cutoff: 1.0,
        min_level: 1,
    }
}

fn bench_page_set_churn(c: &mut Criterion) {
    c.bench_function("page_set_churn_1024", |b| {
        let mut set = PageSet::new(1024).unwrap();
        let mut tick = 0u64;
        b.iter(|| {
            tick += 1;
            // Mostly hits on a hot working set, one new page per iteration
            for n in 0..64 {
                set.touch(black_box(key(n)), tick);
            }
            let n = (tick % 100_000) as u32 + 64;
            if let Some(evicted) = set.insert(key(n), TextureHandle(n), tick) {
                black_box(evicted);
            }
        });
    });
}

fn bench_need_queue(c: &mut Criterion) {
    c.bench_function("need_queue_push_pop_256", |b| {
        let queue = NeedQueue::new();
        b.iter(|| {
            for n in 0..256 {
                queue.push(NeedTask { key: key(n), priority: -((n % 8) as i32) });
            }
            while let Some(task) = queue.try_pop() {
                black_box(task);
            }
        });
    });
}

fn bench_tree_build(c: &mut Criterion) {
    c.bench_function("page_tree_build_16k", |b| {
        b.iter(|| PageTree::new(0, black_box(16384), black_box(8192), 256));
    });
}

fn bench_tree_walk(c: &mut Criterion) {
    let config = CacheConfig {
        capacity: 4096,
        workers: 1,
        tile_size: 256,
        ..Default::default()
    };
    let mut cache = PageCache::new(config, HeadlessAllocator::new(), Arc::new(FlatSource)).unwrap();
    let mut tree = PageTree::new(0, 86400, 43200, 256);
    let mut walker = Walker::new();

    c.bench_function("tree_walk_blue_marble_close", |b| {
        let mut serial = 0u64;
        b.iter(|| {
            serial += 1;
            let angle = serial as f64 * 0.01;
            let eye = DVec3::new(angle.sin(), 0.2, angle.cos()).normalize() * 1.2;
            let result = walker.walk(&mut tree, &mut cache, &view(eye, serial));
            cache.update(serial);
            black_box(result.draw.len())
        });
    });
}

criterion_group!(
    benches,
    bench_page_set_churn,
    bench_need_queue,
    bench_tree_build,
    bench_tree_walk,
);
criterion_main!(benches);
