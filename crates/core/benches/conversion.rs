//! Benchmarks for the per-page hot paths of a job.
//!
//! Run with: cargo bench --package docbatch-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use docbatch_core::engine::{DirtyRect, DisplayCallbacks, FrameCollector, PixelFormat, SharedFrame};
use docbatch_core::ProgressTracker;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

fn benchmark_progress(c: &mut Criterion) {
    let mut group = c.benchmark_group("progress");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(5));

    for pages in [10usize, 1_000] {
        group.bench_with_input(BenchmarkId::new("page_markers", pages), &pages, |b, &pages| {
            b.iter(|| {
                let mut progress = ProgressTracker::new(Arc::new(AtomicUsize::new(pages * 4)));
                for _ in 0..4 {
                    progress.start_item(pages);
                    for page in 1..=pages {
                        progress.set_done_in_item(page);
                        black_box(progress.update());
                    }
                    progress.finish_item();
                }
            });
        });
    }

    group.finish();
}

fn benchmark_dirty_rects(c: &mut Criterion) {
    let mut group = c.benchmark_group("display");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(5));

    let (width, height) = (1275u32, 1650u32);
    group.bench_function("row_band_updates", |b| {
        b.iter(|| {
            let mut delivered = 0usize;
            let mut collector = FrameCollector::new(150)
                .with_progressive(Box::new(|_rect: DirtyRect, _frame: &SharedFrame| delivered += 1));
            collector.on_presize(width, height, width as usize * 3, PixelFormat::Rgb24);
            let _frame = collector
                .on_size(width, height, width as usize * 3, PixelFormat::Rgb24)
                .ok();
            for y in (0..height).step_by(16) {
                black_box(collector.on_update(0, y, width, 16.min(height - y)));
            }
            collector.on_preclose();
            drop(collector);
            black_box(delivered)
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_progress, benchmark_dirty_rects);
criterion_main!(benches);
