//! Hot-path benchmarks: queue handoff, pool borrow/recycle and the two
//! heaviest host-side kernels.
//!
//! Run with: cargo bench --bench pipeline_bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use risa_core::ConfigReader;
use risa_device::{Buffer, DeviceRegistry, Image, MemoryPool, Residency, Stream, StreamPriority};
use risa_pipeline::{Queue, Transform};
use risa_recon::{Filter, Reordering};

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    group.bench_function("push_take", |b| {
        let queue = Queue::bounded(1024);
        b.iter(|| {
            queue.push(7u64);
            std::hint::black_box(queue.take());
        });
    });
    group.finish();
}

fn bench_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool");
    for &elements in &[4096usize, 1 << 20] {
        group.bench_with_input(
            BenchmarkId::new("request_recycle", elements),
            &elements,
            |b, &elements| {
                let pool = MemoryPool::<u16>::new();
                let idx = pool.register_stage(4, elements, Residency::Host);
                b.iter(|| {
                    let buffer = pool.request_memory(idx).unwrap();
                    std::hint::black_box(buffer.len());
                });
            },
        );
    }
    group.finish();
}

fn stage_config(detectors: usize, projections: usize) -> ConfigReader {
    let scan_rate = 1_000_000 / projections;
    ConfigReader::from_str(&format!(
        r#"{{
            "number_of_fan_detectors": {detectors},
            "number_of_det_modules": 16,
            "number_of_planes": 2,
            "sampling_rate": 1,
            "scan_rate": {scan_rate},
            "mempoolsize_reordering": 4,
            "mempoolsize_filter": 4
        }}"#
    ))
    .unwrap()
}

fn bench_kernels(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernels");
    group.sample_size(20);

    for &(detectors, projections) in &[(256usize, 500usize), (1024, 1000)] {
        let cfg = stage_config(detectors, projections);
        let registry = DeviceRegistry::with_count(1).unwrap();
        let stream = Stream::new(0, StreamPriority::Normal);
        let label = format!("{detectors}x{projections}");

        let reorder = Reordering::new(&cfg, &registry, MemoryPool::new()).unwrap();
        group.bench_with_input(BenchmarkId::new("reordering", &label), &(), |b, _| {
            b.iter(|| {
                let mut input = Image::new(
                    Buffer::owned(detectors * projections, Residency::Device(0)),
                    detectors,
                    projections,
                );
                input.data_mut().fill(600);
                std::hint::black_box(reorder.run(0, &stream, input).unwrap());
            });
        });

        let filter = Filter::new(&cfg, &registry, MemoryPool::new()).unwrap();
        group.bench_with_input(BenchmarkId::new("filter", &label), &(), |b, _| {
            b.iter(|| {
                let mut input = Image::new(
                    Buffer::owned(detectors * projections, Residency::Device(0)),
                    detectors,
                    projections,
                );
                input.data_mut().fill(0.5);
                std::hint::black_box(filter.run(0, &stream, input).unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_queue, bench_pool, bench_kernels);
criterion_main!(benches);
