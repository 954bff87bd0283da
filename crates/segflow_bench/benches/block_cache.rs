//! Block cache benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use segflow_bench::random_data;
use segflow_storage::BlockCache;
use tempfile::TempDir;

/// Benchmark writing fresh keys.
fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_cache_write");
    group.sample_size(30);

    for size in [1024, 64 * 1024, 1024 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let cache = BlockCache::init(dir.path(), 64).unwrap();
            let data = random_data(size);
            let mut next = 0u64;

            b.iter(|| {
                next += 1;
                black_box(cache.write(&format!("key-{next}"), black_box(&data)));
            });
        });
    }

    group.finish();
}

/// Benchmark whole-value reads with a warm handle cache.
fn bench_read_warm(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_cache_read_warm");

    for size in [1024, 64 * 1024, 1024 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let dir = TempDir::new().unwrap();
            let cache = BlockCache::init(dir.path(), 64).unwrap();
            cache.write("value", &random_data(size));
            let mut out = Vec::with_capacity(size);

            b.iter(|| {
                black_box(cache.read(black_box("value"), &mut out));
            });
        });
    }

    group.finish();
}

/// Benchmark reads cycling over more keys than there are cached handles.
fn bench_read_handle_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_cache_handle_churn");
    let dir = TempDir::new().unwrap();
    let cache = BlockCache::init(dir.path(), 4).unwrap();
    let data = random_data(4096);
    for i in 0..64 {
        cache.write(&format!("key-{i}"), &data);
    }

    group.bench_function("64_keys_4_handles", |b| {
        let mut out = Vec::new();
        let mut i = 0usize;
        b.iter(|| {
            i = (i + 1) % 64;
            black_box(cache.read(&format!("key-{i}"), &mut out));
        });
    });

    group.bench_function("range_read_4k", |b| {
        let mut buf = vec![0u8; 512];
        b.iter(|| {
            black_box(cache.read_into("key-0", &mut buf, black_box(1024)));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_write,
    bench_read_warm,
    bench_read_handle_churn,
);
criterion_main!(benches);
