//! Environment store benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flashenv_bench::{fresh_store, generate_keys, populated_store, random_data};

/// Benchmark appending values of various sizes.
fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set");

    for size in [8, 64, 256, 1024] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut store = fresh_store();
            let values = [random_data(size), random_data(size)];
            let mut i = 0usize;
            b.iter(|| {
                // Alternate so every set writes; compactions are included.
                store.set("bench", &values[i % 2]).unwrap();
                i += 1;
            });
        });
    }

    group.bench_function("unchanged", |b| {
        let mut store = fresh_store();
        store.set("bench", "value").unwrap();
        b.iter(|| store.set(black_box("bench"), black_box("value")).unwrap());
    });

    group.finish();
}

/// Benchmark lookups in stores of various sizes.
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");

    for count in [10, 100, 500] {
        let store = populated_store(count, 32);
        let keys = generate_keys(count);
        group.bench_with_input(BenchmarkId::new("hit", count), &count, |b, _| {
            let mut i = 0usize;
            b.iter(|| {
                let value = store.get(&keys[i % keys.len()]).unwrap();
                i += 1;
                black_box(value);
            });
        });
    }

    let store = populated_store(100, 32);
    group.bench_function("miss", |b| {
        b.iter(|| black_box(store.get(black_box("absent")).is_err()));
    });

    group.finish();
}

/// Benchmark explicit compaction.
fn bench_compact(c: &mut Criterion) {
    let mut group = c.benchmark_group("compact");
    group.sample_size(20);

    for count in [10, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut store = populated_store(count, 32);
            b.iter(|| black_box(store.compact().unwrap()));
        });
    }

    group.finish();
}

/// Benchmark a reboot: mount and index rebuild.
fn bench_mount(c: &mut Criterion) {
    let mut group = c.benchmark_group("mount");
    group.sample_size(20);

    for count in [10, 100, 500] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut store = populated_store(count, 32);
            b.iter(|| black_box(store.init().unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_set, bench_get, bench_compact, bench_mount);
criterion_main!(benches);
