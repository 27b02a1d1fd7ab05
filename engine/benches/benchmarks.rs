//! Performance benchmarks for newshelf-engine

use chrono::{TimeDelta, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use newshelf_engine::{
    CollectionInfo, CollectionReconciler, MemoryCatalog, Product, ProductId, RetryPolicy,
    SyncRunner,
};
use std::collections::BTreeSet;
use std::sync::Arc;

fn id_range(from: usize, to: usize) -> BTreeSet<ProductId> {
    (from..to).map(|i| format!("product_{i:06}")).collect()
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");

    for size in [100, 1_000, 10_000] {
        // Half the members stay, half rotate out.
        let current = id_range(0, size);
        let target = id_range(size / 2, size + size / 2);

        group.bench_with_input(BenchmarkId::new("half_overlap", size), &size, |b, _| {
            b.iter(|| CollectionReconciler::plan(black_box(&current), black_box(&target)))
        });
    }

    group.bench_function("identical_10000", |b| {
        let ids = id_range(0, 10_000);
        b.iter(|| CollectionReconciler::plan(black_box(&ids), black_box(&ids)))
    });

    group.finish();
}

fn bench_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();

    group.bench_function("noop_cycle_1000_members", |b| {
        let now = Utc::now();
        let mut catalog = MemoryCatalog::new();
        for i in 0..1_000 {
            catalog = catalog.with_product(Product::new(
                format!("product_{i:06}"),
                now - TimeDelta::hours(1),
            ));
        }
        let catalog = Arc::new(catalog.with_collection(
            CollectionInfo::manual("bench", "Bench"),
            id_range(0, 1_000),
        ));
        let runner = SyncRunner::new(catalog, "bench", TimeDelta::days(7))
            .with_retry(RetryPolicy::immediate(1));

        b.iter(|| runtime.block_on(runner.run_cycle()))
    });

    group.finish();
}

criterion_group!(benches, bench_plan, bench_cycle);
criterion_main!(benches);
