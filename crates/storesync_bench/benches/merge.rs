//! Merge/apply benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use storesync_bench::{orders_collection, status_update};
use storesync_engine::apply_to;
use storesync_model::ChangeEvent;

/// Benchmark updates against collections of growing size.
fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");

    for size in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut orders = orders_collection(size, 4);
            // worst case: the last record
            let event = status_update(size - 1);
            b.iter(|| {
                let outcome = apply_to(&mut orders, black_box(&event)).unwrap();
                black_box(outcome);
            });
        });
    }

    group.finish();
}

/// Benchmark insert followed by delete, keeping the collection size stable.
fn bench_insert_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_delete");

    for size in [100, 1_000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut orders = orders_collection(size, 0);
            let insert = ChangeEvent::insert("orders", json!({"id": "new", "order_items": []}));
            let delete = ChangeEvent::delete("orders", "new");
            b.iter(|| {
                apply_to(&mut orders, black_box(&insert)).unwrap();
                apply_to(&mut orders, black_box(&delete)).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_update, bench_insert_delete);
criterion_main!(benches);
