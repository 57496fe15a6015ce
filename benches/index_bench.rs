//! Benchmarks for the Prism index engine
//!
//! Run with: cargo bench

use std::collections::BTreeMap;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use prism::keys::partition_key;
use prism::{
    bitmap, select_page, DimensionFilter, DimensionIndex, GridConfig, IndexConfig, Indexer,
    KeyValueGrid, MemoryGrid, PageRequest, Placement, RowSpan, TimeRange, TimeRangeIndex, DAY_MS,
};

const DAY: i64 = 1_709_596_800_000; // 2024-03-05T00:00:00Z

fn dense_rows(count: u64) -> Vec<u64> {
    (0..count).collect()
}

fn sparse_rows(count: u64) -> Vec<u64> {
    (0..count).map(|i| i * 997).collect()
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for size in [1_000u64, 100_000] {
        group.throughput(Throughput::Elements(size));

        let mut dense = bitmap::of(&dense_rows(size));
        group.bench_function(format!("encode_dense_{}", size), |b| {
            b.iter(|| bitmap::encode(black_box(&mut dense)).unwrap())
        });

        let mut sparse = bitmap::of(&sparse_rows(size));
        group.bench_function(format!("encode_sparse_{}", size), |b| {
            b.iter(|| bitmap::encode(black_box(&mut sparse)).unwrap())
        });

        let bytes = bitmap::encode(&mut sparse).unwrap();
        group.bench_function(format!("decode_sparse_{}", size), |b| {
            b.iter(|| bitmap::decode(black_box(Some(&bytes))).unwrap())
        });
    }

    group.finish();
}

fn bench_set_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_ops");

    let evens = bitmap::of(&(0..100_000u64).map(|i| i * 2).collect::<Vec<_>>());
    let thirds = bitmap::of(&(0..100_000u64).map(|i| i * 3).collect::<Vec<_>>());

    group.bench_function("union_100k", |b| {
        b.iter(|| bitmap::union(black_box(&evens), &thirds))
    });
    group.bench_function("intersect_100k", |b| {
        b.iter(|| bitmap::intersect(black_box(&evens), &thirds))
    });
    group.bench_function("difference_100k", |b| {
        b.iter(|| bitmap::difference(black_box(&evens), &thirds))
    });

    group.finish();
}

fn bench_placement(c: &mut Criterion) {
    let mut group = c.benchmark_group("placement");

    let placement = Placement::new();
    let key = partition_key(DAY, "status", "active", 0).unwrap();

    group.bench_function("shard", |b| {
        b.iter(|| placement.shard(black_box(&key)).unwrap())
    });

    group.finish();
}

fn engine() -> DimensionIndex {
    let grid: Arc<dyn KeyValueGrid> = Arc::new(MemoryGrid::new(&GridConfig::default()));
    let time_index = Arc::new(TimeRangeIndex::new(grid.clone()));
    DimensionIndex::new(grid, time_index, IndexConfig::default())
}

fn bench_engine(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let mut group = c.benchmark_group("engine");

    group.bench_function("index_1000_rows", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let index = engine();
                let rows = bitmap::of(&dense_rows(1_000));

                let start = std::time::Instant::now();

                for _ in 0..iters {
                    index
                        .index(DAY, "status", "active", rows.clone())
                        .await
                        .unwrap();
                }

                start.elapsed()
            })
        });
    });

    group.bench_function("query_three_days", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let index = engine();

                // Setup: three days of data with spans
                for day_idx in 0..3u64 {
                    let day = DAY + day_idx as i64 * DAY_MS;
                    let first = day_idx * 10_000;
                    let rows: Vec<u64> = (first..first + 10_000).collect();
                    index
                        .index(day, "status", "active", bitmap::of(&rows))
                        .await
                        .unwrap();
                    index
                        .add_time_index(
                            TimeRange::new(day, day + 3_600_000),
                            RowSpan::new(first, first + 10_000),
                        )
                        .await
                        .unwrap();
                }

                let range = TimeRange::new(DAY, DAY + 3 * DAY_MS);
                let filters = [DimensionFilter::new("status", "active")];

                let start = std::time::Instant::now();

                for _ in 0..iters {
                    let _ = index
                        .get_row_ids(black_box(range), &filters)
                        .await
                        .unwrap();
                }

                start.elapsed()
            })
        });
    });

    group.finish();
}

fn bench_page(c: &mut Criterion) {
    let mut group = c.benchmark_group("page");

    let mut rows = BTreeMap::new();
    for day_idx in 0..30i64 {
        rows.insert(DAY + day_idx * DAY_MS, dense_rows(1_000));
    }

    group.bench_function("select_page_ascending", |b| {
        b.iter(|| select_page(black_box(&rows), &PageRequest::new(10, 500)).unwrap())
    });
    group.bench_function("select_page_descending", |b| {
        b.iter(|| select_page(black_box(&rows), &PageRequest::new(10, 500).descending()).unwrap())
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_codec,
    bench_set_ops,
    bench_placement,
    bench_engine,
    bench_page
);
criterion_main!(benches);
