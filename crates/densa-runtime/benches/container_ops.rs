//! Container throughput benchmarks
//!
//! Push/get on the dense array and set/get/delete on both map flavours.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use densa_runtime::{DenseArray, Map, MapFns, RawMap, RtString};

const SIZES: [usize; 3] = [100, 10_000, 100_000];

fn bench_array(c: &mut Criterion) {
    let mut group = c.benchmark_group("array");

    for &n in &SIZES {
        group.bench_with_input(BenchmarkId::new("push_u64", n), &n, |b, &n| {
            b.iter(|| {
                let mut array = DenseArray::new(8);
                for i in 0..n as u64 {
                    array.push_value(black_box(i));
                }
                array
            });
        });
    }

    let mut array = DenseArray::new(8);
    for i in 0..10_000u64 {
        array.push_value(i);
    }
    group.bench_function("get_u64_10k", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for i in 0..array.len() {
                sum = sum.wrapping_add(array.get_value::<u64>(black_box(i)).unwrap_or(0));
            }
            sum
        });
    });

    group.bench_function("push_many_10k", |b| {
        let bytes: Vec<u8> = (0..10_000u64).flat_map(u64::to_ne_bytes).collect();
        b.iter(|| {
            let mut array = DenseArray::new(8);
            array.push_many(black_box(&bytes), 10_000);
            array
        });
    });

    group.finish();
}

fn bench_raw_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("raw_map");

    for &n in &SIZES {
        group.bench_with_input(BenchmarkId::new("set_i64", n), &n, |b, &n| {
            b.iter(|| {
                let mut map = RawMap::new(8, 8, MapFns::plain::<8>());
                for i in 0..n as i64 {
                    map.set_value(black_box(i), i);
                }
                map
            });
        });
    }

    let mut map = RawMap::new(8, 8, MapFns::plain::<8>());
    for i in 0..10_000i64 {
        map.set_value(i, i * 2);
    }
    group.bench_function("get_i64_10k", |b| {
        b.iter(|| {
            let mut hits = 0;
            for i in 0..10_000i64 {
                hits += usize::from(map.get_value::<i64, i64>(black_box(i)).is_some());
            }
            hits
        });
    });

    group.bench_function("set_delete_churn", |b| {
        b.iter(|| {
            let mut map = RawMap::new(8, 8, MapFns::plain::<8>());
            for i in 0..5_000i64 {
                map.set_value(i, i);
                if i % 2 == 0 {
                    map.delete_value(i / 2);
                }
            }
            map
        });
    });

    let keys: Vec<RtString> = (0..1_000).map(|i| RtString::from(format!("key-{i}"))).collect();
    group.bench_function("set_string_1k", |b| {
        b.iter(|| {
            let mut map = RawMap::new(RtString::CELL_SIZE, 4, MapFns::string());
            for (i, key) in keys.iter().enumerate() {
                map.set(key.as_cell(), &(i as u32).to_ne_bytes());
            }
            map
        });
    });

    group.finish();
}

fn bench_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("map");

    for &n in &SIZES {
        group.bench_with_input(BenchmarkId::new("insert_u64", n), &n, |b, &n| {
            b.iter(|| {
                let mut map = Map::new();
                for i in 0..n as u64 {
                    map.insert(black_box(i), i);
                }
                map
            });
        });
    }

    let map: Map<u64, u64> = (0..10_000).map(|i| (i, i)).collect();
    group.bench_function("get_u64_10k", |b| {
        b.iter(|| (0..10_000u64).filter(|i| map.get(black_box(i)).is_some()).count());
    });

    group.finish();
}

criterion_group!(benches, bench_array, bench_raw_map, bench_map);
criterion_main!(benches);
