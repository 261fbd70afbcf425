//! Counting and unranking over layered DAGs of shared alternatives.
//!
//! Every node of layer `i` has two slots, each holding every node of layer `i + 1`,
//! which is the shape a memo of join alternatives produces.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use optx_core::tree_map::TreeMap;

type Rehydrate = fn(&(usize, usize), Vec<usize>, &()) -> usize;

fn size(_: &(usize, usize), children: Vec<usize>, _: &()) -> usize {
    1 + children.iter().sum::<usize>()
}

fn layered(depth: usize, width: usize) -> TreeMap<(usize, usize), usize, (), Rehydrate> {
    let mut map = TreeMap::new(size as Rehydrate);
    for node in 0..width {
        map.insert_root((0, node));
    }
    for layer in 0..depth {
        for node in 0..width {
            for slot in 0..2 {
                for child in 0..width {
                    map.insert_edge((layer, node), slot, (layer + 1, child))
                        .unwrap();
                }
            }
        }
    }
    map
}

fn bench_count(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_map_count");
    for (depth, width) in [(4, 4), (8, 8), (16, 16)] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{depth}x{width}")),
            &(depth, width),
            |b, &(depth, width)| {
                b.iter(|| {
                    let mut map = layered(depth, width);
                    black_box(map.count().unwrap())
                })
            },
        );
    }
    group.finish();
}

fn bench_unrank(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_map_unrank");
    for (depth, width) in [(4, 4), (6, 4)] {
        let mut map = layered(depth, width);
        let count = map.count().unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{depth}x{width}")),
            &count,
            |b, &count| {
                let mut rank = 0u64;
                b.iter(|| {
                    rank = (rank + 7919) % count;
                    black_box(map.unrank(rank, &()).unwrap())
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_count, bench_unrank);
criterion_main!(benches);
