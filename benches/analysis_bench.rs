//! Benchmarks for keyscope accumulators
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use keyscope::record::{KeyRecord, KeyType};

fn records(n: u64) -> Vec<KeyRecord> {
    (0..n)
        .map(|i| {
            KeyRecord::new(
                (i % 4) as u32,
                format!("tenant:{}:user:{}:profile", i % 50, i),
                KeyType::Hash,
                (i * 7919) % 100_000,
            )
        })
        .collect()
}

fn benchmark_topk(c: &mut Criterion) {
    use keyscope::analysis::topk::TopKSelector;

    let input = records(10_000);
    c.bench_function("topk_100_of_10k", |b| {
        b.iter(|| {
            let mut top = TopKSelector::new(100).unwrap();
            for r in &input {
                top.add(r.clone());
            }
            black_box(top.into_sorted_vec());
        })
    });
}

fn benchmark_prefix_tree(c: &mut Criterion) {
    use keyscope::analysis::prefix::PrefixTree;

    let input = records(10_000);
    c.bench_function("prefix_insert_10k", |b| {
        b.iter(|| {
            let mut tree = PrefixTree::default();
            for r in &input {
                tree.insert(r.database, &r.key, r.size_bytes);
            }
            black_box(tree.top_prefixes(100, Some(3)).unwrap());
        })
    });
}

fn benchmark_flame(c: &mut Criterion) {
    use keyscope::analysis::flame::FlameAggregator;

    let input = records(10_000);
    c.bench_function("flame_build_and_trim_10k", |b| {
        b.iter(|| {
            let mut flame = FlameAggregator::default();
            for r in &input {
                flame.add_record(r);
            }
            black_box(flame.into_tree(1024, 1000));
        })
    });
}

criterion_group!(benches, benchmark_topk, benchmark_prefix_tree, benchmark_flame);
criterion_main!(benches);
