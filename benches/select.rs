use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::hint::black_box;
use verdict::{rank, select_best};

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("select_best");

    for &n in &[8usize, 64, 1024] {
        let variants: Vec<usize> = (0..n).collect();
        // Distinct scores: no draws.
        let distinct: Vec<f64> = (0..n).map(|i| (i as f64 * 0.618).fract()).collect();
        // All tied: one draw per variant after the first.
        let tied = vec![1.0; n];

        group.bench_with_input(BenchmarkId::new("distinct", n), &n, |b, _| {
            let mut rng = SmallRng::seed_from_u64(0);
            b.iter(|| black_box(select_best(&variants, black_box(&distinct), &mut rng).ok()))
        });
        group.bench_with_input(BenchmarkId::new("tied", n), &n, |b, _| {
            let mut rng = SmallRng::seed_from_u64(0);
            b.iter(|| black_box(select_best(&variants, black_box(&tied), &mut rng).ok()))
        });
        group.bench_with_input(BenchmarkId::new("rank", n), &n, |b, _| {
            b.iter(|| black_box(rank(&variants, black_box(&distinct)).ok()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_select);
criterion_main!(benches);
