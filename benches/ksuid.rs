use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use verdict::ksuid::timestamp_of;
use verdict::KsuidGenerator;

fn bench_ksuid(c: &mut Criterion) {
    let g = KsuidGenerator::new();
    let payload = [0xA5u8; 16];
    let id = g.next_at(1_700_000_000, &payload).unwrap_or_default();

    let mut group = c.benchmark_group("ksuid");
    group.bench_function("next/os_entropy", |b| b.iter(|| black_box(g.next().ok())));
    group.bench_function("next_at/fixed_payload", |b| {
        b.iter(|| black_box(g.next_at(black_box(1_700_000_000), &payload).ok()))
    });
    group.bench_function("timestamp_of", |b| b.iter(|| black_box(timestamp_of(black_box(&id)))));
    group.finish();
}

criterion_group!(benches, bench_ksuid);
criterion_main!(benches);
