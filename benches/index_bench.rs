use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hambits::{BlockPerm, LinearScan, SimpleIndex, TriangleIndex};

fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn bench_indexes(c: &mut Criterion) {
    let mut state = 0x1234_5678u64;
    let keys: Vec<u64> = (0..100_000).map(|_| splitmix64(&mut state)).collect();
    let queries: Vec<u64> = keys
        .iter()
        .step_by(100)
        .map(|k| k ^ (1u64 << (splitmix64(&mut state) % 48)))
        .collect();

    let perm = BlockPerm::new(4, 3, 0);
    let simple = SimpleIndex::build(perm, &keys);
    let triangle = TriangleIndex::build(perm, &keys);
    let linear = LinearScan::new(&keys);

    let mut group = c.benchmark_group("query");
    group.bench_function("simple", |b| {
        b.iter(|| {
            for &q in &queries {
                black_box(simple.search(q, 3).matches.len());
            }
        })
    });
    group.bench_function("triangle", |b| {
        b.iter(|| {
            for &q in &queries {
                black_box(triangle.search(q, 3).matches.len());
            }
        })
    });
    group.bench_function("linear", |b| {
        b.iter(|| {
            for &q in queries.iter().take(10) {
                black_box(linear.search(q, 3).matches.len());
            }
        })
    });
    group.finish();

    let mut group = c.benchmark_group("build");
    group.sample_size(10);
    group.bench_function("simple", |b| {
        b.iter(|| black_box(SimpleIndex::build(perm, &keys).len()))
    });
    group.bench_function("triangle", |b| {
        b.iter(|| black_box(TriangleIndex::build(perm, &keys).len()))
    });
    group.finish();
}

criterion_group!(benches, bench_indexes);
criterion_main!(benches);
