use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};

use vidreg_linalg::select::select;

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("Select");
    let mut rng = StdRng::seed_from_u64(0);

    for n in [100, 1_000, 10_000].iter() {
        let values: Vec<f32> = (0..*n).map(|_| rng.random::<f32>()).collect();
        let mut scratch = vec![0.0f32; *n];

        group.bench_with_input(BenchmarkId::new("quickselect", n), &values, |b, v| {
            b.iter(|| black_box(select(v, v.len() / 4, &mut scratch)))
        });

        group.bench_with_input(BenchmarkId::new("sort", n), &values, |b, v| {
            b.iter(|| {
                let mut sorted = v.clone();
                sorted.sort_by(|a, b| a.total_cmp(b));
                black_box(sorted[sorted.len() / 4])
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_select);
criterion_main!(benches);
