use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};

use vidreg_image::{Image, ImageSize};
use vidreg_imgproc::features::{harris_strength, CornerDetector, CornerDetectorConfig};

fn bench_corner_detect(c: &mut Criterion) {
    let mut group = c.benchmark_group("CornerDetect");
    let mut rng = StdRng::seed_from_u64(0);

    for (width, height) in [(320, 240), (640, 480), (1280, 720)].iter() {
        let size = ImageSize {
            width: *width,
            height: *height,
        };
        let data = (0..size.area()).map(|_| rng.random::<u8>()).collect();
        let img = Image::<u8, 1>::new(size, data).unwrap();
        let parameter_string = format!("{}x{}", width, height);

        group.bench_with_input(
            BenchmarkId::new("harris_strength", &parameter_string),
            &img,
            |b, i| {
                let mut dst = Image::<f32, 1>::from_size_val(size, 0.0).unwrap();
                b.iter(|| black_box(harris_strength(i, &mut dst)).unwrap())
            },
        );

        group.bench_with_input(
            BenchmarkId::new("detect", &parameter_string),
            &img,
            |b, i| {
                let mut detector = CornerDetector::new(size, &CornerDetectorConfig::default());
                let mut corners = Vec::with_capacity(detector.capacity());
                b.iter(|| black_box(detector.detect_into(i, None, &mut corners)).unwrap())
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_corner_detect);
criterion_main!(benches);
