use rand::{rngs::StdRng, Rng, SeedableRng};
use vidreg_image::{Image, ImageError, ImageSize};
use vidreg_imgproc::features::{CornerDetector, CornerDetectorConfig};

fn random_texture(size: ImageSize, seed: u64) -> Result<Image<u8, 1>, ImageError> {
    let mut rng = StdRng::seed_from_u64(seed);
    // blocky noise gives plenty of corners of varying strength
    let cell = rng.random_range(2..6);
    let cols = size.width / cell + 1;
    let rows = size.height / cell + 1;
    let cells: Vec<u8> = (0..cols * rows).map(|_| rng.random()).collect();
    let data = (0..size.height)
        .flat_map(|y| (0..size.width).map(move |x| (x, y)))
        .map(|(x, y)| cells[(y / cell) * cols + x / cell])
        .collect();
    Image::new(size, data)
}

#[test]
fn corner_count_never_exceeds_capacity() -> Result<(), ImageError> {
    let mut rng = StdRng::seed_from_u64(1);
    for seed in 0..20 {
        let size = ImageSize {
            width: rng.random_range(16..160),
            height: rng.random_range(16..120),
        };
        let config = CornerDetectorConfig {
            target_nr_corners: rng.random_range(1..20_000),
            nr_horizontal_blocks: rng.random_range(1..12),
            nr_vertical_blocks: rng.random_range(1..12),
            absolute_threshold: 0.0,
            relative_threshold: 0.0,
            ..Default::default()
        };
        let mut detector = CornerDetector::default();
        let capacity = detector.configure(size, &config);
        let img = random_texture(size, seed)?;
        let corners = detector.detect(&img, None)?;
        assert!(
            corners.len() <= capacity,
            "{} corners for capacity {capacity} at {size}",
            corners.len()
        );
    }
    Ok(())
}

#[test]
fn sub_pixel_refinement_stays_within_one_pixel() -> Result<(), ImageError> {
    let size = ImageSize {
        width: 160,
        height: 120,
    };
    let img = random_texture(size, 7)?;
    let config = CornerDetectorConfig {
        absolute_threshold: 0.0,
        relative_threshold: 0.001,
        ..Default::default()
    };

    let mut refined = CornerDetector::new(size, &config);
    let mut integer = CornerDetector::new(
        size,
        &CornerDetectorConfig {
            sub_pixel: false,
            // same scanned region as the refined detector
            border: config.border + config.sub_pixel_margin,
            ..config.clone()
        },
    );

    let a = refined.detect(&img, None)?;
    let b = integer.detect(&img, None)?;
    assert!(!a.is_empty());
    assert_eq!(a.len(), b.len());
    for (r, i) in a.iter().zip(&b) {
        assert_eq!(r.strength, i.strength);
        assert!((r.x - i.x).abs() <= 1.0);
        assert!((r.y - i.y).abs() <= 1.0);
    }
    Ok(())
}

#[test]
fn detection_is_deterministic() -> Result<(), ImageError> {
    let size = ImageSize {
        width: 200,
        height: 150,
    };
    let img = random_texture(size, 3)?;
    let mut detector = CornerDetector::new(size, &CornerDetectorConfig::default());
    let first = detector.detect(&img, None)?;
    let second = detector.detect(&img, None)?;
    let third = detector.clone().detect(&img, None)?;
    assert_eq!(first, second);
    assert_eq!(first, third);
    Ok(())
}

#[test]
fn corners_are_spread_over_blocks() -> Result<(), ImageError> {
    let size = ImageSize {
        width: 210,
        height: 110,
    };
    let img = random_texture(size, 11)?;
    let config = CornerDetectorConfig {
        target_nr_corners: 100,
        nr_horizontal_blocks: 2,
        nr_vertical_blocks: 1,
        absolute_threshold: 0.0,
        relative_threshold: 0.0,
        sub_pixel: false,
        ..Default::default()
    };
    let mut detector = CornerDetector::new(size, &config);
    let corners = detector.detect(&img, None)?;
    // blocks span columns 10..=109 and 110..=199
    let left = corners.iter().filter(|c| c.x < 110.0).count();
    let right = corners.len() - left;
    assert!(left > 0 && right > 0);
    // the scan is block-major, every corner of the left block precedes the right block
    assert!(corners[..left].iter().all(|c| c.x < 110.0));
    Ok(())
}
