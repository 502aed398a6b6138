use argh::FromArgs;
use rand::{rngs::StdRng, Rng, SeedableRng};

use vidreg::{
    image::{Image, ImageSize},
    imgproc::features::{Corner, CornerDetector, CornerDetectorConfig},
    linalg::{
        mat33::{inverse_mat33, project_point2},
        Mat33,
    },
    pose::{estimate_homography, EstimatorParams, HomographyType},
};

/// Register two synthetic frames related by a known homography.
#[derive(FromArgs)]
struct Args {
    /// width of the frames
    #[argh(option, default = "640")]
    width: usize,

    /// height of the frames
    #[argh(option, default = "480")]
    height: usize,

    /// seed of the texture and of the estimator
    #[argh(option, default = "0")]
    seed: u64,

    /// homography type to estimate, 0 (projective) to 13
    #[argh(option, default = "0")]
    homography_type: u8,

    /// number of corners to aim for in each frame
    #[argh(option, default = "2000")]
    target_corners: usize,

    /// focal length of the synthetic camera in pixels
    #[argh(option, default = "826.0")]
    focal: f64,

    /// largest distance in pixels between a predicted and a detected corner
    #[argh(option, default = "1.5")]
    match_radius: f32,
}

// piecewise constant noise, blocks of `cell` pixels
fn render_texture(
    size: ImageSize,
    cell: usize,
    rng: &mut StdRng,
) -> Result<Image<u8, 1>, Box<dyn std::error::Error>> {
    let cols = size.width / cell + 1;
    let rows = size.height / cell + 1;
    let cells: Vec<u8> = (0..cols * rows).map(|_| rng.random()).collect();
    let data = (0..size.height)
        .flat_map(|y| (0..size.width).map(move |x| (x, y)))
        .map(|(x, y)| cells[(y / cell) * cols + x / cell])
        .collect();
    Ok(Image::new(size, data)?)
}

// backward warp with bilinear interpolation, pixels mapped outside the source are black
fn warp(src: &Image<u8, 1>, h: &Mat33) -> Result<Image<u8, 1>, Box<dyn std::error::Error>> {
    let h_inv = inverse_mat33(h).ok_or("singular homography")?;
    let (w, hgt) = (src.width(), src.height());
    let mut dst = Image::from_size_val(src.size(), 0u8)?;
    for y in 0..hgt {
        let row = dst.row_mut(y);
        for (x, pixel) in row.iter_mut().enumerate() {
            let Some([sx, sy]) = project_point2(&h_inv, &[x as f64, y as f64]) else {
                continue;
            };
            if sx < 0.0 || sy < 0.0 || sx >= (w - 1) as f64 || sy >= (hgt - 1) as f64 {
                continue;
            }
            let (x0, y0) = (sx.floor() as usize, sy.floor() as usize);
            let (fx, fy) = (sx - x0 as f64, sy - y0 as f64);
            let at = |xx: usize, yy: usize| src.as_slice()[yy * w + xx] as f64;
            let top = at(x0, y0) * (1.0 - fx) + at(x0 + 1, y0) * fx;
            let bottom = at(x0, y0 + 1) * (1.0 - fx) + at(x0 + 1, y0 + 1) * fx;
            *pixel = (top * (1.0 - fy) + bottom * fy).round() as u8;
        }
    }
    Ok(dst)
}

// pair every corner of the first frame with the closest corner of the second frame near its
// ground truth position
fn match_corners(
    c1: &[Corner],
    c2: &[Corner],
    h: &Mat33,
    radius: f32,
) -> (Vec<[f64; 2]>, Vec<[f64; 2]>) {
    let mut x1 = Vec::new();
    let mut x2 = Vec::new();
    for a in c1 {
        let Some([px, py]) = project_point2(h, &[a.x as f64, a.y as f64]) else {
            continue;
        };
        let nearest = c2
            .iter()
            .map(|b| (b, (b.x - px as f32).hypot(b.y - py as f32)))
            .filter(|(_, d)| *d <= radius)
            .min_by(|l, r| l.1.total_cmp(&r.1));
        if let Some((b, _)) = nearest {
            x1.push([a.x as f64, a.y as f64]);
            x2.push([b.x as f64, b.y as f64]);
        }
    }
    (x1, x2)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();

    let size = ImageSize {
        width: args.width,
        height: args.height,
    };
    let mut rng = StdRng::seed_from_u64(args.seed);

    // a small rotation about the image centre with some perspective
    let (cx, cy) = (args.width as f64 / 2.0, args.height as f64 / 2.0);
    let (sin, cos) = 0.03f64.sin_cos();
    let truth: Mat33 = [
        [cos, -sin, cx - cos * cx + sin * cy + 4.0],
        [sin, cos, cy - sin * cx - cos * cy - 3.0],
        [2e-5, -1e-5, 1.0],
    ];

    let frame1 = render_texture(size, 7, &mut rng)?;
    let frame2 = warp(&frame1, &truth)?;

    let config = CornerDetectorConfig {
        target_nr_corners: args.target_corners,
        ..Default::default()
    };
    let mut detector = CornerDetector::new(size, &config);
    let corners1 = detector.detect(&frame1, None)?;
    let corners2 = detector.detect(&frame2, None)?;
    log::info!(
        "Detected {} and {} corners (capacity {})",
        corners1.len(),
        corners2.len(),
        detector.capacity()
    );

    let (x1, x2) = match_corners(&corners1, &corners2, &truth, args.match_radius);
    log::info!("Matched {} corners by ground truth", x1.len());

    let k: Mat33 = [[args.focal, 0.0, cx], [0.0, args.focal, cy], [0.0, 0.0, 1.0]];
    let params = EstimatorParams {
        homography_type: HomographyType::try_from(args.homography_type)?,
        random_seed: Some(args.seed),
        ..Default::default()
    };
    let estimate = estimate_homography(&x1, &x2, &k, &k, &params)?;
    let stats = &estimate.statistics;

    log::info!("Estimated {:?}: {:?}", estimate.homography_type, estimate.homography);
    log::info!(
        "Inliers {}/{} ({:.1}%), median error {:.3} px, cost {:.2}, gric {:.2}",
        stats.nr_inliers,
        stats.nr_points,
        100.0 * stats.inlier_fraction,
        stats.median_reprojection_error * args.focal,
        stats.cost,
        stats.gric
    );
    log::info!(
        "Conditioning lambda1 {:.3e}, lambda2 {:.3e}, lambda3 {:.3e}",
        stats.lambda1,
        stats.lambda2,
        stats.lambda3
    );

    // transfer error against the ground truth over the frame
    let mut worst = 0.0f64;
    for y in (0..args.height).step_by(args.height.max(4) / 4) {
        for x in (0..args.width).step_by(args.width.max(4) / 4) {
            let p = [x as f64, y as f64];
            if let (Some(a), Some(b)) = (
                project_point2(&estimate.homography, &p),
                project_point2(&truth, &p),
            ) {
                worst = worst.max((a[0] - b[0]).hypot(a[1] - b[1]));
            }
        }
    }
    println!(
        "{} matches, {} inliers, largest transfer error against ground truth {:.3} px",
        stats.nr_points, stats.nr_inliers, worst
    );

    Ok(())
}
