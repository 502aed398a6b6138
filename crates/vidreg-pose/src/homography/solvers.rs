use faer::Mat;
use vidreg_linalg::mat33::{det_mat33, mul_mat33, normalize_mat33_inplace, IDENTITY_MAT33};
use vidreg_linalg::rotation::nearest_rotation;
use vidreg_linalg::{dense, Mat33};

use super::HomographyType;
use crate::error::check_lengths;
use crate::HomographyError;

// relative size below which a sample is considered to not constrain the model
const DEGENERACY_TOLERANCE: f64 = 1e-12;

fn check_correspondences(
    x1: &[[f64; 2]],
    x2: &[[f64; 2]],
    required: usize,
) -> Result<(), HomographyError> {
    check_lengths("x1", x1, "x2", x2)?;
    if x1.len() < required {
        return Err(HomographyError::InsufficientCorrespondences {
            required,
            actual: x1.len(),
        });
    }
    Ok(())
}

fn finish(h: Mat33) -> Result<Mat33, HomographyError> {
    if h.iter().flatten().all(|v| v.is_finite()) && det_mat33(&h).abs() > DEGENERACY_TOLERANCE {
        Ok(h)
    } else {
        Err(HomographyError::DegenerateConfiguration)
    }
}

fn centroid(points: &[[f64; 2]]) -> [f64; 2] {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
    [sx / n, sy / n]
}

// Sums of dot and cross products of corresponding points, after subtracting the given centres.
fn dot_cross_sums(
    x1: &[[f64; 2]],
    x2: &[[f64; 2]],
    c1: [f64; 2],
    c2: [f64; 2],
) -> (f64, f64, f64) {
    let mut dot = 0.0;
    let mut cross = 0.0;
    let mut norm = 0.0;
    for (p, q) in x1.iter().zip(x2) {
        let (px, py) = (p[0] - c1[0], p[1] - c1[1]);
        let (qx, qy) = (q[0] - c2[0], q[1] - c2[1]);
        dot += px * qx + py * qy;
        cross += px * qy - py * qx;
        norm += px * px + py * py;
    }
    (dot, cross, norm)
}

// Similarity that moves the centroid to the origin and the mean distance to sqrt(2).
fn conditioning(points: &[[f64; 2]]) -> Option<(Mat33, Mat33)> {
    let c = centroid(points);
    let mean_dist = points
        .iter()
        .map(|p| (p[0] - c[0]).hypot(p[1] - c[1]))
        .sum::<f64>()
        / points.len() as f64;
    if mean_dist <= f64::EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    let forward = [[s, 0.0, -s * c[0]], [0.0, s, -s * c[1]], [0.0, 0.0, 1.0]];
    let backward = [[1.0 / s, 0.0, c[0]], [0.0, 1.0 / s, c[1]], [0.0, 0.0, 1.0]];
    Some((forward, backward))
}

/// Estimate a projective homography with the normalised direct linear transform.
///
/// The points of both views are conditioned to zero mean and unit average spread, the
/// homography is the right singular vector of the smallest singular value and is finally
/// scaled so that `H[2][2] = 1` when possible.
///
/// # Arguments
///
/// * `x1` - At least four points of the first view.
/// * `x2` - The corresponding points of the second view.
///
/// # Errors
///
/// [`HomographyError::DegenerateConfiguration`] when the points do not determine a unique
/// homography, e.g. when three of four points are collinear.
pub fn homography_dlt(x1: &[[f64; 2]], x2: &[[f64; 2]]) -> Result<Mat33, HomographyError> {
    check_correspondences(x1, x2, 4)?;

    let (t1, _) = conditioning(x1).ok_or(HomographyError::DegenerateConfiguration)?;
    let (t2, t2_inv) = conditioning(x2).ok_or(HomographyError::DegenerateConfiguration)?;

    // construct matrix A
    let n = x1.len();
    let mut mat_a = Mat::<f64>::zeros(2 * n, 9);
    for (i, (p, q)) in x1.iter().zip(x2).enumerate() {
        let a = [
            t1[0][0] * p[0] + t1[0][2],
            t1[1][1] * p[1] + t1[1][2],
        ];
        let b = [
            t2[0][0] * q[0] + t2[0][2],
            t2[1][1] * q[1] + t2[1][2],
        ];

        mat_a[(2 * i, 0)] = a[0];
        mat_a[(2 * i, 1)] = a[1];
        mat_a[(2 * i, 2)] = 1.0;
        mat_a[(2 * i, 6)] = -b[0] * a[0];
        mat_a[(2 * i, 7)] = -b[0] * a[1];
        mat_a[(2 * i, 8)] = -b[0];

        mat_a[(2 * i + 1, 3)] = a[0];
        mat_a[(2 * i + 1, 4)] = a[1];
        mat_a[(2 * i + 1, 5)] = 1.0;
        mat_a[(2 * i + 1, 6)] = -b[1] * a[0];
        mat_a[(2 * i + 1, 7)] = -b[1] * a[1];
        mat_a[(2 * i + 1, 8)] = -b[1];
    }

    let svd = mat_a.svd().map_err(|_| HomographyError::SvdFailed)?;

    // a one dimensional null space needs eight independent equations
    let s = svd.S().column_vector();
    if s[7] <= s[0] * DEGENERACY_TOLERANCE.sqrt() {
        return Err(HomographyError::DegenerateConfiguration);
    }

    let h = svd.V().col(8);
    let conditioned = [[h[0], h[1], h[2]], [h[3], h[4], h[5]], [h[6], h[7], h[8]]];

    // the null vector has unit norm, so the determinant is scale free here
    if det_mat33(&conditioned).abs() < 1e-8 {
        return Err(HomographyError::DegenerateConfiguration);
    }

    let mut homo = mul_mat33(&mul_mat33(&t2_inv, &conditioned), &t1);
    normalize_mat33_inplace(&mut homo);

    finish(homo)
}

/// Estimate an affine transform in the least squares sense through QR.
///
/// Requires at least three points that are not collinear.
pub fn affine_lstsq(x1: &[[f64; 2]], x2: &[[f64; 2]]) -> Result<Mat33, HomographyError> {
    check_correspondences(x1, x2, 3)?;

    // the scatter of the first view must span the plane
    let c = centroid(x1);
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in x1 {
        let (dx, dy) = (p[0] - c[0], p[1] - c[1]);
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let trace = sxx + syy;
    if trace <= f64::MIN_POSITIVE || sxx * syy - sxy * sxy <= DEGENERACY_TOLERANCE * trace * trace
    {
        return Err(HomographyError::DegenerateConfiguration);
    }

    let n = x1.len();
    let mut mat_a = Mat::<f64>::zeros(2 * n, 6);
    let mut b = vec![0.0; 2 * n];
    for (i, (p, q)) in x1.iter().zip(x2).enumerate() {
        mat_a[(2 * i, 0)] = p[0];
        mat_a[(2 * i, 1)] = p[1];
        mat_a[(2 * i, 2)] = 1.0;
        mat_a[(2 * i + 1, 3)] = p[0];
        mat_a[(2 * i + 1, 4)] = p[1];
        mat_a[(2 * i + 1, 5)] = 1.0;
        b[2 * i] = q[0];
        b[2 * i + 1] = q[1];
    }

    let a = dense::lstsq(&mat_a, &b).ok_or(HomographyError::DegenerateConfiguration)?;
    finish([[a[0], a[1], a[2]], [a[3], a[4], a[5]], [0.0, 0.0, 1.0]])
}

/// Estimate a similarity (rotation, uniform scale, translation) in the least squares sense.
pub fn similarity_lstsq(x1: &[[f64; 2]], x2: &[[f64; 2]]) -> Result<Mat33, HomographyError> {
    check_correspondences(x1, x2, 2)?;
    let (c1, c2) = (centroid(x1), centroid(x2));
    let (dot, cross, norm) = dot_cross_sums(x1, x2, c1, c2);
    if norm <= f64::MIN_POSITIVE {
        return Err(HomographyError::DegenerateConfiguration);
    }
    let (a, b) = (dot / norm, cross / norm);
    finish([
        [a, -b, c2[0] - (a * c1[0] - b * c1[1])],
        [b, a, c2[1] - (b * c1[0] + a * c1[1])],
        [0.0, 0.0, 1.0],
    ])
}

/// Estimate a uniform scale and a translation in the least squares sense.
pub fn scale_translation_lstsq(
    x1: &[[f64; 2]],
    x2: &[[f64; 2]],
) -> Result<Mat33, HomographyError> {
    check_correspondences(x1, x2, 2)?;
    let (c1, c2) = (centroid(x1), centroid(x2));
    let (dot, _, norm) = dot_cross_sums(x1, x2, c1, c2);
    if norm <= f64::MIN_POSITIVE {
        return Err(HomographyError::DegenerateConfiguration);
    }
    let s = dot / norm;
    finish([
        [s, 0.0, c2[0] - s * c1[0]],
        [0.0, s, c2[1] - s * c1[1]],
        [0.0, 0.0, 1.0],
    ])
}

/// Estimate a rigid motion by 2d Procrustes alignment.
pub fn rotation_translation_fit(
    x1: &[[f64; 2]],
    x2: &[[f64; 2]],
) -> Result<Mat33, HomographyError> {
    check_correspondences(x1, x2, 2)?;
    let (c1, c2) = (centroid(x1), centroid(x2));
    let (dot, cross, _) = dot_cross_sums(x1, x2, c1, c2);
    if dot.hypot(cross) <= f64::MIN_POSITIVE {
        return Err(HomographyError::DegenerateConfiguration);
    }
    let (sin, cos) = cross.atan2(dot).sin_cos();
    finish([
        [cos, -sin, c2[0] - (cos * c1[0] - sin * c1[1])],
        [sin, cos, c2[1] - (sin * c1[0] + cos * c1[1])],
        [0.0, 0.0, 1.0],
    ])
}

/// Estimate a rotation with uniform scale about the origin.
pub fn rotation_scale_fit(x1: &[[f64; 2]], x2: &[[f64; 2]]) -> Result<Mat33, HomographyError> {
    check_correspondences(x1, x2, 1)?;
    let (dot, cross, norm) = dot_cross_sums(x1, x2, [0.0; 2], [0.0; 2]);
    if norm <= f64::MIN_POSITIVE {
        return Err(HomographyError::DegenerateConfiguration);
    }
    let (a, b) = (dot / norm, cross / norm);
    finish([[a, -b, 0.0], [b, a, 0.0], [0.0, 0.0, 1.0]])
}

/// Estimate a translation as the mean displacement.
pub fn translation_fit(x1: &[[f64; 2]], x2: &[[f64; 2]]) -> Result<Mat33, HomographyError> {
    check_correspondences(x1, x2, 1)?;
    let (c1, c2) = (centroid(x1), centroid(x2));
    let mut h = IDENTITY_MAT33;
    h[0][2] = c2[0] - c1[0];
    h[1][2] = c2[1] - c1[1];
    finish(h)
}

/// Estimate an in-plane rotation about the origin.
pub fn rotation_fit(x1: &[[f64; 2]], x2: &[[f64; 2]]) -> Result<Mat33, HomographyError> {
    check_correspondences(x1, x2, 1)?;
    let (dot, cross, _) = dot_cross_sums(x1, x2, [0.0; 2], [0.0; 2]);
    if dot.hypot(cross) <= f64::MIN_POSITIVE {
        return Err(HomographyError::DegenerateConfiguration);
    }
    let (sin, cos) = cross.atan2(dot).sin_cos();
    finish([[cos, -sin, 0.0], [sin, cos, 0.0], [0.0, 0.0, 1.0]])
}

/// Estimate a uniform scaling about the origin.
pub fn scaling_fit(x1: &[[f64; 2]], x2: &[[f64; 2]]) -> Result<Mat33, HomographyError> {
    check_correspondences(x1, x2, 1)?;
    let (dot, _, norm) = dot_cross_sums(x1, x2, [0.0; 2], [0.0; 2]);
    if norm <= f64::MIN_POSITIVE {
        return Err(HomographyError::DegenerateConfiguration);
    }
    let s = dot / norm;
    finish([[s, 0.0, 0.0], [0.0, s, 0.0], [0.0, 0.0, 1.0]])
}

/// Estimate the rotation of a camera from the bearing vectors of two views.
///
/// Every point `[x, y]` is lifted to the unit ray through `[x, y, 1]` and the rotation aligning
/// the rays of the first view with those of the second is found by the Kabsch method.
pub fn camera_rotation_fit(x1: &[[f64; 2]], x2: &[[f64; 2]]) -> Result<Mat33, HomographyError> {
    check_correspondences(x1, x2, 2)?;

    let bearing = |p: &[f64; 2]| {
        let norm = (p[0] * p[0] + p[1] * p[1] + 1.0).sqrt();
        [p[0] / norm, p[1] / norm, 1.0 / norm]
    };

    let mut m = [[0.0; 3]; 3];
    for (p, q) in x1.iter().zip(x2) {
        let (b1, b2) = (bearing(p), bearing(q));
        for (i, row) in m.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v += b2[i] * b1[j];
            }
        }
    }

    // two independent rays are needed to fix the rotation
    let mut s = dense::mat33_to_faer(&m)
        .singular_values()
        .map_err(|_| HomographyError::SvdFailed)?;
    s.sort_by(|a, b| b.total_cmp(a));
    if s[1] <= s[0] * DEGENERACY_TOLERANCE.sqrt() {
        return Err(HomographyError::DegenerateConfiguration);
    }

    let r = nearest_rotation(&m).ok_or(HomographyError::SvdFailed)?;
    finish(r)
}

/// Fit a model of the given type to a set of correspondences with its closed-form solver.
///
/// The camera rotation types are fitted with [`camera_rotation_fit`] and start from a unit
/// focal scale and no distortion.
///
/// # Errors
///
/// [`HomographyError::InsufficientCorrespondences`] when fewer than
/// [`HomographyType::min_points`] correspondences are given and
/// [`HomographyError::DegenerateConfiguration`] when they do not determine the model.
pub fn solve_minimal(
    kind: HomographyType,
    x1: &[[f64; 2]],
    x2: &[[f64; 2]],
) -> Result<Mat33, HomographyError> {
    check_correspondences(x1, x2, kind.min_points())?;
    match kind {
        HomographyType::Projective => homography_dlt(x1, x2),
        HomographyType::Affine => affine_lstsq(x1, x2),
        HomographyType::Similarity | HomographyType::SimilarityU => similarity_lstsq(x1, x2),
        HomographyType::Translation => translation_fit(x1, x2),
        HomographyType::Rotation | HomographyType::RotationU => rotation_fit(x1, x2),
        HomographyType::Scaling => scaling_fit(x1, x2),
        HomographyType::ScaleTranslation => scale_translation_lstsq(x1, x2),
        HomographyType::RotationTranslation => rotation_translation_fit(x1, x2),
        HomographyType::RotationScale => rotation_scale_fit(x1, x2),
        HomographyType::CameraRotation
        | HomographyType::CameraRotationFocal
        | HomographyType::CameraRotationFocalDistortion => camera_rotation_fit(x1, x2),
    }
}
