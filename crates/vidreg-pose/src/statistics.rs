use faer::Mat;
use vidreg_linalg::select::median;
use vidreg_linalg::{dense, Mat33};

use crate::cost::{grouped_log_sum, INLIER_THRESHOLD};
use crate::homography::{HomographyProblem, HomographyType};
use crate::polish::{information_matrix, scaled_errors, RobustProblem};

/// Dimension of the manifold of a 2d transform in the four dimensional correspondence space.
pub const MODEL_DIMENSION: usize = 2;

/// Fewest inliers for which a pose covariance is reported.
pub const MIN_POSE_COVARIANCE_INLIERS: usize = 8;

// dimension of one correspondence
const DATA_DIMENSION: usize = 4;
// GRIC weight of the saturated residual term
const GRIC_LAMBDA3: f64 = 2.0;

/// Quality and conditioning of a robust estimate.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Statistics {
    /// Number of correspondences the statistics are computed over.
    pub nr_points: usize,
    /// Number of correspondences with an error below [`INLIER_THRESHOLD`] standard deviations.
    pub nr_inliers: usize,
    /// `nr_inliers / nr_points`, zero without points.
    pub inlier_fraction: f64,
    /// Robust cost of all correspondences.
    pub cost: f64,
    /// The inverse squared point standard deviation used for the estimate.
    pub one_over_scale2: f64,
    /// Largest eigenvalue of the information matrix.
    pub lambda1: f64,
    /// Second largest eigenvalue of the information matrix.
    pub lambda2: f64,
    /// Third largest eigenvalue of the information matrix.
    pub lambda3: f64,
    /// Number of free parameters of the model.
    pub nr_parameters: usize,
    /// Dimension of the model manifold, see [`MODEL_DIMENSION`].
    pub model_dimension: usize,
    /// Geometric robust information criterion, lower is better.
    pub gric: f64,
    /// `sum(max(0, tau^2 - e^2 / sigma^2)) / tau^2` with `tau` the inlier threshold.
    pub inlier_evidence: f64,
    /// Standard deviations of the rotation vector and the translation.
    pub pose_std: [f64; 6],
    /// Covariance of the rotation vector.
    pub rotation_covariance: Mat33,
    /// Covariance of the translation.
    pub translation_covariance: Mat33,
    /// Number of inliers the pose covariance was computed from.
    pub pose_covariance_inlier_count: usize,
    /// Whether the pose covariance fields are filled.
    pub pose_covariance_ready: bool,
    /// Median transfer error in normalised units, not saturated. Infinite when more than half
    /// of the points project to infinity.
    pub median_reprojection_error: f64,
}

impl Statistics {
    /// The low confidence record of an estimate that could not be computed.
    pub fn degenerate(kind: HomographyType, nr_points: usize, one_over_scale2: f64) -> Self {
        Self {
            nr_points,
            one_over_scale2,
            nr_parameters: kind.nr_parameters(),
            model_dimension: MODEL_DIMENSION,
            ..Default::default()
        }
    }

    /// Evaluate a solved problem over all of its correspondences.
    ///
    /// Returns the statistics and the inlier mask.
    pub fn from_problem(
        problem: &HomographyProblem<'_>,
        one_over_scale2: f64,
    ) -> (Self, Vec<bool>) {
        let kind = problem.params().kind();
        let errors = scaled_errors(problem, one_over_scale2);
        let inliers = inlier_mask(&errors);
        let nr_points = errors.len();
        let nr_inliers = inliers.iter().filter(|&&inlier| inlier).count();

        let mut stats = Self::degenerate(kind, nr_points, one_over_scale2);
        stats.nr_inliers = nr_inliers;
        stats.inlier_fraction = if nr_points > 0 {
            nr_inliers as f64 / nr_points as f64
        } else {
            0.0
        };
        stats.cost = grouped_log_sum(errors.iter().copied());
        stats.gric = gric(&errors, kind.nr_parameters());
        stats.inlier_evidence = inlier_evidence(&errors);
        let squared_errors: Vec<f64> = (0..problem.nr_observations())
            .map(|i| {
                problem
                    .residual(i)
                    .map_or(f64::INFINITY, |r| r[0] * r[0] + r[1] * r[1])
            })
            .collect();
        stats.median_reprojection_error = median_error(&squared_errors);

        let info = information_matrix(problem, one_over_scale2, None);
        if let Some(values) = dense::symmetric_eigenvalues(&info) {
            let lambda = |i: usize| values.get(i).copied().unwrap_or(0.0);
            (stats.lambda1, stats.lambda2, stats.lambda3) = (lambda(0), lambda(1), lambda(2));
        }

        if kind.is_camera_rotation() && nr_inliers >= MIN_POSE_COVARIANCE_INLIERS {
            let info = information_matrix(problem, one_over_scale2, Some(&inliers));
            if let Some(cov) = dense::inverse(&info) {
                stats.rotation_covariance = covariance_block(&cov, 0);
                for i in 0..3 {
                    stats.pose_std[i] = stats.rotation_covariance[i][i].max(0.0).sqrt();
                }
                stats.pose_covariance_inlier_count = nr_inliers;
                stats.pose_covariance_ready = true;
            }
        }

        (stats, inliers)
    }
}

/// Inlier flags of scaled squared errors.
pub fn inlier_mask(scaled_errors: &[f64]) -> Vec<bool> {
    let tau2 = INLIER_THRESHOLD * INLIER_THRESHOLD;
    scaled_errors.iter().map(|&e| e < tau2).collect()
}

/// Torr's geometric robust information criterion of a 2d transform.
///
/// `sum(min(e^2 / sigma^2, lambda3 (r - d))) + lambda1 d n + lambda2 k` with `r = 4`, `d = 2`,
/// `lambda1 = ln r`, `lambda2 = ln(r n)`, `lambda3 = 2` and `k` model parameters.
pub fn gric(scaled_errors: &[f64], nr_parameters: usize) -> f64 {
    let n = scaled_errors.len() as f64;
    let r = DATA_DIMENSION as f64;
    let d = MODEL_DIMENSION as f64;
    let cap = GRIC_LAMBDA3 * (r - d);
    let residual: f64 = scaled_errors.iter().map(|&e| e.min(cap)).sum();
    let lambda2 = if n > 0.0 { (r * n).ln() } else { 0.0 };
    residual + r.ln() * d * n + lambda2 * nr_parameters as f64
}

/// Soft inlier count `sum(max(0, tau^2 - e^2 / sigma^2)) / tau^2`.
pub fn inlier_evidence(scaled_errors: &[f64]) -> f64 {
    let tau2 = INLIER_THRESHOLD * INLIER_THRESHOLD;
    scaled_errors
        .iter()
        .map(|&e| (tau2 - e).max(0.0))
        .sum::<f64>()
        / tau2
}

/// Median error of unscaled squared errors, zero without errors.
///
/// Points projecting to infinity are passed as `f64::INFINITY`.
pub fn median_error(squared_errors: &[f64]) -> f64 {
    if squared_errors.is_empty() {
        return 0.0;
    }
    let mut scratch = vec![0.0; squared_errors.len()];
    median(squared_errors, &mut scratch).sqrt()
}

/// The 3x3 diagonal block of a covariance matrix starting at `offset`.
pub(crate) fn covariance_block(cov: &Mat<f64>, offset: usize) -> Mat33 {
    let mut block = [[0.0; 3]; 3];
    for (i, row) in block.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = cov[(offset + i, offset + j)];
        }
    }
    block
}
