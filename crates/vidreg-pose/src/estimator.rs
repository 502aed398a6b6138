//! Preemptive robust estimation of a 2d transform between two views.
//!
//! Correspondences are normalised through the calibration of each view, a pool of hypotheses
//! is solved from random minimal samples and scored chunk by chunk over a random permutation of
//! the correspondences. After every chunk only the best fraction of the pool survives. The
//! winner is polished with [`crate::polish::polish`] and evaluated over all correspondences.

use vidreg_linalg::mat33::{
    inverse_mat33, mul_mat33, normalize_mat33_inplace, project_point2, IDENTITY_MAT33,
};
use vidreg_linalg::select::select;
use vidreg_linalg::Mat33;

use crate::cost::{robust_cost, DEFAULT_SCALE};
use crate::error::check_lengths;
use crate::homography::{HomographyProblem, HomographyType, ModelParameters, Transfer};
use crate::polish::{polish, PolishParams};
use crate::sampler::SampleGenerator;
use crate::world::WorldFilterResult;
use crate::{HomographyError, Statistics};

/// Parameters of the robust estimator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EstimatorParams {
    /// The family of transforms to estimate.
    pub homography_type: HomographyType,
    /// Maximum number of polishing iterations.
    pub max_iterations: usize,
    /// Maximum number of correspondences used for scoring and polishing.
    pub max_points: usize,
    /// Point standard deviation in normalised units.
    pub scale: f64,
    /// Number of minimal samples drawn for the hypothesis pool.
    pub nr_samples: usize,
    /// Number of correspondences scored between two prunings of the pool.
    pub chunk_size: usize,
    /// Fraction of the pool kept after every chunk.
    pub keep_fraction: f64,
    /// Polishing stops when a step gains less than this fraction of the cost.
    pub improvement_requirement: f64,
    /// Optional RNG seed for deterministic runs.
    pub random_seed: Option<u64>,
}

impl Default for EstimatorParams {
    fn default() -> Self {
        Self {
            homography_type: HomographyType::Projective,
            max_iterations: 25,
            max_points: 1000,
            scale: DEFAULT_SCALE,
            nr_samples: 500,
            chunk_size: 100,
            keep_fraction: 0.5,
            improvement_requirement: 0.001,
            random_seed: Some(0),
        }
    }
}

impl EstimatorParams {
    /// Check that every parameter is in its valid range.
    pub fn validate(&self) -> Result<(), HomographyError> {
        let invalid = |what: &str| Err(HomographyError::InvalidParameter(what.to_string()));
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return invalid("scale must be positive");
        }
        if self.nr_samples == 0 || self.chunk_size == 0 || self.max_points == 0 {
            return invalid("sample count, chunk size and point limit must be positive");
        }
        if !(self.keep_fraction > 0.0 && self.keep_fraction <= 1.0) {
            return invalid("keep fraction must be in (0, 1]");
        }
        if !(self.improvement_requirement.is_finite() && self.improvement_requirement >= 0.0) {
            return invalid("improvement requirement must be non-negative");
        }
        Ok(())
    }

    /// The inverse squared point standard deviation.
    pub fn one_over_scale2(&self) -> f64 {
        1.0 / (self.scale * self.scale)
    }
}

/// The result of a robust estimate.
#[derive(Clone, Debug, PartialEq)]
pub struct HomographyEstimate {
    /// The transform in pixel coordinates, scaled so that `H[2][2] = 1` when possible.
    pub homography: Mat33,
    /// The transform between normalised coordinates.
    pub normalized_homography: Mat33,
    /// The estimated family of transforms.
    pub homography_type: HomographyType,
    /// The camera rotation of the camera rotation types.
    pub rotation: Option<Mat33>,
    /// The focal scale of the types that estimate one.
    pub focal_scale: Option<f64>,
    /// The radial distortion of the type that estimates one.
    pub radial_distortion: Option<f64>,
    /// Per-correspondence inlier mask.
    pub inliers: Vec<bool>,
    /// Quality of the estimate.
    pub statistics: Statistics,
    /// The pose refined against world points, when requested.
    pub world_pose: Option<WorldFilterResult>,
}

// normalising transform of one view and its inverse
struct Normalization {
    forward: Mat33,
    backward: Mat33,
}

impl Normalization {
    fn new(kind: HomographyType, k: &Mat33) -> Result<Self, HomographyError> {
        if kind.is_uncalibrated() {
            let f = k[0][0];
            if !f.is_finite() || f.abs() <= f64::EPSILON {
                return Err(HomographyError::SingularCalibration);
            }
            return Ok(Self {
                forward: [[1.0 / f, 0.0, 0.0], [0.0, 1.0 / f, 0.0], [0.0, 0.0, 1.0]],
                backward: [[f, 0.0, 0.0], [0.0, f, 0.0], [0.0, 0.0, 1.0]],
            });
        }
        let forward = inverse_mat33(k).ok_or(HomographyError::SingularCalibration)?;
        Ok(Self {
            forward,
            backward: *k,
        })
    }

    fn apply(&self, points: &[[f64; 2]]) -> Result<Vec<[f64; 2]>, HomographyError> {
        points
            .iter()
            .map(|p| project_point2(&self.forward, p).ok_or(HomographyError::SingularCalibration))
            .collect()
    }
}

fn to_pixels(h: &Mat33, n1: &Normalization, n2: &Normalization) -> Mat33 {
    let mut m = mul_mat33(&mul_mat33(&n2.backward, h), &n1.forward);
    normalize_mat33_inplace(&mut m);
    m
}

// keep the max(1, floor(alive * keep_fraction)) lowest costs, ties in pool order
fn prune(
    alive: &mut Vec<usize>,
    costs: &[f64],
    keep_fraction: f64,
    alive_costs: &mut Vec<f64>,
    scratch: &mut [f64],
) {
    let keep = ((alive.len() as f64 * keep_fraction).floor() as usize).max(1);
    if keep >= alive.len() {
        return;
    }

    alive_costs.clear();
    alive_costs.extend(alive.iter().map(|&h| costs[h]));
    let threshold = select(alive_costs, keep - 1, scratch);

    let below = alive_costs.iter().filter(|&&c| c < threshold).count();
    let mut ties = keep - below;
    alive.retain(|&h| {
        if costs[h] < threshold {
            true
        } else if costs[h] == threshold && ties > 0 {
            ties -= 1;
            true
        } else {
            false
        }
    });
}

/// Pick the best hypothesis by preemptive scoring.
///
/// All surviving hypotheses accumulate the robust cost of the next `chunk_size`
/// correspondences, then the `max(1, floor(alive * keep_fraction))` lowest costs survive. Ties
/// at the threshold are broken by pool order. Scoring ends when one hypothesis is left or the
/// correspondences are exhausted, and the lowest accumulated cost wins.
///
/// # Panics
///
/// Panics if `hypotheses` is empty or `chunk_size` is zero.
pub fn preemptive_select(
    hypotheses: &[Transfer],
    x1: &[[f64; 2]],
    x2: &[[f64; 2]],
    chunk_size: usize,
    keep_fraction: f64,
    one_over_scale2: f64,
) -> usize {
    assert!(!hypotheses.is_empty(), "empty hypothesis pool");
    assert!(chunk_size > 0, "chunk size must be positive");

    let n = x1.len().min(x2.len());
    let mut costs = vec![0.0; hypotheses.len()];
    let mut alive: Vec<usize> = (0..hypotheses.len()).collect();
    let mut alive_costs = Vec::with_capacity(hypotheses.len());
    let mut scratch = vec![0.0; hypotheses.len()];

    let mut start = 0;
    while start < n && alive.len() > 1 {
        let end = (start + chunk_size).min(n);
        for &h in &alive {
            costs[h] += robust_cost(
                &hypotheses[h],
                &x1[start..end],
                &x2[start..end],
                one_over_scale2,
            );
        }
        start = end;
        prune(&mut alive, &costs, keep_fraction, &mut alive_costs, &mut scratch);
    }

    alive
        .into_iter()
        .min_by(|&a, &b| costs[a].total_cmp(&costs[b]).then(a.cmp(&b)))
        .unwrap_or(0)
}

/// Robustly estimate the transform mapping the points `x1` of a first view onto the points
/// `x2` of a second view.
///
/// Too few correspondences or an empty hypothesis pool are not errors: the estimate is then
/// the identity in normalised coordinates with no inliers and the statistics say so.
///
/// # Arguments
///
/// * `x1` - The points of the first view in pixels.
/// * `x2` - The corresponding points of the second view in pixels.
/// * `k1` - The calibration of the first view, identity for normalised points.
/// * `k2` - The calibration of the second view.
/// * `params` - The estimator parameters.
///
/// # Errors
///
/// Mismatched point arrays, invalid parameters and singular calibrations.
///
/// # Example
///
/// ```
/// use vidreg_linalg::mat33::IDENTITY_MAT33;
/// use vidreg_pose::{estimate_homography, EstimatorParams};
///
/// let x1: Vec<[f64; 2]> = (0..30)
///     .map(|i| [(i % 6) as f64 * 0.1, (i / 6) as f64 * 0.1])
///     .collect();
/// let x2: Vec<[f64; 2]> = x1.iter().map(|p| [p[0] + 0.01, p[1] - 0.02]).collect();
/// let estimate = estimate_homography(
///     &x1,
///     &x2,
///     &IDENTITY_MAT33,
///     &IDENTITY_MAT33,
///     &EstimatorParams::default(),
/// )
/// .unwrap();
/// assert!((estimate.homography[0][2] - 0.01).abs() < 1e-6);
/// assert_eq!(estimate.statistics.nr_inliers, 30);
/// ```
pub fn estimate_homography(
    x1: &[[f64; 2]],
    x2: &[[f64; 2]],
    k1: &Mat33,
    k2: &Mat33,
    params: &EstimatorParams,
) -> Result<HomographyEstimate, HomographyError> {
    check_lengths("x1", x1, "x2", x2)?;
    params.validate()?;

    let kind = params.homography_type;
    let n1 = Normalization::new(kind, k1)?;
    let n2 = Normalization::new(kind, k2)?;
    let xn1 = n1.apply(x1)?;
    let xn2 = n2.apply(x2)?;
    let s = params.one_over_scale2();
    let n = x1.len();

    let degenerate = || HomographyEstimate {
        homography: to_pixels(&IDENTITY_MAT33, &n1, &n2),
        normalized_homography: IDENTITY_MAT33,
        homography_type: kind,
        rotation: None,
        focal_scale: None,
        radial_distortion: None,
        inliers: vec![false; n],
        statistics: Statistics::degenerate(kind, n, s),
        world_pose: None,
    };

    if n < kind.min_points() {
        log::warn!(
            "Too few correspondences for {:?}: {} < {}",
            kind,
            n,
            kind.min_points()
        );
        return Ok(degenerate());
    }

    // scoring and polishing run on a random subset in random order
    let mut sampler = SampleGenerator::new(params.random_seed);
    let order = sampler.permutation(n);
    let (wx1, wx2): (Vec<[f64; 2]>, Vec<[f64; 2]>) = order[..n.min(params.max_points)]
        .iter()
        .map(|&i| (xn1[i], xn2[i]))
        .unzip();

    let pool = sampler.hypotheses(kind, &wx1, &wx2, params.nr_samples);
    if pool.is_empty() {
        log::warn!("No {:?} hypothesis could be solved from {} correspondences", kind, n);
        return Ok(degenerate());
    }

    let best = preemptive_select(&pool, &wx1, &wx2, params.chunk_size, params.keep_fraction, s);
    let Some(start) = ModelParameters::from_transfer(kind, &pool[best]) else {
        log::warn!("The best {:?} hypothesis has no finite parametrisation", kind);
        return Ok(degenerate());
    };

    let polish_params = PolishParams {
        max_iterations: params.max_iterations,
        improvement_requirement: params.improvement_requirement,
        one_over_scale2: s,
    };
    let outcome = polish(HomographyProblem::new(start, &wx1, &wx2), &polish_params);
    let fitted = *outcome.problem.params();

    let (statistics, inliers) =
        Statistics::from_problem(&HomographyProblem::new(fitted, &xn1, &xn2), s);
    let normalized_homography = fitted.transfer().homography;

    log::debug!(
        "Estimated {:?} from {} hypotheses: {}/{} inliers, cost {:.3}, median error {:.2e}",
        kind,
        pool.len(),
        statistics.nr_inliers,
        statistics.nr_points,
        statistics.cost,
        statistics.median_reprojection_error
    );

    Ok(HomographyEstimate {
        homography: to_pixels(&normalized_homography, &n1, &n2),
        normalized_homography,
        homography_type: kind,
        rotation: fitted.rotation(),
        focal_scale: fitted.focal_scale(),
        radial_distortion: fitted.radial_distortion(),
        inliers,
        statistics,
        world_pose: None,
    })
}
