//! The cost of a correspondence is `ln(1 + min(e^2 / sigma^2, SATURATION^2))`, where `e` is the
//! transfer error in normalised units and `sigma` the expected point standard deviation.
//! Terms are multiplied in groups of [`GROUP_SIZE`] before taking the logarithm, which keeps
//! the number of `ln` evaluations low without risking overflow.

use crate::homography::Transfer;

/// Default point standard deviation in normalised units.
pub const DEFAULT_SCALE: f64 = 1.0 / 826.0;

/// Errors above this many standard deviations contribute a constant cost.
pub const SATURATION: f64 = 50.0;

/// Correspondences with an error below this many standard deviations are inliers.
pub const INLIER_THRESHOLD: f64 = 3.0;

/// Number of cost terms multiplied before one logarithm.
pub const GROUP_SIZE: usize = 10;

const SATURATION2: f64 = SATURATION * SATURATION;

/// The squared error in units of the standard deviation, saturated.
///
/// A missing error, i.e. a point mapped to infinity, takes the saturated value.
#[inline]
pub fn scaled_squared_error(squared_error: Option<f64>, one_over_scale2: f64) -> f64 {
    match squared_error {
        Some(e2) if e2.is_finite() => (e2 * one_over_scale2).min(SATURATION2),
        _ => SATURATION2,
    }
}

/// The iteratively reweighted least squares weight of a scaled squared error.
///
/// Saturated errors have no influence on the solution.
#[inline]
pub fn cauchy_weight(scaled_squared_error: f64) -> f64 {
    if scaled_squared_error >= SATURATION2 {
        0.0
    } else {
        1.0 / (1.0 + scaled_squared_error)
    }
}

/// Sum of `ln(1 + e)` over scaled squared errors, grouped by [`GROUP_SIZE`].
pub fn grouped_log_sum(scaled_squared_errors: impl IntoIterator<Item = f64>) -> f64 {
    let mut cost = 0.0;
    let mut product = 1.0;
    let mut count = 0;
    for e in scaled_squared_errors {
        product *= 1.0 + e;
        count += 1;
        if count == GROUP_SIZE {
            cost += product.ln();
            product = 1.0;
            count = 0;
        }
    }
    if count > 0 {
        cost += product.ln();
    }
    cost
}

/// The robust cost of a transfer over a set of correspondences.
///
/// # Arguments
///
/// * `transfer` - The transfer in normalised coordinates.
/// * `x1` - The points of the first view.
/// * `x2` - The corresponding points of the second view.
/// * `one_over_scale2` - The inverse squared point standard deviation.
pub fn robust_cost(
    transfer: &Transfer,
    x1: &[[f64; 2]],
    x2: &[[f64; 2]],
    one_over_scale2: f64,
) -> f64 {
    debug_assert_eq!(x1.len(), x2.len());
    grouped_log_sum(
        x1.iter()
            .zip(x2)
            .map(|(p, q)| scaled_squared_error(transfer.squared_error(p, q), one_over_scale2)),
    )
}
