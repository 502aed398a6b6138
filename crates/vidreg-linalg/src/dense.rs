use faer::prelude::{Solve, SolveLstsq};
use faer::{Mat, Side};

use crate::mat33::Mat33;

/// Copy a 3x3 array into an owned faer matrix.
pub fn mat33_to_faer(m: &Mat33) -> Mat<f64> {
    Mat::<f64>::from_fn(3, 3, |i, j| m[i][j])
}

/// Eigenvalues of a symmetric matrix sorted in non-increasing order.
///
/// Only the lower triangle of `a` is read. Returns `None` when the decomposition fails.
pub fn symmetric_eigenvalues(a: &Mat<f64>) -> Option<Vec<f64>> {
    let mut values = a.self_adjoint_eigenvalues(Side::Lower).ok()?;
    values.reverse();
    Some(values)
}

/// Solve the square system `a x = b` through a partially pivoted LU decomposition.
///
/// Returns `None` when the solution is not finite, which is how a singular `a` shows up.
pub fn solve(a: &Mat<f64>, b: &[f64]) -> Option<Vec<f64>> {
    debug_assert_eq!(a.nrows(), b.len());
    let rhs = Mat::<f64>::from_fn(b.len(), 1, |i, _| b[i]);
    let x = a.partial_piv_lu().solve(&rhs);
    let x: Vec<f64> = (0..x.nrows()).map(|i| x[(i, 0)]).collect();
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Least squares solution of the overdetermined system `a x = b` through QR.
///
/// Returns `None` when the solution is not finite.
pub fn lstsq(a: &Mat<f64>, b: &[f64]) -> Option<Vec<f64>> {
    debug_assert_eq!(a.nrows(), b.len());
    debug_assert!(a.nrows() >= a.ncols());
    let rhs = Mat::<f64>::from_fn(b.len(), 1, |i, _| b[i]);
    let x = a.qr().solve_lstsq(&rhs);
    let x: Vec<f64> = (0..a.ncols()).map(|i| x[(i, 0)]).collect();
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Inverse of a square matrix.
///
/// Returns `None` when the matrix is singular or badly conditioned. The reciprocal condition
/// estimate uses the singular values of `a`.
pub fn inverse(a: &Mat<f64>) -> Option<Mat<f64>> {
    let n = a.nrows();
    let singular_values = a.singular_values().ok()?;
    let largest = singular_values.iter().copied().fold(0.0, f64::max);
    let smallest = singular_values
        .iter()
        .copied()
        .fold(f64::INFINITY, f64::min);
    if largest <= 0.0 || smallest <= largest * 1e-12 {
        return None;
    }
    let inv = a.partial_piv_lu().solve(&Mat::<f64>::identity(n, n));
    (0..n)
        .all(|i| (0..n).all(|j| inv[(i, j)].is_finite()))
        .then_some(inv)
}
