//! Refinement of a robust least squares problem by damped Gauss-Newton steps on Cauchy
//! weighted normal equations.
//!
//! Each iteration linearises all observations, weights them with [`cauchy_weight`] and solves
//! the damped normal equations. A step is accepted only when it decreases the robust cost,
//! otherwise the damping grows tenfold and the step is retried.

use faer::Mat;
use vidreg_linalg::dense;

use crate::cost::{cauchy_weight, grouped_log_sum, scaled_squared_error, DEFAULT_SCALE};
use crate::homography::MAX_PARAMETERS;

/// Rows of the Jacobian of one two dimensional residual.
pub type ResidualJacobian = [[f64; MAX_PARAMETERS]; 2];

const INITIAL_DAMPING: f64 = 1e-3;
const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING_TRIALS: usize = 8;
const DAMPING_FLOOR: f64 = 1e-12;

/// A least squares problem with two dimensional residuals and a local parametrisation.
pub trait RobustProblem: Sized {
    /// Number of free parameters, at most [`MAX_PARAMETERS`].
    fn nr_parameters(&self) -> usize;

    /// Number of observations.
    fn nr_observations(&self) -> usize;

    /// Residual of one observation, `None` when it is undefined at the current parameters.
    fn residual(&self, index: usize) -> Option<[f64; 2]>;

    /// Residual of one observation and its Jacobian with respect to the parameters.
    fn linearize(&self, index: usize, jacobian: &mut ResidualJacobian) -> Option<[f64; 2]>;

    /// The problem at the parameters moved by `delta`.
    fn step(&self, delta: &[f64]) -> Self;
}

/// Stop rule and noise level of the refinement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PolishParams {
    /// Maximum number of linearisations.
    pub max_iterations: usize,
    /// Stop when a step decreases the cost by less than this fraction.
    pub improvement_requirement: f64,
    /// The inverse squared point standard deviation.
    pub one_over_scale2: f64,
}

impl Default for PolishParams {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            improvement_requirement: 0.001,
            one_over_scale2: 1.0 / (DEFAULT_SCALE * DEFAULT_SCALE),
        }
    }
}

/// The refined problem and its final robust cost.
#[derive(Clone, Debug)]
pub struct PolishOutcome<P> {
    /// The problem at the refined parameters.
    pub problem: P,
    /// The robust cost at the refined parameters.
    pub cost: f64,
    /// Number of linearisations performed.
    pub iterations: usize,
}

/// The scaled squared errors of all observations.
pub fn scaled_errors<P: RobustProblem>(problem: &P, one_over_scale2: f64) -> Vec<f64> {
    (0..problem.nr_observations())
        .map(|i| {
            let e2 = problem.residual(i).map(|r| r[0] * r[0] + r[1] * r[1]);
            scaled_squared_error(e2, one_over_scale2)
        })
        .collect()
}

/// The robust cost of a problem at its current parameters.
pub fn problem_cost<P: RobustProblem>(problem: &P, one_over_scale2: f64) -> f64 {
    grouped_log_sum(scaled_errors(problem, one_over_scale2))
}

/// Cauchy weighted normal equations `J^T W J` and `J^T W r`.
#[derive(Clone, Debug)]
pub struct NormalEquations {
    /// The Gauss-Newton approximation of the Hessian, up to the factor `2 / sigma^2`.
    pub hessian: Mat<f64>,
    /// The gradient, up to the factor `2 / sigma^2`.
    pub gradient: Vec<f64>,
}

/// Accumulate the weighted normal equations, optionally over a subset of the observations.
pub fn normal_equations<P: RobustProblem>(
    problem: &P,
    one_over_scale2: f64,
    mask: Option<&[bool]>,
) -> NormalEquations {
    let p = problem.nr_parameters();
    let mut hessian = Mat::<f64>::zeros(p, p);
    let mut gradient = vec![0.0; p];
    let mut jac = [[0.0; MAX_PARAMETERS]; 2];

    for i in 0..problem.nr_observations() {
        if mask.is_some_and(|m| !m[i]) {
            continue;
        }
        let Some(r) = problem.linearize(i, &mut jac) else {
            continue;
        };
        let w = cauchy_weight(scaled_squared_error(
            Some(r[0] * r[0] + r[1] * r[1]),
            one_over_scale2,
        ));
        if w == 0.0 {
            continue;
        }

        for a in 0..p {
            gradient[a] += w * (jac[0][a] * r[0] + jac[1][a] * r[1]);
            for b in 0..=a {
                hessian[(a, b)] += w * (jac[0][a] * jac[0][b] + jac[1][a] * jac[1][b]);
            }
        }
    }

    for a in 0..p {
        for b in 0..a {
            hessian[(b, a)] = hessian[(a, b)];
        }
    }

    NormalEquations { hessian, gradient }
}

/// The information matrix `J^T W J / sigma^2`.
pub fn information_matrix<P: RobustProblem>(
    problem: &P,
    one_over_scale2: f64,
    mask: Option<&[bool]>,
) -> Mat<f64> {
    let normal = normal_equations(problem, one_over_scale2, mask);
    let p = problem.nr_parameters();
    Mat::<f64>::from_fn(p, p, |i, j| normal.hessian[(i, j)] * one_over_scale2)
}

/// Refine a problem until the robust cost stops decreasing.
///
/// The refinement stops after `params.max_iterations` linearisations, when no damped step
/// decreases the cost, or when the accepted step gains less than
/// `params.improvement_requirement` of the previous cost.
pub fn polish<P: RobustProblem>(problem: P, params: &PolishParams) -> PolishOutcome<P> {
    let s = params.one_over_scale2;
    let mut current = problem;
    let mut cost = problem_cost(&current, s);
    let mut damping = INITIAL_DAMPING;
    let mut iterations = 0;

    while iterations < params.max_iterations {
        iterations += 1;
        let normal = normal_equations(&current, s, None);
        if normal.gradient.iter().all(|g| *g == 0.0) {
            break;
        }
        let rhs: Vec<f64> = normal.gradient.iter().map(|g| -g).collect();

        let mut accepted = None;
        for _ in 0..MAX_DAMPING_TRIALS {
            let mut damped = normal.hessian.clone();
            for i in 0..damped.nrows() {
                damped[(i, i)] += damping * normal.hessian[(i, i)].max(DAMPING_FLOOR);
            }

            if let Some(delta) = dense::solve(&damped, &rhs) {
                let candidate = current.step(&delta);
                let candidate_cost = problem_cost(&candidate, s);
                if candidate_cost < cost {
                    accepted = Some((candidate, candidate_cost));
                    damping = (damping * 0.1).max(MIN_DAMPING);
                    break;
                }
            }
            damping *= 10.0;
        }

        let Some((candidate, candidate_cost)) = accepted else {
            break;
        };
        let improvement = cost - candidate_cost;
        let previous = cost;
        current = candidate;
        cost = candidate_cost;
        if improvement < params.improvement_requirement * previous {
            break;
        }
    }

    log::debug!(
        "Polished {} parameters in {} iterations, cost {:.4}",
        current.nr_parameters(),
        iterations,
        cost
    );

    PolishOutcome {
        problem: current,
        cost,
        iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // fit of a 2d point to observations, the parameter is the point itself
    struct PointProblem {
        point: [f64; 2],
        observations: Vec<[f64; 2]>,
    }

    impl RobustProblem for PointProblem {
        fn nr_parameters(&self) -> usize {
            2
        }

        fn nr_observations(&self) -> usize {
            self.observations.len()
        }

        fn residual(&self, index: usize) -> Option<[f64; 2]> {
            let o = self.observations[index];
            Some([self.point[0] - o[0], self.point[1] - o[1]])
        }

        fn linearize(&self, index: usize, jacobian: &mut ResidualJacobian) -> Option<[f64; 2]> {
            *jacobian = [[0.0; MAX_PARAMETERS]; 2];
            jacobian[0][0] = 1.0;
            jacobian[1][1] = 1.0;
            self.residual(index)
        }

        fn step(&self, delta: &[f64]) -> Self {
            Self {
                point: [self.point[0] + delta[0], self.point[1] + delta[1]],
                observations: self.observations.clone(),
            }
        }
    }

    #[test]
    fn test_polish_ignores_outliers() {
        let mut observations: Vec<[f64; 2]> = (0..20)
            .map(|i| [1.0 + 0.01 * ((i % 5) as f64 - 2.0), 2.0 + 0.01 * ((i % 3) as f64 - 1.0)])
            .collect();
        observations.extend([[50.0, -40.0], [60.0, 80.0], [-70.0, 10.0]]);

        let params = PolishParams {
            max_iterations: 50,
            improvement_requirement: 1e-9,
            one_over_scale2: 1.0 / (0.05 * 0.05),
        };
        let start = PointProblem {
            point: [1.1, 1.9],
            observations,
        };
        let start_cost = problem_cost(&start, params.one_over_scale2);
        let outcome = polish(start, &params);

        assert!(outcome.cost < start_cost);
        assert!(outcome.iterations <= params.max_iterations);
        assert_relative_eq!(outcome.problem.point[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(outcome.problem.point[1], 2.0, epsilon = 1e-3);
    }

    #[test]
    fn test_polish_at_optimum() {
        let params = PolishParams::default();
        let start = PointProblem {
            point: [0.5, 0.5],
            observations: vec![[0.5, 0.5]; 4],
        };
        let outcome = polish(start, &params);
        assert_eq!(outcome.cost, 0.0);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.problem.point, [0.5, 0.5]);
    }

    #[test]
    fn test_information_matrix_mask() {
        let problem = PointProblem {
            point: [0.0, 0.0],
            observations: vec![[0.0, 0.0]; 3],
        };
        let info = information_matrix(&problem, 4.0, None);
        assert_relative_eq!(info[(0, 0)], 12.0);
        assert_relative_eq!(info[(0, 1)], 0.0);

        let masked = information_matrix(&problem, 4.0, Some(&[true, false, false]));
        assert_relative_eq!(masked[(1, 1)], 4.0);
    }
}
