use vidreg_linalg::mat33::mat33_mul_vec3;

use super::{MatrixJacobian, ModelParameters, Transfer, MAX_PARAMETERS};
use crate::polish::{ResidualJacobian, RobustProblem};

/// Transfer errors of a set of correspondences under a parametrised model.
#[derive(Clone, Debug)]
pub struct HomographyProblem<'a> {
    params: ModelParameters,
    transfer: Transfer,
    matrix_jacobian: MatrixJacobian,
    x1: &'a [[f64; 2]],
    x2: &'a [[f64; 2]],
}

impl<'a> HomographyProblem<'a> {
    /// Create a problem over the correspondences `x1[i] <-> x2[i]`.
    pub fn new(params: ModelParameters, x1: &'a [[f64; 2]], x2: &'a [[f64; 2]]) -> Self {
        debug_assert_eq!(x1.len(), x2.len());
        Self {
            transfer: params.transfer(),
            matrix_jacobian: params.matrix_jacobian(),
            params,
            x1,
            x2,
        }
    }

    /// The current model parameters.
    pub fn params(&self) -> &ModelParameters {
        &self.params
    }

    /// The current transfer.
    pub fn transfer(&self) -> &Transfer {
        &self.transfer
    }
}

impl RobustProblem for HomographyProblem<'_> {
    fn nr_parameters(&self) -> usize {
        self.params.kind().nr_parameters()
    }

    fn nr_observations(&self) -> usize {
        self.x1.len()
    }

    fn residual(&self, index: usize) -> Option<[f64; 2]> {
        self.transfer.residual(&self.x1[index], &self.x2[index])
    }

    fn linearize(&self, index: usize, jacobian: &mut ResidualJacobian) -> Option<[f64; 2]> {
        let h = &self.transfer.homography;
        let (x1, x2) = (&self.x1[index], &self.x2[index]);
        let u = self.transfer.distort(x1);
        let q = mat33_mul_vec3(h, &[u[0], u[1], 1.0]);
        if q[2].abs() <= f64::EPSILON {
            return None;
        }
        let w = 1.0 / q[2];
        let p = [q[0] / q[2], q[1] / q[2]];
        let v = self.transfer.distort(x2);
        let residual = [p[0] - v[0], p[1] - v[1]];

        // derivative of the projected point with respect to the nine homography entries
        let dp_dh = [
            [
                u[0] * w,
                u[1] * w,
                w,
                0.0,
                0.0,
                0.0,
                -p[0] * u[0] * w,
                -p[0] * u[1] * w,
                -p[0] * w,
            ],
            [
                0.0,
                0.0,
                0.0,
                u[0] * w,
                u[1] * w,
                w,
                -p[1] * u[0] * w,
                -p[1] * u[1] * w,
                -p[1] * w,
            ],
        ];

        let nr_parameters = self.nr_parameters();
        *jacobian = [[0.0; MAX_PARAMETERS]; 2];
        for (row, dp) in jacobian.iter_mut().zip(&dp_dh) {
            for (col, value) in row.iter_mut().enumerate().take(nr_parameters) {
                *value = dp
                    .iter()
                    .zip(&self.matrix_jacobian)
                    .map(|(a, dh)| a * dh[col])
                    .sum();
            }
        }

        if self.params.kind().has_radial_distortion() {
            // u(x) = x (1 + k |x|^2) enters both views
            let slot = nr_parameters - 1;
            let r1 = x1[0] * x1[0] + x1[1] * x1[1];
            let r2 = x2[0] * x2[0] + x2[1] * x2[1];
            let du = [x1[0] * r1, x1[1] * r1];
            for i in 0..2 {
                let dp_du0 = (h[i][0] - p[i] * h[2][0]) * w;
                let dp_du1 = (h[i][1] - p[i] * h[2][1]) * w;
                jacobian[i][slot] = dp_du0 * du[0] + dp_du1 * du[1] - x2[i] * r2;
            }
        }

        Some(residual)
    }

    fn step(&self, delta: &[f64]) -> Self {
        Self::new(self.params.step(delta), self.x1, self.x2)
    }
}
