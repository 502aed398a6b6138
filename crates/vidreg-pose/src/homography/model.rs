use vidreg_linalg::mat33::{
    det_mat33, mul_mat33, normalize_mat33_inplace, scale_mat33, skew_mat33, IDENTITY_MAT33,
};
use vidreg_linalg::rotation::{nearest_rotation, rodrigues};
use vidreg_linalg::Mat33;

use super::{HomographyType, Transfer};

/// Largest number of parameters of any model handled by the polishing step.
pub const MAX_PARAMETERS: usize = 8;

/// Jacobian of the nine homography entries (row-major) with respect to the model parameters.
pub type MatrixJacobian = [[f64; MAX_PARAMETERS]; 9];

// parameter slots of the camera rotation types
const FOCAL_SLOT: usize = 3;
const DISTORTION_SLOT: usize = 4;

/// The minimal parametrisation of a transfer of a given [`HomographyType`].
///
/// Planar types are linear in their parameters. The camera rotation types hold a base
/// rotation `R0` and a local rotation vector that is folded into `R0` after every step, so the
/// rotation vector is always zero between steps. The focal scale `f` and the distortion `k`
/// follow in slots 3 and 4.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ModelParameters {
    kind: HomographyType,
    values: [f64; MAX_PARAMETERS],
    base_rotation: Mat33,
}

impl ModelParameters {
    /// Project a transfer onto the closest model of the given type.
    ///
    /// Returns `None` when the transfer cannot be expressed, e.g. a projective matrix with a
    /// vanishing bottom-right entry or a camera rotation whose decomposition fails.
    pub fn from_transfer(kind: HomographyType, transfer: &Transfer) -> Option<Self> {
        let mut values = [0.0; MAX_PARAMETERS];

        if kind.is_camera_rotation() {
            // a rotation is only defined up to scale as a homography
            let det = det_mat33(&transfer.homography);
            if !det.is_finite() || det.abs() <= f64::EPSILON {
                return None;
            }
            let base_rotation =
                nearest_rotation(&scale_mat33(&transfer.homography, 1.0 / det.cbrt()))?;
            values[FOCAL_SLOT] = 1.0;
            values[DISTORTION_SLOT] = transfer.radial_distortion;
            return Self::checked(kind, values, base_rotation);
        }

        let mut h = transfer.homography;
        if !normalize_mat33_inplace(&mut h) {
            return None;
        }
        let similarity = [0.5 * (h[0][0] + h[1][1]), 0.5 * (h[1][0] - h[0][1])];
        let angle = similarity[1].atan2(similarity[0]);
        match kind {
            HomographyType::Projective => {
                for (v, entry) in values.iter_mut().zip(h.iter().flatten()) {
                    *v = *entry;
                }
            }
            HomographyType::Affine => {
                values[..3].copy_from_slice(&h[0]);
                values[3..6].copy_from_slice(&h[1]);
            }
            HomographyType::Similarity | HomographyType::SimilarityU => {
                values[..4].copy_from_slice(&[similarity[0], similarity[1], h[0][2], h[1][2]]);
            }
            HomographyType::Translation => values[..2].copy_from_slice(&[h[0][2], h[1][2]]),
            HomographyType::Rotation | HomographyType::RotationU => values[0] = angle,
            HomographyType::Scaling => values[0] = similarity[0],
            HomographyType::ScaleTranslation => {
                values[..3].copy_from_slice(&[similarity[0], h[0][2], h[1][2]]);
            }
            HomographyType::RotationTranslation => {
                values[..3].copy_from_slice(&[angle, h[0][2], h[1][2]]);
            }
            HomographyType::RotationScale => values[..2].copy_from_slice(&similarity),
            HomographyType::CameraRotation
            | HomographyType::CameraRotationFocal
            | HomographyType::CameraRotationFocalDistortion => return None,
        }

        Self::checked(kind, values, IDENTITY_MAT33)
    }

    fn checked(
        kind: HomographyType,
        values: [f64; MAX_PARAMETERS],
        base_rotation: Mat33,
    ) -> Option<Self> {
        let params = Self {
            kind,
            values,
            base_rotation,
        };
        params.values.iter().all(|v| v.is_finite()).then_some(params)
    }

    /// The model type.
    pub fn kind(&self) -> HomographyType {
        self.kind
    }

    /// The free parameters, `kind().nr_parameters()` values.
    pub fn values(&self) -> &[f64] {
        &self.values[..self.kind.nr_parameters()]
    }

    /// The base rotation of a camera rotation model, `None` for planar types.
    pub fn rotation(&self) -> Option<Mat33> {
        self.kind
            .is_camera_rotation()
            .then(|| mul_mat33(&rodrigues(&self.rotation_vector()), &self.base_rotation))
    }

    /// The focal scale of the models that estimate one.
    pub fn focal_scale(&self) -> Option<f64> {
        self.kind
            .has_focal_scale()
            .then_some(self.values[FOCAL_SLOT])
    }

    /// The radial distortion coefficient of the models that estimate one.
    pub fn radial_distortion(&self) -> Option<f64> {
        self.kind
            .has_radial_distortion()
            .then_some(self.values[DISTORTION_SLOT])
    }

    fn rotation_vector(&self) -> [f64; 3] {
        [self.values[0], self.values[1], self.values[2]]
    }

    fn focal(&self) -> f64 {
        self.focal_scale().unwrap_or(1.0)
    }

    /// The transfer described by the parameters.
    pub fn transfer(&self) -> Transfer {
        let v = &self.values;
        let homography = match self.kind {
            HomographyType::Projective => {
                [[v[0], v[1], v[2]], [v[3], v[4], v[5]], [v[6], v[7], 1.0]]
            }
            HomographyType::Affine => [[v[0], v[1], v[2]], [v[3], v[4], v[5]], [0.0, 0.0, 1.0]],
            HomographyType::Similarity | HomographyType::SimilarityU => {
                [[v[0], -v[1], v[2]], [v[1], v[0], v[3]], [0.0, 0.0, 1.0]]
            }
            HomographyType::Translation => [[1.0, 0.0, v[0]], [0.0, 1.0, v[1]], [0.0, 0.0, 1.0]],
            HomographyType::Rotation | HomographyType::RotationU => {
                let (sin, cos) = v[0].sin_cos();
                [[cos, -sin, 0.0], [sin, cos, 0.0], [0.0, 0.0, 1.0]]
            }
            HomographyType::Scaling => [[v[0], 0.0, 0.0], [0.0, v[0], 0.0], [0.0, 0.0, 1.0]],
            HomographyType::ScaleTranslation => {
                [[v[0], 0.0, v[1]], [0.0, v[0], v[2]], [0.0, 0.0, 1.0]]
            }
            HomographyType::RotationTranslation => {
                let (sin, cos) = v[0].sin_cos();
                [[cos, -sin, v[1]], [sin, cos, v[2]], [0.0, 0.0, 1.0]]
            }
            HomographyType::RotationScale => {
                [[v[0], -v[1], 0.0], [v[1], v[0], 0.0], [0.0, 0.0, 1.0]]
            }
            HomographyType::CameraRotation
            | HomographyType::CameraRotationFocal
            | HomographyType::CameraRotationFocalDistortion => {
                let r = mul_mat33(&rodrigues(&self.rotation_vector()), &self.base_rotation);
                conjugate_by_focal(&r, self.focal())
            }
        };

        Transfer {
            homography,
            radial_distortion: self.radial_distortion().unwrap_or(0.0),
        }
    }

    /// The derivative of the homography entries with respect to the parameters.
    ///
    /// For the camera rotation types the derivative is taken at a zero rotation vector, which
    /// holds after [`ModelParameters::from_transfer`] and every [`ModelParameters::step`]. The
    /// distortion coefficient does not enter the matrix and has a zero column.
    pub fn matrix_jacobian(&self) -> MatrixJacobian {
        let mut jac = [[0.0; MAX_PARAMETERS]; 9];
        let v = &self.values;
        let mut set = |row: usize, col: usize, value: f64| jac[row][col] = value;

        match self.kind {
            HomographyType::Projective => (0..8).for_each(|i| set(i, i, 1.0)),
            HomographyType::Affine => (0..6).for_each(|i| set(i, i, 1.0)),
            HomographyType::Similarity | HomographyType::SimilarityU => {
                // [[a, -b, tx], [b, a, ty]]
                set(0, 0, 1.0);
                set(4, 0, 1.0);
                set(1, 1, -1.0);
                set(3, 1, 1.0);
                set(2, 2, 1.0);
                set(5, 3, 1.0);
            }
            HomographyType::Translation => {
                set(2, 0, 1.0);
                set(5, 1, 1.0);
            }
            HomographyType::Rotation | HomographyType::RotationU => {
                let (sin, cos) = v[0].sin_cos();
                set(0, 0, -sin);
                set(1, 0, -cos);
                set(3, 0, cos);
                set(4, 0, -sin);
            }
            HomographyType::Scaling => {
                set(0, 0, 1.0);
                set(4, 0, 1.0);
            }
            HomographyType::ScaleTranslation => {
                set(0, 0, 1.0);
                set(4, 0, 1.0);
                set(2, 1, 1.0);
                set(5, 2, 1.0);
            }
            HomographyType::RotationTranslation => {
                let (sin, cos) = v[0].sin_cos();
                set(0, 0, -sin);
                set(1, 0, -cos);
                set(3, 0, cos);
                set(4, 0, -sin);
                set(2, 1, 1.0);
                set(5, 2, 1.0);
            }
            HomographyType::RotationScale => {
                set(0, 0, 1.0);
                set(4, 0, 1.0);
                set(1, 1, -1.0);
                set(3, 1, 1.0);
            }
            HomographyType::CameraRotation
            | HomographyType::CameraRotationFocal
            | HomographyType::CameraRotationFocalDistortion => {
                let f = self.focal();
                let r = &self.base_rotation;
                for axis in 0..3 {
                    let mut e = [0.0; 3];
                    e[axis] = 1.0;
                    let d = conjugate_by_focal(&mul_mat33(&skew_mat33(&e), r), f);
                    for (i, value) in d.iter().flatten().enumerate() {
                        set(i, axis, *value);
                    }
                }
                if self.kind.has_focal_scale() {
                    // H = F R F^-1 with F = diag(f, f, 1)
                    set(2, FOCAL_SLOT, r[0][2]);
                    set(5, FOCAL_SLOT, r[1][2]);
                    set(6, FOCAL_SLOT, -r[2][0] / (f * f));
                    set(7, FOCAL_SLOT, -r[2][1] / (f * f));
                }
            }
        }
        jac
    }

    /// The parameters after an additive update `delta` of the free parameters.
    ///
    /// The rotation vector of the camera rotation types is folded into the base rotation.
    pub fn step(&self, delta: &[f64]) -> Self {
        let mut next = *self;
        for (v, d) in next.values.iter_mut().zip(delta) {
            *v += d;
        }
        if self.kind.is_camera_rotation() {
            next.base_rotation =
                mul_mat33(&rodrigues(&next.rotation_vector()), &self.base_rotation);
            next.values[..3].fill(0.0);
        }
        next
    }
}

// F M F^-1 with F = diag(f, f, 1)
fn conjugate_by_focal(m: &Mat33, f: f64) -> Mat33 {
    [
        [m[0][0], m[0][1], m[0][2] * f],
        [m[1][0], m[1][1], m[1][2] * f],
        [m[2][0] / f, m[2][1] / f, m[2][2]],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_transfer(kind: HomographyType) -> Transfer {
        let (sin, cos) = 0.2f64.sin_cos();
        let homography = match kind {
            HomographyType::Projective => [[1.1, 0.05, 0.2], [-0.1, 0.95, -0.1], [0.15, -0.2, 1.0]],
            HomographyType::Affine => [[0.9, 0.2, 0.1], [-0.15, 1.05, -0.3], [0.0, 0.0, 1.0]],
            HomographyType::Similarity | HomographyType::SimilarityU => {
                [[1.1 * cos, -1.1 * sin, 0.2], [1.1 * sin, 1.1 * cos, 0.1], [0.0, 0.0, 1.0]]
            }
            HomographyType::Translation => [[1.0, 0.0, 0.2], [0.0, 1.0, 0.1], [0.0, 0.0, 1.0]],
            HomographyType::Rotation | HomographyType::RotationU => {
                [[cos, -sin, 0.0], [sin, cos, 0.0], [0.0, 0.0, 1.0]]
            }
            HomographyType::Scaling => [[1.1, 0.0, 0.0], [0.0, 1.1, 0.0], [0.0, 0.0, 1.0]],
            HomographyType::ScaleTranslation => [[1.1, 0.0, 0.2], [0.0, 1.1, 0.1], [0.0, 0.0, 1.0]],
            HomographyType::RotationTranslation => {
                [[cos, -sin, 0.2], [sin, cos, 0.1], [0.0, 0.0, 1.0]]
            }
            HomographyType::RotationScale => {
                [[1.1 * cos, -1.1 * sin, 0.0], [1.1 * sin, 1.1 * cos, 0.0], [0.0, 0.0, 1.0]]
            }
            _ => rodrigues(&[0.05, -0.1, 0.2]),
        };
        Transfer {
            homography,
            radial_distortion: if kind.has_radial_distortion() { 0.01 } else { 0.0 },
        }
    }

    #[test]
    fn test_parameters_reproduce_transfer() -> Result<(), Box<dyn std::error::Error>> {
        for kind in HomographyType::ALL {
            let expected = sample_transfer(kind);
            let params = ModelParameters::from_transfer(kind, &expected).ok_or("not expressible")?;
            assert_eq!(params.values().len(), kind.nr_parameters());
            let t = params.transfer();
            for i in 0..3 {
                for j in 0..3 {
                    assert_relative_eq!(
                        t.homography[i][j],
                        expected.homography[i][j],
                        epsilon = 1e-12
                    );
                }
            }
            assert_relative_eq!(t.radial_distortion, expected.radial_distortion);
        }
        Ok(())
    }

    #[test]
    fn test_matrix_jacobian_finite_differences() -> Result<(), Box<dyn std::error::Error>> {
        let eps = 1e-7;
        for kind in HomographyType::ALL {
            let mut params = ModelParameters::from_transfer(kind, &sample_transfer(kind))
                .ok_or("not expressible")?;
            if kind.has_focal_scale() {
                params = params.step(&[0.0, 0.0, 0.0, 0.3]);
            }
            let jac = params.matrix_jacobian();
            let h0 = params.transfer().homography;

            for p in 0..kind.nr_parameters() {
                let mut delta = [0.0; MAX_PARAMETERS];
                delta[p] = eps;
                let h1 = params.step(&delta[..kind.nr_parameters()]).transfer().homography;
                for (m, (a, b)) in h1.iter().flatten().zip(h0.iter().flatten()).enumerate() {
                    assert_relative_eq!((a - b) / eps, jac[m][p], epsilon = 1e-5);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_camera_step_keeps_rotation() -> Result<(), Box<dyn std::error::Error>> {
        let kind = HomographyType::CameraRotationFocal;
        let params = ModelParameters::from_transfer(kind, &sample_transfer(kind)).ok_or("svd")?;
        let stepped = params.step(&[0.1, -0.2, 0.05, 0.5]);
        assert_eq!(&stepped.values()[..3], &[0.0, 0.0, 0.0]);
        assert_relative_eq!(stepped.focal_scale().ok_or("no focal")?, 1.5);
        let r = stepped.rotation().ok_or("no rotation")?;
        assert!(vidreg_linalg::rotation::is_rotation(&r, 1e-12));

        let affine = HomographyType::Affine;
        let planar = ModelParameters::from_transfer(affine, &sample_transfer(affine)).ok_or("h22")?;
        assert!(planar.rotation().is_none());
        Ok(())
    }

    #[test]
    fn test_projective_at_infinity() {
        let t = Transfer::new([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);
        assert!(ModelParameters::from_transfer(HomographyType::Projective, &t).is_none());
    }
}
