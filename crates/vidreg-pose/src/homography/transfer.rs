use vidreg_linalg::mat33::{project_point2, IDENTITY_MAT33};
use vidreg_linalg::Mat33;

/// A point transfer between two views: a homography acting on radially distorted points.
///
/// A point `x` of the first view maps to `dehomog(H * [u(x), 1])`, which is compared against
/// `u(x')` in the second view, with `u(x) = x * (1 + k * |x|^2)`. For every type except
/// [`super::HomographyType::CameraRotationFocalDistortion`] the coefficient `k` is zero and the
/// transfer is the plain homography.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transfer {
    /// The homography in normalised coordinates.
    pub homography: Mat33,
    /// The radial distortion coefficient shared by both views.
    pub radial_distortion: f64,
}

impl Default for Transfer {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transfer {
    /// A transfer with no distortion.
    pub fn new(homography: Mat33) -> Self {
        Self {
            homography,
            radial_distortion: 0.0,
        }
    }

    /// The identity transfer.
    pub fn identity() -> Self {
        Self::new(IDENTITY_MAT33)
    }

    /// Apply the radial term `x * (1 + k * |x|^2)`.
    #[inline]
    pub fn distort(&self, x: &[f64; 2]) -> [f64; 2] {
        let k = self.radial_distortion;
        if k == 0.0 {
            return *x;
        }
        let factor = 1.0 + k * (x[0] * x[0] + x[1] * x[1]);
        [x[0] * factor, x[1] * factor]
    }

    /// Map a point of the first view into the (distorted) second view.
    ///
    /// Returns `None` when the point maps to infinity.
    #[inline]
    pub fn apply(&self, x1: &[f64; 2]) -> Option<[f64; 2]> {
        project_point2(&self.homography, &self.distort(x1))
    }

    /// The transfer residual of one correspondence.
    #[inline]
    pub fn residual(&self, x1: &[f64; 2], x2: &[f64; 2]) -> Option<[f64; 2]> {
        let p = self.apply(x1)?;
        let q = self.distort(x2);
        Some([p[0] - q[0], p[1] - q[1]])
    }

    /// The squared transfer error of one correspondence.
    #[inline]
    pub fn squared_error(&self, x1: &[f64; 2], x2: &[f64; 2]) -> Option<f64> {
        self.residual(x1, x2).map(|r| r[0] * r[0] + r[1] * r[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transfer_homography() -> Result<(), Box<dyn std::error::Error>> {
        let t = Transfer::new([[1.0, 0.0, 0.5], [0.0, 2.0, 0.0], [0.0, 0.0, 1.0]]);
        let p = t.apply(&[1.0, 1.0]).ok_or("at infinity")?;
        assert_relative_eq!(p[0], 1.5);
        assert_relative_eq!(p[1], 2.0);
        assert_relative_eq!(t.squared_error(&[1.0, 1.0], &[1.5, 2.0]).ok_or("at infinity")?, 0.0);
        assert_relative_eq!(t.squared_error(&[1.0, 1.0], &[1.5, 4.0]).ok_or("at infinity")?, 4.0);
        Ok(())
    }

    #[test]
    fn test_transfer_at_infinity() {
        let t = Transfer::new([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]);
        assert!(t.apply(&[0.0, 3.0]).is_none());
        assert!(t.residual(&[0.0, 3.0], &[0.0, 0.0]).is_none());
    }

    #[test]
    fn test_transfer_distortion() -> Result<(), Box<dyn std::error::Error>> {
        let t = Transfer {
            homography: IDENTITY_MAT33,
            radial_distortion: 0.1,
        };
        let d = t.distort(&[1.0, 2.0]);
        assert_relative_eq!(d[0], 1.5);
        assert_relative_eq!(d[1], 3.0);
        // identity homography: both views are distorted the same way
        let r = t.residual(&[0.3, -0.2], &[0.3, -0.2]).ok_or("at infinity")?;
        assert_relative_eq!(r[0], 0.0);
        assert_relative_eq!(r[1], 0.0);
        Ok(())
    }
}
