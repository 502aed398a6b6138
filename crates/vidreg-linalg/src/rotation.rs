use crate::dense;
use crate::mat33::{det_mat33, mul_mat33, transpose_mat33, Mat33, Vec3, IDENTITY_MAT33};

/// Rotation matrix of a rotation vector (exponential map of so(3)).
///
/// The direction of `omega` is the rotation axis and its norm the angle in radians.
///
/// # Example
///
/// ```
/// use vidreg_linalg::rotation::rodrigues;
///
/// let r = rodrigues(&[0.0, 0.0, std::f64::consts::FRAC_PI_2]);
/// assert!((r[1][0] - 1.0).abs() < 1e-12);
/// ```
pub fn rodrigues(omega: &Vec3) -> Mat33 {
    let theta2 = omega[0] * omega[0] + omega[1] * omega[1] + omega[2] * omega[2];
    let theta = theta2.sqrt();

    // second order expansion keeps small increments exact to rounding
    let (a, b) = if theta < 1e-8 {
        (1.0 - theta2 / 6.0, 0.5 - theta2 / 24.0)
    } else {
        (theta.sin() / theta, (1.0 - theta.cos()) / theta2)
    };

    let [x, y, z] = *omega;
    [
        [
            1.0 - b * (y * y + z * z),
            b * x * y - a * z,
            b * x * z + a * y,
        ],
        [
            b * x * y + a * z,
            1.0 - b * (x * x + z * z),
            b * y * z - a * x,
        ],
        [
            b * x * z - a * y,
            b * y * z + a * x,
            1.0 - b * (x * x + y * y),
        ],
    ]
}

/// The rotation closest to `m` in the Frobenius sense.
///
/// Returns `None` when the decomposition fails.
pub fn nearest_rotation(m: &Mat33) -> Option<Mat33> {
    let svd = dense::mat33_to_faer(m).svd().ok()?;
    let u = svd.U();
    let v = svd.V();

    let mut u_arr = [[0.0; 3]; 3];
    let mut vt_arr = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            u_arr[i][j] = u[(i, j)];
            vt_arr[i][j] = v[(j, i)];
        }
    }

    let mut r = mul_mat33(&u_arr, &vt_arr);
    if det_mat33(&r) < 0.0 {
        for row in u_arr.iter_mut() {
            row[2] = -row[2];
        }
        r = mul_mat33(&u_arr, &vt_arr);
    }
    Some(r)
}

/// Whether `r` is orthonormal with a positive determinant, within `tol`.
pub fn is_rotation(r: &Mat33, tol: f64) -> bool {
    let rrt = mul_mat33(r, &transpose_mat33(r));
    let orthonormal =
        (0..3).all(|i| (0..3).all(|j| (rrt[i][j] - IDENTITY_MAT33[i][j]).abs() <= tol));
    orthonormal && (det_mat33(r) - 1.0).abs() <= tol
}
