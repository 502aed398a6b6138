/// A row-major 3x3 matrix.
pub type Mat33 = [[f64; 3]; 3];

/// A 3-vector.
pub type Vec3 = [f64; 3];

/// The 3x3 identity matrix.
pub const IDENTITY_MAT33: Mat33 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Determinant of a 3x3 matrix.
pub fn det_mat33(m: &Mat33) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

/// Inverse of a 3x3 matrix through its adjugate.
///
/// Returns `None` when the determinant is zero or the result is not finite.
pub fn inverse_mat33(m: &Mat33) -> Option<Mat33> {
    let det = det_mat33(m);
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    let inv_det = 1.0 / det;
    let inv = [
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
        ],
    ];
    inv.iter().flatten().all(|v| v.is_finite()).then_some(inv)
}

/// Matrix product `a * b`.
pub fn mul_mat33(a: &Mat33, b: &Mat33) -> Mat33 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, val) in row.iter_mut().enumerate() {
            *val = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    out
}

/// Matrix-vector product `m * v`.
pub fn mat33_mul_vec3(m: &Mat33, v: &Vec3) -> Vec3 {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// Transpose of a 3x3 matrix.
pub fn transpose_mat33(m: &Mat33) -> Mat33 {
    [
        [m[0][0], m[1][0], m[2][0]],
        [m[0][1], m[1][1], m[2][1]],
        [m[0][2], m[1][2], m[2][2]],
    ]
}

/// Multiply every entry by `s`.
pub fn scale_mat33(m: &Mat33, s: f64) -> Mat33 {
    m.map(|row| row.map(|v| v * s))
}

/// Scale a projective matrix so that its bottom-right entry is one.
///
/// Returns `false` and leaves the matrix untouched when that entry is (numerically) zero.
pub fn normalize_mat33_inplace(m: &mut Mat33) -> bool {
    let w = m[2][2];
    if w.abs() <= f64::EPSILON {
        return false;
    }
    *m = scale_mat33(m, 1.0 / w);
    true
}

/// The skew-symmetric matrix `[v]x` such that `[v]x * w = v x w`.
pub fn skew_mat33(v: &Vec3) -> Mat33 {
    [[0.0, -v[2], v[1]], [v[2], 0.0, -v[0]], [-v[1], v[0], 0.0]]
}

/// Map a 2d point through a projective matrix.
///
/// Returns `None` when the point is mapped to infinity.
pub fn project_point2(m: &Mat33, p: &[f64; 2]) -> Option<[f64; 2]> {
    let q = mat33_mul_vec3(m, &[p[0], p[1], 1.0]);
    if q[2].abs() <= f64::EPSILON {
        return None;
    }
    Some([q[0] / q[2], q[1] / q[2]])
}
