//! A secondary pass that refines the pose of the second camera against known 3d points and
//! removes correspondences that disagree with them.

use vidreg_linalg::mat33::{
    inverse_mat33, mat33_mul_vec3, mul_mat33, project_point2, skew_mat33, IDENTITY_MAT33,
};
use vidreg_linalg::rotation::rodrigues;
use vidreg_linalg::{dense, Mat33, Vec3};

use crate::cost::DEFAULT_SCALE;
use crate::error::check_lengths;
use crate::estimator::{estimate_homography, EstimatorParams, HomographyEstimate};
use crate::homography::MAX_PARAMETERS;
use crate::polish::{
    information_matrix, polish, scaled_errors, PolishParams, ResidualJacobian, RobustProblem,
};
use crate::statistics::{covariance_block, inlier_mask, MIN_POSE_COVARIANCE_INLIERS};
use crate::HomographyError;

/// Fewest world points that determine a pose.
pub const MIN_WORLD_POINTS: usize = 3;

/// Parameters of the world point filter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldFilterParams {
    /// Point standard deviation in normalised units.
    pub scale: f64,
    /// Maximum number of refinement iterations.
    pub max_iterations: usize,
    /// Refinement stops when a step gains less than this fraction of the cost.
    pub improvement_requirement: f64,
}

impl Default for WorldFilterParams {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            max_iterations: 25,
            improvement_requirement: 0.001,
        }
    }
}

/// The refined pose and the world point inliers.
#[derive(Clone, Debug, PartialEq)]
pub struct WorldFilterResult {
    /// Rotation from the world frame to the camera frame.
    pub rotation: Mat33,
    /// Translation from the world frame to the camera frame.
    pub translation: Vec3,
    /// Per-point inlier mask.
    pub inliers: Vec<bool>,
    /// Number of inliers.
    pub nr_inliers: usize,
    /// Robust cost at the refined pose.
    pub cost: f64,
    /// Standard deviations of the rotation vector and the translation.
    pub pose_std: [f64; 6],
    /// Covariance of the rotation vector.
    pub rotation_covariance: Mat33,
    /// Covariance of the translation.
    pub translation_covariance: Mat33,
    /// Whether the covariance fields are filled.
    pub pose_covariance_ready: bool,
}

// reprojection of world points through a pose, parametrised by a left rotation increment and
// a translation increment
struct PoseProblem<'a> {
    rotation: Mat33,
    translation: Vec3,
    world: &'a [[f64; 3]],
    image: &'a [[f64; 2]],
}

impl PoseProblem<'_> {
    fn camera_point(&self, index: usize) -> (Vec3, Vec3) {
        let rotated = mat33_mul_vec3(&self.rotation, &self.world[index]);
        let t = &self.translation;
        (rotated, [rotated[0] + t[0], rotated[1] + t[1], rotated[2] + t[2]])
    }
}

impl RobustProblem for PoseProblem<'_> {
    fn nr_parameters(&self) -> usize {
        6
    }

    fn nr_observations(&self) -> usize {
        self.world.len()
    }

    fn residual(&self, index: usize) -> Option<[f64; 2]> {
        let (_, xc) = self.camera_point(index);
        if xc[2] <= f64::EPSILON {
            return None;
        }
        let u = &self.image[index];
        Some([xc[0] / xc[2] - u[0], xc[1] / xc[2] - u[1]])
    }

    fn linearize(&self, index: usize, jacobian: &mut ResidualJacobian) -> Option<[f64; 2]> {
        let residual = self.residual(index)?;
        let (rotated, xc) = self.camera_point(index);
        let z_inv = 1.0 / xc[2];
        let dp_dx = [
            [z_inv, 0.0, -xc[0] * z_inv * z_inv],
            [0.0, z_inv, -xc[1] * z_inv * z_inv],
        ];
        // d(exp(w) R X)/dw = -[R X]x
        let skew = skew_mat33(&rotated);

        *jacobian = [[0.0; MAX_PARAMETERS]; 2];
        for (row, dp) in jacobian.iter_mut().zip(&dp_dx) {
            for k in 0..3 {
                row[k] = -(0..3).map(|m| dp[m] * skew[m][k]).sum::<f64>();
                row[3 + k] = dp[k];
            }
        }
        Some(residual)
    }

    fn step(&self, delta: &[f64]) -> Self {
        let t = &self.translation;
        Self {
            rotation: mul_mat33(&rodrigues(&[delta[0], delta[1], delta[2]]), &self.rotation),
            translation: [t[0] + delta[3], t[1] + delta[4], t[2] + delta[5]],
            world: self.world,
            image: self.image,
        }
    }
}

// least squares translation for a known rotation from x (R X + t)_z = (R X + t)_x and likewise y
fn initial_translation(rotation: &Mat33, world: &[[f64; 3]], image: &[[f64; 2]]) -> Option<Vec3> {
    let n = world.len();
    let mut mat_a = faer::Mat::<f64>::zeros(2 * n, 3);
    let mut b = vec![0.0; 2 * n];
    for (i, (p, u)) in world.iter().zip(image).enumerate() {
        let r = mat33_mul_vec3(rotation, p);
        mat_a[(2 * i, 0)] = 1.0;
        mat_a[(2 * i, 2)] = -u[0];
        b[2 * i] = u[0] * r[2] - r[0];
        mat_a[(2 * i + 1, 1)] = 1.0;
        mat_a[(2 * i + 1, 2)] = -u[1];
        b[2 * i + 1] = u[1] * r[2] - r[1];
    }
    let t = dense::lstsq(&mat_a, &b)?;
    Some([t[0], t[1], t[2]])
}

/// Refine the pose of a camera from world points and their images, and flag outliers.
///
/// The translation is initialised by linear least squares for the initial rotation, then the
/// six pose parameters are refined with the robust cost of the estimator. The covariance of
/// the pose is filled when at least [`MIN_POSE_COVARIANCE_INLIERS`] inliers remain.
///
/// # Arguments
///
/// * `world` - The 3d points.
/// * `image` - Their images in pixels.
/// * `k` - The camera calibration.
/// * `initial_rotation` - The starting rotation, identity when `None`.
/// * `params` - The filter parameters.
///
/// # Errors
///
/// Mismatched arrays, fewer than [`MIN_WORLD_POINTS`] points, an invalid scale, a singular
/// calibration, or points that do not fix the translation.
pub fn filter_world_points(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    k: &Mat33,
    initial_rotation: Option<Mat33>,
    params: &WorldFilterParams,
) -> Result<WorldFilterResult, HomographyError> {
    check_lengths("world", world, "image", image)?;
    if world.len() < MIN_WORLD_POINTS {
        return Err(HomographyError::InsufficientCorrespondences {
            required: MIN_WORLD_POINTS,
            actual: world.len(),
        });
    }
    if !(params.scale.is_finite() && params.scale > 0.0) {
        return Err(HomographyError::InvalidParameter(
            "scale must be positive".to_string(),
        ));
    }

    let k_inv = inverse_mat33(k).ok_or(HomographyError::SingularCalibration)?;
    let normalized: Vec<[f64; 2]> = image
        .iter()
        .map(|p| project_point2(&k_inv, p).ok_or(HomographyError::SingularCalibration))
        .collect::<Result<_, _>>()?;

    let rotation = initial_rotation.unwrap_or(IDENTITY_MAT33);
    let translation = initial_translation(&rotation, world, &normalized)
        .ok_or(HomographyError::DegenerateConfiguration)?;

    let s = 1.0 / (params.scale * params.scale);
    let polish_params = PolishParams {
        max_iterations: params.max_iterations,
        improvement_requirement: params.improvement_requirement,
        one_over_scale2: s,
    };
    let start = PoseProblem {
        rotation,
        translation,
        world,
        image: &normalized,
    };
    let outcome = polish(start, &polish_params);
    let problem = outcome.problem;

    let inliers = inlier_mask(&scaled_errors(&problem, s));
    let nr_inliers = inliers.iter().filter(|&&inlier| inlier).count();

    let mut result = WorldFilterResult {
        rotation: problem.rotation,
        translation: problem.translation,
        inliers,
        nr_inliers,
        cost: outcome.cost,
        pose_std: [0.0; 6],
        rotation_covariance: [[0.0; 3]; 3],
        translation_covariance: [[0.0; 3]; 3],
        pose_covariance_ready: false,
    };

    if nr_inliers >= MIN_POSE_COVARIANCE_INLIERS {
        let info = information_matrix(&problem, s, Some(&result.inliers));
        if let Some(cov) = dense::inverse(&info) {
            result.rotation_covariance = covariance_block(&cov, 0);
            result.translation_covariance = covariance_block(&cov, 3);
            for (i, std) in result.pose_std.iter_mut().enumerate() {
                *std = cov[(i, i)].max(0.0).sqrt();
            }
            result.pose_covariance_ready = true;
        }
    }

    log::debug!(
        "World filter kept {}/{} points, cost {:.3}",
        result.nr_inliers,
        world.len(),
        result.cost
    );

    Ok(result)
}

/// Estimate a homography, then refine the pose of the second view against world points.
///
/// The world points are expressed in the frame of the first camera. The rotation of the
/// camera rotation types seeds the pose, other types start from the identity. The pose
/// covariance of the world filter replaces the one of the estimate, and correspondences
/// rejected by either pass are outliers. When the world points cannot fix a pose the plain
/// estimate is returned.
///
/// # Errors
///
/// The errors of [`estimate_homography`], and mismatched world point arrays.
pub fn estimate_homography_with_world_points(
    x1: &[[f64; 2]],
    x2: &[[f64; 2]],
    k1: &Mat33,
    k2: &Mat33,
    world: &[[f64; 3]],
    params: &EstimatorParams,
) -> Result<HomographyEstimate, HomographyError> {
    check_lengths("x2", x2, "world", world)?;
    let mut estimate = estimate_homography(x1, x2, k1, k2, params)?;

    let filter_params = WorldFilterParams {
        scale: params.scale,
        max_iterations: params.max_iterations,
        improvement_requirement: params.improvement_requirement,
    };
    let result = match filter_world_points(world, x2, k2, estimate.rotation, &filter_params) {
        Ok(result) => result,
        Err(
            e @ (HomographyError::InsufficientCorrespondences { .. }
            | HomographyError::DegenerateConfiguration),
        ) => {
            log::warn!("Skipping world point filter: {e}");
            return Ok(estimate);
        }
        Err(e) => return Err(e),
    };

    let stats = &mut estimate.statistics;
    stats.pose_std = result.pose_std;
    stats.rotation_covariance = result.rotation_covariance;
    stats.translation_covariance = result.translation_covariance;
    stats.pose_covariance_ready = result.pose_covariance_ready;
    stats.pose_covariance_inlier_count = result.nr_inliers;
    for (inlier, world_inlier) in estimate.inliers.iter_mut().zip(&result.inliers) {
        *inlier &= *world_inlier;
    }
    stats.nr_inliers = estimate.inliers.iter().filter(|&&inlier| inlier).count();
    stats.inlier_fraction = if stats.nr_points > 0 {
        stats.nr_inliers as f64 / stats.nr_points as f64
    } else {
        0.0
    };
    estimate.world_pose = Some(result);

    Ok(estimate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use vidreg_linalg::rotation::is_rotation;

    fn scene(n: usize) -> Vec<[f64; 3]> {
        (0..n)
            .map(|i| {
                let (a, b) = ((i % 5) as f64, (i / 5) as f64);
                [0.4 * a - 0.8, 0.3 * b - 0.6, 4.0 + 0.25 * ((i * 3) % 7) as f64]
            })
            .collect()
    }

    fn project(r: &Mat33, t: &Vec3, world: &[[f64; 3]]) -> Vec<[f64; 2]> {
        world
            .iter()
            .map(|p| {
                let c = mat33_mul_vec3(r, p);
                let z = c[2] + t[2];
                [(c[0] + t[0]) / z, (c[1] + t[1]) / z]
            })
            .collect()
    }

    #[test]
    fn test_pose_jacobian_finite_differences() -> Result<(), Box<dyn std::error::Error>> {
        let world = scene(6);
        let image = vec![[0.01, -0.02]; 6];
        let problem = PoseProblem {
            rotation: rodrigues(&[0.1, -0.05, 0.2]),
            translation: [0.1, 0.2, 0.3],
            world: &world,
            image: &image,
        };
        let eps = 1e-7;
        let mut jac = [[0.0; MAX_PARAMETERS]; 2];
        for i in 0..world.len() {
            let r0 = problem.linearize(i, &mut jac).ok_or("behind camera")?;
            for p in 0..6 {
                let mut delta = [0.0; 6];
                delta[p] = eps;
                let r1 = problem.step(&delta).residual(i).ok_or("behind camera")?;
                for row in 0..2 {
                    assert_relative_eq!((r1[row] - r0[row]) / eps, jac[row][p], epsilon = 1e-5);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_filter_world_points() -> Result<(), HomographyError> {
        let world = scene(30);
        let rotation = rodrigues(&[0.02, -0.03, 0.05]);
        let translation = [0.1, -0.05, 0.2];
        let mut image = project(&rotation, &translation, &world);
        for p in image.iter_mut().step_by(6) {
            p[0] += 0.2;
        }

        // run to convergence instead of stopping on a small relative gain
        let params = WorldFilterParams {
            max_iterations: 50,
            improvement_requirement: 0.0,
            ..Default::default()
        };
        let initial = rodrigues(&[0.025, -0.03, 0.045]);
        let result = filter_world_points(&world, &image, &IDENTITY_MAT33, Some(initial), &params)?;

        assert!(is_rotation(&result.rotation, 1e-9));
        for i in 0..3 {
            assert_relative_eq!(result.translation[i], translation[i], epsilon = 1e-6);
            for j in 0..3 {
                assert_relative_eq!(result.rotation[i][j], rotation[i][j], epsilon = 1e-6);
            }
        }
        assert_eq!(result.nr_inliers, 25);
        for (i, inlier) in result.inliers.iter().enumerate() {
            assert_eq!(*inlier, i % 6 != 0);
        }
        assert!(result.pose_covariance_ready);
        assert!(result.pose_std.iter().all(|&v| v > 0.0));
        Ok(())
    }

    #[test]
    fn test_filter_world_points_errors() {
        let world = scene(4);
        let image = vec![[0.0, 0.0]; 4];
        let params = WorldFilterParams::default();
        assert!(matches!(
            filter_world_points(&world, &image[..3], &IDENTITY_MAT33, None, &params),
            Err(HomographyError::MismatchedArrayLengths { .. })
        ));
        assert_eq!(
            filter_world_points(&world[..2], &image[..2], &IDENTITY_MAT33, None, &params),
            Err(HomographyError::InsufficientCorrespondences {
                required: 3,
                actual: 2
            })
        );
        assert_eq!(
            filter_world_points(&world, &image, &[[0.0; 3]; 3], None, &params),
            Err(HomographyError::SingularCalibration)
        );
    }
}
