/// Errors raised when a caller violates the contract of the estimation routines.
///
/// Data conditions such as too few correspondences or degenerate samples are not errors for
/// the estimator itself, they are reported through [`crate::Statistics`].
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum HomographyError {
    /// Invalid input data - mismatched array lengths with descriptive labels.
    #[error("Mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedArrayLengths {
        /// Label for the left-hand slice
        left_name: &'static str,
        /// Length of the left-hand slice
        left_len: usize,
        /// Label for the right-hand slice
        right_name: &'static str,
        /// Length of the right-hand slice
        right_len: usize,
    },

    /// A solver received fewer correspondences than it needs.
    #[error("Solver requires at least {required} correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences required by the solver
        required: usize,
        /// Actual number of correspondences provided
        actual: usize,
    },

    /// The points do not constrain the model, e.g. coincident or collinear samples.
    #[error("Degenerate point configuration")]
    DegenerateConfiguration,

    /// A calibration matrix cannot be inverted.
    #[error("Calibration matrix is singular")]
    SingularCalibration,

    /// An estimator parameter is outside its valid range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Singular value decomposition failed
    #[error("SVD computation failed")]
    SvdFailed,
}

pub(crate) fn check_lengths<A, B>(
    left_name: &'static str,
    left: &[A],
    right_name: &'static str,
    right: &[B],
) -> Result<(), HomographyError> {
    if left.len() != right.len() {
        return Err(HomographyError::MismatchedArrayLengths {
            left_name,
            left_len: left.len(),
            right_name,
            right_len: right.len(),
        });
    }
    Ok(())
}
