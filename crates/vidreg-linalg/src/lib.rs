#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Dense helpers on top of faer: eigenvalues, inverses and linear solves.
pub mod dense;

/// Fixed-size 3x3 matrix and 3-vector helpers.
pub mod mat33;

/// Rotation matrices, rotation vectors and projections onto SO(3).
pub mod rotation;

/// Order statistics: k-th smallest element selection.
pub mod select;

pub use mat33::{Mat33, Vec3};
