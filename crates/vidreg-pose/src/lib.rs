#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

pub mod cost;

mod error;
pub use error::HomographyError;

pub mod estimator;

/// Homography models, their parametrizations and closed-form solvers.
pub mod homography;

pub mod polish;

/// Random minimal samples and hypothesis generation.
pub mod sampler;

/// Fit quality and conditioning of an estimate.
pub mod statistics;

pub mod world;

pub use estimator::{estimate_homography, EstimatorParams, HomographyEstimate};
pub use homography::{HomographyType, Transfer};
pub use statistics::Statistics;
pub use world::{estimate_homography_with_world_points, filter_world_points, WorldFilterParams};
