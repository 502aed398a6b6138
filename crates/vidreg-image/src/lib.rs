#![deny(missing_docs)]
//! Image types used by the corner detector and its callers

/// image representation with a trailing look-ahead pad.
pub mod image;

/// Error types for the image module.
pub mod error;

pub use crate::error::ImageError;
pub use crate::image::{Image, ImageSize, IMAGE_PADDING};
