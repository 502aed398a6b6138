#![doc = include_str!(concat!("../", env!("CARGO_PKG_README")))]

#[doc(inline)]
pub use vidreg_image as image;

#[doc(inline)]
pub use vidreg_imgproc as imgproc;

#[doc(inline)]
pub use vidreg_linalg as linalg;

#[doc(inline)]
pub use vidreg_pose as pose;
