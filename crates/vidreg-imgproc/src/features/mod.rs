mod detector;
mod extract;
mod harris;

pub use detector::*;
pub use extract::*;
pub use harris::*;
