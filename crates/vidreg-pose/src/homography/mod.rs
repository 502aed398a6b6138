mod kind;
pub use kind::*;

mod model;
pub use model::*;

mod problem;
pub use problem::*;

mod solvers;
pub use solvers::*;

mod transfer;
pub use transfer::*;
