pub mod boundary;
pub mod graphs;

pub use boundary::*;
pub use graphs::*;
