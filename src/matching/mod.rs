//! Pattern matching module: catalog compilation and transaction scoring

pub mod catalog;
pub mod matcher;

pub use catalog::*;
pub use matcher::*;
