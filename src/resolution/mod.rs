//! Resolution module: GL account resolution and suggestion building

pub mod resolver;
pub mod suggestion;

pub use resolver::*;
pub use suggestion::*;
