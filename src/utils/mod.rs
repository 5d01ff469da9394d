//! Utility implementations: in-memory storage and results export

pub mod export;
pub mod memory_store;

pub use export::*;
pub use memory_store::*;
