//! # Clearing Core
//!
//! A cash-clearing transaction resolution engine: classifies transactions
//! that failed upstream rule-based matching (sentinel pattern
//! `T_NOTFOUND`) and proposes general-ledger accounts for them.
//!
//! ## Features
//!
//! - **Pattern matching**: deterministic scoring against a prioritized,
//!   configurable pattern catalog (reference, description, amount and
//!   composite patterns)
//! - **GL resolution**: confidence-weighted mapping from matched patterns
//!   to GL accounts with auto-approval eligibility
//! - **Approval workflow**: PENDING/APPROVED/REJECTED/AUTO_APPROVED state
//!   machine with batch actions and per-suggestion serialization
//! - **Batch orchestration**: resumable, checkpointed runs with bounded
//!   concurrency, batch isolation and cooperative cancellation
//! - **Storage abstraction**: backend-agnostic design with trait-based
//!   source and sink collaborators
//!
//! ## Quick Start
//!
//! ```rust
//! use clearing_core::{
//!     BatchOrchestrator, MemoryStore, OrchestratorConfig, PatternCatalog, RuleMatcher,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> clearing_core::ClearingResult<()> {
//! let store = Arc::new(MemoryStore::new());
//! let catalog = Arc::new(PatternCatalog::compile(&[], &[]));
//! let orchestrator = BatchOrchestrator::new(
//!     store.clone(),
//!     store,
//!     Arc::new(RuleMatcher::new()),
//!     OrchestratorConfig::default(),
//! );
//! let summary = orchestrator.run(catalog).await?;
//! println!("processed {}", summary.processed);
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod matching;
pub mod orchestrator;
pub mod resolution;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use approval::*;
pub use matching::*;
pub use orchestrator::*;
pub use resolution::*;
pub use traits::*;
pub use types::*;
pub use utils::*;
