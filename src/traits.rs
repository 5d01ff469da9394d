//! Traits for collaborator abstraction and extensibility

use async_trait::async_trait;

use crate::matching::{MatchCandidate, PatternCatalog};
use crate::types::*;

/// Source of unresolved transactions
///
/// This trait allows the engine to page through any upstream store
/// (BigQuery, PostgreSQL, flat files, in-memory, etc.) that can serve
/// transactions still carrying the `T_NOTFOUND` sentinel.
#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// Fetch one page of unresolved transactions starting after `cursor`
    async fn fetch_unmatched(
        &self,
        cursor: Option<String>,
        page_size: usize,
    ) -> ClearingResult<TransactionPage>;

    /// Count unresolved transactions remaining in the source
    async fn count_unmatched(&self) -> ClearingResult<u64>;
}

/// Persistence sink for suggestions, checkpoints and batch runs
///
/// Suggestions are append-only: implementations must never delete rows.
/// `update_suggestion` is only ever called to apply an approval transition
/// to an existing row.
#[async_trait]
pub trait SuggestionStore: Send + Sync {
    /// Persist a page of newly built suggestions
    async fn persist_suggestions(&self, suggestions: &[Suggestion]) -> ClearingResult<()>;

    /// Get a suggestion by ID
    async fn get_suggestion(&self, suggestion_id: &str) -> ClearingResult<Option<Suggestion>>;

    /// Apply an approval transition to an existing suggestion
    async fn update_suggestion(&self, suggestion: &Suggestion) -> ClearingResult<()>;

    /// Get the active (PENDING) suggestion for a transaction, if any
    async fn active_suggestion_for(
        &self,
        transaction_id: &str,
    ) -> ClearingResult<Option<Suggestion>>;

    /// List all suggestions produced by a batch run
    async fn suggestions_for_batch(&self, batch_id: &str) -> ClearingResult<Vec<Suggestion>>;

    /// Commit a progress checkpoint for a batch run
    async fn persist_checkpoint(&self, checkpoint: &BatchCheckpoint) -> ClearingResult<()>;

    /// Load the last committed checkpoint for a batch run
    async fn load_checkpoint(&self, batch_id: &str) -> ClearingResult<Option<BatchCheckpoint>>;

    /// Save a new batch run record
    async fn save_run(&self, run: &BatchRun) -> ClearingResult<()>;

    /// Update an existing batch run record
    async fn update_run(&self, run: &BatchRun) -> ClearingResult<()>;

    /// Get a batch run by ID
    async fn get_run(&self, batch_id: &str) -> ClearingResult<Option<BatchRun>>;
}

/// Matching strategy seam
///
/// The provided [`RuleMatcher`](crate::matching::RuleMatcher) is
/// deterministic; an LLM-backed matcher can be substituted behind this
/// trait without touching the rest of the pipeline. Implementations must
/// return candidates ordered best-first and must be pure for identical
/// inputs.
pub trait TransactionMatcher: Send + Sync {
    /// Score a transaction against the catalog, best candidate first
    fn match_transaction(
        &self,
        transaction: &Transaction,
        catalog: &PatternCatalog,
    ) -> Vec<MatchCandidate>;
}
