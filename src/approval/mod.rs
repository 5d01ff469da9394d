//! Approval state machine for suggestion lifecycle management
//!
//! PENDING is the only non-terminal state. APPROVED and REJECTED are
//! reached through reviewer transitions; AUTO_APPROVED only ever at
//! creation time. Transitions for the same suggestion are serialized
//! through a per-id lock so concurrent approve/reject calls cannot race.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::traits::SuggestionStore;
use crate::types::*;

/// Outcome of one item in a batch approval action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Suggestion the action was applied to
    pub suggestion_id: String,
    /// Whether the transition succeeded
    pub success: bool,
    /// Error message when the transition failed
    pub error: Option<String>,
}

/// Aggregate result of a batch approval action
///
/// Items are independent: one bad id never blocks the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BatchActionResult {
    /// Per-item outcomes, in input order
    pub outcomes: Vec<ActionOutcome>,
    /// Number of successful transitions
    pub succeeded: usize,
    /// Number of failed transitions
    pub failed: usize,
}

impl BatchActionResult {
    fn record(&mut self, suggestion_id: &str, result: &ClearingResult<Suggestion>) {
        match result {
            Ok(_) => {
                self.succeeded += 1;
                self.outcomes.push(ActionOutcome {
                    suggestion_id: suggestion_id.to_string(),
                    success: true,
                    error: None,
                });
            }
            Err(e) => {
                self.failed += 1;
                self.outcomes.push(ActionOutcome {
                    suggestion_id: suggestion_id.to_string(),
                    success: false,
                    error: Some(e.to_string()),
                });
            }
        }
    }
}

/// Human approval surface over the suggestion store
pub struct ApprovalEngine<S> {
    store: Arc<S>,
    // Per-suggestion transition locks; entries are dropped once idle
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: SuggestionStore> ApprovalEngine<S> {
    /// Create a new approval engine over the given store
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Approve a PENDING suggestion
    pub async fn approve(
        &self,
        suggestion_id: &str,
        actor: &str,
        reason: Option<&str>,
    ) -> ClearingResult<Suggestion> {
        self.transition(
            suggestion_id,
            ApprovalStatus::Approved,
            actor,
            reason.map(|r| r.to_string()),
        )
        .await
    }

    /// Reject a PENDING suggestion; the reason is mandatory
    pub async fn reject(
        &self,
        suggestion_id: &str,
        actor: &str,
        reason: &str,
    ) -> ClearingResult<Suggestion> {
        if reason.trim().is_empty() {
            return Err(ClearingError::Validation(
                "rejection reason cannot be blank".to_string(),
            ));
        }
        self.transition(
            suggestion_id,
            ApprovalStatus::Rejected,
            actor,
            Some(reason.to_string()),
        )
        .await
    }

    /// Approve a set of suggestions, one independent outcome per item
    pub async fn batch_approve(&self, suggestion_ids: &[String], actor: &str) -> BatchActionResult {
        let mut result = BatchActionResult::default();
        for id in suggestion_ids {
            let outcome = self.approve(id, actor, None).await;
            result.record(id, &outcome);
        }
        info!(
            succeeded = result.succeeded,
            failed = result.failed,
            "batch approve finished"
        );
        result
    }

    /// Reject a set of suggestions with one shared reason
    pub async fn batch_reject(
        &self,
        suggestion_ids: &[String],
        actor: &str,
        reason: &str,
    ) -> BatchActionResult {
        let mut result = BatchActionResult::default();
        for id in suggestion_ids {
            let outcome = self.reject(id, actor, reason).await;
            result.record(id, &outcome);
        }
        info!(
            succeeded = result.succeeded,
            failed = result.failed,
            "batch reject finished"
        );
        result
    }

    async fn transition(
        &self,
        suggestion_id: &str,
        target: ApprovalStatus,
        actor: &str,
        reason: Option<String>,
    ) -> ClearingResult<Suggestion> {
        let lock = self.lock_for(suggestion_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.apply_transition(suggestion_id, target, actor, reason).await
        };
        self.release_lock(suggestion_id, &lock).await;
        result
    }

    async fn apply_transition(
        &self,
        suggestion_id: &str,
        target: ApprovalStatus,
        actor: &str,
        reason: Option<String>,
    ) -> ClearingResult<Suggestion> {
        let mut suggestion = self
            .store
            .get_suggestion(suggestion_id)
            .await?
            .ok_or_else(|| ClearingError::SuggestionNotFound(suggestion_id.to_string()))?;

        if suggestion.approval_status.is_terminal() {
            warn!(
                suggestion_id,
                from = %suggestion.approval_status,
                to = %target,
                "transition attempted from terminal status"
            );
            return Err(ClearingError::InvalidStateTransition {
                from: suggestion.approval_status.to_string(),
                to: target.to_string(),
            });
        }

        suggestion.approval_status = target;
        suggestion.approved_by = Some(actor.to_string());
        suggestion.approved_at = Some(Utc::now().naive_utc());
        suggestion.approval_reason = reason;

        self.store.update_suggestion(&suggestion).await?;
        info!(suggestion_id, status = %target, actor, "suggestion transitioned");
        Ok(suggestion)
    }

    async fn lock_for(&self, suggestion_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(suggestion_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn release_lock(&self, suggestion_id: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // Only this call and the map hold the lock: safe to drop the entry
        if Arc::strong_count(lock) <= 2 {
            locks.remove(suggestion_id);
        }
    }
}
