//! Suggestion building
//!
//! Combines a transaction, its best match candidate and the GL resolution
//! into a persisted suggestion with initial approval status, risk score and
//! business-impact priority.

use bigdecimal::BigDecimal;
use uuid::Uuid;

use crate::matching::MatchCandidate;
use crate::resolution::GlResolution;
use crate::types::*;

/// Builds suggestions from pipeline outputs
#[derive(Debug, Clone, Copy, Default)]
pub struct SuggestionBuilder;

impl SuggestionBuilder {
    /// Create a new suggestion builder
    pub fn new() -> Self {
        Self
    }

    /// Build a suggestion for a transaction
    ///
    /// The initial status is AUTO_APPROVED exactly when the resolution is
    /// auto-approvable; every other suggestion starts PENDING.
    pub fn build(
        &self,
        transaction: &Transaction,
        candidate: &MatchCandidate,
        resolution: &GlResolution,
        batch_id: &str,
    ) -> Suggestion {
        let approval_status = if resolution.auto_approvable {
            ApprovalStatus::AutoApproved
        } else {
            ApprovalStatus::Pending
        };

        let magnitude = transaction.amount.abs();
        let risk_score = risk_score(resolution.confidence_score, &magnitude, resolution.is_mapped());
        let priority = review_priority(&magnitude);

        let mut reasoning = ReasoningTrace {
            pattern_id: (!candidate.is_unknown()).then(|| candidate.pattern_id.clone()),
            pattern_name: Some(candidate.pattern_name.clone()),
            raw_score: candidate.raw_score,
            weighted_score: candidate.score,
            mapping_confidence: None,
            notes: candidate.notes.clone(),
        };
        if resolution.is_mapped() {
            if candidate.score > 0.0 {
                reasoning.mapping_confidence = Some(resolution.confidence_score / candidate.score);
            }
            reasoning.notes.push(format!(
                "resolved to GL {} ({})",
                resolution.gl_account_code.as_deref().unwrap_or_default(),
                resolution.account_category
            ));
        } else {
            reasoning
                .notes
                .push("no GL mapping; human review required".to_string());
        }

        Suggestion {
            id: Uuid::new_v4().to_string(),
            transaction_id: transaction.id.clone(),
            pattern_matched: (!candidate.is_unknown()).then(|| candidate.pattern_id.clone()),
            gl_account_code: resolution.gl_account_code.clone(),
            gl_account_name: resolution.gl_account_name.clone(),
            debit_credit: resolution.debit_credit,
            account_category: Some(resolution.account_category.clone()),
            confidence_score: resolution.confidence_score.clamp(0.0, 1.0),
            approval_status,
            reasoning,
            risk_score,
            priority,
            approved_by: None,
            approved_at: None,
            approval_reason: None,
            batch_id: batch_id.to_string(),
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

/// Derived risk score for review prioritization, clipped to [0, 1]
fn risk_score(confidence: f64, magnitude: &BigDecimal, gl_mapped: bool) -> f64 {
    let mut score: f64 = 0.0;

    if confidence < 0.5 {
        score += 0.4;
    } else if confidence < 0.7 {
        score += 0.2;
    }

    if *magnitude > BigDecimal::from(50_000) {
        score += 0.3;
    } else if *magnitude > BigDecimal::from(10_000) {
        score += 0.1;
    }

    if !gl_mapped {
        score += 0.3;
    }

    score.min(1.0)
}

/// Business-impact priority derived from the transaction amount
fn review_priority(magnitude: &BigDecimal) -> ReviewPriority {
    if *magnitude > BigDecimal::from(100_000) {
        ReviewPriority::Critical
    } else if *magnitude > BigDecimal::from(50_000) {
        ReviewPriority::High
    } else if *magnitude > BigDecimal::from(10_000) {
        ReviewPriority::Medium
    } else {
        ReviewPriority::Low
    }
}
