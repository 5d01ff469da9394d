//! Deterministic rule-based transaction matcher
//!
//! Scores a transaction against every compiled catalog pattern and returns
//! an ordered candidate list. Pure: identical inputs always produce an
//! identical ordering, which keeps batch runs reproducible and auditable.

use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::matching::{CompiledPattern, CompiledTest, PatternCatalog, TextField};
use crate::traits::TransactionMatcher;
use crate::types::*;

/// A scored candidate pattern for a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// Catalog pattern id, or `UNKNOWN` for the sentinel candidate
    pub pattern_id: String,
    /// Catalog pattern name
    pub pattern_name: String,
    /// Raw test score before confidence weighting, in [0, 1]
    pub raw_score: f64,
    /// Weighted score (`raw_score * confidence_weight`), in [0, 1]
    pub score: f64,
    /// Priority order of the pattern, used for tie-breaks
    pub priority_order: i32,
    /// Notes describing which tests matched and how
    pub notes: Vec<String>,
}

impl MatchCandidate {
    /// Sentinel candidate emitted when nothing in the catalog matches
    pub fn unknown() -> Self {
        Self {
            pattern_id: UNKNOWN_PATTERN.to_string(),
            pattern_name: UNKNOWN_PATTERN.to_string(),
            raw_score: 0.0,
            score: 0.0,
            priority_order: i32::MAX,
            notes: vec!["no catalog pattern matched".to_string()],
        }
    }

    /// Whether this is the no-match sentinel
    pub fn is_unknown(&self) -> bool {
        self.pattern_id == UNKNOWN_PATTERN
    }
}

/// Rule-based implementation of [`TransactionMatcher`]
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleMatcher;

impl RuleMatcher {
    /// Create a new rule matcher
    pub fn new() -> Self {
        Self
    }
}

impl TransactionMatcher for RuleMatcher {
    fn match_transaction(
        &self,
        transaction: &Transaction,
        catalog: &PatternCatalog,
    ) -> Vec<MatchCandidate> {
        let mut candidates: Vec<MatchCandidate> = catalog
            .patterns()
            .iter()
            .filter_map(|compiled| score_pattern(transaction, compiled))
            .collect();

        // Highest score wins; ties broken by lower priority, then lexical id
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.priority_order.cmp(&b.priority_order))
                .then_with(|| a.pattern_id.cmp(&b.pattern_id))
        });

        if candidates.is_empty() {
            candidates.push(MatchCandidate::unknown());
        }
        candidates
    }
}

fn score_pattern(transaction: &Transaction, compiled: &CompiledPattern) -> Option<MatchCandidate> {
    let mut notes = Vec::new();
    let raw_score = score_test(transaction, &compiled.test, &compiled.pattern, &mut notes)?;
    let weighted = (raw_score * compiled.pattern.confidence_weight).clamp(0.0, 1.0);

    Some(MatchCandidate {
        pattern_id: compiled.pattern.id.clone(),
        pattern_name: compiled.pattern.name.clone(),
        raw_score,
        score: weighted,
        priority_order: compiled.pattern.priority_order,
        notes,
    })
}

/// Score a single test, returning `None` when it does not match
fn score_test(
    transaction: &Transaction,
    test: &CompiledTest,
    pattern: &ProcessorPattern,
    notes: &mut Vec<String>,
) -> Option<f64> {
    match test {
        CompiledTest::Text { field, regex } => {
            let haystack = match field {
                TextField::Description => transaction.description.as_str(),
                // REFERENCE patterns fall back to the description when the
                // feed did not supply a payment reference
                TextField::Reference => transaction
                    .reference
                    .as_deref()
                    .unwrap_or(transaction.description.as_str()),
            };
            if regex.is_match(haystack) {
                notes.push(format!(
                    "{:?} matched /{}/",
                    field,
                    regex.as_str()
                ));
                Some(1.0)
            } else {
                None
            }
        }
        CompiledTest::Amount { expected } => {
            score_amount(&transaction.amount, expected, pattern.amount_tolerance, notes)
        }
        CompiledTest::Composite { terms } => {
            // Logical AND: every term must match, each contributes equally
            let mut total = 0.0;
            for term in terms {
                total += score_test(transaction, term, pattern, notes)?;
            }
            Some(total / terms.len() as f64)
        }
    }
}

/// Exact match scores 1.0; otherwise the score decays linearly with the
/// normalized distance to the tolerance bound and the test fails outside it
fn score_amount(
    actual: &BigDecimal,
    expected: &BigDecimal,
    tolerance: f64,
    notes: &mut Vec<String>,
) -> Option<f64> {
    if actual == expected {
        notes.push(format!("amount matched {} exactly", expected));
        return Some(1.0);
    }
    if tolerance <= 0.0 || expected == &BigDecimal::from(0) {
        return None;
    }

    let relative = ((actual - expected).abs() / expected.abs())
        .to_f64()
        .unwrap_or(f64::INFINITY);
    if relative > tolerance {
        return None;
    }

    let score = (1.0 - relative / tolerance).clamp(0.0, 1.0);
    notes.push(format!(
        "amount {} within {:.1}% of {} (distance {:.4})",
        actual,
        tolerance * 100.0,
        expected,
        relative
    ));
    Some(score)
}
