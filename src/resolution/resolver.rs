//! GL account resolution
//!
//! Maps a matched pattern to a general-ledger account and computes
//! auto-approval eligibility from the combined confidence.

use serde::{Deserialize, Serialize};

use crate::matching::{MatchCandidate, PatternCatalog};
use crate::types::*;

/// Outcome of resolving a match candidate against the GL mappings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlResolution {
    /// Resolved GL account code, `None` when unmapped
    pub gl_account_code: Option<String>,
    /// Resolved GL account name
    pub gl_account_name: Option<String>,
    /// Debit/credit indicator for the posting
    pub debit_credit: Option<EntryType>,
    /// Account category, `UNMAPPED` when no mapping exists
    pub account_category: String,
    /// Combined confidence (`match score * mapping_confidence`), in [0, 1]
    pub confidence_score: f64,
    /// Whether the suggestion may bypass human review
    pub auto_approvable: bool,
}

impl GlResolution {
    /// Resolution used when the matched pattern has no GL mapping, or the
    /// candidate is the UNKNOWN sentinel. Forces human review.
    pub fn unmapped() -> Self {
        Self {
            gl_account_code: None,
            gl_account_name: None,
            debit_credit: None,
            account_category: UNMAPPED_CATEGORY.to_string(),
            confidence_score: 0.0,
            auto_approvable: false,
        }
    }

    /// Whether a GL account was resolved
    pub fn is_mapped(&self) -> bool {
        self.gl_account_code.is_some()
    }
}

/// Resolves match candidates into GL account suggestions
#[derive(Debug, Clone, Copy, Default)]
pub struct GlResolver;

impl GlResolver {
    /// Create a new GL resolver
    pub fn new() -> Self {
        Self
    }

    /// Resolve a candidate against the catalog's GL mappings
    pub fn resolve(&self, candidate: &MatchCandidate, catalog: &PatternCatalog) -> GlResolution {
        if candidate.is_unknown() {
            return GlResolution::unmapped();
        }

        let Some(gl) = catalog.gl_for(&candidate.pattern_id) else {
            return GlResolution::unmapped();
        };

        let confidence_score = (candidate.score * gl.mapping_confidence).clamp(0.0, 1.0);
        let auto_approvable =
            confidence_score >= gl.auto_approve_threshold && !gl.requires_approval;

        GlResolution {
            gl_account_code: Some(gl.gl_account_code.clone()),
            gl_account_name: Some(gl.gl_account_name.clone()),
            debit_credit: Some(gl.debit_credit),
            account_category: gl.account_category.clone(),
            confidence_score,
            auto_approvable,
        }
    }
}
