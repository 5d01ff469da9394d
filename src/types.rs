//! Core types and data structures for the clearing engine

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Sentinel pattern value marking a transaction as unresolved by upstream
/// rule-based matching.
pub const T_NOTFOUND: &str = "T_NOTFOUND";

/// Sentinel pattern id emitted when no catalog pattern matches.
pub const UNKNOWN_PATTERN: &str = "UNKNOWN";

/// Account category assigned when a matched pattern has no GL mapping.
pub const UNMAPPED_CATEGORY: &str = "UNMAPPED";

/// Debit/credit indicator for GL postings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// Debit posting
    Debit,
    /// Credit posting
    Credit,
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryType::Debit => write!(f, "DEBIT"),
            EntryType::Credit => write!(f, "CREDIT"),
        }
    }
}

/// A cash-clearing transaction awaiting resolution
///
/// Immutable once ingested, except for the `pattern` field which the engine
/// writes exactly once when a suggestion is approved or auto-approved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier from the source system
    pub id: String,
    /// Transaction amount
    pub amount: BigDecimal,
    /// ISO currency code
    pub currency: String,
    /// Free-text description from the clearing feed
    pub description: String,
    /// Optional payment reference (wire reference, check number, etc.)
    pub reference: Option<String>,
    /// Date the transaction occurred
    pub transaction_date: NaiveDate,
    /// Clearing account the transaction sits in
    pub account_id: String,
    /// Resolved pattern name, or `T_NOTFOUND` until the engine resolves it
    pub pattern: Option<String>,
    /// Originating system identifier
    pub source_system: String,
    /// When the transaction was ingested
    pub created_at: NaiveDateTime,
}

impl Transaction {
    /// Whether this transaction still awaits resolution
    pub fn is_unresolved(&self) -> bool {
        match self.pattern.as_deref() {
            None => true,
            Some(p) => p == T_NOTFOUND,
        }
    }
}

/// Pattern matching strategy for a catalog entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
    /// Regex/keyword containment over the payment reference
    Reference,
    /// Expected amount comparison within a tolerance
    Amount,
    /// Regex/keyword containment over the description text
    Description,
    /// Logical AND of sub-tests, each contributing a partial score
    Composite,
}

/// A configurable pattern in the matching catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorPattern {
    /// Unique identifier for the pattern
    pub id: String,
    /// Human-readable pattern name (e.g. "INCOME")
    pub name: String,
    /// Matching strategy
    pub pattern_type: PatternType,
    /// Search expression: regex for text patterns, a decimal literal for
    /// AMOUNT patterns, a JSON array of sub-tests for COMPOSITE patterns
    pub search_expression: String,
    /// Relative tolerance for amount comparison (fraction, e.g. 0.05)
    pub amount_tolerance: f64,
    /// Date window bounding upstream rule matching
    pub date_tolerance_days: u32,
    /// Weight applied to the raw match score, in [0, 1]
    pub confidence_weight: f64,
    /// Tie-break ordering; lower wins
    pub priority_order: i32,
    /// Inactive patterns are excluded from the compiled catalog
    pub active: bool,
}

/// Mapping from a matched pattern to a general-ledger account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlPattern {
    /// Unique identifier for the mapping
    pub id: String,
    /// Pattern this mapping applies to
    pub pattern_id: String,
    /// Target GL account code
    pub gl_account_code: String,
    /// Target GL account name
    pub gl_account_name: String,
    /// Whether the suggestion posts as a debit or a credit
    pub debit_credit: EntryType,
    /// Reporting category for the account
    pub account_category: String,
    /// Confidence in the pattern-to-account mapping, in [0, 1]
    pub mapping_confidence: f64,
    /// Confidence cutoff above which suggestions bypass human review
    pub auto_approve_threshold: f64,
    /// When set, suggestions always require human approval
    pub requires_approval: bool,
}

/// Lifecycle status of a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    /// Awaiting human review (the only non-terminal state)
    Pending,
    /// Approved by a reviewer
    Approved,
    /// Rejected by a reviewer
    Rejected,
    /// Approved automatically at creation time; never reachable via a
    /// transition
    AutoApproved,
}

impl ApprovalStatus {
    /// Whether this status admits no further transitions
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::AutoApproved => "AUTO_APPROVED",
        };
        write!(f, "{}", s)
    }
}

/// Business-impact priority for review queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl std::fmt::Display for ReviewPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReviewPriority::Critical => "CRITICAL",
            ReviewPriority::High => "HIGH",
            ReviewPriority::Medium => "MEDIUM",
            ReviewPriority::Low => "LOW",
        };
        write!(f, "{}", s)
    }
}

/// Structured trace explaining how a suggestion was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ReasoningTrace {
    /// Pattern that matched, if any
    pub pattern_id: Option<String>,
    /// Name of the matched pattern
    pub pattern_name: Option<String>,
    /// Match score before confidence weighting
    pub raw_score: f64,
    /// Match score after confidence weighting
    pub weighted_score: f64,
    /// GL mapping confidence, when a mapping existed
    pub mapping_confidence: Option<f64>,
    /// Human-readable factor notes, in the order they were applied
    pub notes: Vec<String>,
}

impl ReasoningTrace {
    /// Single-line rendering for tabular export
    pub fn summary(&self) -> String {
        let pattern = self.pattern_name.as_deref().unwrap_or(UNKNOWN_PATTERN);
        if self.notes.is_empty() {
            format!("pattern={} score={:.3}", pattern, self.weighted_score)
        } else {
            format!(
                "pattern={} score={:.3}; {}",
                pattern,
                self.weighted_score,
                self.notes.join("; ")
            )
        }
    }
}

/// A GL posting suggestion for a single transaction
///
/// Suggestions are append-only: superseded or rejected suggestions remain
/// in storage as an audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// Unique identifier
    pub id: String,
    /// Transaction this suggestion resolves
    pub transaction_id: String,
    /// Matched catalog pattern, `None` when only the UNKNOWN sentinel matched
    pub pattern_matched: Option<String>,
    /// Suggested GL account code
    pub gl_account_code: Option<String>,
    /// Suggested GL account name
    pub gl_account_name: Option<String>,
    /// Debit/credit indicator for the posting
    pub debit_credit: Option<EntryType>,
    /// Account category, `UNMAPPED` when no GL mapping existed
    pub account_category: Option<String>,
    /// Combined confidence, in [0, 1]
    pub confidence_score: f64,
    /// Current lifecycle status
    pub approval_status: ApprovalStatus,
    /// Trace of how the suggestion was derived
    pub reasoning: ReasoningTrace,
    /// Derived risk score for review prioritization, in [0, 1]
    pub risk_score: f64,
    /// Business-impact priority
    pub priority: ReviewPriority,
    /// Reviewer who applied the terminal transition
    pub approved_by: Option<String>,
    /// When the terminal transition was applied
    pub approved_at: Option<NaiveDateTime>,
    /// Reviewer-supplied reason for the transition
    pub approval_reason: Option<String>,
    /// Batch run that produced the suggestion
    pub batch_id: String,
    /// When the suggestion was created
    pub created_at: NaiveDateTime,
}

impl Suggestion {
    /// Whether this suggestion is still awaiting review
    pub fn is_active(&self) -> bool {
        self.approval_status == ApprovalStatus::Pending
    }
}

/// Status of a batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

/// Persistent record of a batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRun {
    /// Unique run identifier
    pub batch_id: String,
    /// Current status
    pub status: BatchStatus,
    /// Total transactions the run expects to process
    pub total: u64,
    /// Transactions processed so far
    pub processed: u64,
    /// Transactions resolved into a suggestion
    pub succeeded: u64,
    /// Transactions that failed processing
    pub failed: u64,
    /// Last committed source cursor
    pub cursor: Option<String>,
    /// When the run started
    pub started_at: NaiveDateTime,
    /// When the run completed or failed
    pub completed_at: Option<NaiveDateTime>,
}

/// Committed progress marker enabling resume after interruption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCheckpoint {
    /// Run the checkpoint belongs to
    pub batch_id: String,
    /// Source cursor after the last committed page
    pub cursor: Option<String>,
    /// Transactions processed up to this checkpoint
    pub processed: u64,
    /// Transactions resolved up to this checkpoint
    pub succeeded: u64,
    /// Transactions failed up to this checkpoint
    pub failed: u64,
    /// When the checkpoint was committed
    pub committed_at: NaiveDateTime,
}

/// One page of unresolved transactions from the source reader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionPage {
    /// Transactions in source order
    pub transactions: Vec<Transaction>,
    /// Cursor for the next page
    pub next_cursor: Option<String>,
    /// Whether more pages remain
    pub has_more: bool,
}

/// A batch-level failure recorded during a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchError {
    /// Zero-based index of the failed page
    pub batch_index: usize,
    /// Error message
    pub message: String,
}

/// Aggregate outcome of a batch run, always produced even on partial failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run identifier
    pub batch_id: String,
    /// Final status of the run
    pub status: BatchStatus,
    /// Transactions processed
    pub processed: u64,
    /// Transactions resolved into a suggestion
    pub succeeded: u64,
    /// Transactions that failed processing
    pub failed: u64,
    /// Wall-clock duration of the run
    pub duration_ms: u64,
    /// Transactions per second
    pub throughput: f64,
    /// Whether this was a dry run (counts only, no mutation)
    pub dry_run: bool,
    /// Batch-level errors recorded during the run
    pub errors: Vec<BatchError>,
}

/// Errors that can occur in the clearing engine
#[derive(Debug, thiserror::Error)]
pub enum ClearingError {
    /// Malformed catalog entry; the entry is skipped and the run continues
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Reader/sink failure worth retrying with backoff
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// Approval action attempted from a terminal status
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Input failed validation; no mutation was performed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Suggestion not found: {0}")]
    SuggestionNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    /// Unrecoverable failure; aborts the run after the checkpoint persists
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl ClearingError {
    /// Whether this error must terminate the run
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClearingError::Fatal(_))
    }

    /// Whether this error is worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, ClearingError::TransientIo(_))
    }
}

/// Result type for clearing operations
pub type ClearingResult<T> = Result<T, ClearingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unresolved_sentinel() {
        let now = chrono::Utc::now().naive_utc();
        let mut txn = Transaction {
            id: "t1".to_string(),
            amount: BigDecimal::from(100),
            currency: "USD".to_string(),
            description: "WIRE".to_string(),
            reference: None,
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            account_id: "clearing".to_string(),
            pattern: Some(T_NOTFOUND.to_string()),
            source_system: "bq".to_string(),
            created_at: now,
        };
        assert!(txn.is_unresolved());

        txn.pattern = Some("INCOME".to_string());
        assert!(!txn.is_unresolved());

        txn.pattern = None;
        assert!(txn.is_unresolved());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ApprovalStatus::Pending.is_terminal());
        assert!(ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert!(ApprovalStatus::AutoApproved.is_terminal());
    }

    #[test]
    fn test_error_classification() {
        assert!(ClearingError::Fatal("auth".to_string()).is_fatal());
        assert!(ClearingError::TransientIo("timeout".to_string()).is_transient());
        assert!(!ClearingError::Validation("bad".to_string()).is_transient());
        assert!(!ClearingError::Configuration("bad regex".to_string()).is_fatal());
    }

    #[test]
    fn test_reasoning_summary() {
        let trace = ReasoningTrace {
            pattern_id: Some("p1".to_string()),
            pattern_name: Some("INCOME".to_string()),
            raw_score: 1.0,
            weighted_score: 0.9,
            mapping_confidence: Some(0.95),
            notes: vec!["description matched INTEREST".to_string()],
        };
        let summary = trace.summary();
        assert!(summary.contains("INCOME"));
        assert!(summary.contains("0.900"));
    }
}
