//! In-memory source and store implementation for testing and development

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use crate::traits::{SuggestionStore, TransactionSource};
use crate::types::*;

/// In-memory implementation of [`TransactionSource`] and
/// [`SuggestionStore`] for testing, demos and the CLI
///
/// Transactions are keyed by id in a `BTreeMap`, so pagination order is
/// stable and the cursor is simply the last delivered transaction id.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    transactions: Arc<RwLock<BTreeMap<String, Transaction>>>,
    suggestions: Arc<RwLock<BTreeMap<String, Suggestion>>>,
    checkpoints: Arc<RwLock<BTreeMap<String, BatchCheckpoint>>>,
    runs: Arc<RwLock<BTreeMap<String, BatchRun>>>,
    // Failure injection for retry and batch-isolation tests
    failing_persists: Arc<AtomicU32>,
    failing_fetches: Arc<AtomicU32>,
    failing_fatal_persists: Arc<AtomicU32>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction to the source side of the store
    pub fn add_transaction(&self, transaction: Transaction) {
        self.transactions
            .write()
            .unwrap()
            .insert(transaction.id.clone(), transaction);
    }

    /// Get a transaction by id
    pub fn get_transaction(&self, transaction_id: &str) -> Option<Transaction> {
        self.transactions.read().unwrap().get(transaction_id).cloned()
    }

    /// Number of stored suggestions
    pub fn suggestion_count(&self) -> usize {
        self.suggestions.read().unwrap().len()
    }

    /// Fail the next `n` `persist_suggestions` calls with a transient error
    pub fn fail_next_persists(&self, n: u32) {
        self.failing_persists.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` `fetch_unmatched` calls with a transient error
    pub fn fail_next_fetches(&self, n: u32) {
        self.failing_fetches.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` `persist_suggestions` calls with a fatal error
    pub fn fail_next_persists_fatal(&self, n: u32) {
        self.failing_fatal_persists.store(n, Ordering::SeqCst);
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        self.transactions.write().unwrap().clear();
        self.suggestions.write().unwrap().clear();
        self.checkpoints.write().unwrap().clear();
        self.runs.write().unwrap().clear();
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TransactionSource for MemoryStore {
    async fn fetch_unmatched(
        &self,
        cursor: Option<String>,
        page_size: usize,
    ) -> ClearingResult<TransactionPage> {
        if Self::take_failure(&self.failing_fetches) {
            return Err(ClearingError::TransientIo(
                "injected fetch failure".to_string(),
            ));
        }

        let transactions = self.transactions.read().unwrap();
        let mut page = Vec::with_capacity(page_size);
        let mut next_cursor = cursor.clone();
        let mut has_more = false;

        for (id, transaction) in transactions.iter() {
            if let Some(ref c) = cursor {
                if id <= c {
                    continue;
                }
            }
            if !transaction.is_unresolved() {
                continue;
            }
            if page.len() == page_size {
                has_more = true;
                break;
            }
            page.push(transaction.clone());
            next_cursor = Some(id.clone());
        }

        Ok(TransactionPage {
            transactions: page,
            next_cursor,
            has_more,
        })
    }

    async fn count_unmatched(&self) -> ClearingResult<u64> {
        let count = self
            .transactions
            .read()
            .unwrap()
            .values()
            .filter(|t| t.is_unresolved())
            .count();
        Ok(count as u64)
    }
}

#[async_trait]
impl SuggestionStore for MemoryStore {
    async fn persist_suggestions(&self, suggestions: &[Suggestion]) -> ClearingResult<()> {
        if Self::take_failure(&self.failing_fatal_persists) {
            return Err(ClearingError::Fatal(
                "injected fatal persist failure".to_string(),
            ));
        }
        if Self::take_failure(&self.failing_persists) {
            return Err(ClearingError::TransientIo(
                "injected persist failure".to_string(),
            ));
        }

        let mut stored = self.suggestions.write().unwrap();
        let mut transactions = self.transactions.write().unwrap();
        for suggestion in suggestions {
            // The pattern is written exactly once, and only when the
            // suggestion bypassed review. A PENDING match leaves the
            // transaction unresolved and re-deliverable until a reviewer
            // approves it.
            if suggestion.approval_status == ApprovalStatus::AutoApproved {
                if let Some(pattern) = &suggestion.pattern_matched {
                    if let Some(transaction) = transactions.get_mut(&suggestion.transaction_id) {
                        if transaction.is_unresolved() {
                            transaction.pattern = Some(pattern.clone());
                        }
                    }
                }
            }
            stored.insert(suggestion.id.clone(), suggestion.clone());
        }
        Ok(())
    }

    async fn get_suggestion(&self, suggestion_id: &str) -> ClearingResult<Option<Suggestion>> {
        Ok(self.suggestions.read().unwrap().get(suggestion_id).cloned())
    }

    async fn update_suggestion(&self, suggestion: &Suggestion) -> ClearingResult<()> {
        let mut stored = self.suggestions.write().unwrap();
        if !stored.contains_key(&suggestion.id) {
            return Err(ClearingError::SuggestionNotFound(suggestion.id.clone()));
        }

        // Reviewer approval resolves the transaction, same as auto-approval
        if suggestion.approval_status == ApprovalStatus::Approved {
            if let Some(pattern) = &suggestion.pattern_matched {
                let mut transactions = self.transactions.write().unwrap();
                if let Some(transaction) = transactions.get_mut(&suggestion.transaction_id) {
                    if transaction.is_unresolved() {
                        transaction.pattern = Some(pattern.clone());
                    }
                }
            }
        }

        stored.insert(suggestion.id.clone(), suggestion.clone());
        Ok(())
    }

    async fn active_suggestion_for(
        &self,
        transaction_id: &str,
    ) -> ClearingResult<Option<Suggestion>> {
        Ok(self
            .suggestions
            .read()
            .unwrap()
            .values()
            .find(|s| s.transaction_id == transaction_id && s.is_active())
            .cloned())
    }

    async fn suggestions_for_batch(&self, batch_id: &str) -> ClearingResult<Vec<Suggestion>> {
        Ok(self
            .suggestions
            .read()
            .unwrap()
            .values()
            .filter(|s| s.batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn persist_checkpoint(&self, checkpoint: &BatchCheckpoint) -> ClearingResult<()> {
        self.checkpoints
            .write()
            .unwrap()
            .insert(checkpoint.batch_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load_checkpoint(&self, batch_id: &str) -> ClearingResult<Option<BatchCheckpoint>> {
        Ok(self.checkpoints.read().unwrap().get(batch_id).cloned())
    }

    async fn save_run(&self, run: &BatchRun) -> ClearingResult<()> {
        self.runs
            .write()
            .unwrap()
            .insert(run.batch_id.clone(), run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &BatchRun) -> ClearingResult<()> {
        let mut runs = self.runs.write().unwrap();
        if runs.contains_key(&run.batch_id) {
            runs.insert(run.batch_id.clone(), run.clone());
            Ok(())
        } else {
            Err(ClearingError::BatchNotFound(run.batch_id.clone()))
        }
    }

    async fn get_run(&self, batch_id: &str) -> ClearingResult<Option<BatchRun>> {
        Ok(self.runs.read().unwrap().get(batch_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;

    fn txn(id: &str, resolved: bool) -> Transaction {
        Transaction {
            id: id.to_string(),
            amount: BigDecimal::from(100),
            currency: "USD".to_string(),
            description: "WIRE".to_string(),
            reference: None,
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            account_id: "clearing".to_string(),
            pattern: Some(if resolved { "INCOME" } else { T_NOTFOUND }.to_string()),
            source_system: "bq".to_string(),
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[tokio::test]
    async fn test_pagination_follows_cursor() {
        let store = MemoryStore::new();
        for i in 0..7 {
            store.add_transaction(txn(&format!("t{}", i), false));
        }

        let first = store.fetch_unmatched(None, 3).await.unwrap();
        assert_eq!(first.transactions.len(), 3);
        assert!(first.has_more);
        assert_eq!(first.next_cursor.as_deref(), Some("t2"));

        let second = store.fetch_unmatched(first.next_cursor, 3).await.unwrap();
        assert_eq!(second.transactions[0].id, "t3");

        let last = store.fetch_unmatched(second.next_cursor, 3).await.unwrap();
        assert_eq!(last.transactions.len(), 1);
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn test_resolved_transactions_excluded() {
        let store = MemoryStore::new();
        store.add_transaction(txn("t0", true));
        store.add_transaction(txn("t1", false));

        assert_eq!(store.count_unmatched().await.unwrap(), 1);
        let page = store.fetch_unmatched(None, 10).await.unwrap();
        assert_eq!(page.transactions.len(), 1);
        assert_eq!(page.transactions[0].id, "t1");
    }

    fn suggestion(id: &str, transaction_id: &str, status: ApprovalStatus) -> Suggestion {
        Suggestion {
            id: id.to_string(),
            transaction_id: transaction_id.to_string(),
            pattern_matched: Some("income".to_string()),
            gl_account_code: Some("4000".to_string()),
            gl_account_name: Some("Interest Income".to_string()),
            debit_credit: Some(EntryType::Credit),
            account_category: Some("INCOME".to_string()),
            confidence_score: 0.855,
            approval_status: status,
            reasoning: ReasoningTrace::default(),
            risk_score: 0.0,
            priority: ReviewPriority::Low,
            approved_by: None,
            approved_at: None,
            approval_reason: None,
            batch_id: "b1".to_string(),
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[tokio::test]
    async fn test_pending_match_stays_redeliverable() {
        let store = MemoryStore::new();
        store.add_transaction(txn("t1", false));

        // A matched but PENDING suggestion must not resolve the transaction
        store
            .persist_suggestions(&[suggestion("s1", "t1", ApprovalStatus::Pending)])
            .await
            .unwrap();
        assert!(store.get_transaction("t1").unwrap().is_unresolved());
        assert_eq!(store.count_unmatched().await.unwrap(), 1);

        // Reviewer approval is what resolves it
        let mut approved = suggestion("s1", "t1", ApprovalStatus::Approved);
        approved.approved_by = Some("alice".to_string());
        store.update_suggestion(&approved).await.unwrap();
        assert_eq!(
            store.get_transaction("t1").unwrap().pattern.as_deref(),
            Some("income")
        );
    }

    #[tokio::test]
    async fn test_auto_approved_suggestion_resolves_transaction() {
        let store = MemoryStore::new();
        store.add_transaction(txn("t1", false));

        store
            .persist_suggestions(&[suggestion("s1", "t1", ApprovalStatus::AutoApproved)])
            .await
            .unwrap();
        assert!(!store.get_transaction("t1").unwrap().is_unresolved());
        assert_eq!(store.count_unmatched().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failure_injection_is_transient_and_finite() {
        let store = MemoryStore::new();
        store.add_transaction(txn("t0", false));
        store.fail_next_fetches(1);

        let err = store.fetch_unmatched(None, 10).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.fetch_unmatched(None, 10).await.is_ok());
    }
}
