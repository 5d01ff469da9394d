//! Batch run execution
//!
//! Pages the transaction source through the pipeline with a bounded worker
//! pool. Pages are isolated: a failing page is recorded in the summary and
//! never aborts the run. Matching, resolution and building are synchronous
//! within a worker; the source, the sink and checkpoint commits are the
//! only asynchronous boundaries.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::matching::{MatchCandidate, PatternCatalog};
use crate::orchestrator::{with_retry, CheckpointTracker, OrchestratorConfig, PageOutcome};
use crate::resolution::{GlResolver, SuggestionBuilder};
use crate::traits::{SuggestionStore, TransactionMatcher, TransactionSource};
use crate::types::*;

/// Handle for requesting a cooperative stop of a running batch
///
/// Cancellation lets the in-flight transaction in each worker finish,
/// persists partial results and a final checkpoint, then stops the run
/// with status PAUSED so it can be resumed later.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Drives the full resolution pipeline over a transaction source
pub struct BatchOrchestrator<R, S> {
    source: Arc<R>,
    store: Arc<S>,
    matcher: Arc<dyn TransactionMatcher>,
    config: OrchestratorConfig,
    cancel: Arc<AtomicBool>,
}

impl<R, S> BatchOrchestrator<R, S>
where
    R: TransactionSource + 'static,
    S: SuggestionStore + 'static,
{
    /// Create an orchestrator over a source, a store and a matcher
    pub fn new(
        source: Arc<R>,
        store: Arc<S>,
        matcher: Arc<dyn TransactionMatcher>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            source,
            store,
            matcher,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for cancelling the run from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: self.cancel.clone(),
        }
    }

    /// Execute the run against an immutable catalog snapshot
    ///
    /// A summary is always produced for runs that start, even on partial
    /// failure; only setup failures (invalid config, unresumable batch id,
    /// unreachable store) return an error.
    pub async fn run(&self, catalog: Arc<PatternCatalog>) -> ClearingResult<RunSummary> {
        self.config.validate()?;
        let started = Instant::now();

        if self.config.dry_run {
            return self.dry_run(started).await;
        }

        let (batch_id, mut tracker, mut cursor, resumed_run) = self.open_run().await?;
        let total = self.count_total().await;

        let resumed = resumed_run.is_some();
        let mut run = match resumed_run {
            Some(mut run) => {
                run.status = BatchStatus::Running;
                run.completed_at = None;
                run
            }
            None => BatchRun {
                batch_id: batch_id.clone(),
                status: BatchStatus::Running,
                total,
                processed: 0,
                succeeded: 0,
                failed: 0,
                cursor: cursor.clone(),
                started_at: chrono::Utc::now().naive_utc(),
                completed_at: None,
            },
        };
        self.save_run_record(&run, resumed).await?;
        info!(batch_id = %batch_id, total, "batch run started");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut join_set: JoinSet<PageOutcome> = JoinSet::new();
        let context = Arc::new(WorkerContext {
            store: self.store.clone(),
            matcher: self.matcher.clone(),
            resolver: GlResolver::new(),
            builder: SuggestionBuilder::new(),
            catalog,
            seen: Mutex::new(HashSet::new()),
            cancel: self.cancel.clone(),
            batch_id: batch_id.clone(),
            retry_max_attempts: self.config.retry_max_attempts,
            retry_backoff_ms: self.config.retry_backoff_ms,
        });

        let mut errors: Vec<BatchError> = Vec::new();
        let mut fatal: Option<String> = None;
        let mut dispatched: u64 = 0;
        let mut batch_index = 0usize;
        let mut has_more = true;

        while has_more && fatal.is_none() && !self.cancel.load(Ordering::SeqCst) {
            let remaining = self
                .config
                .daily_limit
                .map(|limit| limit.saturating_sub(dispatched))
                .unwrap_or(u64::MAX);
            if remaining == 0 {
                info!(batch_id = %batch_id, limit = ?self.config.daily_limit, "daily limit reached");
                break;
            }
            let page_size = self.config.batch_size.min(remaining as usize);

            let fetch_cursor = cursor.clone();
            let page = match with_retry(
                "fetch unmatched page",
                self.config.retry_max_attempts,
                self.config.retry_backoff_ms,
                || self.source.fetch_unmatched(fetch_cursor.clone(), page_size),
            )
            .await
            {
                Ok(page) => page,
                Err(e) if e.is_fatal() => {
                    error!(batch_id = %batch_id, error = %e, "fatal error while fetching");
                    fatal = Some(e.to_string());
                    break;
                }
                Err(e) => {
                    // Cursor cannot advance past an unread page: stop
                    // paging, but finish in-flight work and checkpoint
                    error!(batch_id = %batch_id, error = %e, "page fetch failed after retries");
                    errors.push(BatchError {
                        batch_index,
                        message: e.to_string(),
                    });
                    break;
                }
            };

            if page.transactions.is_empty() && !page.has_more {
                break;
            }
            has_more = page.has_more;
            dispatched += page.transactions.len() as u64;
            let start_cursor = cursor.clone();
            cursor = page.next_cursor.clone();

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ClearingError::Fatal("worker pool closed".to_string()))?;
            let ctx = context.clone();
            join_set.spawn(async move {
                let _permit = permit;
                process_page(ctx, page, batch_index, start_cursor).await
            });
            batch_index += 1;

            while let Some(joined) = join_set.try_join_next() {
                self.collect_outcome(joined, &mut tracker, &mut errors, &mut fatal).await;
            }
        }

        while let Some(joined) = join_set.join_next().await {
            self.collect_outcome(joined, &mut tracker, &mut errors, &mut fatal).await;
        }

        // Final checkpoint covers the cancellation and fatal paths too
        self.commit_checkpoint(&tracker.checkpoint()).await;

        let cancelled = self.cancel.load(Ordering::SeqCst);
        let (processed, succeeded, failed) = tracker.totals();
        let status = if fatal.is_some() {
            BatchStatus::Failed
        } else if cancelled {
            BatchStatus::Paused
        } else {
            BatchStatus::Completed
        };

        run.status = status;
        run.processed = processed;
        run.succeeded = succeeded;
        run.failed = failed;
        run.cursor = tracker.cursor().cloned();
        if status != BatchStatus::Paused {
            run.completed_at = Some(chrono::Utc::now().naive_utc());
        }
        if let Err(e) = self.store.update_run(&run).await {
            error!(batch_id = %batch_id, error = %e, "failed to update run record");
        }

        if let Some(message) = fatal {
            errors.push(BatchError {
                batch_index,
                message,
            });
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let summary = RunSummary {
            batch_id,
            status,
            processed,
            succeeded,
            failed,
            duration_ms,
            throughput: throughput(processed, duration_ms),
            dry_run: false,
            errors,
        };
        info!(
            batch_id = %summary.batch_id,
            status = ?summary.status,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            errors = summary.errors.len(),
            "batch run finished"
        );
        Ok(summary)
    }

    /// Report how many transactions a run would process, without matching
    /// or mutating anything
    async fn dry_run(&self, started: Instant) -> ClearingResult<RunSummary> {
        let total = with_retry(
            "count unmatched",
            self.config.retry_max_attempts,
            self.config.retry_backoff_ms,
            || self.source.count_unmatched(),
        )
        .await?;
        let would_process = self
            .config
            .daily_limit
            .map(|limit| total.min(limit))
            .unwrap_or(total);

        info!(would_process, total, "dry run");
        Ok(RunSummary {
            batch_id: Uuid::new_v4().to_string(),
            status: BatchStatus::Completed,
            processed: would_process,
            succeeded: 0,
            failed: 0,
            duration_ms: started.elapsed().as_millis() as u64,
            throughput: 0.0,
            dry_run: true,
            errors: Vec::new(),
        })
    }

    /// Resolve the batch id, tracker and starting cursor for this run
    async fn open_run(
        &self,
    ) -> ClearingResult<(String, CheckpointTracker, Option<String>, Option<BatchRun>)> {
        match &self.config.resume_batch_id {
            Some(batch_id) => {
                let run = self
                    .store
                    .get_run(batch_id)
                    .await?
                    .ok_or_else(|| ClearingError::BatchNotFound(batch_id.clone()))?;
                match self.store.load_checkpoint(batch_id).await? {
                    Some(checkpoint) => {
                        info!(
                            batch_id = %batch_id,
                            cursor = ?checkpoint.cursor,
                            processed = checkpoint.processed,
                            "resuming from committed checkpoint"
                        );
                        let cursor = checkpoint.cursor.clone();
                        Ok((
                            batch_id.clone(),
                            CheckpointTracker::resume(&checkpoint),
                            cursor,
                            Some(run),
                        ))
                    }
                    None => {
                        warn!(batch_id = %batch_id, "no committed checkpoint; restarting run");
                        Ok((
                            batch_id.clone(),
                            CheckpointTracker::new(batch_id),
                            None,
                            Some(run),
                        ))
                    }
                }
            }
            None => {
                let batch_id = Uuid::new_v4().to_string();
                let tracker = CheckpointTracker::new(&batch_id);
                Ok((batch_id, tracker, None, None))
            }
        }
    }

    async fn count_total(&self) -> u64 {
        match with_retry(
            "count unmatched",
            self.config.retry_max_attempts,
            self.config.retry_backoff_ms,
            || self.source.count_unmatched(),
        )
        .await
        {
            Ok(total) => total,
            Err(e) => {
                warn!(error = %e, "could not count unmatched transactions");
                0
            }
        }
    }

    async fn save_run_record(&self, run: &BatchRun, resumed: bool) -> ClearingResult<()> {
        let result = if resumed {
            self.store.update_run(run).await
        } else {
            self.store.save_run(run).await
        };
        result.map_err(|e| ClearingError::Fatal(format!("cannot persist run record: {}", e)))
    }

    async fn collect_outcome(
        &self,
        joined: Result<PageOutcome, tokio::task::JoinError>,
        tracker: &mut CheckpointTracker,
        errors: &mut Vec<BatchError>,
        fatal: &mut Option<String>,
    ) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                // A panicked page leaves a gap; the tracker holds the
                // checkpoint back so a resume re-reads the page
                error!(error = %e, "page worker panicked");
                errors.push(BatchError {
                    batch_index: usize::MAX,
                    message: format!("page worker panicked: {}", e),
                });
                return;
            }
        };

        if let Some(message) = &outcome.error {
            if outcome.fatal && fatal.is_none() {
                // Stop the remaining workers; the run ends FAILED after
                // the final checkpoint commit
                error!(batch_index = outcome.batch_index, %message, "fatal page error; aborting run");
                self.cancel.store(true, Ordering::SeqCst);
                *fatal = Some(message.clone());
            } else {
                errors.push(BatchError {
                    batch_index: outcome.batch_index,
                    message: message.clone(),
                });
            }
        }

        if let Some(checkpoint) = tracker.complete(outcome) {
            self.commit_checkpoint(&checkpoint).await;
        }
    }

    async fn commit_checkpoint(&self, checkpoint: &BatchCheckpoint) {
        let result = with_retry(
            "persist checkpoint",
            self.config.retry_max_attempts,
            self.config.retry_backoff_ms,
            || self.store.persist_checkpoint(checkpoint),
        )
        .await;
        match result {
            Ok(()) => debug!(
                batch_id = %checkpoint.batch_id,
                cursor = ?checkpoint.cursor,
                processed = checkpoint.processed,
                "checkpoint committed"
            ),
            Err(e) => error!(
                batch_id = %checkpoint.batch_id,
                error = %e,
                "checkpoint persist failed; resume will repeat recent pages"
            ),
        }
    }
}

fn throughput(processed: u64, duration_ms: u64) -> f64 {
    if duration_ms == 0 {
        return processed as f64;
    }
    processed as f64 * 1000.0 / duration_ms as f64
}

/// Shared, read-only pipeline state for page workers
struct WorkerContext<S> {
    store: Arc<S>,
    matcher: Arc<dyn TransactionMatcher>,
    resolver: GlResolver,
    builder: SuggestionBuilder,
    catalog: Arc<PatternCatalog>,
    // Transaction ids handled during this run, for re-delivery dedupe
    seen: Mutex<HashSet<String>>,
    cancel: Arc<AtomicBool>,
    batch_id: String,
    retry_max_attempts: u32,
    retry_backoff_ms: u64,
}

impl<S: SuggestionStore> WorkerContext<S> {
    /// Resolve one transaction into a suggestion, superseding any prior
    /// PENDING suggestion so at most one stays active per transaction
    async fn resolve_one(&self, transaction: &Transaction) -> ClearingResult<Suggestion> {
        if let Some(mut prior) = self.store.active_suggestion_for(&transaction.id).await? {
            prior.approval_status = ApprovalStatus::Rejected;
            prior.approved_by = Some("system".to_string());
            prior.approved_at = Some(chrono::Utc::now().naive_utc());
            prior.approval_reason = Some("superseded by reprocessing".to_string());
            self.store.update_suggestion(&prior).await?;
            debug!(
                transaction_id = %transaction.id,
                superseded = %prior.id,
                "superseded prior pending suggestion"
            );
        }

        let candidates = self.matcher.match_transaction(transaction, &self.catalog);
        let best = candidates
            .into_iter()
            .next()
            .unwrap_or_else(MatchCandidate::unknown);
        let resolution = self.resolver.resolve(&best, &self.catalog);
        Ok(self.builder.build(transaction, &best, &resolution, &self.batch_id))
    }
}

/// Process one page end-to-end: match, resolve, build, persist
///
/// Transactions are handled in source order. Per-transaction errors are
/// recorded without interrupting the page; a sink failure after retries
/// marks the whole page failed. When cancellation cuts the page short the
/// outcome keeps the page's start cursor so a resume re-reads it.
async fn process_page<S: SuggestionStore>(
    ctx: Arc<WorkerContext<S>>,
    page: TransactionPage,
    batch_index: usize,
    start_cursor: Option<String>,
) -> PageOutcome {
    let mut outcome = PageOutcome {
        batch_index,
        cursor: page.next_cursor.clone(),
        processed: 0,
        succeeded: 0,
        failed: 0,
        error: None,
        fatal: false,
        truncated: false,
    };
    let mut suggestions = Vec::new();

    for transaction in &page.transactions {
        if ctx.cancel.load(Ordering::SeqCst) {
            outcome.truncated = true;
            break;
        }

        {
            let mut seen = ctx.seen.lock().await;
            if !seen.insert(transaction.id.clone()) {
                debug!(transaction_id = %transaction.id, "skipping re-delivered transaction");
                continue;
            }
        }
        if !transaction.is_unresolved() {
            continue;
        }

        outcome.processed += 1;
        match ctx.resolve_one(transaction).await {
            Ok(suggestion) => {
                suggestions.push(suggestion);
                outcome.succeeded += 1;
            }
            Err(e) if e.is_fatal() => {
                error!(
                    transaction_id = %transaction.id,
                    error = %e,
                    "fatal error; abandoning page"
                );
                outcome.failed += 1;
                outcome.error = Some(e.to_string());
                outcome.fatal = true;
                outcome.truncated = true;
                break;
            }
            Err(e) => {
                error!(
                    transaction_id = %transaction.id,
                    error = %e,
                    "transaction failed; continuing page"
                );
                outcome.failed += 1;
            }
        }
    }

    // A truncated page rolls back to its start and the tracker holds the
    // checkpoint prefix there, so a resume re-reads the unprocessed tail
    if outcome.truncated {
        outcome.cursor = start_cursor;
    }

    if !suggestions.is_empty() {
        let persisted = with_retry(
            "persist suggestions",
            ctx.retry_max_attempts,
            ctx.retry_backoff_ms,
            || ctx.store.persist_suggestions(&suggestions),
        )
        .await;
        if let Err(e) = persisted {
            // Batch granularity: the whole page counts as failed
            outcome.failed += outcome.succeeded;
            outcome.succeeded = 0;
            outcome.fatal = e.is_fatal();
            outcome.error = Some(e.to_string());
        }
    }

    outcome
}
