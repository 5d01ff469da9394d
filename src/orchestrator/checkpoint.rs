//! Checkpoint tracking for resumable batch runs
//!
//! Pages complete out of order under concurrency, but a checkpoint cursor
//! may only ever advance over a contiguous prefix of completed pages —
//! otherwise a resume would skip the gap. The tracker buffers out-of-order
//! completions and releases checkpoints as the prefix extends. All commits
//! go through the single run loop, so checkpoint writes are serialized.

use chrono::Utc;
use std::collections::BTreeMap;

use crate::types::*;

/// Outcome of one processed page
#[derive(Debug, Clone)]
pub struct PageOutcome {
    /// Zero-based page index in fetch order
    pub batch_index: usize,
    /// Cursor positioned after this page
    pub cursor: Option<String>,
    /// Transactions processed in the page
    pub processed: u64,
    /// Transactions resolved into a suggestion
    pub succeeded: u64,
    /// Transactions that failed processing
    pub failed: u64,
    /// Batch-level error, when the page failed as a unit
    pub error: Option<String>,
    /// Whether the error must abort the whole run
    pub fatal: bool,
    /// Whether cancellation cut the page short before its tail was read
    pub truncated: bool,
}

/// Tracks page completions and derives committable checkpoints
#[derive(Debug)]
pub struct CheckpointTracker {
    batch_id: String,
    // Completed pages not yet covered by a committed checkpoint
    completed: BTreeMap<usize, PageOutcome>,
    next_index: usize,
    processed: u64,
    succeeded: u64,
    failed: u64,
    last_cursor: Option<String>,
}

impl CheckpointTracker {
    /// Start tracking a fresh run
    pub fn new(batch_id: &str) -> Self {
        Self {
            batch_id: batch_id.to_string(),
            completed: BTreeMap::new(),
            next_index: 0,
            processed: 0,
            succeeded: 0,
            failed: 0,
            last_cursor: None,
        }
    }

    /// Resume tracking from a committed checkpoint
    pub fn resume(checkpoint: &BatchCheckpoint) -> Self {
        Self {
            batch_id: checkpoint.batch_id.clone(),
            completed: BTreeMap::new(),
            next_index: 0,
            processed: checkpoint.processed,
            succeeded: checkpoint.succeeded,
            failed: checkpoint.failed,
            last_cursor: checkpoint.cursor.clone(),
        }
    }

    /// Record a completed page; returns checkpoints that became committable
    ///
    /// At most one checkpoint is returned per contiguous prefix extension,
    /// carrying the cumulative counters and the furthest contiguous cursor.
    /// A truncated page permanently stops the prefix: its tail was never
    /// read, so neither its counters nor any later page's cursor may
    /// commit, and a resume re-reads everything from the page's start.
    pub fn complete(&mut self, outcome: PageOutcome) -> Option<BatchCheckpoint> {
        self.completed.insert(outcome.batch_index, outcome);

        let mut advanced = false;
        while let Some(outcome) = self.completed.remove(&self.next_index) {
            if outcome.truncated {
                break;
            }
            self.processed += outcome.processed;
            self.succeeded += outcome.succeeded;
            self.failed += outcome.failed;
            self.last_cursor = outcome.cursor;
            self.next_index += 1;
            advanced = true;
        }

        advanced.then(|| self.checkpoint())
    }

    /// Current checkpoint over the committed prefix
    pub fn checkpoint(&self) -> BatchCheckpoint {
        BatchCheckpoint {
            batch_id: self.batch_id.clone(),
            cursor: self.last_cursor.clone(),
            processed: self.processed,
            succeeded: self.succeeded,
            failed: self.failed,
            committed_at: Utc::now().naive_utc(),
        }
    }

    /// Cumulative (processed, succeeded, failed) over the committed prefix
    pub fn totals(&self) -> (u64, u64, u64) {
        (self.processed, self.succeeded, self.failed)
    }

    /// Last committed cursor
    pub fn cursor(&self) -> Option<&String> {
        self.last_cursor.as_ref()
    }
}
