//! Batch orchestrator: pages the transaction source through the matching
//! pipeline with bounded concurrency, checkpoints and resume support

pub mod checkpoint;
pub mod runner;

pub use checkpoint::*;
pub use runner::*;

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::types::{ClearingError, ClearingResult};

/// Configuration for a batch run
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Transactions per page
    pub batch_size: usize,
    /// Maximum pages in flight
    pub concurrency: usize,
    /// Stop after this many transactions, if set
    pub daily_limit: Option<u64>,
    /// Resume an interrupted run from its last committed checkpoint
    pub resume_batch_id: Option<String>,
    /// Report the would-be-processed count without matching or mutating
    pub dry_run: bool,
    /// Attempts for transient reader/sink failures, at batch granularity
    pub retry_max_attempts: u32,
    /// Base backoff between retry attempts; doubles per attempt
    pub retry_backoff_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            concurrency: 4,
            daily_limit: None,
            resume_batch_id: None,
            dry_run: false,
            retry_max_attempts: 3,
            retry_backoff_ms: 200,
        }
    }
}

impl OrchestratorConfig {
    /// Validate the configuration before a run starts
    pub fn validate(&self) -> ClearingResult<()> {
        if self.batch_size == 0 {
            return Err(ClearingError::Configuration(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(ClearingError::Configuration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.retry_max_attempts == 0 {
            return Err(ClearingError::Configuration(
                "retry_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Run an I/O operation, retrying transient failures with exponential
/// backoff. Non-transient errors propagate immediately.
pub(crate) async fn with_retry<T, F, Fut>(
    label: &str,
    max_attempts: u32,
    backoff_ms: u64,
    mut op: F,
) -> ClearingResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ClearingResult<T>>,
{
    let mut attempt = 1;
    let mut backoff = Duration::from_millis(backoff_ms);

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(
                    label,
                    attempt,
                    max_attempts,
                    error = %e,
                    "transient failure, retrying after backoff"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_config_validation() {
        assert!(OrchestratorConfig::default().validate().is_ok());

        let bad = OrchestratorConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = OrchestratorConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry("test", 3, 1, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ClearingError::TransientIo("flaky".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: ClearingResult<()> = with_retry("test", 3, 1, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClearingError::TransientIo("down".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_fatal() {
        let calls = AtomicU32::new(0);
        let result: ClearingResult<()> = with_retry("test", 3, 1, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClearingError::Fatal("bad credentials".to_string())) }
        })
        .await;

        assert!(result.unwrap_err().is_fatal());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
