//! Batch runner CLI for the clearing engine
//!
//! Loads transactions and a pattern catalog from JSON fixtures, runs the
//! resolution pipeline, and optionally exports the results as CSV. A
//! Ctrl-C requests cooperative cancellation: in-flight work finishes, the
//! checkpoint is persisted, and the process exits with code 1.

use clap::Parser;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use clearing_core::{
    export_results_to_path, BatchOrchestrator, BatchStatus, ClearingError, ClearingResult,
    GlPattern, MemoryStore, OrchestratorConfig, PatternCatalog, ProcessorPattern, RuleMatcher,
    SuggestionStore, Transaction,
};

#[derive(Debug, Parser)]
#[command(name = "clearing", about = "Cash-clearing transaction resolution batch runner")]
struct Cli {
    /// JSON file with the transactions to resolve
    #[arg(long, value_name = "FILE")]
    transactions: PathBuf,

    /// JSON file with the pattern catalog and GL mappings
    #[arg(long, value_name = "FILE")]
    catalog: PathBuf,

    /// Transactions per page
    #[arg(long, default_value_t = 100)]
    batch_size: usize,

    /// Maximum pages in flight
    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    /// Stop after this many transactions
    #[arg(long)]
    limit: Option<u64>,

    /// Resume an interrupted run from its last committed checkpoint
    #[arg(long, value_name = "BATCH_ID")]
    resume: Option<String>,

    /// Report the would-be-processed count without mutating anything
    #[arg(long)]
    dry_run: bool,

    /// Write batch results to this CSV file
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    patterns: Vec<ProcessorPattern>,
    #[serde(default)]
    gl_patterns: Vec<GlPattern>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> ClearingResult<ExitCode> {
    let store = Arc::new(MemoryStore::new());
    let transactions: Vec<Transaction> = load_json(&cli.transactions)?;
    let loaded = transactions.len();
    for transaction in transactions {
        store.add_transaction(transaction);
    }

    let catalog_file: CatalogFile = load_json(&cli.catalog)?;
    let catalog = Arc::new(PatternCatalog::compile(
        &catalog_file.patterns,
        &catalog_file.gl_patterns,
    ));
    info!(
        transactions = loaded,
        patterns = catalog.len(),
        skipped = catalog.skipped(),
        "inputs loaded"
    );
    if catalog.is_empty() {
        warn!("catalog has no usable patterns; every transaction will need review");
    }

    let config = OrchestratorConfig {
        batch_size: cli.batch_size,
        concurrency: cli.concurrency,
        daily_limit: cli.limit,
        resume_batch_id: cli.resume,
        dry_run: cli.dry_run,
        ..Default::default()
    };
    let orchestrator =
        BatchOrchestrator::new(store.clone(), store.clone(), Arc::new(RuleMatcher::new()), config);

    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight work and checkpointing");
            cancel.cancel();
        }
    });

    let summary = orchestrator.run(catalog).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&summary)
            .map_err(|e| ClearingError::Storage(format!("cannot render summary: {}", e)))?
    );

    if let Some(path) = &cli.export {
        let suggestions = store.suggestions_for_batch(&summary.batch_id).await?;
        let transactions: HashMap<String, Transaction> = suggestions
            .iter()
            .filter_map(|s| store.get_transaction(&s.transaction_id))
            .map(|t| (t.id.clone(), t))
            .collect();
        export_results_to_path(path, &suggestions, &transactions)?;
        info!(path = %path.display(), rows = suggestions.len(), "results exported");
    }

    // Interrupted and failed runs both exit non-zero; the checkpoint was
    // already persisted so the run can be resumed
    let code = match summary.status {
        BatchStatus::Completed => ExitCode::SUCCESS,
        _ => ExitCode::from(1),
    };
    Ok(code)
}

fn load_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> ClearingResult<T> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ClearingError::Fatal(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&contents)
        .map_err(|e| ClearingError::Fatal(format!("cannot parse {}: {}", path.display(), e)))
}
