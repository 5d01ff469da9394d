//! Tabular export of batch results
//!
//! Fixed column layout consumed by downstream reconciliation review
//! sheets: transaction id, text, amount, currency, suggested pattern,
//! confidence score, reasoning, GL account, approval status, timestamp.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use crate::types::*;

const HEADERS: [&str; 10] = [
    "transaction_id",
    "description",
    "amount",
    "currency",
    "suggested_pattern",
    "confidence_score",
    "reasoning",
    "gl_account",
    "approval_status",
    "created_at",
];

/// Write a batch's suggestions as CSV rows
///
/// Transactions missing from the lookup still produce a row with empty
/// transaction columns, so a partially exported feed never hides
/// suggestions.
pub fn write_results_csv<W: io::Write>(
    writer: W,
    suggestions: &[Suggestion],
    transactions: &HashMap<String, Transaction>,
) -> ClearingResult<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer
        .write_record(HEADERS)
        .map_err(|e| ClearingError::Storage(format!("CSV write failed: {}", e)))?;

    for suggestion in suggestions {
        let transaction = transactions.get(&suggestion.transaction_id);
        let record = [
            suggestion.transaction_id.clone(),
            transaction.map(|t| t.description.clone()).unwrap_or_default(),
            transaction.map(|t| t.amount.to_string()).unwrap_or_default(),
            transaction.map(|t| t.currency.clone()).unwrap_or_default(),
            suggestion
                .pattern_matched
                .clone()
                .unwrap_or_else(|| UNKNOWN_PATTERN.to_string()),
            format!("{:.4}", suggestion.confidence_score),
            suggestion.reasoning.summary(),
            suggestion.gl_account_code.clone().unwrap_or_default(),
            suggestion.approval_status.to_string(),
            suggestion.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ];
        csv_writer
            .write_record(&record)
            .map_err(|e| ClearingError::Storage(format!("CSV write failed: {}", e)))?;
    }

    csv_writer
        .flush()
        .map_err(|e| ClearingError::Storage(format!("CSV flush failed: {}", e)))?;
    Ok(())
}

/// Write a batch's suggestions to a CSV file at `path`
pub fn export_results_to_path(
    path: &Path,
    suggestions: &[Suggestion],
    transactions: &HashMap<String, Transaction>,
) -> ClearingResult<()> {
    let file = std::fs::File::create(path)
        .map_err(|e| ClearingError::Storage(format!("cannot create {}: {}", path.display(), e)))?;
    write_results_csv(io::BufWriter::new(file), suggestions, transactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use chrono::NaiveDate;

    fn suggestion(id: &str, transaction_id: &str) -> Suggestion {
        Suggestion {
            id: id.to_string(),
            transaction_id: transaction_id.to_string(),
            pattern_matched: Some("income".to_string()),
            gl_account_code: Some("4000".to_string()),
            gl_account_name: Some("Interest Income".to_string()),
            debit_credit: Some(EntryType::Credit),
            account_category: Some("INCOME".to_string()),
            confidence_score: 0.855,
            approval_status: ApprovalStatus::AutoApproved,
            reasoning: ReasoningTrace {
                pattern_id: Some("income".to_string()),
                pattern_name: Some("INCOME".to_string()),
                raw_score: 1.0,
                weighted_score: 0.9,
                mapping_confidence: Some(0.95),
                notes: vec![],
            },
            risk_score: 0.0,
            priority: ReviewPriority::Low,
            approved_by: None,
            approved_at: None,
            approval_reason: None,
            batch_id: "b1".to_string(),
            created_at: NaiveDate::from_ymd_opt(2024, 3, 15)
                .unwrap()
                .and_hms_opt(10, 30, 0)
                .unwrap(),
        }
    }

    fn transaction(id: &str) -> Transaction {
        Transaction {
            id: id.to_string(),
            amount: BigDecimal::from(500),
            currency: "USD".to_string(),
            description: "WIRE INTEREST PAYMENT".to_string(),
            reference: None,
            transaction_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            account_id: "clearing".to_string(),
            pattern: Some("income".to_string()),
            source_system: "bq".to_string(),
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[test]
    fn test_export_fixed_columns() {
        let suggestions = vec![suggestion("s1", "t1")];
        let mut transactions = HashMap::new();
        transactions.insert("t1".to_string(), transaction("t1"));

        let mut buffer = Vec::new();
        write_results_csv(&mut buffer, &suggestions, &transactions).unwrap();

        let output = String::from_utf8(buffer).unwrap();
        let mut lines = output.lines();
        assert_eq!(lines.next().unwrap(), HEADERS.join(","));

        let row = lines.next().unwrap();
        assert!(row.starts_with("t1,WIRE INTEREST PAYMENT,500,USD,income,0.8550,"));
        assert!(row.contains("AUTO_APPROVED"));
        assert!(row.contains("2024-03-15 10:30:00"));
    }

    #[test]
    fn test_missing_transaction_still_exported() {
        let suggestions = vec![suggestion("s1", "t-unknown")];
        let mut buffer = Vec::new();
        write_results_csv(&mut buffer, &suggestions, &HashMap::new()).unwrap();

        let output = String::from_utf8(buffer).unwrap();
        assert_eq!(output.lines().count(), 2);
        assert!(output.lines().nth(1).unwrap().starts_with("t-unknown,,,,"));
    }

    #[test]
    fn test_export_to_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        export_results_to_path(&path, &[suggestion("s1", "t1")], &HashMap::new()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("transaction_id,"));
    }
}
