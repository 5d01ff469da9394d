//! Compiled, validated pattern catalog
//!
//! The catalog is compiled once per run into an immutable snapshot that is
//! shared read-only across workers. Malformed entries are skipped with a
//! warning and never abort compilation.

use bigdecimal::BigDecimal;
use regex::{Regex, RegexBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

use crate::types::*;

/// Text field a compiled test reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    /// Payment reference, falling back to description when absent
    Reference,
    /// Description text
    Description,
}

/// A single compiled matching test
#[derive(Debug, Clone)]
pub enum CompiledTest {
    /// Case-insensitive regex over a text field
    Text { field: TextField, regex: Regex },
    /// Expected amount within the pattern's relative tolerance
    Amount { expected: BigDecimal },
    /// Logical AND of sub-tests
    Composite { terms: Vec<CompiledTest> },
}

/// A catalog pattern with its pre-compiled test
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    /// Source pattern definition
    pub pattern: ProcessorPattern,
    /// Compiled matching test
    pub test: CompiledTest,
}

/// One term of a COMPOSITE search expression, as stored in the catalog
#[derive(Debug, Clone, Deserialize)]
struct CompositeTerm {
    #[serde(rename = "type")]
    term_type: PatternType,
    expression: String,
}

/// Immutable, validated snapshot of the matching catalog
///
/// Patterns are held in ascending `priority_order` (ties broken by id) so
/// iteration order is deterministic.
#[derive(Debug, Clone, Default)]
pub struct PatternCatalog {
    patterns: Vec<CompiledPattern>,
    gl_map: HashMap<String, GlPattern>,
    skipped: usize,
}

impl PatternCatalog {
    /// Compile a catalog from raw pattern and GL mapping definitions
    ///
    /// Inactive patterns are dropped. A malformed entry is skipped and
    /// logged; compilation itself never fails.
    pub fn compile(patterns: &[ProcessorPattern], gl_patterns: &[GlPattern]) -> Self {
        let mut compiled = Vec::new();
        let mut skipped = 0usize;

        for pattern in patterns {
            if !pattern.active {
                continue;
            }
            match compile_pattern(pattern) {
                Ok(test) => compiled.push(CompiledPattern {
                    pattern: pattern.clone(),
                    test,
                }),
                Err(e) => {
                    warn!(pattern_id = %pattern.id, error = %e, "skipping malformed catalog entry");
                    skipped += 1;
                }
            }
        }

        compiled.sort_by(|a, b| {
            a.pattern
                .priority_order
                .cmp(&b.pattern.priority_order)
                .then_with(|| a.pattern.id.cmp(&b.pattern.id))
        });

        let mut gl_map = HashMap::new();
        for gl in gl_patterns {
            if let Err(e) = validate_gl_pattern(gl) {
                warn!(gl_pattern_id = %gl.id, error = %e, "skipping malformed GL mapping");
                skipped += 1;
                continue;
            }
            gl_map.insert(gl.pattern_id.clone(), gl.clone());
        }

        Self {
            patterns: compiled,
            gl_map,
            skipped,
        }
    }

    /// Compiled patterns in priority order
    pub fn patterns(&self) -> &[CompiledPattern] {
        &self.patterns
    }

    /// GL mapping for a pattern, if one exists
    pub fn gl_for(&self, pattern_id: &str) -> Option<&GlPattern> {
        self.gl_map.get(pattern_id)
    }

    /// Number of entries skipped during compilation
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Number of usable patterns
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether the catalog has no usable patterns
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn compile_pattern(pattern: &ProcessorPattern) -> ClearingResult<CompiledTest> {
    validate_pattern_bounds(pattern)?;
    compile_test(
        pattern.pattern_type,
        &pattern.search_expression,
        &pattern.id,
        true,
    )
}

fn validate_pattern_bounds(pattern: &ProcessorPattern) -> ClearingResult<()> {
    if !(0.0..=1.0).contains(&pattern.confidence_weight) {
        return Err(ClearingError::Configuration(format!(
            "pattern '{}': confidence_weight {} outside [0, 1]",
            pattern.id, pattern.confidence_weight
        )));
    }
    if pattern.amount_tolerance < 0.0 || !pattern.amount_tolerance.is_finite() {
        return Err(ClearingError::Configuration(format!(
            "pattern '{}': amount_tolerance {} must be a non-negative fraction",
            pattern.id, pattern.amount_tolerance
        )));
    }
    if pattern.search_expression.trim().is_empty() {
        return Err(ClearingError::Configuration(format!(
            "pattern '{}': search_expression is empty",
            pattern.id
        )));
    }
    Ok(())
}

fn compile_test(
    pattern_type: PatternType,
    expression: &str,
    pattern_id: &str,
    allow_composite: bool,
) -> ClearingResult<CompiledTest> {
    match pattern_type {
        PatternType::Reference => Ok(CompiledTest::Text {
            field: TextField::Reference,
            regex: compile_regex(expression, pattern_id)?,
        }),
        PatternType::Description => Ok(CompiledTest::Text {
            field: TextField::Description,
            regex: compile_regex(expression, pattern_id)?,
        }),
        PatternType::Amount => {
            let expected = BigDecimal::from_str(expression.trim()).map_err(|e| {
                ClearingError::Configuration(format!(
                    "pattern '{}': AMOUNT expression '{}' is not a decimal: {}",
                    pattern_id, expression, e
                ))
            })?;
            Ok(CompiledTest::Amount { expected })
        }
        PatternType::Composite => {
            if !allow_composite {
                return Err(ClearingError::Configuration(format!(
                    "pattern '{}': COMPOSITE terms cannot be nested",
                    pattern_id
                )));
            }
            let terms: Vec<CompositeTerm> = serde_json::from_str(expression).map_err(|e| {
                ClearingError::Configuration(format!(
                    "pattern '{}': COMPOSITE expression is not a JSON term array: {}",
                    pattern_id, e
                ))
            })?;
            if terms.is_empty() {
                return Err(ClearingError::Configuration(format!(
                    "pattern '{}': COMPOSITE expression has no terms",
                    pattern_id
                )));
            }
            let compiled = terms
                .iter()
                .map(|t| compile_test(t.term_type, &t.expression, pattern_id, false))
                .collect::<ClearingResult<Vec<_>>>()?;
            Ok(CompiledTest::Composite { terms: compiled })
        }
    }
}

fn compile_regex(expression: &str, pattern_id: &str) -> ClearingResult<Regex> {
    RegexBuilder::new(expression)
        .case_insensitive(true)
        .build()
        .map_err(|e| {
            ClearingError::Configuration(format!(
                "pattern '{}': invalid search expression '{}': {}",
                pattern_id, expression, e
            ))
        })
}

fn validate_gl_pattern(gl: &GlPattern) -> ClearingResult<()> {
    if !(0.0..=1.0).contains(&gl.mapping_confidence) {
        return Err(ClearingError::Configuration(format!(
            "GL mapping '{}': mapping_confidence {} outside [0, 1]",
            gl.id, gl.mapping_confidence
        )));
    }
    if !(0.0..=1.0).contains(&gl.auto_approve_threshold) {
        return Err(ClearingError::Configuration(format!(
            "GL mapping '{}': auto_approve_threshold {} outside [0, 1]",
            gl.id, gl.auto_approve_threshold
        )));
    }
    if gl.gl_account_code.trim().is_empty() {
        return Err(ClearingError::Configuration(format!(
            "GL mapping '{}': gl_account_code is empty",
            gl.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(id: &str, pattern_type: PatternType, expr: &str, priority: i32) -> ProcessorPattern {
        ProcessorPattern {
            id: id.to_string(),
            name: id.to_uppercase(),
            pattern_type,
            search_expression: expr.to_string(),
            amount_tolerance: 0.05,
            date_tolerance_days: 3,
            confidence_weight: 0.9,
            priority_order: priority,
            active: true,
        }
    }

    #[test]
    fn test_compile_sorts_by_priority_then_id() {
        let patterns = vec![
            pattern("b", PatternType::Description, "FEE", 2),
            pattern("c", PatternType::Description, "WIRE", 1),
            pattern("a", PatternType::Description, "INTEREST", 2),
        ];
        let catalog = PatternCatalog::compile(&patterns, &[]);
        let ids: Vec<&str> = catalog
            .patterns()
            .iter()
            .map(|c| c.pattern.id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_malformed_regex_skipped_not_fatal() {
        let patterns = vec![
            pattern("bad", PatternType::Description, "[unclosed", 1),
            pattern("good", PatternType::Description, "INTEREST", 2),
        ];
        let catalog = PatternCatalog::compile(&patterns, &[]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.skipped(), 1);
        assert_eq!(catalog.patterns()[0].pattern.id, "good");
    }

    #[test]
    fn test_amount_expression_must_be_decimal() {
        let patterns = vec![pattern("amt", PatternType::Amount, "not-a-number", 1)];
        let catalog = PatternCatalog::compile(&patterns, &[]);
        assert!(catalog.is_empty());
        assert_eq!(catalog.skipped(), 1);
    }

    #[test]
    fn test_composite_expression_parses_terms() {
        let expr = r#"[
            {"type": "DESCRIPTION", "expression": "INTEREST"},
            {"type": "AMOUNT", "expression": "500"}
        ]"#;
        let patterns = vec![pattern("combo", PatternType::Composite, expr, 1)];
        let catalog = PatternCatalog::compile(&patterns, &[]);
        assert_eq!(catalog.len(), 1);
        match &catalog.patterns()[0].test {
            CompiledTest::Composite { terms } => assert_eq!(terms.len(), 2),
            other => panic!("expected composite test, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_composite_rejected() {
        let expr = r#"[{"type": "COMPOSITE", "expression": "[]"}]"#;
        let patterns = vec![pattern("nested", PatternType::Composite, expr, 1)];
        let catalog = PatternCatalog::compile(&patterns, &[]);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_inactive_patterns_dropped() {
        let mut p = pattern("off", PatternType::Description, "FEE", 1);
        p.active = false;
        let catalog = PatternCatalog::compile(&[p], &[]);
        assert!(catalog.is_empty());
        assert_eq!(catalog.skipped(), 0);
    }

    #[test]
    fn test_gl_mapping_bounds_validated() {
        let gl = GlPattern {
            id: "g1".to_string(),
            pattern_id: "p1".to_string(),
            gl_account_code: "4000".to_string(),
            gl_account_name: "Interest Income".to_string(),
            debit_credit: EntryType::Credit,
            account_category: "INCOME".to_string(),
            mapping_confidence: 1.5,
            auto_approve_threshold: 0.8,
            requires_approval: false,
        };
        let catalog = PatternCatalog::compile(&[], &[gl]);
        assert!(catalog.gl_for("p1").is_none());
        assert_eq!(catalog.skipped(), 1);
    }

    #[test]
    fn test_confidence_weight_out_of_bounds_skipped() {
        let mut p = pattern("w", PatternType::Description, "FEE", 1);
        p.confidence_weight = 1.2;
        let catalog = PatternCatalog::compile(&[p], &[]);
        assert!(catalog.is_empty());
        assert_eq!(catalog.skipped(), 1);
    }
}
