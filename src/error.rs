//! Error handling module
//!
//! Provides the error types surfaced by a verification run.

use crate::config::TestMode;
use crate::results::Results;
use std::collections::BTreeMap;
use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to connect to target {target}: {message}")]
    Connection { target: String, message: String },

    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Failed to scan row: {0}")]
    Scan(String),

    #[error("Query aborted by cancellation")]
    Aborted,

    #[error("Verification failed with {} error(s): {}", .errors.len(), join_errors(.errors))]
    Mismatch {
        errors: Vec<CellError>,
        results: Box<Results>,
    },

    #[error("Verification cancelled")]
    Cancelled { results: Box<Results> },
}

impl VerifyError {
    /// Results gathered before the error was raised, if the run got that far.
    pub fn results(&self) -> Option<&Results> {
        match self {
            VerifyError::Mismatch { results, .. } | VerifyError::Cancelled { results } => {
                Some(results)
            }
            _ => None,
        }
    }

    /// True for failures that mean the data differs, as opposed to setup problems.
    pub fn is_mismatch(&self) -> bool {
        matches!(self, VerifyError::Mismatch { .. })
    }
}

/// One inconsistency found in a single (schema, table, mode) cell
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CellError {
    #[error("{schema}.{table} ({mode}) has multiple outputs: {}", describe_outputs(.outputs))]
    Divergent {
        schema: String,
        table: String,
        mode: TestMode,
        outputs: BTreeMap<String, Vec<String>>,
    },

    #[error("{schema}.{table} ({mode}) output {output} reported by {} of {expected} targets: [{}]", .targets.len(), .targets.join(", "))]
    Incomplete {
        schema: String,
        table: String,
        mode: TestMode,
        output: String,
        targets: Vec<String>,
        expected: usize,
    },

    #[error("{schema}.{table} ({mode}) failed on targets: {}", .targets.join(", "))]
    Failed {
        schema: String,
        table: String,
        mode: TestMode,
        targets: Vec<String>,
    },
}

fn describe_outputs(outputs: &BTreeMap<String, Vec<String>>) -> String {
    outputs
        .iter()
        .map(|(output, targets)| format!("{} => [{}]", output, targets.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_errors(errors: &[CellError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type alias for verification operations
pub type VerifyResult<T> = Result<T, VerifyError>;

/// Helper function to create a configuration error
pub fn config_error(msg: impl Into<String>) -> VerifyError {
    VerifyError::Config(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divergent_message_names_outputs_and_targets() {
        let mut outputs = BTreeMap::new();
        outputs.insert("h1".to_string(), vec!["a".to_string(), "b".to_string()]);
        outputs.insert("h2".to_string(), vec!["c".to_string()]);
        let err = CellError::Divergent {
            schema: "public".to_string(),
            table: "users".to_string(),
            mode: TestMode::Full,
            outputs,
        };

        assert_eq!(
            err.to_string(),
            "public.users (full) has multiple outputs: h1 => [a, b]; h2 => [c]"
        );
    }

    #[test]
    fn test_incomplete_message_names_output_and_coverage() {
        let err = CellError::Incomplete {
            schema: "public".to_string(),
            table: "users".to_string(),
            mode: TestMode::RowCount,
            output: "5".to_string(),
            targets: vec!["a".to_string(), "b".to_string()],
            expected: 3,
        };

        assert_eq!(
            err.to_string(),
            "public.users (rowcount) output 5 reported by 2 of 3 targets: [a, b]"
        );
    }

    #[test]
    fn test_results_only_on_run_errors() {
        assert!(config_error("bad").results().is_none());
        let err = VerifyError::Cancelled {
            results: Box::new(Results::new(vec![], vec![TestMode::Full])),
        };
        assert!(err.results().is_some());
        assert!(!err.is_mismatch());
    }
}
