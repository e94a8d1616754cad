//! Result aggregation
//!
//! Collects the fingerprint every target produced for every table and test
//! mode, and checks that all targets agree.

use crate::config::TestMode;
use crate::error::CellError;
use serde::Serialize;
use std::collections::BTreeMap;

/// Recorded when a fingerprint query returns no row or a NULL value
pub const NO_ROWS: &str = "no rows";

/// Recorded when a fingerprint query fails; also rendered for missing cells
pub const ERROR_MARKER: &str = "error";

/// One target's fingerprints: schema -> table -> mode -> output
pub type SingleResult = BTreeMap<String, BTreeMap<String, BTreeMap<TestMode, String>>>;

/// Output -> names of the targets that produced it
pub type OutputTargets = BTreeMap<String, Vec<String>>;

/// Fingerprints of every target for one verification run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Results {
    /// schema -> table -> mode -> output -> targets
    pub content: BTreeMap<String, BTreeMap<String, BTreeMap<TestMode, OutputTargets>>>,
    pub target_names: Vec<String>,
    pub test_modes: Vec<TestMode>,
}

impl Results {
    pub fn new(target_names: Vec<String>, test_modes: Vec<TestMode>) -> Self {
        Self {
            content: BTreeMap::new(),
            target_names,
            test_modes,
        }
    }

    /// Merge one target's fingerprints.
    pub fn add_result(&mut self, target_name: &str, result: SingleResult) {
        for (schema, tables) in result {
            let schema_entry = self.content.entry(schema).or_default();
            for (table, modes) in tables {
                let table_entry = schema_entry.entry(table).or_default();
                for (mode, output) in modes {
                    table_entry
                        .entry(mode)
                        .or_default()
                        .entry(output)
                        .or_default()
                        .push(target_name.to_string());
                }
            }
        }
    }

    /// Every inconsistency across all cells; never stops at the first one.
    ///
    /// Each output held by fewer than all targets is reported as incomplete,
    /// so a divergent cell yields one divergence plus one incompleteness
    /// error per output.
    pub fn check_for_errors(&self) -> Vec<CellError> {
        let expected = self.target_names.len();
        let mut errors = Vec::new();

        for (schema, tables) in &self.content {
            for (table, modes) in tables {
                for (mode, outputs) in modes {
                    if outputs.len() > 1 {
                        errors.push(CellError::Divergent {
                            schema: schema.clone(),
                            table: table.clone(),
                            mode: *mode,
                            outputs: outputs.clone(),
                        });
                    }

                    for (output, targets) in outputs {
                        if targets.len() != expected {
                            errors.push(CellError::Incomplete {
                                schema: schema.clone(),
                                table: table.clone(),
                                mode: *mode,
                                output: output.clone(),
                                targets: targets.clone(),
                                expected,
                            });
                        }
                    }

                    if let Some(failed) = outputs.get(ERROR_MARKER) {
                        errors.push(CellError::Failed {
                            schema: schema.clone(),
                            table: table.clone(),
                            mode: *mode,
                            targets: failed.clone(),
                        });
                    }
                }
            }
        }

        errors
    }

    /// Output a target produced for a cell, if any
    pub fn output_for(&self, schema: &str, table: &str, mode: TestMode, target: &str) -> Option<&str> {
        self.content
            .get(schema)?
            .get(table)?
            .get(&mode)?
            .iter()
            .find(|(_, targets)| targets.iter().any(|t| t == target))
            .map(|(output, _)| output.as_str())
    }
}
