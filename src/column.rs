//! Column model
//!
//! One discovered table column plus the text cast used when hashing it.

use crate::config::{NameFilter, TimestampPrecision};
use serde::{Deserialize, Serialize};

/// Constraint type reported by `information_schema.table_constraints` for primary keys
pub const PRIMARY_KEY_CONSTRAINT: &str = "PRIMARY KEY";

const TIMESTAMP_WITH_TIME_ZONE: &str = "timestamp with time zone";

/// Column representation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    /// Every constraint type seen for this column during discovery
    pub constraints: Vec<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.add_constraint(constraint);
        self
    }

    pub fn add_constraint(&mut self, constraint: impl Into<String>) {
        let constraint = constraint.into();
        if !self.constraints.contains(&constraint) {
            self.constraints.push(constraint);
        }
    }

    pub fn is_primary_key(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| c.eq_ignore_ascii_case(PRIMARY_KEY_CONSTRAINT))
    }

    /// SQL expression casting this column to text identically on every engine.
    pub fn cast_to_text(&self, precision: TimestampPrecision) -> String {
        cast_expression(&quote_ident(&self.name), &self.data_type, precision)
    }
}

/// Cast an arbitrary SQL expression of the given declared type to text.
///
/// Timestamps with time zone become truncated integer microseconds since the
/// epoch, which removes both the offset and the sub-second rendering differences.
pub fn cast_expression(expression: &str, data_type: &str, precision: TimestampPrecision) -> String {
    if data_type.trim().eq_ignore_ascii_case(TIMESTAMP_WITH_TIME_ZONE) {
        format!(
            "(extract(epoch from date_trunc('{}', {}))::DECIMAL * 1000000)::BIGINT::TEXT",
            precision.as_str(),
            expression
        )
    } else {
        format!("{}::TEXT", expression)
    }
}

/// Double-quote an identifier, doubling any embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Columns of one table split by role.
///
/// Primary keys always drive ordering and bucketing, even when the column
/// filter keeps them out of the hashed payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableColumns {
    pub hashed: Vec<Column>,
    pub primary_keys: Vec<Column>,
}

impl TableColumns {
    pub fn partition(columns: Vec<Column>, filter: &NameFilter) -> Self {
        let mut table_columns = TableColumns::default();
        for column in columns {
            if column.is_primary_key() {
                table_columns.primary_keys.push(column.clone());
            }
            if filter.allows(&column.name) {
                table_columns.hashed.push(column);
            }
        }
        table_columns
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_keys.is_empty()
    }
}
