//! Verification configuration module
//!
//! Holds the immutable options for one verification run. Options are
//! collected through [`VerifyConfigBuilder`] and validated once in `build()`.

use crate::error::{config_error, VerifyError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default row count for the bookend test
pub const DEFAULT_BOOKEND_LIMIT: u64 = 1000;

/// Default divisor for the sparse test
pub const DEFAULT_SPARSE_MOD: u64 = 10;

/// Default cap on fingerprint queries in flight across all targets
pub const DEFAULT_MAX_CONCURRENT_QUERIES: usize = 16;

/// Largest value usable as a `bigint` literal in generated SQL
const MAX_SQL_BIGINT: u64 = i64::MAX as u64;

/// Fingerprinting strategy applied to each table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    Full,
    Bookend,
    Sparse,
    RowCount,
}

impl TestMode {
    pub const ALL: [TestMode; 4] = [
        TestMode::Full,
        TestMode::Bookend,
        TestMode::Sparse,
        TestMode::RowCount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestMode::Full => "full",
            TestMode::Bookend => "bookend",
            TestMode::Sparse => "sparse",
            TestMode::RowCount => "rowcount",
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestMode {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(TestMode::Full),
            "bookend" => Ok(TestMode::Bookend),
            "sparse" => Ok(TestMode::Sparse),
            "rowcount" => Ok(TestMode::RowCount),
            other => Err(config_error(format!(
                "invalid test mode '{}' (options: full, bookend, sparse, rowcount)",
                other
            ))),
        }
    }
}

/// Granularity timestamp-with-time-zone values are truncated to before hashing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampPrecision {
    Microseconds,
    #[default]
    Milliseconds,
    Second,
    Minute,
    Hour,
    Day,
}

impl TimestampPrecision {
    /// Unit name as understood by `date_trunc`
    pub fn as_str(&self) -> &'static str {
        match self {
            TimestampPrecision::Microseconds => "microseconds",
            TimestampPrecision::Milliseconds => "milliseconds",
            TimestampPrecision::Second => "second",
            TimestampPrecision::Minute => "minute",
            TimestampPrecision::Hour => "hour",
            TimestampPrecision::Day => "day",
        }
    }
}

impl fmt::Display for TimestampPrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimestampPrecision {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "microsecond" | "microseconds" => Ok(TimestampPrecision::Microseconds),
            "millisecond" | "milliseconds" => Ok(TimestampPrecision::Milliseconds),
            "second" | "seconds" => Ok(TimestampPrecision::Second),
            "minute" | "minutes" => Ok(TimestampPrecision::Minute),
            "hour" | "hours" => Ok(TimestampPrecision::Hour),
            "day" | "days" => Ok(TimestampPrecision::Day),
            other => Err(config_error(format!(
                "invalid timestamp precision '{}' (options: microseconds, milliseconds, second, minute, hour, day)",
                other
            ))),
        }
    }
}

/// Include/exclude filter for one dimension (schema, table or column)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameFilter {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl NameFilter {
    /// Exclusions only apply while no inclusion list is set.
    pub fn allows(&self, name: &str) -> bool {
        if !self.include.is_empty() {
            return self.include.iter().any(|n| n == name);
        }
        !self.exclude.iter().any(|n| n == name)
    }
}

/// Complete verification options
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyConfig {
    pub schemas: NameFilter,
    pub tables: NameFilter,
    pub columns: NameFilter,
    pub test_modes: Vec<TestMode>,
    pub bookend_limit: u64,
    pub sparse_mod: u64,
    pub hash_primary_keys: bool,
    pub timestamp_precision: TimestampPrecision,
    pub aliases: Vec<String>,
    pub max_concurrent_queries: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            schemas: NameFilter::default(),
            tables: NameFilter::default(),
            columns: NameFilter::default(),
            test_modes: vec![TestMode::Full],
            bookend_limit: DEFAULT_BOOKEND_LIMIT,
            sparse_mod: DEFAULT_SPARSE_MOD,
            hash_primary_keys: false,
            timestamp_precision: TimestampPrecision::default(),
            aliases: Vec::new(),
            max_concurrent_queries: DEFAULT_MAX_CONCURRENT_QUERIES,
        }
    }
}

impl VerifyConfig {
    pub fn builder() -> VerifyConfigBuilder {
        VerifyConfigBuilder::default()
    }

    /// Resolve display names for the given target hosts.
    ///
    /// Aliases are used only when there is exactly one per target.
    pub fn target_names<I, S>(&self, hosts: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hosts: Vec<String> = hosts.into_iter().map(Into::into).collect();
        if !self.aliases.is_empty() && self.aliases.len() == hosts.len() {
            self.aliases.clone()
        } else {
            hosts
        }
    }
}

/// Collects raw options; nothing is validated until [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct VerifyConfigBuilder {
    include_schemas: Vec<String>,
    exclude_schemas: Vec<String>,
    include_tables: Vec<String>,
    exclude_tables: Vec<String>,
    include_columns: Vec<String>,
    exclude_columns: Vec<String>,
    test_modes: Vec<String>,
    bookend_limit: Option<u64>,
    sparse_mod: Option<u64>,
    hash_primary_keys: bool,
    timestamp_precision: Option<String>,
    aliases: Vec<String>,
    max_concurrent_queries: Option<usize>,
}

fn owned<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items
        .into_iter()
        .map(Into::into)
        .filter(|s: &String| !s.trim().is_empty())
        .collect()
}

impl VerifyConfigBuilder {
    pub fn include_schemas<I: IntoIterator<Item = S>, S: Into<String>>(mut self, v: I) -> Self {
        self.include_schemas = owned(v);
        self
    }

    pub fn exclude_schemas<I: IntoIterator<Item = S>, S: Into<String>>(mut self, v: I) -> Self {
        self.exclude_schemas = owned(v);
        self
    }

    pub fn include_tables<I: IntoIterator<Item = S>, S: Into<String>>(mut self, v: I) -> Self {
        self.include_tables = owned(v);
        self
    }

    pub fn exclude_tables<I: IntoIterator<Item = S>, S: Into<String>>(mut self, v: I) -> Self {
        self.exclude_tables = owned(v);
        self
    }

    pub fn include_columns<I: IntoIterator<Item = S>, S: Into<String>>(mut self, v: I) -> Self {
        self.include_columns = owned(v);
        self
    }

    pub fn exclude_columns<I: IntoIterator<Item = S>, S: Into<String>>(mut self, v: I) -> Self {
        self.exclude_columns = owned(v);
        self
    }

    /// Test mode names; parsed and checked in `build()`.
    pub fn test_modes<I: IntoIterator<Item = S>, S: Into<String>>(mut self, v: I) -> Self {
        self.test_modes = owned(v);
        self
    }

    pub fn bookend_limit(mut self, limit: u64) -> Self {
        self.bookend_limit = Some(limit);
        self
    }

    pub fn sparse_mod(mut self, modulo: u64) -> Self {
        self.sparse_mod = Some(modulo);
        self
    }

    pub fn hash_primary_keys(mut self, enabled: bool) -> Self {
        self.hash_primary_keys = enabled;
        self
    }

    pub fn timestamp_precision(mut self, precision: impl Into<String>) -> Self {
        self.timestamp_precision = Some(precision.into());
        self
    }

    pub fn aliases<I: IntoIterator<Item = S>, S: Into<String>>(mut self, v: I) -> Self {
        self.aliases = owned(v);
        self
    }

    pub fn max_concurrent_queries(mut self, max: usize) -> Self {
        self.max_concurrent_queries = Some(max);
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<VerifyConfig, VerifyError> {
        let defaults = VerifyConfig::default();

        let mut test_modes = Vec::with_capacity(self.test_modes.len());
        for name in &self.test_modes {
            let mode: TestMode = name.parse()?;
            if !test_modes.contains(&mode) {
                test_modes.push(mode);
            }
        }
        if test_modes.is_empty() {
            test_modes = defaults.test_modes;
        }

        let timestamp_precision = match &self.timestamp_precision {
            Some(p) => p.parse()?,
            None => defaults.timestamp_precision,
        };

        let bookend_limit = self.bookend_limit.unwrap_or(defaults.bookend_limit);
        if bookend_limit == 0 || bookend_limit > MAX_SQL_BIGINT {
            return Err(config_error(format!(
                "bookend limit must be between 1 and {}",
                MAX_SQL_BIGINT
            )));
        }

        let sparse_mod = self.sparse_mod.unwrap_or(defaults.sparse_mod);
        if sparse_mod == 0 || sparse_mod > MAX_SQL_BIGINT {
            return Err(config_error(format!(
                "sparse modulo must be between 1 and {}",
                MAX_SQL_BIGINT
            )));
        }

        let max_concurrent_queries = self
            .max_concurrent_queries
            .unwrap_or(defaults.max_concurrent_queries);
        if max_concurrent_queries == 0 {
            return Err(config_error("max concurrent queries must be greater than zero"));
        }

        Ok(VerifyConfig {
            schemas: NameFilter {
                include: self.include_schemas,
                exclude: self.exclude_schemas,
            },
            tables: NameFilter {
                include: self.include_tables,
                exclude: self.exclude_tables,
            },
            columns: NameFilter {
                include: self.include_columns,
                exclude: self.exclude_columns,
            },
            test_modes,
            bookend_limit,
            sparse_mod,
            hash_primary_keys: self.hash_primary_keys,
            timestamp_precision,
            aliases: self.aliases,
            max_concurrent_queries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VerifyConfig::builder().build().unwrap();
        assert_eq!(config.test_modes, vec![TestMode::Full]);
        assert_eq!(config.bookend_limit, 1000);
        assert_eq!(config.sparse_mod, 10);
        assert_eq!(config.timestamp_precision, TimestampPrecision::Milliseconds);
        assert!(!config.hash_primary_keys);
    }

    #[test]
    fn test_invalid_test_mode_is_config_error() {
        let result = VerifyConfig::builder()
            .test_modes(["full", "everything"])
            .build();
        assert!(matches!(result, Err(VerifyError::Config(_))));
    }

    #[test]
    fn test_test_modes_keep_order_and_drop_duplicates() {
        let config = VerifyConfig::builder()
            .test_modes(["sparse", "FULL", "sparse", "rowcount"])
            .build()
            .unwrap();
        assert_eq!(
            config.test_modes,
            vec![TestMode::Sparse, TestMode::Full, TestMode::RowCount]
        );
    }

    #[test]
    fn test_invalid_precision_is_config_error() {
        let result = VerifyConfig::builder().timestamp_precision("fortnight").build();
        assert!(matches!(result, Err(VerifyError::Config(_))));
    }

    #[test]
    fn test_zero_sparse_mod_rejected() {
        assert!(VerifyConfig::builder().sparse_mod(0).build().is_err());
        assert!(VerifyConfig::builder().bookend_limit(0).build().is_err());
    }

    #[test]
    fn test_limits_beyond_bigint_rejected() {
        let too_large = i64::MAX as u64 + 1;
        assert!(matches!(
            VerifyConfig::builder().sparse_mod(too_large).build(),
            Err(VerifyError::Config(_))
        ));
        assert!(VerifyConfig::builder().bookend_limit(too_large).build().is_err());

        let config = VerifyConfig::builder()
            .sparse_mod(i64::MAX as u64)
            .build()
            .unwrap();
        assert_eq!(config.sparse_mod, i64::MAX as u64);
    }

    #[test]
    fn test_include_wins_over_exclude() {
        let filter = NameFilter {
            include: vec!["a".to_string()],
            exclude: vec!["a".to_string(), "b".to_string()],
        };
        assert!(filter.allows("a"));
        assert!(!filter.allows("b"));
        assert!(!filter.allows("c"));

        let exclude_only = NameFilter {
            include: vec![],
            exclude: vec!["b".to_string()],
        };
        assert!(exclude_only.allows("a"));
        assert!(!exclude_only.allows("b"));
    }

    #[test]
    fn test_target_names_use_aliases_only_when_counts_match() {
        let config = VerifyConfig::builder()
            .aliases(["primary", "replica"])
            .build()
            .unwrap();
        assert_eq!(config.target_names(["h1", "h2"]), vec!["primary", "replica"]);
        assert_eq!(config.target_names(["h1", "h2", "h3"]), vec!["h1", "h2", "h3"]);
    }
}
