//! SQL query builders
//!
//! Every query the verifier sends is built here. Builders are pure: the same
//! configuration and columns always produce byte-identical SQL, whatever order
//! the columns were discovered in.

use crate::column::{quote_ident, TableColumns};
use crate::config::{NameFilter, TestMode, VerifyConfig};
use once_cell::sync::Lazy;
use regex::Regex;

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Collapse all whitespace runs to a single space.
pub fn format_query(query: &str) -> String {
    WHITESPACE.replace_all(query, " ").trim().to_string()
}

/// Single-quote a string literal, doubling embedded quotes
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn table_ref(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

fn in_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| quote_literal(v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `IN` clause when an include list is set, otherwise `NOT IN` for excludes.
fn filter_clause(column: &str, filter: &NameFilter) -> Option<String> {
    if !filter.include.is_empty() {
        Some(format!("{} IN ({})", column, in_list(&filter.include)))
    } else if !filter.exclude.is_empty() {
        Some(format!("{} NOT IN ({})", column, in_list(&filter.exclude)))
    } else {
        None
    }
}

/// List the (schema, table) pairs to verify, views excluded.
pub fn tables_query(config: &VerifyConfig) -> String {
    let mut where_clauses = vec!["table_type != 'VIEW'".to_string()];
    where_clauses.extend(filter_clause("table_schema", &config.schemas));
    where_clauses.extend(filter_clause("table_name", &config.tables));

    format_query(&format!(
        "SELECT table_schema, table_name FROM information_schema.tables WHERE {}",
        where_clauses.join(" AND ")
    ))
}

/// List every column of one table with each constraint it takes part in.
///
/// Columns without constraints come back once with NULL constraint fields.
pub fn columns_query(schema: &str, table: &str) -> String {
    format_query(&format!(
        r#"
        SELECT c.column_name, c.data_type, k.constraint_name, tc.constraint_type
        FROM information_schema.columns AS c
            LEFT OUTER JOIN information_schema.key_column_usage AS k ON (
                c.column_name = k.column_name AND
                c.table_name = k.table_name AND
                c.table_schema = k.table_schema
            )
            LEFT OUTER JOIN information_schema.table_constraints AS tc ON (
                k.constraint_name = tc.constraint_name AND
                k.constraint_schema = tc.constraint_schema AND
                k.table_name = tc.table_name
            )
        WHERE c.table_name = {} AND c.table_schema = {}
        "#,
        quote_literal(table),
        quote_literal(schema),
    ))
}

/// Sorted text casts of the hashed columns and of the primary key columns.
struct CastExpressions {
    hashed: Vec<String>,
    primary_keys: Vec<String>,
}

impl CastExpressions {
    fn new(config: &VerifyConfig, columns: &TableColumns) -> Self {
        let precision = config.timestamp_precision;
        let mut hashed: Vec<String> = columns
            .hashed
            .iter()
            .map(|c| c.cast_to_text(precision))
            .collect();
        let mut primary_keys: Vec<String> = columns
            .primary_keys
            .iter()
            .map(|c| c.cast_to_text(precision))
            .collect();
        hashed.sort();
        primary_keys.sort();
        Self {
            hashed,
            primary_keys,
        }
    }

    /// Per-row fingerprint
    fn row_hash(&self) -> String {
        format!("MD5({})", concat(&self.hashed))
    }

    /// Primary key concatenation used to bucket rows
    fn key_concat(&self) -> String {
        concat(&self.primary_keys)
    }

    /// Expression rows are ordered by before folding
    fn order_by(&self, hash_primary_keys: bool) -> String {
        if hash_primary_keys {
            format!("MD5({})", self.key_concat())
        } else {
            self.key_concat()
        }
    }
}

/// `CONCAT(a, b, ...)`; an empty list becomes the empty string literal.
fn concat(expressions: &[String]) -> String {
    if expressions.is_empty() {
        "''".to_string()
    } else {
        format!("CONCAT({})", expressions.join(", "))
    }
}

/// Fingerprint every row, ordered by primary key, folded into one hash.
pub fn full_hash_query(
    config: &VerifyConfig,
    schema: &str,
    table: &str,
    columns: &TableColumns,
) -> String {
    let casts = CastExpressions::new(config, columns);
    format_query(&format!(
        r#"
        SELECT md5(string_agg(hash, ''))
        FROM (
            SELECT {row_hash} AS hash
            FROM {table}
            ORDER BY {order_by}
        ) AS eachhash
        "#,
        row_hash = casts.row_hash(),
        table = table_ref(schema, table),
        order_by = casts.order_by(config.hash_primary_keys),
    ))
}

/// Like the full query, restricted to rows whose hashed primary key falls
/// in bucket zero modulo `sparse_mod`. Each key column gets its own bucket
/// condition and the conditions are AND-ed.
pub fn sparse_hash_query(
    config: &VerifyConfig,
    schema: &str,
    table: &str,
    columns: &TableColumns,
    sparse_mod: u64,
) -> String {
    let casts = CastExpressions::new(config, columns);
    let relation = table_ref(schema, table);

    let mut key_names: Vec<&str> = columns
        .primary_keys
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    key_names.sort_unstable();

    let bucket_conditions: Vec<String> = key_names
        .iter()
        .map(|name| {
            let key = quote_ident(name);
            format!(
                "{key} IN ( SELECT {key} FROM {table} WHERE ('x' || substr(md5({concat}),1,16))::bit(64)::bigint % {modulo} = 0 )",
                key = key,
                table = relation,
                concat = casts.key_concat(),
                modulo = sparse_mod,
            )
        })
        .collect();

    format_query(&format!(
        r#"
        SELECT md5(string_agg(hash, ''))
        FROM (
            SELECT {row_hash} AS hash
            FROM {table}
            WHERE {conditions}
            ORDER BY {order_by}
        ) AS eachrow
        "#,
        row_hash = casts.row_hash(),
        table = relation,
        conditions = bucket_conditions.join(" AND "),
        order_by = casts.order_by(config.hash_primary_keys),
    ))
}

/// Hash the first and last `limit` rows by primary key and fold both.
pub fn bookend_hash_query(
    config: &VerifyConfig,
    schema: &str,
    table: &str,
    columns: &TableColumns,
    limit: u64,
) -> String {
    let casts = CastExpressions::new(config, columns);
    let row_hash = casts.row_hash();
    let relation = table_ref(schema, table);
    let order_by = casts.order_by(config.hash_primary_keys);

    let side = |direction: &str| {
        format!(
            r#"
            SELECT md5(string_agg(hash, '')) AS hash
            FROM (
                SELECT {row_hash} AS hash
                FROM {table}
                ORDER BY {order_by} {direction}
                LIMIT {limit}
            ) AS eachrow
            "#,
            row_hash = row_hash,
            table = relation,
            order_by = order_by,
            direction = direction,
            limit = limit,
        )
    };

    format_query(&format!(
        r#"
        SELECT md5(CONCAT(starthash.hash::TEXT, endhash.hash::TEXT))
        FROM ({start}) AS starthash, ({end}) AS endhash
        "#,
        start = side("ASC"),
        end = side("DESC"),
    ))
}

/// Row count of the table as text.
pub fn row_count_query(schema: &str, table: &str) -> String {
    format_query(&format!(
        "SELECT count(*)::TEXT FROM {}",
        table_ref(schema, table)
    ))
}

/// Build the fingerprint query for one test mode.
pub fn fingerprint_query(
    config: &VerifyConfig,
    mode: TestMode,
    schema: &str,
    table: &str,
    columns: &TableColumns,
) -> String {
    match mode {
        TestMode::Full => full_hash_query(config, schema, table, columns),
        TestMode::Sparse => sparse_hash_query(config, schema, table, columns, config.sparse_mod),
        TestMode::Bookend => {
            bookend_hash_query(config, schema, table, columns, config.bookend_limit)
        }
        TestMode::RowCount => row_count_query(schema, table),
    }
}
