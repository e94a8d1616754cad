//! pgverify - verify data consistency between PostgreSQL-compatible databases
//!
//! Connects to every target URI, fingerprints each table in the database and
//! prints a per-target report. Exits non-zero when targets disagree.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use pgverify::config::{DEFAULT_BOOKEND_LIMIT, DEFAULT_MAX_CONCURRENT_QUERIES, DEFAULT_SPARSE_MOD};
use pgverify::{Results, TargetConfig, VerifyConfig, VerifyError};
use std::io::{self, Write};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

/// Verify data consistency between PostgreSQL syntax compatible databases.
#[derive(Debug, Parser)]
#[command(name = "pgverify", version)]
struct Cli {
    /// Target database URIs
    #[arg(required = true, value_name = "TARGET_URI", env = "PGVERIFY_TARGETS", value_delimiter = ',')]
    targets: Vec<String>,

    /// Alias names for the supplied targets (comma separated)
    #[arg(long, env = "PGVERIFY_ALIASES", value_delimiter = ',')]
    aliases: Vec<String>,

    /// Schemas to verify (comma separated, defaults to all)
    #[arg(long, env = "PGVERIFY_INCLUDE_SCHEMAS", value_delimiter = ',')]
    include_schemas: Vec<String>,

    /// Schemas to skip, ignored if --include-schemas is used (comma separated)
    #[arg(long, env = "PGVERIFY_EXCLUDE_SCHEMAS", value_delimiter = ',')]
    exclude_schemas: Vec<String>,

    /// Tables to verify (comma separated, defaults to all)
    #[arg(long, env = "PGVERIFY_INCLUDE_TABLES", value_delimiter = ',')]
    include_tables: Vec<String>,

    /// Tables to skip, ignored if --include-tables is used (comma separated)
    #[arg(long, env = "PGVERIFY_EXCLUDE_TABLES", value_delimiter = ',')]
    exclude_tables: Vec<String>,

    /// Columns to verify (comma separated, defaults to all)
    #[arg(long, env = "PGVERIFY_INCLUDE_COLUMNS", value_delimiter = ',')]
    include_columns: Vec<String>,

    /// Columns to skip, ignored if --include-columns is used (comma separated)
    #[arg(long, env = "PGVERIFY_EXCLUDE_COLUMNS", value_delimiter = ',')]
    exclude_columns: Vec<String>,

    /// Tests to use for verification (options: full, bookend, sparse, rowcount)
    #[arg(short = 't', long, env = "PGVERIFY_TESTS", value_delimiter = ',', default_value = "full")]
    tests: Vec<String>,

    /// Only check the first and last N rows (with --tests=bookend)
    #[arg(long, env = "PGVERIFY_BOOKEND_LIMIT", default_value_t = DEFAULT_BOOKEND_LIMIT)]
    bookend_limit: u64,

    /// Only check every Nth row (with --tests=sparse)
    #[arg(long, env = "PGVERIFY_SPARSE_MOD", default_value_t = DEFAULT_SPARSE_MOD)]
    sparse_mod: u64,

    /// Hash primary key values before ordering by them (useful for TEXT primary keys)
    #[arg(long, env = "PGVERIFY_HASH_PRIMARY_KEYS")]
    hash_primary_keys: bool,

    /// Precision used when comparing timestamps with time zone
    #[arg(long, alias = "tz-precision", env = "PGVERIFY_TIMESTAMP_PRECISION", default_value = "milliseconds")]
    timestamp_precision: String,

    /// Maximum fingerprint queries in flight across all targets
    #[arg(long, env = "PGVERIFY_MAX_CONCURRENT_QUERIES", default_value_t = DEFAULT_MAX_CONCURRENT_QUERIES)]
    max_concurrent_queries: usize,

    /// Cancel the verification after this many seconds
    #[arg(long, env = "PGVERIFY_TIMEOUT", value_name = "SECS")]
    timeout: Option<u64>,

    /// Report format
    #[arg(long, env = "PGVERIFY_FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Logging level or filter directive
    #[arg(long, env = "PGVERIFY_LEVEL", default_value = "info")]
    level: String,
}

impl Cli {
    fn verify_config(&self) -> Result<VerifyConfig, VerifyError> {
        VerifyConfig::builder()
            .aliases(self.aliases.clone())
            .include_schemas(self.include_schemas.clone())
            .exclude_schemas(self.exclude_schemas.clone())
            .include_tables(self.include_tables.clone())
            .exclude_tables(self.exclude_tables.clone())
            .include_columns(self.include_columns.clone())
            .exclude_columns(self.exclude_columns.clone())
            .test_modes(self.tests.clone())
            .bookend_limit(self.bookend_limit)
            .sparse_mod(self.sparse_mod)
            .hash_primary_keys(self.hash_primary_keys)
            .timestamp_precision(self.timestamp_precision.clone())
            .max_concurrent_queries(self.max_concurrent_queries)
            .build()
    }

    fn target_configs(&self) -> anyhow::Result<Vec<TargetConfig>> {
        self.targets
            .iter()
            .map(|uri| {
                TargetConfig::from_connection_string(uri)
                    .with_context(|| format!("invalid target URI {}", uri))
            })
            .collect()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before clap reads PGVERIFY_* fallbacks
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    init_tracing(&cli.level);

    let targets = cli.target_configs()?;
    let config = cli.verify_config()?;
    for target in &targets {
        info!("Target: {}", target.to_display_string());
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown(
        cancel.clone(),
        cli.timeout.map(Duration::from_secs),
    ));

    let outcome = pgverify::verify(cancel.clone(), &targets, config).await;
    cancel.cancel();

    let results = match &outcome {
        Ok(results) => Some(results),
        Err(e) => e.results(),
    };
    if let Some(results) = results {
        write_report(results, cli.format).context("failed to write report")?;
    }

    outcome?;
    Ok(())
}

/// Initialize tracing on stderr; stdout carries the report.
fn init_tracing(level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .compact(),
        )
        .init();
}

fn write_report(results: &Results, format: OutputFormat) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        OutputFormat::Table => results.write_as_table(&mut out)?,
        OutputFormat::Json => results.write_as_json(&mut out)?,
    }
    out.flush()
}

/// Cancel the run on Ctrl+C, SIGTERM or timeout; returns quietly once the run ends.
async fn cancel_on_shutdown(cancel: CancellationToken, timeout: Option<Duration>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let deadline = async {
        match timeout {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => return,
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, cancelling verification...");
        },
        _ = terminate => {
            info!("Received terminate signal, cancelling verification...");
        },
        _ = deadline => {
            warn!("Timeout reached, cancelling verification...");
        },
    }

    cancel.cancel();
}
