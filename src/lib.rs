//! pgverify - data consistency verification for PostgreSQL-compatible databases
//!
//! Every target computes a deterministic fingerprint per table and test mode
//! inside the database; only the fingerprints travel back and are compared.
//! Targets whose data is logically identical produce identical fingerprints
//! even when physical row order or engine differ.

pub mod column;
pub mod config;
pub mod db;
pub mod error;
pub mod orchestrator;
pub mod report;
pub mod results;

pub use column::{Column, TableColumns};
pub use config::{NameFilter, TestMode, TimestampPrecision, VerifyConfig, VerifyConfigBuilder};
pub use db::{Session, Target, TargetConfig};
pub use error::{CellError, VerifyError, VerifyResult};
pub use orchestrator::Orchestrator;
pub use results::{Results, SingleResult, ERROR_MARKER, NO_ROWS};

use tokio_util::sync::CancellationToken;

/// Verify that all targets hold the same data.
///
/// Returns the fingerprints when every target agrees. A mismatch is returned
/// as [`VerifyError::Mismatch`] with the full results attached; cancelling
/// `cancel` ends the run with [`VerifyError::Cancelled`].
pub async fn verify<T: Target>(
    cancel: CancellationToken,
    targets: &[T],
    config: VerifyConfig,
) -> VerifyResult<Results> {
    Orchestrator::new(config)
        .with_cancellation(cancel)
        .verify(targets)
        .await
}
