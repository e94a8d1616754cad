//! Orchestrator - concurrent verification of many targets
//!
//! Each target runs in its own task: discover tables, fan out per table,
//! fan out again per test mode. Finished targets send their fingerprints to
//! the orchestrator, which owns the [`Results`] and merges them one at a time.

use crate::column::{Column, TableColumns};
use crate::config::{TestMode, VerifyConfig};
use crate::db::queries;
use crate::db::{Session, Target, TextRow};
use crate::error::{config_error, VerifyError};
use crate::results::{Results, SingleResult, ERROR_MARKER, NO_ROWS};
use futures::future::join_all;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Runs one verification across all targets
pub struct Orchestrator {
    config: Arc<VerifyConfig>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: VerifyConfig) -> Self {
        Self {
            config: Arc::new(config),
            cancel: CancellationToken::new(),
        }
    }

    /// Abort the run when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fingerprint every table on every target and compare.
    ///
    /// On success the fingerprints are returned. Mismatches and cancellation
    /// are errors that still carry the results gathered so far.
    pub async fn verify<T: Target>(&self, targets: &[T]) -> Result<Results, VerifyError> {
        if targets.is_empty() {
            return Err(VerifyError::Config("at least one target is required".to_string()));
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("verify", %run_id, targets = targets.len());
        self.run(targets).instrument(span).await
    }

    async fn run<T: Target>(&self, targets: &[T]) -> Result<Results, VerifyError> {
        let names = resolve_target_names(&self.config, targets)?;
        let mut results = Results::new(names.clone(), self.config.test_modes.clone());
        info!("Verifying {} targets", targets.len());

        let sessions = self.connect_all(targets, &names).await?;

        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_queries));
        let (tx, mut rx) = mpsc::channel::<(String, SingleResult)>(names.len());
        let mut handles = Vec::with_capacity(sessions.len());

        for (session, name) in sessions.into_iter().zip(&names) {
            let branch = TargetBranch {
                session,
                config: self.config.clone(),
                permits: permits.clone(),
                cancel: self.cancel.child_token(),
            };
            let tx = tx.clone();
            let name = name.clone();
            let span = info_span!("target", db = %name);

            handles.push(tokio::spawn(
                async move {
                    let result = branch.run().await;
                    // The receiver is gone only after cancellation.
                    let _ = tx.send((name, result)).await;
                }
                .instrument(span),
            ));
        }
        drop(tx);

        let mut merged = 0usize;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    for handle in &handles {
                        handle.abort();
                    }
                    for handle in handles {
                        let _ = handle.await;
                    }
                    warn!("Verification cancelled after {} of {} targets", merged, names.len());
                    return Err(VerifyError::Cancelled { results: Box::new(results) });
                }
                message = rx.recv() => match message {
                    Some((name, single)) => {
                        results.add_result(&name, single);
                        merged += 1;
                        debug!("Merged results from {} ({}/{})", name, merged, names.len());
                    }
                    None => break,
                }
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Target task failed: {}", e);
            }
        }

        let errors = results.check_for_errors();
        if errors.is_empty() {
            info!("Verification successful");
            Ok(results)
        } else {
            for e in &errors {
                warn!("{}", e);
            }
            error!("Verification failed with {} errors", errors.len());
            Err(VerifyError::Mismatch {
                errors,
                results: Box::new(results),
            })
        }
    }

    /// Connect to every target; any failure aborts the whole run.
    async fn connect_all<T: Target>(
        &self,
        targets: &[T],
        names: &[String],
    ) -> Result<Vec<Box<dyn Session>>, VerifyError> {
        let attempts = join_all(targets.iter().map(|t| t.connect()));
        let outcomes = tokio::select! {
            _ = self.cancel.cancelled() => {
                return Err(VerifyError::Cancelled {
                    results: Box::new(Results::new(names.to_vec(), self.config.test_modes.clone())),
                });
            }
            outcomes = attempts => outcomes,
        };

        let mut sessions = Vec::with_capacity(outcomes.len());
        for (outcome, name) in outcomes.into_iter().zip(names) {
            match outcome {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    error!(db = %name, error = %e, "Failed to connect to target");
                    return Err(VerifyError::Connection {
                        target: name.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(sessions)
    }
}

/// Verification work for one target; owns that target's connection.
struct TargetBranch {
    session: Box<dyn Session>,
    config: Arc<VerifyConfig>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl TargetBranch {
    async fn run(self) -> SingleResult {
        let mut result = SingleResult::new();

        let tables = match self.discover_tables().await {
            Ok(tables) => tables,
            Err(e) => {
                error!(error = %e, "Failed to query for tables");
                return result;
            }
        };
        info!("Found {} tables", tables.len());

        let outcomes = join_all(tables.iter().map(|(schema, table)| {
            let span = info_span!("table", %schema, %table);
            self.verify_table(schema, table).instrument(span)
        }))
        .await;

        for ((schema, table), modes) in tables.into_iter().zip(outcomes) {
            if let Some(modes) = modes {
                result.entry(schema).or_default().insert(table, modes);
            }
        }

        info!("Table fingerprints computed");
        result
    }

    async fn discover_tables(&self) -> Result<Vec<(String, String)>, VerifyError> {
        let query = queries::tables_query(&self.config);
        let rows = self.bounded(self.session.query_rows(&query)).await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            match row {
                Ok(values) => match (text_at(&values, 0), text_at(&values, 1)) {
                    (Some(schema), Some(table)) => tables.push((schema, table)),
                    _ => warn!("Skipping table row without schema or name"),
                },
                Err(e) => error!(error = %e, "Failed to scan row data for table names"),
            }
        }
        Ok(tables)
    }

    async fn discover_columns(&self, schema: &str, table: &str) -> Result<Vec<Column>, VerifyError> {
        let query = queries::columns_query(schema, table);
        let rows = self.bounded(self.session.query_rows(&query)).await?;
        Ok(collect_columns(rows))
    }

    /// Fingerprints for every configured mode, or `None` when the table is skipped.
    async fn verify_table(&self, schema: &str, table: &str) -> Option<BTreeMap<TestMode, String>> {
        let columns = match self.discover_columns(schema, table).await {
            Ok(columns) => columns,
            Err(e) => {
                error!(error = %e, "Failed to query column names, data types");
                return None;
            }
        };
        debug!("Found {} columns", columns.len());

        let columns = TableColumns::partition(columns, &self.config.columns);
        if !columns.has_primary_key() {
            warn!("No primary key found, skipping table");
            return None;
        }

        let modes = &self.config.test_modes;
        let outputs = join_all(modes.iter().map(|mode| {
            let query = queries::fingerprint_query(&self.config, *mode, schema, table, &columns);
            self.fingerprint(*mode, query)
        }))
        .await;

        Some(modes.iter().copied().zip(outputs).collect())
    }

    /// Run one fingerprint query; failures become sentinel values.
    async fn fingerprint(&self, mode: TestMode, query: String) -> String {
        match self.bounded(self.session.query_scalar(&query)).await {
            Ok(Some(output)) => {
                debug!(%mode, %output, "Fingerprint computed");
                output
            }
            Ok(None) => {
                info!(%mode, "No rows found");
                NO_ROWS.to_string()
            }
            Err(e) => {
                error!(%mode, error = %e, %query, "Failed to compute fingerprint");
                ERROR_MARKER.to_string()
            }
        }
    }

    /// Wait for a query permit, then run the query unless the run is cancelled.
    async fn bounded<R, F>(&self, query: F) -> Result<R, VerifyError>
    where
        F: Future<Output = Result<R, VerifyError>>,
    {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(VerifyError::Aborted),
            result = async {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|e| VerifyError::Query(e.to_string()))?;
                query.await
            } => result,
        }
    }
}

/// Display names for the targets; these key the results, so they must be unique.
///
/// Targets sharing a host are told apart by their qualified names.
fn resolve_target_names<T: Target>(
    config: &VerifyConfig,
    targets: &[T],
) -> Result<Vec<String>, VerifyError> {
    let hosts: Vec<String> = targets.iter().map(|t| t.host()).collect();
    let hosts = if has_duplicates(&hosts) {
        targets.iter().map(|t| t.qualified_name()).collect()
    } else {
        hosts
    };

    let names = config.target_names(hosts);
    if has_duplicates(&names) {
        return Err(config_error(format!(
            "target names must be unique, got: {}",
            names.join(", ")
        )));
    }
    Ok(names)
}

fn has_duplicates(names: &[String]) -> bool {
    let unique: HashSet<&str> = names.iter().map(String::as_str).collect();
    unique.len() != names.len()
}

fn text_at(values: &[Option<String>], idx: usize) -> Option<String> {
    values.get(idx).cloned().flatten()
}

/// Fold column discovery rows into columns, one per name, in discovery order.
///
/// A column appears once per constraint it belongs to; rows that fail to
/// decode are skipped.
fn collect_columns(rows: Vec<TextRow>) -> Vec<Column> {
    let mut columns: Vec<Column> = Vec::new();

    for row in rows {
        let values = match row {
            Ok(values) => values,
            Err(e) => {
                error!(error = %e, "Failed to parse column names, data types from query response");
                continue;
            }
        };

        let (Some(name), Some(data_type)) = (text_at(&values, 0), text_at(&values, 1)) else {
            warn!("Skipping column row without name or data type");
            continue;
        };

        let idx = match columns.iter().position(|c| c.name == name) {
            Some(idx) => idx,
            None => {
                columns.push(Column::new(name, data_type));
                columns.len() - 1
            }
        };

        if let Some(constraint_type) = text_at(&values, 3) {
            columns[idx].add_constraint(constraint_type);
        }
    }

    columns
}
