//! Concurrent fan-out of every connector for one ingestion cycle.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tagg_adapters::{ConnectorOutcome, ErrorKind, SourceConnector};
use tagg_storage::RunRecord;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ingest::{fetch_and_ingest, millis, IngestContext};

pub const DEFAULT_CONNECTOR_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("an ingestion cycle is already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source: String,
    pub duration_ms: u64,
    pub outcome: ConnectorOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub items_seen: usize,
    pub items_written: usize,
    pub items_skipped: usize,
}

impl RunTotals {
    fn from_reports(reports: &[SourceReport]) -> Self {
        let mut totals = RunTotals::default();
        for report in reports {
            match &report.outcome {
                ConnectorOutcome::Succeeded {
                    items_seen,
                    items_written,
                    items_skipped,
                    ..
                } => {
                    totals.succeeded += 1;
                    totals.items_seen += items_seen;
                    totals.items_written += items_written;
                    totals.items_skipped += items_skipped;
                }
                ConnectorOutcome::Skipped { .. } => totals.skipped += 1,
                ConnectorOutcome::Failed { .. } => totals.failed += 1,
            }
        }
        totals
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// True whenever the cycle ran to completion, even if individual sources failed.
    pub ok: bool,
    pub sources: Vec<SourceReport>,
    pub totals: RunTotals,
}

impl IngestRunSummary {
    pub fn outcome_for(&self, source: &str) -> Option<&ConnectorOutcome> {
        self.sources
            .iter()
            .find(|r| r.source == source)
            .map(|r| &r.outcome)
    }

    pub fn to_run_record(&self) -> RunRecord {
        let report = serde_json::to_value(self).unwrap_or_else(|err| {
            warn!(error = %err, "could not serialize run summary for the ledger");
            JsonValue::Null
        });
        RunRecord {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            status: "completed".to_string(),
            report,
        }
    }
}

pub struct Orchestrator {
    ctx: IngestContext,
    connectors: Vec<Arc<dyn SourceConnector>>,
    connector_timeout: Duration,
    state: Mutex<RunState>,
}

/// Puts the orchestrator back to `Completed` however the cycle ends.
struct RunningGuard<'a> {
    state: &'a Mutex<RunState>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            *state = RunState::Completed;
        }
    }
}

impl Orchestrator {
    pub fn new(ctx: IngestContext, connectors: Vec<Arc<dyn SourceConnector>>) -> Self {
        Self {
            ctx,
            connectors,
            connector_timeout: DEFAULT_CONNECTOR_TIMEOUT,
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn with_connector_timeout(mut self, timeout: Duration) -> Self {
        self.connector_timeout = timeout;
        self
    }

    pub fn state(&self) -> RunState {
        self.state.lock().map(|s| *s).unwrap_or(RunState::Completed)
    }

    pub fn sources(&self) -> Vec<&str> {
        self.connectors.iter().map(|c| c.source()).collect()
    }

    fn begin(&self) -> Result<RunningGuard<'_>, OrchestratorError> {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *state == RunState::Running {
            return Err(OrchestratorError::AlreadyRunning);
        }
        *state = RunState::Running;
        Ok(RunningGuard { state: &self.state })
    }

    /// Runs every connector concurrently and waits for all of them.
    pub async fn run_once(&self) -> Result<IngestRunSummary, OrchestratorError> {
        let _running = self.begin()?;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let ctx = self.ctx.for_run(run_id);
        info!(%run_id, connectors = self.connectors.len(), "ingestion cycle started");

        let mut tasks = Vec::with_capacity(self.connectors.len());
        for connector in &self.connectors {
            let source = connector.source().to_string();
            let connector = Arc::clone(connector);
            let ctx = ctx.clone();
            let limit = self.connector_timeout;
            let task_source = source.clone();
            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let outcome = match tokio::time::timeout(limit, fetch_and_ingest(connector.as_ref(), &ctx)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(source = %task_source, timeout_secs = limit.as_secs(), "connector timed out");
                        ConnectorOutcome::Failed {
                            source: task_source,
                            kind: ErrorKind::Timeout,
                            error: format!("no result within {}s", limit.as_secs()),
                        }
                    }
                };
                (outcome, started.elapsed())
            });
            tasks.push((source, handle));
        }

        let mut reports = Vec::with_capacity(tasks.len());
        for (source, handle) in tasks {
            let report = match handle.await {
                Ok((outcome, elapsed)) => SourceReport {
                    source,
                    duration_ms: millis(elapsed),
                    outcome,
                },
                Err(join_err) => {
                    error!(%source, error = %join_err, "connector task aborted");
                    SourceReport {
                        outcome: ConnectorOutcome::Failed {
                            source: source.clone(),
                            kind: ErrorKind::Panicked,
                            error: join_err.to_string(),
                        },
                        source,
                        duration_ms: 0,
                    }
                }
            };
            reports.push(report);
        }

        let totals = RunTotals::from_reports(&reports);
        let summary = IngestRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            ok: true,
            sources: reports,
            totals,
        };
        info!(
            %run_id,
            succeeded = summary.totals.succeeded,
            skipped = summary.totals.skipped,
            failed = summary.totals.failed,
            items_written = summary.totals.items_written,
            "ingestion cycle completed"
        );

        if let Some(ledger) = &self.ctx.ledger {
            if let Err(err) = ledger.record_run(&summary.to_run_record()).await {
                warn!(%run_id, error = %err, "failed to record run in ledger");
            }
        }
        Ok(summary)
    }
}
