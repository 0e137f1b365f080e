use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::orchestrator::{Orchestrator, OrchestratorError};

/// Scheduler that triggers one ingestion cycle per cron tick. Ticks that land while a
/// cycle is still running are dropped.
pub async fn build_scheduler(orchestrator: Arc<Orchestrator>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron, move |_uuid, _l| {
        let orchestrator = Arc::clone(&orchestrator);
        Box::pin(async move {
            match orchestrator.run_once().await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    failed = summary.totals.failed,
                    items_written = summary.totals.items_written,
                    "scheduled ingestion cycle finished"
                ),
                Err(OrchestratorError::AlreadyRunning) => {
                    warn!("previous ingestion cycle still running; skipping this tick")
                }
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

/// Starts the scheduler and blocks until Ctrl-C.
pub async fn run_scheduled(orchestrator: Arc<Orchestrator>, cron: &str) -> Result<()> {
    let mut sched = build_scheduler(orchestrator, cron).await?;
    sched.start().await.context("starting scheduler")?;
    info!(%cron, "scheduler running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    sched.shutdown().await.context("stopping scheduler")?;
    info!("scheduler stopped");
    Ok(())
}
