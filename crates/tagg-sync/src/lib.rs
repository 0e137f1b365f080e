//! Ingestion pipeline: registry, enrichment, per-connector driver, orchestrator, and the
//! periodic trigger.

use std::sync::Arc;

use anyhow::{Context, Result};

pub mod config;
pub mod enrich;
pub mod ingest;
pub mod orchestrator;
pub mod registry;
pub mod scheduler;

pub use config::{IngestConfig, SummaryConfig};
pub use enrich::{build_summarizer, truncate_chars, DisabledSummarizer, OpenAiSummarizer, Summarizer};
pub use ingest::{fetch_and_ingest, IngestContext};
pub use orchestrator::{
    IngestRunSummary, Orchestrator, OrchestratorError, RunState, RunTotals, SourceReport,
};
pub use registry::{SourceConfig, SourceRegistry};
pub use scheduler::{build_scheduler, run_scheduled};

pub const CRATE_NAME: &str = "tagg-sync";

/// Orchestrator over every enabled registry source, sharing `ctx`.
pub async fn build_orchestrator(config: &IngestConfig, ctx: IngestContext) -> Result<Orchestrator> {
    let registry = SourceRegistry::load_or_builtin(&config.sources_file)
        .await
        .context("loading source registry")?;
    Ok(Orchestrator::new(ctx, registry.build_connectors()).with_connector_timeout(config.connector_timeout()))
}

pub async fn run_ingest_cycle_from_env() -> Result<IngestRunSummary> {
    let config = IngestConfig::from_env();
    let ctx = IngestContext::from_config(&config).await?;
    let orchestrator = build_orchestrator(&config, ctx).await?;
    Ok(orchestrator.run_once().await?)
}

pub async fn run_scheduler_from_env() -> Result<()> {
    let config = IngestConfig::from_env();
    let ctx = IngestContext::from_config(&config).await?;
    let orchestrator = Arc::new(build_orchestrator(&config, ctx).await?);
    run_scheduled(orchestrator, &config.scheduler_cron).await
}
