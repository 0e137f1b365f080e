//! The per-connector driver: one page fetched, mapped, enriched, upserted, and the cursor
//! advanced, with every failure folded into a [`ConnectorOutcome`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tagg_adapters::{ConnectorError, ConnectorOutcome, Readiness, SourceConnector};
use tagg_storage::{
    BackoffPolicy, CursorStore, HttpClientConfig, HttpFetcher, JsonTransport, PgStore, RunLedger, TenderSink,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::enrich::{build_summarizer, Summarizer};

/// Shared services handed to every connector run.
#[derive(Clone)]
pub struct IngestContext {
    pub run_id: Uuid,
    pub transport: Arc<dyn JsonTransport>,
    pub sink: Arc<dyn TenderSink>,
    pub cursors: Arc<dyn CursorStore>,
    pub ledger: Option<Arc<dyn RunLedger>>,
    pub summarizer: Arc<dyn Summarizer>,
}

impl IngestContext {
    pub fn new(
        transport: Arc<dyn JsonTransport>,
        sink: Arc<dyn TenderSink>,
        cursors: Arc<dyn CursorStore>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            run_id: Uuid::nil(),
            transport,
            sink,
            cursors,
            ledger: None,
            summarizer,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn RunLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn for_run(&self, run_id: Uuid) -> Self {
        Self {
            run_id,
            ..self.clone()
        }
    }

    /// Builds the transport, the Postgres store, and the summarizer from config.
    pub async fn from_config(config: &IngestConfig) -> Result<Self> {
        let database_url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL is not set")?;
        let store = PgStore::connect(database_url)
            .await
            .context("connecting to postgres")?;
        store.ensure_schema().await.context("ensuring tender schema")?;
        Self::from_config_with_store(config, Arc::new(store))
    }

    /// Same as [`IngestContext::from_config`] but persisting into `store`.
    pub fn from_config_with_store<S>(config: &IngestConfig, store: Arc<S>) -> Result<Self>
    where
        S: TenderSink + CursorStore + RunLedger + 'static,
    {
        let transport = HttpFetcher::new(HttpClientConfig {
            timeout: config.http_timeout(),
            user_agent: Some(config.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: config.http_max_retries,
                ..BackoffPolicy::default()
            },
            ..HttpClientConfig::default()
        })?;
        let summarizer = build_summarizer(&config.summary);
        let sink: Arc<dyn TenderSink> = store.clone();
        let cursors: Arc<dyn CursorStore> = store.clone();
        let ledger: Arc<dyn RunLedger> = store;
        Ok(Self::new(Arc::new(transport), sink, cursors, summarizer).with_ledger(ledger))
    }
}

/// Runs one connector to completion. Never panics on upstream or store errors and never
/// returns an error: failures become `Failed`, unmet preconditions become `Skipped`.
#[instrument(skip_all, fields(run_id = %ctx.run_id, source = %connector.source()))]
pub async fn fetch_and_ingest(connector: &dyn SourceConnector, ctx: &IngestContext) -> ConnectorOutcome {
    if let Readiness::Skip(reason) = connector.readiness() {
        info!(%reason, "connector skipped");
        return ConnectorOutcome::Skipped { reason };
    }
    match ingest_page(connector, ctx).await {
        Ok(outcome) => outcome,
        Err(ConnectorError::ConfigMissing(reason)) => {
            info!(%reason, "connector skipped");
            ConnectorOutcome::Skipped { reason }
        }
        Err(err) => {
            warn!(kind = %err.kind(), error = %err, "connector failed");
            ConnectorOutcome::failed(connector.source(), &err)
        }
    }
}

async fn ingest_page(connector: &dyn SourceConnector, ctx: &IngestContext) -> Result<ConnectorOutcome, ConnectorError> {
    let source = connector.source();
    let cursor = if connector.supports_cursor() {
        ctx.cursors.get_cursor(source).await?.map(|c| c.token)
    } else {
        None
    };
    debug!(cursor = ?cursor, "fetching page");

    let request = connector.build_request(cursor.as_deref(), Utc::now())?;
    let page = ctx.transport.fetch_json(source, &request).await?;
    let items = connector.extract_items(&page.body)?;
    let items_seen = items.len();

    let mut items_written = 0usize;
    let mut items_skipped = 0usize;
    for (index, raw) in items.iter().enumerate() {
        let mut tender = match connector.map_item(raw) {
            Ok(tender) => tender,
            Err(err) => {
                items_skipped += 1;
                warn!(index, error = %err, "skipping unmappable item");
                continue;
            }
        };
        let summary = ctx.summarizer.summarize(tender.summary_text()).await;
        tender.ai_summary = summary;
        ctx.sink.upsert(&tender).await?;
        items_written += 1;
    }

    let mut cursor_advanced = false;
    if connector.supports_cursor() {
        if let Some(next) = connector.next_cursor(&page, cursor.as_deref(), items_seen) {
            ctx.cursors.set_cursor(source, &next).await?;
            cursor_advanced = true;
        }
    }

    info!(items_seen, items_written, items_skipped, cursor_advanced, "connector finished");
    Ok(ConnectorOutcome::Succeeded {
        items_seen,
        items_written,
        items_skipped,
        cursor_advanced,
    })
}

/// Wall-clock milliseconds, saturating.
pub(crate) fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
