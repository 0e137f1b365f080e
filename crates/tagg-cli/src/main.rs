use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tagg_adapters::Readiness;
use tagg_core::TenderKey;
use tagg_storage::{MemoryStore, PgStore, TenderOrder, TenderQuery, TenderReader};
use tagg_sync::{build_orchestrator, IngestConfig, IngestContext, SourceRegistry};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "tagg-cli")]
#[command(about = "Public procurement tender aggregator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingestion cycle across every enabled source.
    Ingest {
        /// Keep results in memory instead of Postgres.
        #[arg(long)]
        dry_run: bool,
    },
    /// Run ingestion cycles on the configured cron expression until Ctrl-C.
    Schedule,
    /// Create the tender, cursor, and run tables.
    InitDb,
    Search {
        #[arg(long)]
        q: Option<String>,
        #[arg(long)]
        country: Option<String>,
        #[arg(long, value_enum, default_value_t = OrderArg::Published)]
        order: OrderArg,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Print one tender by record id or `source:source_id`.
    Show { id: String },
    /// List the source registry and whether each connector can run.
    Sources,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OrderArg {
    Published,
    Deadline,
}

impl From<OrderArg> for TenderOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Published => TenderOrder::PublicationDesc,
            OrderArg::Deadline => TenderOrder::DeadlineAsc,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_logs = std::env::var("TAGG_LOG_JSON").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().compact().with_writer(std::io::stderr)).init();
    }
}

async fn connect_store(config: &IngestConfig) -> Result<PgStore> {
    let database_url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is not set")?;
    PgStore::connect(database_url)
        .await
        .context("connecting to postgres")
}

fn parse_lookup(id: &str) -> Result<Lookup> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return Ok(Lookup::Id(uuid));
    }
    match id.split_once(':') {
        Some((source, source_id)) if !source.is_empty() && !source_id.is_empty() => {
            Ok(Lookup::Key(TenderKey::new(source, source_id)))
        }
        _ => bail!("expected a record uuid or `source:source_id`, got `{id}`"),
    }
}

#[derive(Debug, PartialEq)]
enum Lookup {
    Id(Uuid),
    Key(TenderKey),
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = IngestConfig::from_env();

    match cli.command.unwrap_or(Commands::Ingest { dry_run: false }) {
        Commands::Ingest { dry_run } => {
            let ctx = if dry_run {
                info!("dry run: records stay in memory");
                IngestContext::from_config_with_store(&config, Arc::new(MemoryStore::new()))?
            } else {
                IngestContext::from_config(&config).await?
            };
            let orchestrator = build_orchestrator(&config, ctx).await?;
            let summary = orchestrator.run_once().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Schedule => {
            tagg_sync::run_scheduler_from_env().await?;
        }
        Commands::InitDb => {
            let store = connect_store(&config).await?;
            store.ensure_schema().await.context("ensuring tender schema")?;
            println!("schema ready");
        }
        Commands::Search {
            q,
            country,
            order,
            limit,
            offset,
        } => {
            let store = connect_store(&config).await?;
            let query = TenderQuery {
                text: q,
                country,
                order: order.into(),
                limit,
                offset,
            };
            let records = store.search(&query).await.context("searching tenders")?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Show { id } => {
            let lookup = parse_lookup(&id)?;
            let store = connect_store(&config).await?;
            let record = match &lookup {
                Lookup::Id(uuid) => store.get_by_id(*uuid).await,
                Lookup::Key(key) => store.get_by_key(key).await,
            }
            .context("loading tender")?;
            match record {
                Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                None => bail!("no tender found for `{id}`"),
            }
        }
        Commands::Sources => {
            let registry = SourceRegistry::load_or_builtin(&config.sources_file).await?;
            let listing: Vec<_> = registry
                .sources
                .iter()
                .map(|entry| {
                    let readiness = if entry.enabled {
                        match entry.build_connector().readiness() {
                            Readiness::Ready => json!({"status": "ready"}),
                            Readiness::Skip(reason) => json!({"status": "skip", "reason": reason}),
                        }
                    } else {
                        json!({"status": "disabled"})
                    };
                    json!({
                        "source": entry.source,
                        "display_name": entry.display_name,
                        "enabled": entry.enabled,
                        "kind": entry.kind,
                        "readiness": readiness,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_accepts_uuid_or_source_key() {
        let uuid = Uuid::new_v4();
        assert_eq!(parse_lookup(&uuid.to_string()).unwrap(), Lookup::Id(uuid));
        assert_eq!(
            parse_lookup("world_bank:sha256:abc").unwrap(),
            Lookup::Key(TenderKey::new("world_bank", "sha256:abc"))
        );
        assert!(parse_lookup("no-separator").is_err());
        assert!(parse_lookup(":R1").is_err());
    }

    #[test]
    fn cli_defaults_to_ingest() {
        let cli = Cli::try_parse_from(["tagg-cli"]).unwrap();
        assert!(cli.command.is_none());
        let cli = Cli::try_parse_from(["tagg-cli", "search", "--order", "deadline", "--limit", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Search { order: OrderArg::Deadline, limit: 5, .. })
        ));
    }
}
