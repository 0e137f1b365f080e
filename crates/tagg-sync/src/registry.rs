//! YAML source registry: which connectors run, and the endpoint/credential settings
//! each is built with.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tagg_adapters::{connector_for_source, ConnectorSettings, PlaceholderConnector, SourceConnector};
use tokio::fs;
use tracing::{info, warn};

const BUILTIN_SOURCES: &str = include_str!("../../../sources.yaml");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source: String,
    pub display_name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub credential_env: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

fn enabled_by_default() -> bool {
    true
}

impl SourceRegistry {
    /// Registry compiled into the binary from the repository's `sources.yaml`.
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_SOURCES, "built-in sources.yaml")
    }

    pub fn parse(text: &str, origin: &str) -> Result<Self> {
        let registry: SourceRegistry =
            serde_yaml::from_str(text).with_context(|| format!("parsing {origin}"))?;
        registry.validate().with_context(|| format!("validating {origin}"))?;
        Ok(registry)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Loads `path` when it exists, otherwise the built-in registry.
    pub async fn load_or_builtin(path: &Path) -> Result<Self> {
        if fs::try_exists(path).await.unwrap_or(false) {
            return Self::load(path).await;
        }
        info!(path = %path.display(), "source registry file not found; using built-in registry");
        Self::builtin()
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.source.trim().is_empty() {
                bail!("source entry with empty name");
            }
            if !seen.insert(source.source.as_str()) {
                bail!("duplicate source `{}`", source.source);
            }
        }
        Ok(())
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }

    pub fn get(&self, source: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.source == source)
    }

    /// One connector per enabled entry. Entries no connector understands run as
    /// placeholders so they show up as skipped instead of vanishing.
    pub fn build_connectors(&self) -> Vec<Arc<dyn SourceConnector>> {
        self.enabled().map(SourceConfig::build_connector).collect()
    }
}

impl SourceConfig {
    pub fn settings(&self) -> ConnectorSettings {
        self.settings_with(|key| std::env::var(key).ok())
    }

    pub fn settings_with(&self, lookup: impl Fn(&str) -> Option<String>) -> ConnectorSettings {
        ConnectorSettings {
            endpoint: self.endpoint.clone(),
            page_size: self.page_size,
            credential_env: self.credential_env.clone(),
            credential: self.credential_env.as_deref().and_then(|key| lookup(key)),
        }
    }

    pub fn build_connector(&self) -> Arc<dyn SourceConnector> {
        self.build_connector_with(self.settings())
    }

    pub fn build_connector_with(&self, settings: ConnectorSettings) -> Arc<dyn SourceConnector> {
        connector_for_source(&self.source, self.kind.as_deref(), settings).unwrap_or_else(|| {
            warn!(source = %self.source, kind = ?self.kind, "no connector registered; treating as placeholder");
            Arc::new(PlaceholderConnector::new(self.source.clone()))
        })
    }
}
