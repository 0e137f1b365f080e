//! Source connector contracts and the per-source implementations.
//!
//! A connector is pure: it describes the request for one page, finds the item
//! container in the decoded body, maps items through its [`MappingTable`], and reads
//! the continuation token. Fetching, enrichment, and persistence are driven by
//! `tagg-sync` so that every connector shares one transport and one sink.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tagg_core::{CanonicalTender, TenderError};
use tagg_storage::{FetchError, FetchRequest, FetchedJson, StoreError};
use thiserror::Error;

pub mod mapping;
pub mod mercado_publico;
pub mod ocds;
pub mod placeholder;
pub mod prozorro;
pub mod sam_gov;
pub mod ted;
pub mod world_bank;

pub use mapping::{FieldPath, FieldRule, MappingTable, PathSeg, Resolved};
pub use mercado_publico::MercadoPublicoConnector;
pub use ocds::OcdsConnector;
pub use placeholder::PlaceholderConnector;
pub use prozorro::ProzorroConnector;
pub use sam_gov::SamGovConnector;
pub use ted::TedConnector;
pub use world_bank::WorldBankConnector;

pub const CRATE_NAME: &str = "tagg-adapters";

/// Whether a connector can run this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Readiness {
    Ready,
    Skip(String),
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("missing configuration: {0}")]
    ConfigMissing(String),
    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(#[from] FetchError),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("store write failed: {0}")]
    StoreWrite(#[from] StoreError),
}

impl ConnectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectorError::ConfigMissing(_) => ErrorKind::ConfigMissing,
            ConnectorError::UpstreamFetch(_) => ErrorKind::UpstreamFetch,
            ConnectorError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            ConnectorError::StoreWrite(_) => ErrorKind::StoreWrite,
        }
    }
}

/// Failure class reported per connector in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigMissing,
    UpstreamFetch,
    MalformedResponse,
    StoreWrite,
    Timeout,
    Panicked,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::ConfigMissing => "config_missing",
            ErrorKind::UpstreamFetch => "upstream_fetch",
            ErrorKind::MalformedResponse => "malformed_response",
            ErrorKind::StoreWrite => "store_write",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Panicked => "panicked",
        };
        f.write_str(label)
    }
}

/// Result of one connector's turn in an ingestion cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConnectorOutcome {
    Succeeded {
        items_seen: usize,
        items_written: usize,
        items_skipped: usize,
        cursor_advanced: bool,
    },
    Skipped {
        reason: String,
    },
    Failed {
        source: String,
        kind: ErrorKind,
        error: String,
    },
}

impl ConnectorOutcome {
    pub fn failed(source: &str, err: &ConnectorError) -> Self {
        ConnectorOutcome::Failed {
            source: source.to_string(),
            kind: err.kind(),
            error: err.to_string(),
        }
    }

    pub fn items_written(&self) -> usize {
        match self {
            ConnectorOutcome::Succeeded { items_written, .. } => *items_written,
            _ => 0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectorOutcome::Succeeded { .. } => "succeeded",
            ConnectorOutcome::Skipped { .. } => "skipped",
            ConnectorOutcome::Failed { .. } => "failed",
        }
    }
}

pub trait SourceConnector: Send + Sync + fmt::Debug {
    fn source(&self) -> &str;

    fn mapping(&self) -> &MappingTable;

    fn readiness(&self) -> Readiness {
        Readiness::Ready
    }

    fn supports_cursor(&self) -> bool {
        true
    }

    /// Request for one page. `None` asks for the source's default window.
    fn build_request(&self, cursor: Option<&str>, now: DateTime<Utc>) -> Result<FetchRequest, ConnectorError>;

    fn extract_items<'a>(&self, body: &'a JsonValue) -> Result<&'a [JsonValue], ConnectorError>;

    fn map_item(&self, raw: &JsonValue) -> Result<CanonicalTender, TenderError> {
        self.mapping().map(self.source(), raw)
    }

    fn next_cursor(&self, page: &FetchedJson, cursor: Option<&str>, items_seen: usize) -> Option<String>;
}

/// Registry entry fields a connector is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectorSettings {
    pub endpoint: Option<String>,
    pub page_size: Option<u32>,
    /// Name of the environment variable holding the credential, for skip messages.
    pub credential_env: Option<String>,
    pub credential: Option<String>,
}

impl ConnectorSettings {
    pub(crate) fn page_size_or(&self, default: u32) -> u32 {
        self.page_size.filter(|n| *n > 0).unwrap_or(default)
    }

    pub(crate) fn endpoint_or(&self, default: &str) -> String {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or(default)
            .to_string()
    }

    pub(crate) fn credential(&self) -> Option<&str> {
        self.credential.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }

    pub(crate) fn missing_credential_reason(&self, fallback_env: &str) -> String {
        format!(
            "{} is not set",
            self.credential_env.as_deref().unwrap_or(fallback_env)
        )
    }
}

/// Builds the connector registered under `source`, or a generic one for `kind`.
pub fn connector_for_source(
    source: &str,
    kind: Option<&str>,
    settings: ConnectorSettings,
) -> Option<Arc<dyn SourceConnector>> {
    let connector: Arc<dyn SourceConnector> = match source {
        "fts_uk" => Arc::new(OcdsConnector::fts_uk(settings)),
        "contracts_finder" => Arc::new(OcdsConnector::contracts_finder(settings)),
        "austender" => Arc::new(OcdsConnector::austender(settings)),
        "world_bank" => Arc::new(WorldBankConnector::new(settings)),
        "ted_eu" => Arc::new(TedConnector::new(settings)),
        "sam_gov" => Arc::new(SamGovConnector::new(settings)),
        "prozorro" => Arc::new(ProzorroConnector::new(settings)),
        "mercado_publico" => Arc::new(MercadoPublicoConnector::new(settings)),
        "ungm" | "afdb" => Arc::new(PlaceholderConnector::new(source)),
        _ => match kind {
            Some("ocds") => Arc::new(OcdsConnector::generic(source, settings)),
            Some("placeholder") => Arc::new(PlaceholderConnector::new(source)),
            _ => return None,
        },
    };
    Some(connector)
}

/// First array found under one of `keys`, or a malformed-response error naming them.
pub(crate) fn items_under<'a>(body: &'a JsonValue, keys: &[&str]) -> Result<&'a [JsonValue], ConnectorError> {
    keys.iter()
        .find_map(|key| body.get(*key).and_then(JsonValue::as_array))
        .map(Vec::as_slice)
        .ok_or_else(|| {
            ConnectorError::MalformedResponse(format!("expected an array under `{}`", keys.join("` or `")))
        })
}

/// Stored by windowed sources once their window has no further pages. Read back as
/// "no cursor", so the next cycle opens a fresh window.
pub const RESTART_TOKEN: &str = "";

/// A stored cursor, or `None` when absent or [`RESTART_TOKEN`].
pub(crate) fn live_cursor(cursor: Option<&str>) -> Option<&str> {
    cursor.map(str::trim).filter(|c| !c.is_empty())
}

/// Continuation for a source whose tokens are bound to one time window: the next
/// token when there is one, else a restart if a token from the old window is stored.
pub(crate) fn windowed_continuation(next: Option<String>, cursor: Option<&str>) -> Option<String> {
    let cursor = live_cursor(cursor);
    match next {
        Some(token) if Some(token.as_str()) != cursor => Some(token),
        Some(_) => None,
        None => cursor.map(|_| RESTART_TOKEN.to_string()),
    }
}

/// Offset paging with wrap-around.
///
/// Advances by the number of items seen. Once the window is exhausted (empty page,
/// `total` reached, or `max_depth` reached) the token goes back to `0` so the next
/// cycle restarts at the newest notices; a single-page window leaves the cursor alone.
pub(crate) fn next_offset(cursor: Option<&str>, items_seen: usize, total: Option<u64>, max_depth: u64) -> Option<String> {
    let current = cursor.and_then(|c| c.trim().parse::<u64>().ok()).unwrap_or(0);
    let next = current + items_seen as u64;
    let exhausted = items_seen == 0 || total.is_some_and(|t| next >= t) || next >= max_depth;
    if !exhausted {
        return Some(next.to_string());
    }
    (current > 0).then(|| "0".to_string())
}

/// Reads a count that some APIs send as a number and others as a string.
pub(crate) fn json_count(value: Option<&JsonValue>) -> Option<u64> {
    match value? {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs;
    use std::path::{Path, PathBuf};

    use serde_json::Value as JsonValue;
    use tagg_core::CanonicalTender;

    use crate::SourceConnector;

    pub fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn sample_path(source: &str, file: &str) -> PathBuf {
        workspace_root().join("fixtures").join(source).join("sample").join(file)
    }

    pub fn read_sample(source: &str, file: &str) -> JsonValue {
        let path = sample_path(source, file);
        let text = fs::read_to_string(&path).unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
        serde_json::from_str(&text).unwrap_or_else(|e| panic!("parse {}: {e}", path.display()))
    }

    /// Maps the fixture page and compares it to the golden snapshot next to it.
    pub fn assert_matches_snapshot(connector: &dyn SourceConnector, fixture_dir: &str) {
        let page = read_sample(fixture_dir, "page.json");
        let expected: Vec<CanonicalTender> =
            serde_json::from_value(read_sample(fixture_dir, "snapshot.json")).expect("snapshot shape");
        let actual = connector
            .extract_items(&page)
            .expect("items")
            .iter()
            .map(|raw| connector.map_item(raw).expect("mappable item"))
            .collect::<Vec<_>>();
        assert_eq!(actual, expected);
    }
}
