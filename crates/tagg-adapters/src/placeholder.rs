use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tagg_storage::{FetchRequest, FetchedJson};

use crate::mapping::MappingTable;
use crate::{ConnectorError, Readiness, SourceConnector};

/// Declared source with no wired upstream. Always skipped, never maps anything.
#[derive(Debug, Clone)]
pub struct PlaceholderConnector {
    source: String,
}

impl PlaceholderConnector {
    pub fn new(source: impl Into<String>) -> Self {
        Self { source: source.into() }
    }
}

impl SourceConnector for PlaceholderConnector {
    fn source(&self) -> &str {
        &self.source
    }

    fn mapping(&self) -> &MappingTable {
        &MappingTable::EMPTY
    }

    fn readiness(&self) -> Readiness {
        Readiness::Skip(format!("{} is a placeholder with no upstream wired", self.source))
    }

    fn supports_cursor(&self) -> bool {
        false
    }

    fn build_request(&self, _cursor: Option<&str>, _now: DateTime<Utc>) -> Result<FetchRequest, ConnectorError> {
        Err(ConnectorError::ConfigMissing(format!("no upstream for {}", self.source)))
    }

    fn extract_items<'a>(&self, _body: &'a JsonValue) -> Result<&'a [JsonValue], ConnectorError> {
        Ok(&[])
    }

    fn next_cursor(&self, _page: &FetchedJson, _cursor: Option<&str>, _items_seen: usize) -> Option<String> {
        None
    }
}
