//! World Bank procurement notices (search API v2), offset paged.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tagg_core::UNTITLED_PLACEHOLDER;
use tagg_storage::{FetchRequest, FetchedJson};

use crate::mapping::{FieldRule, MappingTable, PathSeg};
use crate::{items_under, json_count, next_offset, ConnectorError, ConnectorSettings, SourceConnector};

pub const WORLD_BANK_MAPPING: MappingTable = MappingTable {
    source_id: FieldRule::paths(&[&[PathSeg::Key("id")]]),
    title: FieldRule::paths(&[&[PathSeg::Key("bid_description")], &[PathSeg::Key("project_name")]])
        .or_default(UNTITLED_PLACEHOLDER),
    description: FieldRule::paths(&[&[PathSeg::Key("notice_text")]]),
    buyer: FieldRule::paths(&[&[PathSeg::Key("contact_organization")], &[PathSeg::Key("borrower")]]),
    country: FieldRule::paths(&[&[PathSeg::Key("project_ctry_name")], &[PathSeg::Key("countryshortname")]]),
    publication_date: FieldRule::paths(&[&[PathSeg::Key("noticedate")], &[PathSeg::Key("submission_date")]]),
    deadline: FieldRule::paths(&[&[PathSeg::Key("submission_deadline_date")]]),
    raw_url: FieldRule::paths(&[&[PathSeg::Key("url")]]),
    raw_url_template: Some("https://projects.worldbank.org/en/projects-operations/procurement-detail/{source_id}"),
};

const ENDPOINT: &str = "https://search.worldbank.org/api/v2/procnotices";

/// Offsets beyond this wrap back to the newest notices.
const MAX_DEPTH: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct WorldBankConnector {
    endpoint: String,
    page_size: u32,
}

impl WorldBankConnector {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self {
            endpoint: settings.endpoint_or(ENDPOINT),
            page_size: settings.page_size_or(50),
        }
    }
}

impl SourceConnector for WorldBankConnector {
    fn source(&self) -> &str {
        "world_bank"
    }

    fn mapping(&self) -> &MappingTable {
        &WORLD_BANK_MAPPING
    }

    fn build_request(&self, cursor: Option<&str>, _now: DateTime<Utc>) -> Result<FetchRequest, ConnectorError> {
        Ok(FetchRequest::get(&self.endpoint)
            .with_query("format", "json")
            .with_query("srt", "noticedate")
            .with_query("order", "desc")
            .with_query("rows", self.page_size.to_string())
            .with_query("os", cursor.unwrap_or("0")))
    }

    fn extract_items<'a>(&self, body: &'a JsonValue) -> Result<&'a [JsonValue], ConnectorError> {
        items_under(body, &["procnotices"])
    }

    fn next_cursor(&self, page: &FetchedJson, cursor: Option<&str>, items_seen: usize) -> Option<String> {
        next_offset(cursor, items_seen, json_count(page.body.get("total")), MAX_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::assert_matches_snapshot;
    use serde_json::json;

    #[test]
    fn offset_is_sent_and_advanced_by_page_length() {
        let connector = WorldBankConnector::new(ConnectorSettings {
            page_size: Some(2),
            ..Default::default()
        });
        let first = connector.build_request(None, Utc::now()).unwrap();
        assert_eq!(first.query_value("os"), Some("0"));
        assert_eq!(first.query_value("rows"), Some("2"));

        let page = FetchedJson::ok(json!({"total": "5", "procnotices": [{}, {}]}));
        assert_eq!(connector.next_cursor(&page, None, 2).as_deref(), Some("2"));
        assert_eq!(connector.next_cursor(&page, Some("2"), 2).as_deref(), Some("4"));
        assert_eq!(connector.next_cursor(&page, Some("4"), 1).as_deref(), Some("0"));

        let second = connector.build_request(Some("4"), Utc::now()).unwrap();
        assert_eq!(second.query_value("os"), Some("4"));
    }

    #[test]
    fn sample_matches_snapshot() {
        let connector = WorldBankConnector::new(ConnectorSettings::default());
        assert_matches_snapshot(&connector, "world_bank");
    }
}
