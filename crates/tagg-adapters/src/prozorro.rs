//! Prozorro (Ukraine) public tender feed.
//!
//! The feed is ordered by modification time and hands back an opaque offset under
//! `next_page`, so the cursor simply follows it.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tagg_core::UNTITLED_PLACEHOLDER;
use tagg_storage::{FetchRequest, FetchedJson};

use crate::mapping::{FieldRule, MappingTable, PathSeg};
use crate::{items_under, ConnectorError, ConnectorSettings, SourceConnector};

pub const PROZORRO_MAPPING: MappingTable = MappingTable {
    source_id: FieldRule::paths(&[&[PathSeg::Key("tenderID")], &[PathSeg::Key("id")]]),
    title: FieldRule::paths(&[&[PathSeg::Key("title_en")], &[PathSeg::Key("title")]])
        .or_default(UNTITLED_PLACEHOLDER),
    description: FieldRule::paths(&[&[PathSeg::Key("description_en")], &[PathSeg::Key("description")]]),
    buyer: FieldRule::paths(&[
        &[PathSeg::Key("procuringEntity"), PathSeg::Key("name_en")],
        &[PathSeg::Key("procuringEntity"), PathSeg::Key("name")],
    ]),
    country: FieldRule::paths(&[&[
        PathSeg::Key("procuringEntity"),
        PathSeg::Key("address"),
        PathSeg::Key("countryName"),
    ]])
    .or_default("Україна"),
    publication_date: FieldRule::paths(&[&[PathSeg::Key("date")], &[PathSeg::Key("dateCreated")]]),
    deadline: FieldRule::paths(&[&[PathSeg::Key("tenderPeriod"), PathSeg::Key("endDate")]]),
    raw_url: FieldRule::NONE,
    raw_url_template: Some("https://prozorro.gov.ua/tender/{source_id}"),
};

const ENDPOINT: &str = "https://public.api.openprocurement.org/api/2.5/tenders";

const OPT_FIELDS: &str = "tenderID,title,title_en,description,description_en,procuringEntity,\
                          date,dateCreated,tenderPeriod";

#[derive(Debug, Clone)]
pub struct ProzorroConnector {
    endpoint: String,
    page_size: u32,
}

impl ProzorroConnector {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self {
            endpoint: settings.endpoint_or(ENDPOINT),
            page_size: settings.page_size_or(100),
        }
    }
}

impl SourceConnector for ProzorroConnector {
    fn source(&self) -> &str {
        "prozorro"
    }

    fn mapping(&self) -> &MappingTable {
        &PROZORRO_MAPPING
    }

    fn build_request(&self, cursor: Option<&str>, _now: DateTime<Utc>) -> Result<FetchRequest, ConnectorError> {
        let mut request = FetchRequest::get(&self.endpoint)
            .with_query("opt_fields", OPT_FIELDS)
            .with_query("limit", self.page_size.to_string());
        if let Some(offset) = cursor {
            request = request.with_query("offset", offset);
        }
        Ok(request)
    }

    fn extract_items<'a>(&self, body: &'a JsonValue) -> Result<&'a [JsonValue], ConnectorError> {
        items_under(body, &["data"])
    }

    fn next_cursor(&self, page: &FetchedJson, cursor: Option<&str>, items_seen: usize) -> Option<String> {
        if items_seen == 0 {
            return None;
        }
        let offset = match page.body.pointer("/next_page/offset")? {
            JsonValue::String(s) => s.trim().to_string(),
            JsonValue::Number(n) => n.to_string(),
            _ => return None,
        };
        (!offset.is_empty() && Some(offset.as_str()) != cursor).then_some(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::assert_matches_snapshot;
    use serde_json::json;

    #[test]
    fn offset_follows_next_page_while_items_arrive() {
        let connector = ProzorroConnector::new(ConnectorSettings::default());
        assert_eq!(connector.build_request(None, Utc::now()).unwrap().query_value("offset"), None);
        assert_eq!(
            connector
                .build_request(Some("1709251200.123"), Utc::now())
                .unwrap()
                .query_value("offset"),
            Some("1709251200.123")
        );

        let page = FetchedJson::ok(json!({"data": [{}], "next_page": {"offset": 1709337600.5}}));
        assert_eq!(connector.next_cursor(&page, None, 1).as_deref(), Some("1709337600.5"));
        assert_eq!(connector.next_cursor(&page, None, 0), None);
    }

    #[test]
    fn sample_matches_snapshot() {
        let connector = ProzorroConnector::new(ConnectorSettings::default());
        assert_matches_snapshot(&connector, "prozorro");
    }
}
