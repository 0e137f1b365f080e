//! TED (Tenders Electronic Daily) v3 notice search.
//!
//! The search endpoint is a POST with an expert query; paging uses the iteration token
//! the API returns alongside each page.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value as JsonValue};
use tagg_core::UNTITLED_PLACEHOLDER;
use tagg_storage::{FetchRequest, FetchedJson};

use crate::mapping::{FieldRule, MappingTable, PathSeg};
use crate::{items_under, live_cursor, windowed_continuation, ConnectorError, ConnectorSettings, SourceConnector};

pub const TED_MAPPING: MappingTable = MappingTable {
    source_id: FieldRule::paths(&[&[PathSeg::Key("publication-number")]]),
    title: FieldRule::paths(&[
        &[PathSeg::Key("notice-title"), PathSeg::Key("eng")],
        &[PathSeg::Key("notice-title"), PathSeg::AnyValue],
    ])
    .or_default(UNTITLED_PLACEHOLDER),
    description: FieldRule::paths(&[
        &[PathSeg::Key("description-proc"), PathSeg::Key("eng")],
        &[PathSeg::Key("description-proc"), PathSeg::AnyValue],
    ]),
    buyer: FieldRule::paths(&[
        &[PathSeg::Key("buyer-name"), PathSeg::Key("eng")],
        &[PathSeg::Key("buyer-name"), PathSeg::AnyValue],
    ]),
    country: FieldRule::paths(&[&[PathSeg::Key("buyer-country")]]),
    publication_date: FieldRule::paths(&[&[PathSeg::Key("publication-date")]]),
    deadline: FieldRule::paths(&[&[PathSeg::Key("deadline-receipt-tender-date-lot")]]),
    raw_url: FieldRule::paths(&[
        &[PathSeg::Key("links"), PathSeg::Key("html"), PathSeg::Key("ENG")],
        &[PathSeg::Key("links"), PathSeg::Key("html"), PathSeg::AnyValue],
    ]),
    raw_url_template: Some("https://ted.europa.eu/en/notice/-/detail/{source_id}"),
};

const ENDPOINT: &str = "https://api.ted.europa.eu/v3/notices/search";

const FIELDS: &[&str] = &[
    "publication-number",
    "notice-title",
    "description-proc",
    "buyer-name",
    "buyer-country",
    "publication-date",
    "deadline-receipt-tender-date-lot",
];

const LOOKBACK_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct TedConnector {
    endpoint: String,
    page_size: u32,
}

impl TedConnector {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self {
            endpoint: settings.endpoint_or(ENDPOINT),
            page_size: settings.page_size_or(100),
        }
    }

    fn expert_query(now: DateTime<Utc>) -> String {
        let since = now - ChronoDuration::days(LOOKBACK_DAYS);
        format!("publication-date>={} SORT BY publication-date DESC", since.format("%Y%m%d"))
    }
}

impl SourceConnector for TedConnector {
    fn source(&self) -> &str {
        "ted_eu"
    }

    fn mapping(&self) -> &MappingTable {
        &TED_MAPPING
    }

    fn build_request(&self, cursor: Option<&str>, now: DateTime<Utc>) -> Result<FetchRequest, ConnectorError> {
        let mut body = json!({
            "query": Self::expert_query(now),
            "fields": FIELDS,
            "limit": self.page_size,
            "paginationMode": "ITERATION",
        });
        if let (Some(token), Some(obj)) = (live_cursor(cursor), body.as_object_mut()) {
            obj.insert("iterationNextToken".into(), JsonValue::String(token.to_string()));
        }
        Ok(FetchRequest::post_json(&self.endpoint, body))
    }

    fn extract_items<'a>(&self, body: &'a JsonValue) -> Result<&'a [JsonValue], ConnectorError> {
        items_under(body, &["notices"])
    }

    /// Iteration tokens are bound to the query that issued them; an exhausted
    /// iteration restarts with a fresh query.
    fn next_cursor(&self, page: &FetchedJson, cursor: Option<&str>, _items_seen: usize) -> Option<String> {
        let next = page
            .body
            .get("iterationNextToken")
            .and_then(JsonValue::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        windowed_continuation(next, cursor)
    }
}
