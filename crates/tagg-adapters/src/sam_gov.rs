//! SAM.gov contract opportunities (v2). Requires an API key.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::Value as JsonValue;
use tagg_core::UNTITLED_PLACEHOLDER;
use tagg_storage::{FetchRequest, FetchedJson};

use crate::mapping::{FieldRule, MappingTable, PathSeg};
use crate::{
    items_under, json_count, next_offset, ConnectorError, ConnectorSettings, Readiness, SourceConnector,
};

pub const SAM_GOV_MAPPING: MappingTable = MappingTable {
    source_id: FieldRule::paths(&[&[PathSeg::Key("noticeId")], &[PathSeg::Key("solicitationNumber")]]),
    title: FieldRule::paths(&[&[PathSeg::Key("title")]]).or_default(UNTITLED_PLACEHOLDER),
    // `description` in this API is a link to a separate endpoint, not text.
    description: FieldRule::NONE,
    buyer: FieldRule::paths(&[&[PathSeg::Key("fullParentPathName")], &[PathSeg::Key("department")]]),
    country: FieldRule::paths(&[
        &[PathSeg::Key("placeOfPerformance"), PathSeg::Key("country"), PathSeg::Key("name")],
        &[PathSeg::Key("placeOfPerformance"), PathSeg::Key("country"), PathSeg::Key("code")],
        &[PathSeg::Key("officeAddress"), PathSeg::Key("countryCode")],
    ]),
    publication_date: FieldRule::paths(&[&[PathSeg::Key("postedDate")]]),
    deadline: FieldRule::paths(&[&[PathSeg::Key("responseDeadLine")]]),
    raw_url: FieldRule::paths(&[&[PathSeg::Key("uiLink")]]),
    raw_url_template: Some("https://sam.gov/opp/{source_id}/view"),
};

const ENDPOINT: &str = "https://api.sam.gov/opportunities/v2/search";
const CREDENTIAL_ENV: &str = "SAM_GOV_API_KEY";
const LOOKBACK_DAYS: i64 = 7;
const MAX_DEPTH: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct SamGovConnector {
    endpoint: String,
    page_size: u32,
    api_key: Option<String>,
    missing_reason: String,
}

impl SamGovConnector {
    pub fn new(settings: ConnectorSettings) -> Self {
        Self {
            endpoint: settings.endpoint_or(ENDPOINT),
            page_size: settings.page_size_or(100),
            api_key: settings.credential().map(str::to_string),
            missing_reason: settings.missing_credential_reason(CREDENTIAL_ENV),
        }
    }
}

impl SourceConnector for SamGovConnector {
    fn source(&self) -> &str {
        "sam_gov"
    }

    fn mapping(&self) -> &MappingTable {
        &SAM_GOV_MAPPING
    }

    fn readiness(&self) -> Readiness {
        match self.api_key {
            Some(_) => Readiness::Ready,
            None => Readiness::Skip(self.missing_reason.clone()),
        }
    }

    fn build_request(&self, cursor: Option<&str>, now: DateTime<Utc>) -> Result<FetchRequest, ConnectorError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ConnectorError::ConfigMissing(self.missing_reason.clone()))?;
        let from = now - ChronoDuration::days(LOOKBACK_DAYS);
        Ok(FetchRequest::get(&self.endpoint)
            .with_query("api_key", api_key)
            .with_query("postedFrom", from.format("%m/%d/%Y").to_string())
            .with_query("postedTo", now.format("%m/%d/%Y").to_string())
            .with_query("limit", self.page_size.to_string())
            .with_query("offset", cursor.unwrap_or("0")))
    }

    fn extract_items<'a>(&self, body: &'a JsonValue) -> Result<&'a [JsonValue], ConnectorError> {
        items_under(body, &["opportunitiesData"])
    }

    fn next_cursor(&self, page: &FetchedJson, cursor: Option<&str>, items_seen: usize) -> Option<String> {
        next_offset(cursor, items_seen, json_count(page.body.get("totalRecords")), MAX_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::assert_matches_snapshot;
    use chrono::TimeZone;
    use serde_json::json;

    fn keyed() -> SamGovConnector {
        SamGovConnector::new(ConnectorSettings {
            credential_env: Some("SAM_GOV_API_KEY".into()),
            credential: Some("k-123".into()),
            ..Default::default()
        })
    }

    #[test]
    fn missing_key_skips_with_env_name() {
        let connector = SamGovConnector::new(ConnectorSettings {
            credential: Some("   ".into()),
            ..Default::default()
        });
        assert_eq!(
            connector.readiness(),
            Readiness::Skip("SAM_GOV_API_KEY is not set".into())
        );
        assert!(matches!(
            connector.build_request(None, Utc::now()),
            Err(ConnectorError::ConfigMissing(_))
        ));
    }

    #[test]
    fn request_carries_key_window_and_offset() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).single().unwrap();
        let request = keyed().build_request(Some("100"), now).unwrap();
        assert_eq!(request.query_value("api_key"), Some("k-123"));
        assert_eq!(request.query_value("postedFrom"), Some("03/03/2026"));
        assert_eq!(request.query_value("postedTo"), Some("03/10/2026"));
        assert_eq!(request.query_value("offset"), Some("100"));
    }

    #[test]
    fn offset_stops_at_total_records() {
        let connector = keyed();
        let page = FetchedJson::ok(json!({"totalRecords": 150, "opportunitiesData": []}));
        assert_eq!(connector.next_cursor(&page, None, 100).as_deref(), Some("100"));
        assert_eq!(connector.next_cursor(&page, Some("100"), 50).as_deref(), Some("0"));
    }

    #[test]
    fn sample_matches_snapshot() {
        assert_matches_snapshot(&keyed(), "sam_gov");
    }
}
