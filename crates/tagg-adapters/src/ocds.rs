//! OCDS release feeds: Find a Tender, Contracts Finder, AusTender, and any registry
//! entry declared with `kind: ocds`.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Url;
use serde_json::Value as JsonValue;
use tagg_core::UNTITLED_PLACEHOLDER;
use tagg_storage::{FetchRequest, FetchedJson};

use crate::mapping::{FieldRule, MappingTable, PathSeg};
use crate::{
    items_under, live_cursor, windowed_continuation, ConnectorError, ConnectorSettings, Readiness,
    SourceConnector,
};

const BUYER_PARTY: PathSeg = PathSeg::WhereContains {
    field: "roles",
    value: "buyer",
};

pub const OCDS_MAPPING: MappingTable = MappingTable {
    source_id: FieldRule::paths(&[&[PathSeg::Key("id")], &[PathSeg::Key("ocid")]]),
    title: FieldRule::paths(&[&[PathSeg::Key("tender"), PathSeg::Key("title")], &[PathSeg::Key("title")]])
        .or_default(UNTITLED_PLACEHOLDER),
    description: FieldRule::paths(&[
        &[PathSeg::Key("tender"), PathSeg::Key("description")],
        &[PathSeg::Key("description")],
    ]),
    buyer: FieldRule::paths(&[
        &[PathSeg::Key("buyer"), PathSeg::Key("name")],
        &[PathSeg::Key("parties"), BUYER_PARTY, PathSeg::Key("name")],
        &[PathSeg::Key("tender"), PathSeg::Key("procuringEntity"), PathSeg::Key("name")],
    ]),
    country: FieldRule::paths(&[
        &[PathSeg::Key("parties"), BUYER_PARTY, PathSeg::Key("address"), PathSeg::Key("countryName")],
        &[
            PathSeg::Key("tender"),
            PathSeg::Key("procuringEntity"),
            PathSeg::Key("address"),
            PathSeg::Key("countryName"),
        ],
    ]),
    publication_date: FieldRule::paths(&[
        &[PathSeg::Key("date")],
        &[PathSeg::Key("tender"), PathSeg::Key("datePublished")],
    ]),
    deadline: FieldRule::paths(&[&[
        PathSeg::Key("tender"),
        PathSeg::Key("tenderPeriod"),
        PathSeg::Key("endDate"),
    ]]),
    raw_url: FieldRule::NONE,
    raw_url_template: None,
};

pub const FTS_UK_MAPPING: MappingTable = MappingTable {
    raw_url_template: Some("https://www.find-tender.service.gov.uk/Notice/{source_id}"),
    ..OCDS_MAPPING
};

pub const CONTRACTS_FINDER_MAPPING: MappingTable = MappingTable {
    raw_url_template: Some("https://www.contractsfinder.service.gov.uk/Notice/{source_id}"),
    ..OCDS_MAPPING
};

const FTS_UK_ENDPOINT: &str = "https://www.find-tender.service.gov.uk/api/1.0/ocdsReleasePackages";
const CONTRACTS_FINDER_ENDPOINT: &str =
    "https://www.contractsfinder.service.gov.uk/Published/Notices/OCDS/Search";
const AUSTENDER_ENDPOINT: &str =
    "https://api.tenders.gov.au/ocds/findByDates/contractPublished/{from}/{to}";

/// Days covered by `{from}`/`{to}` endpoint windows.
const DEFAULT_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct OcdsConnector {
    source: String,
    endpoint: Option<String>,
    page_size: u32,
    page_size_param: Option<&'static str>,
    cursor_param: &'static str,
    credential: Option<String>,
    mapping: &'static MappingTable,
}

impl OcdsConnector {
    pub fn fts_uk(settings: ConnectorSettings) -> Self {
        Self {
            source: "fts_uk".into(),
            endpoint: Some(settings.endpoint_or(FTS_UK_ENDPOINT)),
            page_size: settings.page_size_or(100),
            page_size_param: Some("limit"),
            cursor_param: "cursor",
            credential: None,
            mapping: &FTS_UK_MAPPING,
        }
    }

    pub fn contracts_finder(settings: ConnectorSettings) -> Self {
        Self {
            source: "contracts_finder".into(),
            endpoint: Some(settings.endpoint_or(CONTRACTS_FINDER_ENDPOINT)),
            page_size: settings.page_size_or(10),
            page_size_param: Some("pageSize"),
            cursor_param: "cursor",
            credential: None,
            mapping: &CONTRACTS_FINDER_MAPPING,
        }
    }

    /// AusTender pages by handing back a complete next URL.
    pub fn austender(settings: ConnectorSettings) -> Self {
        Self {
            source: "austender".into(),
            endpoint: Some(settings.endpoint_or(AUSTENDER_ENDPOINT)),
            page_size: settings.page_size_or(100),
            page_size_param: None,
            cursor_param: "cursor",
            credential: None,
            mapping: &OCDS_MAPPING,
        }
    }

    /// Registry-declared OCDS endpoint. An optional credential is sent as a bearer token.
    pub fn generic(source: &str, settings: ConnectorSettings) -> Self {
        let credential = settings.credential().map(str::to_string);
        Self {
            source: source.to_string(),
            endpoint: settings
                .endpoint
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string),
            page_size: settings.page_size_or(50),
            page_size_param: Some("pageSize"),
            cursor_param: "cursor",
            credential,
            mapping: &OCDS_MAPPING,
        }
    }

    /// Endpoints with `{from}`/`{to}` placeholders page inside one date window, so
    /// their tokens are full next-page URLs that go stale with the window.
    fn is_windowed(&self) -> bool {
        self.endpoint.as_deref().is_some_and(|e| e.contains("{from}"))
    }

    fn window_endpoint(endpoint: &str, now: DateTime<Utc>) -> String {
        let from = now - ChronoDuration::days(DEFAULT_WINDOW_DAYS);
        endpoint
            .replace("{from}", &from.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .replace("{to}", &now.format("%Y-%m-%dT%H:%M:%SZ").to_string())
    }

    /// Value of `cursor_param` in a `links.next` URL, else the whole URL.
    fn token_from_next_link(&self, link: &str) -> String {
        Url::parse(link)
            .ok()
            .and_then(|url| {
                url.query_pairs()
                    .find(|(k, _)| k == self.cursor_param)
                    .map(|(_, v)| v.into_owned())
            })
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| link.to_string())
    }
}

fn is_absolute_url(token: &str) -> bool {
    token.starts_with("https://") || token.starts_with("http://")
}

impl SourceConnector for OcdsConnector {
    fn source(&self) -> &str {
        &self.source
    }

    fn mapping(&self) -> &MappingTable {
        self.mapping
    }

    fn readiness(&self) -> Readiness {
        match self.endpoint {
            Some(_) => Readiness::Ready,
            None => Readiness::Skip(format!("no endpoint configured for {}", self.source)),
        }
    }

    fn build_request(&self, cursor: Option<&str>, now: DateTime<Utc>) -> Result<FetchRequest, ConnectorError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| ConnectorError::ConfigMissing(format!("endpoint for {}", self.source)))?;

        let cursor = live_cursor(cursor);
        let mut request = match cursor {
            Some(token) if is_absolute_url(token) => FetchRequest::get(token),
            _ => {
                let mut request = FetchRequest::get(Self::window_endpoint(endpoint, now));
                if let Some(param) = self.page_size_param {
                    request = request.with_query(param, self.page_size.to_string());
                }
                if let Some(token) = cursor {
                    request = request.with_query(self.cursor_param, token);
                }
                request
            }
        };
        if let Some(credential) = &self.credential {
            request = request.with_header("Authorization", format!("Bearer {credential}"));
        }
        Ok(request)
    }

    fn extract_items<'a>(&self, body: &'a JsonValue) -> Result<&'a [JsonValue], ConnectorError> {
        items_under(body, &["releases"])
    }

    fn next_cursor(&self, page: &FetchedJson, cursor: Option<&str>, _items_seen: usize) -> Option<String> {
        let windowed = self.is_windowed();
        let next = page.header("x-next-cursor").map(|h| h.trim().to_string()).or_else(|| {
            page.body
                .pointer("/links/next")
                .and_then(JsonValue::as_str)
                .map(str::trim)
                .filter(|link| !link.is_empty())
                .map(|link| {
                    if windowed {
                        link.to_string()
                    } else {
                        self.token_from_next_link(link)
                    }
                })
        });
        if windowed {
            return windowed_continuation(next, cursor);
        }
        let token = next?;
        (Some(token.as_str()) != live_cursor(cursor)).then_some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::assert_matches_snapshot;
    use crate::RESTART_TOKEN;
    use chrono::{NaiveDate, TimeZone};
    use serde_json::json;
    use tagg_core::Deadline;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 6, 0, 0).single().unwrap()
    }

    #[test]
    fn fts_release_maps_buyer_country_and_dates() {
        let connector = OcdsConnector::fts_uk(ConnectorSettings::default());
        let body = json!({
            "releases": [{
                "id": "R1",
                "tender": {
                    "title": "Road repair",
                    "description": "Resurface 10km",
                    "tenderPeriod": {"endDate": "2025-01-01"}
                },
                "parties": [{"name": "Ministry", "roles": ["buyer"], "address": {"countryName": "Kenya"}}],
                "date": "2024-01-01"
            }]
        });
        let items = connector.extract_items(&body).unwrap();
        assert_eq!(items.len(), 1);
        let tender = connector.map_item(&items[0]).unwrap();
        assert_eq!(tender.source, "fts_uk");
        assert_eq!(tender.source_id, "R1");
        assert_eq!(tender.title, "Road repair");
        assert_eq!(tender.buyer.as_deref(), Some("Ministry"));
        assert_eq!(tender.country.as_deref(), Some("Kenya"));
        assert_eq!(tender.publication_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(
            tender.deadline,
            Deadline::On(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
        );
        assert_eq!(
            tender.raw_url.as_deref(),
            Some("https://www.find-tender.service.gov.uk/Notice/R1")
        );
    }

    #[test]
    fn fts_cursor_comes_from_next_link_query() {
        let connector = OcdsConnector::fts_uk(ConnectorSettings::default());
        let first = connector.build_request(None, now()).unwrap();
        assert_eq!(first.query_value("limit"), Some("100"));
        assert_eq!(first.query_value("cursor"), None);

        let page = FetchedJson::ok(json!({
            "releases": [],
            "links": {"next": "https://www.find-tender.service.gov.uk/api/1.0/ocdsReleasePackages?cursor=abc%3D&limit=100"}
        }));
        let token = connector.next_cursor(&page, None, 0).unwrap();
        assert_eq!(token, "abc=");

        let second = connector.build_request(Some(&token), now()).unwrap();
        assert_eq!(second.query_value("cursor"), Some("abc="));
        assert_eq!(connector.next_cursor(&page, Some("abc="), 0), None);
    }

    #[test]
    fn contracts_finder_prefers_cursor_header() {
        let connector = OcdsConnector::contracts_finder(ConnectorSettings::default());
        let request = connector.build_request(Some("c-2"), now()).unwrap();
        assert_eq!(request.query_value("pageSize"), Some("10"));
        assert_eq!(request.query_value("cursor"), Some("c-2"));

        let page = FetchedJson::ok(json!({"releases": [], "links": {"next": "https://x.test/?cursor=from-body"}}))
            .with_header("X-Next-Cursor", "from-header");
        assert_eq!(connector.next_cursor(&page, Some("c-2"), 0).as_deref(), Some("from-header"));

        let body_only = FetchedJson::ok(json!({"releases": [], "links": {"next": "https://x.test/?cursor=from-body"}}));
        assert_eq!(connector.next_cursor(&body_only, None, 0).as_deref(), Some("from-body"));
        assert_eq!(connector.next_cursor(&FetchedJson::ok(json!({"releases": []})), None, 0), None);
    }

    #[test]
    fn austender_fills_date_window_and_follows_full_next_url() {
        let connector = OcdsConnector::austender(ConnectorSettings::default());
        let request = connector.build_request(None, now()).unwrap();
        assert_eq!(
            request.url,
            "https://api.tenders.gov.au/ocds/findByDates/contractPublished/2026-03-03T06:00:00Z/2026-03-10T06:00:00Z"
        );
        assert!(request.query.is_empty());

        let next = "https://api.tenders.gov.au/ocds/findByDates/contractPublished/2026-03-03T06:00:00Z/2026-03-10T06:00:00Z?cursor=p2";
        let page = FetchedJson::ok(json!({"releases": [], "links": {"next": next}}));
        let token = connector.next_cursor(&page, None, 0).unwrap();
        assert_eq!(token, next);
        let follow = connector.build_request(Some(&token), now()).unwrap();
        assert_eq!(follow.url, next);
        assert!(follow.query.is_empty());
    }

    #[test]
    fn austender_reopens_a_fresh_window_after_the_last_page() {
        let connector = OcdsConnector::austender(ConnectorSettings::default());
        let stale = "https://api.tenders.gov.au/ocds/findByDates/contractPublished/2020-01-01T00:00:00Z/2020-01-08T00:00:00Z?cursor=p9";
        let last_page = FetchedJson::ok(json!({"releases": [{"id": "AU-1"}]}));

        let token = connector.next_cursor(&last_page, Some(stale), 1).unwrap();
        assert_eq!(token, RESTART_TOKEN);
        let request = connector.build_request(Some(&token), now()).unwrap();
        assert_eq!(
            request.url,
            "https://api.tenders.gov.au/ocds/findByDates/contractPublished/2026-03-03T06:00:00Z/2026-03-10T06:00:00Z"
        );
        assert!(request.query.is_empty());
        assert_eq!(connector.next_cursor(&last_page, Some(&token), 1), None);
    }

    #[test]
    fn generic_ocds_needs_endpoint_and_sends_optional_token() {
        let unconfigured = OcdsConnector::generic("ocds_ke", ConnectorSettings::default());
        assert!(matches!(unconfigured.readiness(), Readiness::Skip(_)));
        assert!(matches!(
            unconfigured.build_request(None, now()),
            Err(ConnectorError::ConfigMissing(_))
        ));

        let configured = OcdsConnector::generic(
            "ocds_ke",
            ConnectorSettings {
                endpoint: Some("https://ocds.example.test/releases".into()),
                page_size: Some(25),
                credential: Some("secret".into()),
                ..Default::default()
            },
        );
        let request = configured.build_request(None, now()).unwrap();
        assert_eq!(request.query_value("pageSize"), Some("25"));
        assert!(request
            .headers
            .contains(&("Authorization".to_string(), "Bearer secret".to_string())));
    }

    #[test]
    fn releases_must_be_an_array() {
        let connector = OcdsConnector::fts_uk(ConnectorSettings::default());
        assert!(matches!(
            connector.extract_items(&json!({"releases": "nope"})),
            Err(ConnectorError::MalformedResponse(_))
        ));
    }

    #[test]
    fn contracts_finder_sample_matches_snapshot() {
        let connector = OcdsConnector::contracts_finder(ConnectorSettings::default());
        assert_matches_snapshot(&connector, "contracts_finder");
    }
}
