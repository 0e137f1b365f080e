//! Canonical tender model shared by every connector, the store, and the sync pipeline.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "tagg-core";

/// Title used when a source offers nothing usable for the notice title.
pub const UNTITLED_PLACEHOLDER: &str = "Untitled tender";

/// Prefix marking a `source_id` derived from the raw payload rather than assigned upstream.
pub const FALLBACK_ID_PREFIX: &str = "sha256:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TenderError {
    #[error("tender from {source_name} has an empty source_id")]
    MissingSourceId { source_name: String },
    #[error("tender has an empty source name")]
    MissingSource,
    #[error("raw item is not a JSON object")]
    NotAnObject,
}

/// Natural key of a stored tender. Exactly one record exists per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TenderKey {
    pub source: String,
    pub source_id: String,
}

impl TenderKey {
    pub fn new(source: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_id: source_id.into(),
        }
    }

    /// Opaque record identifier, stable for the lifetime of the key.
    pub fn record_id(&self) -> Uuid {
        let name = format!("tender:{}:{}", self.source, self.source_id);
        Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
    }
}

impl std::fmt::Display for TenderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.source_id)
    }
}

/// Closing date as reported by the source.
///
/// `Unknown` means the source said nothing; `NoDeadline` means the source carries the
/// deadline field but leaves it empty (open-ended notice).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", content = "date", rename_all = "snake_case")]
pub enum Deadline {
    #[default]
    Unknown,
    NoDeadline,
    On(NaiveDate),
}

impl Deadline {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Deadline::On(date) => Some(*date),
            _ => None,
        }
    }

    /// Same tag the JSON form carries under `status`.
    pub fn status(&self) -> &'static str {
        match self {
            Deadline::Unknown => "unknown",
            Deadline::NoDeadline => "no_deadline",
            Deadline::On(_) => "on",
        }
    }

    /// Rebuilds a deadline from its persisted `(status, date)` columns.
    pub fn from_parts(status: &str, date: Option<NaiveDate>) -> Self {
        match (status, date) {
            (_, Some(date)) => Deadline::On(date),
            ("no_deadline", None) => Deadline::NoDeadline,
            _ => Deadline::Unknown,
        }
    }
}

/// Normalized handoff contract from connectors into the sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalTender {
    pub source: String,
    pub source_id: String,
    pub title: String,
    pub description: String,
    pub buyer: Option<String>,
    pub country: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub deadline: Deadline,
    pub raw_url: Option<String>,
    pub ai_summary: Option<String>,
}

impl CanonicalTender {
    pub fn new(source: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_id: source_id.into(),
            title: UNTITLED_PLACEHOLDER.to_string(),
            description: String::new(),
            buyer: None,
            country: None,
            publication_date: None,
            deadline: Deadline::Unknown,
            raw_url: None,
            ai_summary: None,
        }
    }

    pub fn key(&self) -> TenderKey {
        TenderKey::new(self.source.clone(), self.source_id.clone())
    }

    /// Rejects records that would break the one-row-per-key invariant.
    pub fn validate(&self) -> Result<(), TenderError> {
        if self.source.trim().is_empty() {
            return Err(TenderError::MissingSource);
        }
        if self.source_id.trim().is_empty() {
            return Err(TenderError::MissingSourceId {
                source_name: self.source.clone(),
            });
        }
        Ok(())
    }

    /// Best text to summarize: the description, else a real title, else nothing.
    pub fn summary_text(&self) -> &str {
        if !self.description.trim().is_empty() {
            return &self.description;
        }
        if self.title != UNTITLED_PLACEHOLDER {
            return self.title.trim();
        }
        ""
    }
}

/// A tender as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenderRecord {
    pub id: Uuid,
    #[serde(flatten)]
    pub tender: CanonicalTender,
    pub updated_at: DateTime<Utc>,
}

/// Per-source incremental fetch position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub source: String,
    pub token: String,
    pub updated_at: DateTime<Utc>,
}

/// Deterministic identifier for raw items that carry no upstream id.
///
/// Hashes a key-sorted serialization so that field order in the payload never changes
/// the result.
pub fn fallback_source_id(raw: &JsonValue) -> String {
    let mut canonical = String::new();
    write_canonical_json(raw, &mut canonical);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{FALLBACK_ID_PREFIX}{}", hex::encode(hasher.finalize()))
}

fn write_canonical_json(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String(key.clone()).to_string());
                out.push(':');
                write_canonical_json(&map[key], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_json(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Lenient day-precision date parser for the formats seen across procurement feeds.
pub fn parse_day(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in ["%d/%m/%Y", "%d-%b-%Y", "%d %b %Y", "%b %d, %Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return Some(date);
        }
    }
    // `2024-01-01+01:00`, `2024-01-01Z` and similar date-with-offset forms.
    text.get(..10)
        .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn fallback_id_ignores_key_order() {
        let a = json!({"title": "Road repair", "buyer": {"name": "Ministry", "id": 7}});
        let b = json!({"buyer": {"id": 7, "name": "Ministry"}, "title": "Road repair"});
        assert_eq!(fallback_source_id(&a), fallback_source_id(&b));
        assert!(fallback_source_id(&a).starts_with(FALLBACK_ID_PREFIX));
    }

    #[test]
    fn fallback_id_changes_with_content() {
        let a = json!({"title": "Road repair"});
        let b = json!({"title": "Bridge repair"});
        assert_ne!(fallback_source_id(&a), fallback_source_id(&b));
    }

    #[test]
    fn validate_rejects_blank_source_id() {
        let tender = CanonicalTender::new("world_bank", "  ");
        assert_eq!(
            tender.validate(),
            Err(TenderError::MissingSourceId {
                source_name: "world_bank".into()
            })
        );
        assert!(CanonicalTender::new("world_bank", "OP0001").validate().is_ok());
        assert_eq!(
            CanonicalTender::new("", "OP0001").validate(),
            Err(TenderError::MissingSource)
        );
    }

    #[test]
    fn record_id_is_stable_per_key() {
        let a = TenderKey::new("fts_uk", "R1");
        let b = TenderKey::new("fts_uk", "R1");
        let c = TenderKey::new("contracts_finder", "R1");
        assert_eq!(a.record_id(), b.record_id());
        assert_ne!(a.record_id(), c.record_id());
    }

    #[test]
    fn parse_day_accepts_feed_formats() {
        assert_eq!(parse_day("2025-01-01"), Some(ymd(2025, 1, 1)));
        assert_eq!(parse_day("2024-03-05T10:00:00Z"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_day("2024-03-05T10:00:00-05:00"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_day("2024-03-05T10:00:00"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_day("2024-03-05+01:00"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_day("05/03/2024"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_day("05-Mar-2024"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_day(""), None);
        assert_eq!(parse_day("soon"), None);
    }

    #[test]
    fn deadline_round_trips_through_columns() {
        for deadline in [Deadline::Unknown, Deadline::NoDeadline, Deadline::On(ymd(2025, 1, 1))] {
            assert_eq!(Deadline::from_parts(deadline.status(), deadline.date()), deadline);
        }
    }

    #[test]
    fn column_status_matches_json_tag() {
        for deadline in [Deadline::Unknown, Deadline::NoDeadline, Deadline::On(ymd(2025, 1, 1))] {
            let value = serde_json::to_value(deadline).unwrap();
            assert_eq!(value["status"], deadline.status());
        }
    }

    #[test]
    fn summary_text_prefers_description_then_real_title() {
        let mut tender = CanonicalTender::new("fts_uk", "R1");
        assert_eq!(tender.summary_text(), "");
        tender.title = "Road repair".into();
        assert_eq!(tender.summary_text(), "Road repair");
        tender.description = "Resurfacing of 12km".into();
        assert_eq!(tender.summary_text(), "Resurfacing of 12km");
    }

    #[test]
    fn record_serializes_flat_with_tagged_deadline() {
        let mut tender = CanonicalTender::new("fts_uk", "R1");
        tender.deadline = Deadline::On(ymd(2025, 1, 1));
        let record = TenderRecord {
            id: tender.key().record_id(),
            tender,
            updated_at: Utc::now(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["source_id"], "R1");
        assert_eq!(value["deadline"]["status"], "on");
        assert_eq!(value["deadline"]["date"], "2025-01-01");
    }
}
