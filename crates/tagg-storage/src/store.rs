//! Storage seams: the upsert sink, the cursor store, the read interface, and the run ledger.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tagg_core::{CanonicalTender, Cursor, TenderError, TenderKey, TenderRecord};
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("rejected tender: {0}")]
    Invalid(#[from] TenderError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait TenderSink: Send + Sync {
    /// Inserts or overwrites the record keyed by (source, source_id) and stamps `updated_at`.
    async fn upsert(&self, tender: &CanonicalTender) -> Result<TenderRecord, StoreError>;
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get_cursor(&self, source: &str) -> Result<Option<Cursor>, StoreError>;
    async fn set_cursor(&self, source: &str, token: &str) -> Result<Cursor, StoreError>;
}

#[async_trait]
pub trait TenderReader: Send + Sync {
    async fn search(&self, query: &TenderQuery) -> Result<Vec<TenderRecord>, StoreError>;
    async fn get_by_key(&self, key: &TenderKey) -> Result<Option<TenderRecord>, StoreError>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<TenderRecord>, StoreError>;
}

#[async_trait]
pub trait RunLedger: Send + Sync {
    async fn record_run(&self, run: &RunRecord) -> Result<(), StoreError>;
}

/// Aggregate outcome of one ingestion cycle as kept in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: String,
    pub report: JsonValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenderOrder {
    #[default]
    PublicationDesc,
    DeadlineAsc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenderQuery {
    pub text: Option<String>,
    pub country: Option<String>,
    pub order: TenderOrder,
    pub limit: usize,
    pub offset: usize,
}

impl Default for TenderQuery {
    fn default() -> Self {
        Self {
            text: None,
            country: None,
            order: TenderOrder::default(),
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl TenderQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn text_filter(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    pub fn country_filter(&self) -> Option<&str> {
        self.country.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}

/// `updated_at` for a write: now, but always strictly after the previous stamp.
pub fn next_updated_at(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if now <= prev => prev + ChronoDuration::microseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn page_size_is_clamped() {
        let mut query = TenderQuery::default();
        assert_eq!(query.effective_limit(), DEFAULT_PAGE_SIZE);
        query.limit = 0;
        assert_eq!(query.effective_limit(), 1);
        query.limit = 10_000;
        assert_eq!(query.effective_limit(), MAX_PAGE_SIZE);
    }

    #[test]
    fn blank_filters_are_ignored() {
        let query = TenderQuery {
            text: Some("   ".into()),
            country: Some(" Kenya ".into()),
            ..Default::default()
        };
        assert_eq!(query.text_filter(), None);
        assert_eq!(query.country_filter(), Some("Kenya"));
    }

    #[test]
    fn updated_at_always_advances() {
        let t0 = Utc.with_ymd_and_hms(2026, 2, 24, 12, 0, 0).single().unwrap();
        assert_eq!(next_updated_at(None, t0), t0);
        assert_eq!(next_updated_at(Some(t0), t0), t0 + ChronoDuration::microseconds(1));
        let later = t0 + ChronoDuration::seconds(5);
        assert_eq!(next_updated_at(Some(t0), later), later);
    }
}
