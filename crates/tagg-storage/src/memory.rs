//! In-process store used by dry runs and tests.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::Utc;
use tagg_core::{CanonicalTender, Cursor, TenderKey, TenderRecord};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{
    next_updated_at, CursorStore, RunLedger, RunRecord, StoreError, TenderOrder, TenderQuery,
    TenderReader, TenderSink,
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    tenders: RwLock<BTreeMap<TenderKey, TenderRecord>>,
    cursors: RwLock<HashMap<String, Cursor>>,
    runs: RwLock<Vec<RunRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tenders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tenders.read().await.is_empty()
    }

    pub async fn records(&self) -> Vec<TenderRecord> {
        self.tenders.read().await.values().cloned().collect()
    }

    pub async fn records_for(&self, source: &str) -> Vec<TenderRecord> {
        self.tenders
            .read()
            .await
            .values()
            .filter(|r| r.tender.source == source)
            .cloned()
            .collect()
    }

    pub async fn runs(&self) -> Vec<RunRecord> {
        self.runs.read().await.clone()
    }
}

#[async_trait]
impl TenderSink for MemoryStore {
    async fn upsert(&self, tender: &CanonicalTender) -> Result<TenderRecord, StoreError> {
        tender.validate()?;
        let key = tender.key();
        let mut tenders = self.tenders.write().await;
        let previous = tenders.get(&key).map(|r| r.updated_at);
        let record = TenderRecord {
            id: key.record_id(),
            tender: tender.clone(),
            updated_at: next_updated_at(previous, Utc::now()),
        };
        tenders.insert(key, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn get_cursor(&self, source: &str) -> Result<Option<Cursor>, StoreError> {
        Ok(self.cursors.read().await.get(source).cloned())
    }

    async fn set_cursor(&self, source: &str, token: &str) -> Result<Cursor, StoreError> {
        let cursor = Cursor {
            source: source.to_string(),
            token: token.to_string(),
            updated_at: Utc::now(),
        };
        self.cursors
            .write()
            .await
            .insert(source.to_string(), cursor.clone());
        Ok(cursor)
    }
}

fn matches_query(record: &TenderRecord, query: &TenderQuery) -> bool {
    if let Some(text) = query.text_filter() {
        let needle = text.to_lowercase();
        let hit = record.tender.title.to_lowercase().contains(&needle)
            || record.tender.description.to_lowercase().contains(&needle);
        if !hit {
            return false;
        }
    }
    if let Some(country) = query.country_filter() {
        let same = record
            .tender
            .country
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(country));
        if !same {
            return false;
        }
    }
    true
}

/// `None` sorts after every present value, in both directions.
fn cmp_present_first<T: Ord>(a: Option<T>, b: Option<T>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) if descending => b.cmp(&a),
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl TenderReader for MemoryStore {
    async fn search(&self, query: &TenderQuery) -> Result<Vec<TenderRecord>, StoreError> {
        let tenders = self.tenders.read().await;
        let mut hits = tenders
            .values()
            .filter(|r| matches_query(r, query))
            .cloned()
            .collect::<Vec<_>>();
        hits.sort_by(|a, b| {
            let primary = match query.order {
                TenderOrder::PublicationDesc => cmp_present_first(
                    a.tender.publication_date,
                    b.tender.publication_date,
                    true,
                ),
                TenderOrder::DeadlineAsc => {
                    cmp_present_first(a.tender.deadline.date(), b.tender.deadline.date(), false)
                }
            };
            primary.then_with(|| b.updated_at.cmp(&a.updated_at))
        });
        Ok(hits
            .into_iter()
            .skip(query.offset)
            .take(query.effective_limit())
            .collect())
    }

    async fn get_by_key(&self, key: &TenderKey) -> Result<Option<TenderRecord>, StoreError> {
        Ok(self.tenders.read().await.get(key).cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<TenderRecord>, StoreError> {
        Ok(self
            .tenders
            .read()
            .await
            .values()
            .find(|r| r.id == id)
            .cloned())
    }
}

#[async_trait]
impl RunLedger for MemoryStore {
    async fn record_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        self.runs.write().await.push(run.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tagg_core::Deadline;

    fn tender(source: &str, id: &str, title: &str) -> CanonicalTender {
        let mut t = CanonicalTender::new(source, id);
        t.title = title.to_string();
        t
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn upserting_same_key_twice_keeps_one_row_with_second_values() {
        let store = MemoryStore::new();
        let mut first = tender("fts_uk", "R1", "Road repair");
        first.country = Some("Kenya".into());
        let written_first = store.upsert(&first).await.unwrap();

        let mut second = tender("fts_uk", "R1", "Road repair (amended)");
        second.description = "Scope extended".into();
        let written_second = store.upsert(&second).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert!(written_second.updated_at > written_first.updated_at);
        assert_eq!(written_first.id, written_second.id);

        let stored = store.get_by_key(&second.key()).await.unwrap().unwrap();
        assert_eq!(stored.tender, second);
        assert_eq!(stored.updated_at, written_second.updated_at);
    }

    #[tokio::test]
    async fn upsert_rejects_empty_source_id() {
        let store = MemoryStore::new();
        let err = store.upsert(&tender("fts_uk", "", "x")).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn cursor_is_absent_until_set_and_then_overwritten() {
        let store = MemoryStore::new();
        assert!(store.get_cursor("fts_uk").await.unwrap().is_none());
        store.set_cursor("fts_uk", "c1").await.unwrap();
        store.set_cursor("fts_uk", "c2").await.unwrap();
        store.set_cursor("world_bank", "50").await.unwrap();
        assert_eq!(store.get_cursor("fts_uk").await.unwrap().unwrap().token, "c2");
        assert_eq!(store.get_cursor("world_bank").await.unwrap().unwrap().token, "50");
    }

    #[tokio::test]
    async fn search_filters_by_text_and_country_and_orders() {
        let store = MemoryStore::new();
        let mut a = tender("fts_uk", "A", "Road repair");
        a.country = Some("Kenya".into());
        a.publication_date = Some(ymd(2024, 1, 1));
        a.deadline = Deadline::On(ymd(2024, 6, 1));
        let mut b = tender("world_bank", "B", "School construction");
        b.description = "Includes road access".into();
        b.country = Some("kenya".into());
        b.publication_date = Some(ymd(2024, 2, 1));
        b.deadline = Deadline::On(ymd(2024, 3, 1));
        let mut c = tender("ted_eu", "C", "Road signage");
        c.country = Some("DEU".into());
        let d = tender("fts_uk", "D", "Office cleaning");
        for t in [&a, &b, &c, &d] {
            store.upsert(t).await.unwrap();
        }

        let hits = store
            .search(&TenderQuery {
                text: Some("ROAD".into()),
                country: Some("Kenya".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let ids = hits.iter().map(|r| r.tender.source_id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["B", "A"]);

        let by_deadline = store
            .search(&TenderQuery {
                text: Some("road".into()),
                order: TenderOrder::DeadlineAsc,
                ..Default::default()
            })
            .await
            .unwrap();
        let ids = by_deadline
            .iter()
            .map(|r| r.tender.source_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["B", "A", "C"]);

        let paged = store
            .search(&TenderQuery {
                limit: 1,
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
    }

    #[tokio::test]
    async fn lookup_by_opaque_id_matches_key() {
        let store = MemoryStore::new();
        let t = tender("prozorro", "UA-1", "Fuel supply");
        let written = store.upsert(&t).await.unwrap();
        let found = store.get_by_id(written.id).await.unwrap().unwrap();
        assert_eq!(found.tender.key(), t.key());
        assert!(store.get_by_id(Uuid::nil()).await.unwrap().is_none());
    }
}
