//! PostgreSQL store: `tenders`, `ingest_cursors`, and `ingest_runs`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tagg_core::{CanonicalTender, Cursor, Deadline, TenderKey, TenderRecord};
use tracing::info;
use uuid::Uuid;

use crate::store::{
    CursorStore, RunLedger, RunRecord, StoreError, TenderOrder, TenderQuery, TenderReader, TenderSink,
};

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tenders (
        id               UUID PRIMARY KEY,
        source           TEXT NOT NULL,
        source_id        TEXT NOT NULL,
        title            TEXT NOT NULL,
        description      TEXT NOT NULL DEFAULT '',
        buyer            TEXT,
        country          TEXT,
        publication_date DATE,
        deadline         DATE,
        deadline_status  TEXT NOT NULL DEFAULT 'unknown',
        raw_url          TEXT,
        ai_summary       TEXT,
        updated_at       TIMESTAMPTZ NOT NULL,
        UNIQUE (source, source_id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS tenders_country_idx ON tenders (LOWER(country))",
    "CREATE INDEX IF NOT EXISTS tenders_publication_idx ON tenders (publication_date DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS ingest_cursors (
        source     TEXT PRIMARY KEY,
        cursor     TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ingest_runs (
        run_id      UUID PRIMARY KEY,
        started_at  TIMESTAMPTZ NOT NULL,
        finished_at TIMESTAMPTZ NOT NULL,
        status      TEXT NOT NULL,
        report      JSONB NOT NULL
    )
    "#,
];

const TENDER_COLUMNS: &str = "id, source, source_id, title, description, buyer, country, \
     publication_date, deadline, deadline_status, raw_url, ai_summary, updated_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the tables if they are missing. Safe to run on every start.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("tender schema ensured");
        Ok(())
    }
}

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

pub(crate) fn search_query(query: &TenderQuery) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT {TENDER_COLUMNS} FROM tenders WHERE TRUE"));
    if let Some(text) = query.text_filter() {
        let pattern = format!("%{}%", escape_like(text));
        qb.push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(country) = query.country_filter() {
        qb.push(" AND LOWER(country) = LOWER(")
            .push_bind(country.to_string())
            .push(")");
    }
    qb.push(match query.order {
        TenderOrder::PublicationDesc => " ORDER BY publication_date DESC NULLS LAST, updated_at DESC",
        TenderOrder::DeadlineAsc => " ORDER BY deadline ASC NULLS LAST, updated_at DESC",
    });
    qb.push(" LIMIT ")
        .push_bind(query.effective_limit() as i64)
        .push(" OFFSET ")
        .push_bind(query.offset as i64);
    qb
}

fn row_to_record(row: &PgRow) -> Result<TenderRecord, StoreError> {
    let deadline_status: String = row.try_get("deadline_status")?;
    let deadline_date: Option<NaiveDate> = row.try_get("deadline")?;
    let record = TenderRecord {
        id: row.try_get("id")?,
        tender: CanonicalTender {
            source: row.try_get("source")?,
            source_id: row.try_get("source_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            buyer: row.try_get("buyer")?,
            country: row.try_get("country")?,
            publication_date: row.try_get("publication_date")?,
            deadline: Deadline::from_parts(&deadline_status, deadline_date),
            raw_url: row.try_get("raw_url")?,
            ai_summary: row.try_get("ai_summary")?,
        },
        updated_at: row.try_get("updated_at")?,
    };
    if record.id != record.tender.key().record_id() {
        return Err(StoreError::Corrupt(format!(
            "record id {} does not match key {}",
            record.id,
            record.tender.key()
        )));
    }
    Ok(record)
}

#[async_trait]
impl TenderSink for PgStore {
    async fn upsert(&self, tender: &CanonicalTender) -> Result<TenderRecord, StoreError> {
        tender.validate()?;
        let id = tender.key().record_id();
        let row = sqlx::query(
            r#"
            INSERT INTO tenders (
                id, source, source_id, title, description, buyer, country,
                publication_date, deadline, deadline_status, raw_url, ai_summary, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (source, source_id) DO UPDATE SET
                title            = EXCLUDED.title,
                description      = EXCLUDED.description,
                buyer            = EXCLUDED.buyer,
                country          = EXCLUDED.country,
                publication_date = EXCLUDED.publication_date,
                deadline         = EXCLUDED.deadline,
                deadline_status  = EXCLUDED.deadline_status,
                raw_url          = EXCLUDED.raw_url,
                ai_summary       = EXCLUDED.ai_summary,
                updated_at       = GREATEST(
                    EXCLUDED.updated_at,
                    tenders.updated_at + INTERVAL '1 microsecond'
                )
            RETURNING updated_at
            "#,
        )
        .bind(id)
        .bind(&tender.source)
        .bind(&tender.source_id)
        .bind(&tender.title)
        .bind(&tender.description)
        .bind(&tender.buyer)
        .bind(&tender.country)
        .bind(tender.publication_date)
        .bind(tender.deadline.date())
        .bind(tender.deadline.status())
        .bind(&tender.raw_url)
        .bind(&tender.ai_summary)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
        Ok(TenderRecord {
            id,
            tender: tender.clone(),
            updated_at,
        })
    }
}

#[async_trait]
impl CursorStore for PgStore {
    async fn get_cursor(&self, source: &str) -> Result<Option<Cursor>, StoreError> {
        let row = sqlx::query("SELECT source, cursor, updated_at FROM ingest_cursors WHERE source = $1")
            .bind(source)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<Cursor, StoreError> {
            Ok(Cursor {
                source: row.try_get("source")?,
                token: row.try_get("cursor")?,
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn set_cursor(&self, source: &str, token: &str) -> Result<Cursor, StoreError> {
        let updated_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO ingest_cursors (source, cursor, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (source) DO UPDATE SET
                cursor     = EXCLUDED.cursor,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(source)
        .bind(token)
        .bind(updated_at)
        .execute(&self.pool)
        .await?;
        Ok(Cursor {
            source: source.to_string(),
            token: token.to_string(),
            updated_at,
        })
    }
}

#[async_trait]
impl TenderReader for PgStore {
    async fn search(&self, query: &TenderQuery) -> Result<Vec<TenderRecord>, StoreError> {
        let mut qb = search_query(query);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn get_by_key(&self, key: &TenderKey) -> Result<Option<TenderRecord>, StoreError> {
        let sql = format!("SELECT {TENDER_COLUMNS} FROM tenders WHERE source = $1 AND source_id = $2");
        let row = sqlx::query(&sql)
            .bind(&key.source)
            .bind(&key.source_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<TenderRecord>, StoreError> {
        let sql = format!("SELECT {TENDER_COLUMNS} FROM tenders WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }
}

#[async_trait]
impl RunLedger for PgStore {
    async fn record_run(&self, run: &RunRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ingest_runs (run_id, started_at, finished_at, status, report)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (run_id) DO NOTHING
            "#,
        )
        .bind(run.run_id)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(&run.status)
        .bind(&run.report)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("road"), "road");
    }

    #[test]
    fn search_sql_binds_filters_in_order() {
        let query = TenderQuery {
            text: Some("road".into()),
            country: Some("Kenya".into()),
            order: TenderOrder::DeadlineAsc,
            ..Default::default()
        };
        let qb = search_query(&query);
        let sql = qb.sql();
        assert!(sql.contains("title ILIKE $1 OR description ILIKE $2"));
        assert!(sql.contains("LOWER(country) = LOWER($3)"));
        assert!(sql.contains("ORDER BY deadline ASC NULLS LAST"));
        assert!(sql.contains("LIMIT $4 OFFSET $5"));
    }

    #[test]
    fn search_sql_without_filters_only_pages() {
        let qb = search_query(&TenderQuery::default());
        let sql = qb.sql();
        assert!(!sql.contains("ILIKE"));
        assert!(sql.contains("ORDER BY publication_date DESC NULLS LAST"));
        assert!(sql.contains("LIMIT $1 OFFSET $2"));
    }
}
