//! Persistence gateway for stored tender records.
//!
//! The store owns the uniqueness invariant: at most one record per
//! (tender_id, business line) pair. Duplicate inserts are counted, never
//! treated as failures. Every operation checks the connection state first
//! and fails fast with `StoreError::NotConnected` when the gateway has not
//! been connected yet.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveDate, Utc};
use ptw_core::{StoredTenderRecord, TenderRecord};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

pub const CRATE_NAME: &str = "ptw-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is not connected")]
    NotConnected,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Outcome of an idempotent batch insert. `inserted_ids` names the tender
/// ids that were genuinely new, so callers never have to guess which
/// records were inserted from the count alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub inserted_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub total: u64,
    pub extracted_today: u64,
    pub last_extracted_at: Option<DateTime<Utc>>,
}

/// Gateway contract consumed by the extraction orchestrator.
#[async_trait]
pub trait TenderStore: Send + Sync {
    /// Establish the connection if it is not active yet.
    async fn ensure_connected(&self) -> Result<(), StoreError>;

    /// Insert each record, silently skipping ones that violate the
    /// (tender_id, business line) uniqueness invariant. Any other storage
    /// error aborts the batch.
    async fn insert_batch(&self, records: &[StoredTenderRecord])
        -> Result<InsertReport, StoreError>;

    /// Stored records for a business line, newest extraction first, then
    /// newest publication first. Bounds filter on extraction date.
    async fn by_business_line(
        &self,
        business_line: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<StoredTenderRecord>, StoreError>;

    async fn stats_for(&self, business_line: &str) -> Result<StoreStats, StoreError>;

    /// Delete records whose extraction timestamp is strictly older than
    /// now minus `age_days`; records exactly at the boundary survive.
    async fn purge_older_than(&self, age_days: i64) -> Result<u64, StoreError>;
}

fn sort_newest_first(records: &mut [StoredTenderRecord]) {
    records.sort_by(|a, b| {
        b.extracted_at
            .cmp(&a.extracted_at)
            .then(b.record.published_at.cmp(&a.record.published_at))
    });
}

/// In-memory gateway used by tests and local runs. Mirrors the Postgres
/// implementation's semantics, including the connection-state check.
#[derive(Default)]
pub struct MemoryTenderStore {
    connected: AtomicBool,
    rows: RwLock<HashMap<(i64, String), StoredTenderRecord>>,
}

impl MemoryTenderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for tests that do not exercise connection
    /// handling.
    pub fn connected() -> Self {
        let store = Self::new();
        store.connected.store(true, Ordering::SeqCst);
        store
    }

    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<(), StoreError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }

    async fn purge_with_now(&self, now: DateTime<Utc>, age_days: i64) -> Result<u64, StoreError> {
        self.guard()?;
        let cutoff = now - ChronoDuration::days(age_days);
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, stored| stored.extracted_at >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}

#[async_trait]
impl TenderStore for MemoryTenderStore {
    async fn ensure_connected(&self) -> Result<(), StoreError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn insert_batch(
        &self,
        records: &[StoredTenderRecord],
    ) -> Result<InsertReport, StoreError> {
        self.guard()?;
        let mut rows = self.rows.write().await;
        let mut report = InsertReport::default();
        for stored in records {
            let key = (stored.record.tender_id, stored.business_line.clone());
            if rows.contains_key(&key) {
                report.duplicates += 1;
            } else {
                rows.insert(key, stored.clone());
                report.inserted += 1;
                report.inserted_ids.push(stored.record.tender_id);
            }
        }
        Ok(report)
    }

    async fn by_business_line(
        &self,
        business_line: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<StoredTenderRecord>, StoreError> {
        self.guard()?;
        let rows = self.rows.read().await;
        let mut out: Vec<_> = rows
            .values()
            .filter(|stored| stored.business_line == business_line)
            .filter(|stored| {
                let day = stored.extracted_at.date_naive();
                from.is_none_or(|f| day >= f) && to.is_none_or(|t| day <= t)
            })
            .cloned()
            .collect();
        sort_newest_first(&mut out);
        Ok(out)
    }

    async fn stats_for(&self, business_line: &str) -> Result<StoreStats, StoreError> {
        self.guard()?;
        let today = Local::now().date_naive();
        let rows = self.rows.read().await;
        let mut stats = StoreStats::default();
        for stored in rows.values().filter(|s| s.business_line == business_line) {
            stats.total += 1;
            if stored.extracted_at.with_timezone(&Local).date_naive() == today {
                stats.extracted_today += 1;
            }
            if stats.last_extracted_at.is_none_or(|t| stored.extracted_at > t) {
                stats.last_extracted_at = Some(stored.extracted_at);
            }
        }
        Ok(stats)
    }

    async fn purge_older_than(&self, age_days: i64) -> Result<u64, StoreError> {
        self.purge_with_now(Utc::now(), age_days).await
    }
}

/// Postgres-backed gateway. The pool is created lazily by
/// `ensure_connected`; until then every operation fails fast.
pub struct PgTenderStore {
    database_url: String,
    pool: RwLock<Option<PgPool>>,
}

impl PgTenderStore {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            pool: RwLock::new(None),
        }
    }

    async fn active_pool(&self) -> Result<PgPool, StoreError> {
        self.pool
            .read()
            .await
            .clone()
            .ok_or(StoreError::NotConnected)
    }

    async fn init_schema(pool: &PgPool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tenders (
                tender_id BIGINT NOT NULL,
                business_line TEXT NOT NULL,
                code TEXT NOT NULL,
                title TEXT NOT NULL,
                published_at TIMESTAMPTZ,
                closes_at TIMESTAMPTZ,
                organization TEXT NOT NULL,
                organization_unit TEXT,
                status_code INTEGER NOT NULL,
                status_label TEXT NOT NULL,
                available_amount DOUBLE PRECISION,
                currency TEXT,
                supplier_count BIGINT,
                query_name TEXT NOT NULL,
                extracted_at TIMESTAMPTZ NOT NULL,
                public_link TEXT NOT NULL,
                PRIMARY KEY (tender_id, business_line)
            )
            "#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_tenders_line_extracted
                ON tenders (business_line, extracted_at DESC)
            "#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    fn row_to_stored(row: &sqlx::postgres::PgRow) -> Result<StoredTenderRecord, sqlx::Error> {
        let supplier_count: Option<i64> = row.try_get("supplier_count")?;
        Ok(StoredTenderRecord {
            record: TenderRecord {
                tender_id: row.try_get("tender_id")?,
                code: row.try_get("code")?,
                title: row.try_get("title")?,
                published_at: row.try_get("published_at")?,
                closes_at: row.try_get("closes_at")?,
                organization: row.try_get("organization")?,
                organization_unit: row.try_get("organization_unit")?,
                status_code: row.try_get("status_code")?,
                status_label: row.try_get("status_label")?,
                available_amount: row.try_get("available_amount")?,
                currency: row.try_get("currency")?,
                supplier_count: supplier_count.map(|v| v as u32),
            },
            business_line: row.try_get("business_line")?,
            query_name: row.try_get("query_name")?,
            extracted_at: row.try_get("extracted_at")?,
            public_link: row.try_get("public_link")?,
        })
    }
}

#[async_trait]
impl TenderStore for PgTenderStore {
    async fn ensure_connected(&self) -> Result<(), StoreError> {
        let mut pool = self.pool.write().await;
        if pool.is_some() {
            return Ok(());
        }
        let connected = PgPoolOptions::new()
            .max_connections(4)
            .connect(&self.database_url)
            .await?;
        Self::init_schema(&connected).await?;
        info!("tender store connected");
        *pool = Some(connected);
        Ok(())
    }

    async fn insert_batch(
        &self,
        records: &[StoredTenderRecord],
    ) -> Result<InsertReport, StoreError> {
        let pool = self.active_pool().await?;
        let mut report = InsertReport::default();
        for stored in records {
            let inserted = sqlx::query(
                r#"
                INSERT INTO tenders (
                    tender_id, business_line, code, title, published_at,
                    closes_at, organization, organization_unit, status_code,
                    status_label, available_amount, currency, supplier_count,
                    query_name, extracted_at, public_link
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                ON CONFLICT (tender_id, business_line) DO NOTHING
                "#,
            )
            .bind(stored.record.tender_id)
            .bind(&stored.business_line)
            .bind(&stored.record.code)
            .bind(&stored.record.title)
            .bind(stored.record.published_at)
            .bind(stored.record.closes_at)
            .bind(&stored.record.organization)
            .bind(&stored.record.organization_unit)
            .bind(stored.record.status_code)
            .bind(&stored.record.status_label)
            .bind(stored.record.available_amount)
            .bind(&stored.record.currency)
            .bind(stored.record.supplier_count.map(i64::from))
            .bind(&stored.query_name)
            .bind(stored.extracted_at)
            .bind(&stored.public_link)
            .execute(&pool)
            .await?
            .rows_affected();

            if inserted == 1 {
                report.inserted += 1;
                report.inserted_ids.push(stored.record.tender_id);
            } else {
                report.duplicates += 1;
            }
        }
        Ok(report)
    }

    async fn by_business_line(
        &self,
        business_line: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<StoredTenderRecord>, StoreError> {
        let pool = self.active_pool().await?;
        let rows = sqlx::query(
            r#"
            SELECT tender_id, business_line, code, title, published_at,
                   closes_at, organization, organization_unit, status_code,
                   status_label, available_amount, currency, supplier_count,
                   query_name, extracted_at, public_link
              FROM tenders
             WHERE business_line = $1
               AND ($2::date IS NULL OR extracted_at::date >= $2)
               AND ($3::date IS NULL OR extracted_at::date <= $3)
             ORDER BY extracted_at DESC, published_at DESC NULLS LAST
            "#,
        )
        .bind(business_line)
        .bind(from)
        .bind(to)
        .fetch_all(&pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(Self::row_to_stored(row)?);
        }
        Ok(out)
    }

    async fn stats_for(&self, business_line: &str) -> Result<StoreStats, StoreError> {
        let pool = self.active_pool().await?;
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE extracted_at::date = CURRENT_DATE) AS extracted_today,
                   MAX(extracted_at) AS last_extracted_at
              FROM tenders
             WHERE business_line = $1
            "#,
        )
        .bind(business_line)
        .fetch_one(&pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let extracted_today: i64 = row.try_get("extracted_today")?;
        Ok(StoreStats {
            total: total as u64,
            extracted_today: extracted_today as u64,
            last_extracted_at: row.try_get("last_extracted_at")?,
        })
    }

    async fn purge_older_than(&self, age_days: i64) -> Result<u64, StoreError> {
        let pool = self.active_pool().await?;
        let deleted = sqlx::query(
            r#"
            DELETE FROM tenders
             WHERE extracted_at < NOW() - make_interval(days => $1)
            "#,
        )
        .bind(age_days as i32)
        .execute(&pool)
        .await?
        .rows_affected();
        Ok(deleted)
    }
}
