// SQLite persistence for discovered businesses and scan history.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::types::Json;

use leadwatch_common::types::{BusinessRecord, ScanCycleRecord};

use crate::error::Result;

pub struct RecordStore {
    pool: SqlitePool,
}

/// A row from the businesses table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StoredBusiness {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub category: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub website: Option<String>,
    pub reviews: String,
    pub rating: Option<f64>,
    pub source_url: String,
    pub metadata: Json<BTreeMap<String, String>>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A row from the scan_history table.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StoredCycle {
    pub id: i64,
    pub category: String,
    pub location_filter: String,
    pub businesses_found: i64,
    pub new_businesses: i64,
    pub duration_seconds: f64,
    pub started_at: DateTime<Utc>,
}

/// Database-wide counts for the status report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub total_businesses: i64,
    pub new_this_week: i64,
    pub new_this_month: i64,
    pub categories: i64,
}

impl RecordStore {
    /// Open (or create) a database file at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Open a fresh in-memory database. A single connection keeps every
    /// query on the same ephemeral database.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Whether a business with this normalized phone is already known.
    pub async fn exists(&self, phone: &str) -> Result<bool> {
        let row = sqlx::query_scalar::<_, i64>("SELECT id FROM businesses WHERE phone = ?")
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Insert a new business. The caller supplies the timestamp so first
    /// and last seen start out identical.
    pub async fn insert(&self, record: &BusinessRecord, now: DateTime<Utc>) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO businesses
                (name, phone, category, city, state, zip_code,
                 latitude, longitude, website, reviews, rating,
                 source_url, metadata, first_seen, last_seen)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&record.name)
        .bind(&record.phone)
        .bind(&record.category)
        .bind(&record.city)
        .bind(&record.state)
        .bind(&record.zip_code)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(&record.website)
        .bind(&record.reviews)
        .bind(record.rating)
        .bind(&record.source_url)
        .bind(Json(record.metadata.clone()))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Mark a known business as seen again.
    pub async fn touch_last_seen(&self, phone: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE businesses SET last_seen = ? WHERE phone = ?")
            .bind(now)
            .bind(phone)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Fetch a business by its normalized phone.
    pub async fn get(&self, phone: &str) -> Result<Option<StoredBusiness>> {
        let row = sqlx::query_as::<_, StoredBusiness>("SELECT * FROM businesses WHERE phone = ?")
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Append one cycle summary to scan history.
    pub async fn record_cycle(&self, cycle: &ScanCycleRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_history
                (category, location_filter, businesses_found,
                 new_businesses, duration_seconds, started_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&cycle.category)
        .bind(&cycle.location_filter)
        .bind(cycle.businesses_found as i64)
        .bind(cycle.new_businesses as i64)
        .bind(cycle.duration_seconds)
        .bind(cycle.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recently appended cycle, if any.
    pub async fn latest_cycle(&self) -> Result<Option<StoredCycle>> {
        let row = sqlx::query_as::<_, StoredCycle>(
            "SELECT * FROM scan_history ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Totals for the status report. Windows are computed from the
    /// caller's clock so they are testable.
    pub async fn stats_snapshot(&self, now: DateTime<Utc>) -> Result<StatsSnapshot> {
        let total_businesses =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM businesses")
                .fetch_one(&self.pool)
                .await?;
        let new_this_week = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM businesses WHERE first_seen >= ?",
        )
        .bind(now - Duration::days(7))
        .fetch_one(&self.pool)
        .await?;
        let new_this_month = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM businesses WHERE first_seen >= ?",
        )
        .bind(now - Duration::days(30))
        .fetch_one(&self.pool)
        .await?;
        let categories =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(DISTINCT category) FROM businesses")
                .fetch_one(&self.pool)
                .await?;

        Ok(StatsSnapshot {
            total_businesses,
            new_this_week,
            new_this_month,
            categories,
        })
    }

    /// Newest discoveries first, paginated.
    pub async fn recent(&self, limit: i64, offset: i64) -> Result<Vec<StoredBusiness>> {
        let rows = sqlx::query_as::<_, StoredBusiness>(
            "SELECT * FROM businesses ORDER BY first_seen DESC LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Everything first seen within the trailing window, newest first.
    pub async fn since_days(&self, days: i64, now: DateTime<Utc>) -> Result<Vec<StoredBusiness>> {
        let rows = sqlx::query_as::<_, StoredBusiness>(
            "SELECT * FROM businesses WHERE first_seen >= ? ORDER BY first_seen DESC",
        )
        .bind(now - Duration::days(days))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Every stored business, newest first. Used by the exporters.
    pub async fn all(&self) -> Result<Vec<StoredBusiness>> {
        let rows = sqlx::query_as::<_, StoredBusiness>(
            "SELECT * FROM businesses ORDER BY first_seen DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
