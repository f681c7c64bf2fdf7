//! Stability store: persistent per-endpoint check history
//!
//! One record per canonical key, kept across runs. Records are only ever
//! inserted or updated, never deleted; endpoints that disappear from the
//! sources simply stop being updated but remain queryable history.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;

/// Upper bound on the persisted success streak
pub const STREAK_CAP: i64 = 1000;

/// Persistent success/failure statistics for one endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StabilityRecord {
    pub canonical_key: String,
    pub success_count: i64,
    pub failure_count: i64,
    pub success_streak: i64,
    pub failure_streak: i64,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub reliability_score: f64,
}

impl StabilityRecord {
    pub fn fresh(canonical_key: String) -> Self {
        Self {
            canonical_key,
            success_count: 0,
            failure_count: 0,
            success_streak: 0,
            failure_streak: 0,
            last_checked: None,
            last_success: None,
            reliability_score: 0.0,
        }
    }

    /// Fold one check outcome into the record and recompute the score
    pub fn apply(&mut self, success: bool, now: DateTime<Utc>) {
        self.last_checked = Some(now);
        if success {
            self.success_count += 1;
            self.success_streak = (self.success_streak + 1).min(STREAK_CAP);
            self.failure_streak = 0;
            self.last_success = Some(now);
        } else {
            self.failure_count += 1;
            self.failure_streak += 1;
            self.success_streak = 0;
        }
        self.reliability_score = reliability_score(
            self.success_count,
            self.failure_count,
            self.success_streak,
            self.failure_streak,
        );
    }
}

/// Reliability score in [0, 1): a blend of the lifetime success ratio and
/// the current success streak, dampened while a failure streak is active.
///
/// Monotonic in `success_streak` for fixed counts, and monotonic in the
/// success ratio for fixed streak.
pub fn reliability_score(
    success_count: i64,
    failure_count: i64,
    success_streak: i64,
    failure_streak: i64,
) -> f64 {
    let total = success_count + failure_count;
    let ratio = if total == 0 {
        0.0
    } else {
        success_count as f64 / total as f64
    };
    let streak = success_streak.clamp(0, STREAK_CAP) as f64;
    let streak_term = streak / (streak + 3.0);
    let base = 0.55 * ratio + 0.45 * streak_term;
    base / (1.0 + failure_streak.max(0) as f64)
}

/// SQLite-backed store of stability records, injected into the pipeline
/// as an explicit handle
#[derive(Clone)]
pub struct StabilityStore {
    pool: Pool<Sqlite>,
}

impl StabilityStore {
    /// Open (creating if missing) the store at the given file path
    pub async fn open(path: &str) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(path, "stability store opened");
        Ok(store)
    }

    /// In-memory store, used by tests and dry runs. Pinned to a single
    /// connection so every query sees the same database.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stability (
                canonical_key TEXT PRIMARY KEY,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                success_streak INTEGER NOT NULL DEFAULT 0,
                failure_streak INTEGER NOT NULL DEFAULT 0,
                last_checked TEXT,
                last_success TEXT,
                reliability_score REAL NOT NULL DEFAULT 0.0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load every record, keyed by canonical key. Run start uses this to
    /// seed scoring priors before validation.
    pub async fn load_all(&self) -> Result<HashMap<String, StabilityRecord>> {
        let rows = sqlx::query_as::<_, StabilityRecord>("SELECT * FROM stability")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.canonical_key.clone(), r))
            .collect())
    }

    pub async fn get(&self, canonical_key: &str) -> Result<Option<StabilityRecord>> {
        let record = sqlx::query_as::<_, StabilityRecord>(
            "SELECT * FROM stability WHERE canonical_key = ?",
        )
        .bind(canonical_key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Fold one check outcome into the record for `canonical_key` and
    /// persist it. The read-then-write runs under an immediate
    /// transaction: concurrent callers on the same key serialize on the
    /// write lock instead of both reading the stale row.
    pub async fn record_outcome(
        &self,
        canonical_key: &str,
        success: bool,
    ) -> Result<StabilityRecord> {
        let mut conn = self.pool.acquire().await?;

        // SQLite's default deferred transaction would take the write lock
        // only at the UPSERT, after both readers saw the same counts
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        match Self::upsert_outcome(&mut conn, canonical_key, success).await {
            Ok(record) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(record)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    async fn upsert_outcome(
        conn: &mut sqlx::SqliteConnection,
        canonical_key: &str,
        success: bool,
    ) -> Result<StabilityRecord> {
        let mut record = sqlx::query_as::<_, StabilityRecord>(
            "SELECT * FROM stability WHERE canonical_key = ?",
        )
        .bind(canonical_key)
        .fetch_optional(&mut *conn)
        .await?
        .unwrap_or_else(|| StabilityRecord::fresh(canonical_key.to_string()));

        record.apply(success, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO stability (
                canonical_key, success_count, failure_count,
                success_streak, failure_streak,
                last_checked, last_success, reliability_score
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(canonical_key) DO UPDATE SET
                success_count=excluded.success_count,
                failure_count=excluded.failure_count,
                success_streak=excluded.success_streak,
                failure_streak=excluded.failure_streak,
                last_checked=excluded.last_checked,
                last_success=excluded.last_success,
                reliability_score=excluded.reliability_score
            "#,
        )
        .bind(&record.canonical_key)
        .bind(record.success_count)
        .bind(record.failure_count)
        .bind(record.success_streak)
        .bind(record.failure_streak)
        .bind(record.last_checked)
        .bind(record.last_success)
        .bind(record.reliability_score)
        .execute(&mut *conn)
        .await?;

        Ok(record)
    }

    /// All records ordered by score descending, best first
    pub async fn top_by_score(&self, limit: i64) -> Result<Vec<StabilityRecord>> {
        let rows = sqlx::query_as::<_, StabilityRecord>(
            "SELECT * FROM stability ORDER BY reliability_score DESC, canonical_key ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stability")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
