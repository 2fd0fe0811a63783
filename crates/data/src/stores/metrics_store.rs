//! Metrics point store.
//!
//! Points carry nested histograms and per-venue blocks, so the row is the
//! serialized point plus the indexed `ts`/`symbol` columns.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::collections::VecDeque;
use tokio::sync::RwLock;

use crate::models::MetricsPoint;
use crate::stores::{tail_of, RETENTION_SHORT_MS};

pub struct MetricsStore {
    pool: SqlitePool,
    cache: RwLock<VecDeque<MetricsPoint>>,
    retention_ms: i64,
}

impl MetricsStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: RwLock::new(VecDeque::new()),
            retention_ms: RETENTION_SHORT_MS,
        }
    }

    /// Appends one point, then prunes.
    ///
    /// # Errors
    /// Returns an error if the write fails; a failed metrics write is fatal
    /// to the process.
    pub async fn append(&self, point: &MetricsPoint) -> Result<()> {
        let payload = serde_json::to_string(point).context("serializing metrics point")?;
        sqlx::query("INSERT INTO metrics (ts, symbol, point) VALUES (?1, ?2, ?3)")
            .bind(point.ts)
            .bind(&point.symbol)
            .bind(payload)
            .execute(&self.pool)
            .await
            .context("inserting metrics point")?;

        self.cache.write().await.push_back(point.clone());
        self.prune().await
    }

    /// Drops cache and database rows older than retention.
    ///
    /// # Errors
    /// Returns an error if the database delete fails.
    pub async fn prune(&self) -> Result<()> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        self.cache.write().await.retain(|p| p.ts >= cutoff);
        sqlx::query("DELETE FROM metrics WHERE ts < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("pruning metrics")?;
        Ok(())
    }

    /// Tail of the cached history, optionally filtered by symbol.
    pub async fn get_history(&self, limit: usize, symbol: Option<&str>) -> Vec<MetricsPoint> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        self.cache.write().await.retain(|p| p.ts >= cutoff);

        let cache = self.cache.read().await;
        let filtered: Vec<MetricsPoint> = cache
            .iter()
            .filter(|p| symbol.map_or(true, |s| p.symbol == s))
            .cloned()
            .collect();
        tail_of(filtered, limit)
    }

    /// Reloads rows within retention into the cache. Rows that no longer
    /// deserialize are skipped.
    ///
    /// # Errors
    /// Returns an error if the select fails.
    pub async fn load_existing(&self) -> Result<usize> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        let rows = sqlx::query("SELECT point FROM metrics WHERE ts >= ?1 ORDER BY ts ASC")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .context("loading metrics")?;

        let mut cache = self.cache.write().await;
        let mut skipped = 0usize;
        for row in &rows {
            let payload: String = row.get("point");
            match serde_json::from_str::<MetricsPoint>(&payload) {
                Ok(point) => cache.push_back(point),
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "skipped unparseable metrics rows");
        }
        Ok(cache.len())
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }
}
