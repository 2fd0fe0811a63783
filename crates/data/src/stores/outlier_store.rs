//! Outlier record store. 90-day retention.
//!
//! A tick can emit a batch of outliers, so writes go through `append_all`
//! in one transaction.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::VecDeque;
use std::str::FromStr;
use tokio::sync::RwLock;

use depthwatch_core::{Exchange, Market, Side};

use crate::models::OutlierRecord;
use crate::stores::{tail_of, RETENTION_LONG_MS};

pub struct OutlierStore {
    pool: SqlitePool,
    cache: RwLock<VecDeque<OutlierRecord>>,
    retention_ms: i64,
}

impl OutlierStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: RwLock::new(VecDeque::new()),
            retention_ms: RETENTION_LONG_MS,
        }
    }

    /// Appends a batch in one transaction, then prunes. Empty batches are
    /// a no-op.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn append_all(&self, records: &[OutlierRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.context("starting outlier batch")?;
        for record in records {
            sqlx::query(
                r"
                INSERT INTO outliers
                    (ts, symbol, market, exchange, side, price, size, z_score, bps_from_mid)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ",
            )
            .bind(record.ts)
            .bind(&record.symbol)
            .bind(record.market.as_str())
            .bind(record.exchange.as_str())
            .bind(record.side.as_str())
            .bind(record.price.to_string())
            .bind(record.size.to_string())
            .bind(record.z_score)
            .bind(record.bps_from_mid)
            .execute(&mut *tx)
            .await
            .context("inserting outlier")?;
        }
        tx.commit().await.context("committing outlier batch")?;

        {
            let mut cache = self.cache.write().await;
            cache.extend(records.iter().cloned());
        }
        self.prune().await
    }

    /// Drops cache and database rows older than retention.
    ///
    /// # Errors
    /// Returns an error if the database delete fails.
    pub async fn prune(&self) -> Result<()> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        self.cache.write().await.retain(|o| o.ts >= cutoff);
        sqlx::query("DELETE FROM outliers WHERE ts < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("pruning outliers")?;
        Ok(())
    }

    /// Tail of the cached history with optional filters.
    pub async fn get_history(
        &self,
        limit: usize,
        symbol: Option<&str>,
        market: Option<Market>,
        exchange: Option<Exchange>,
    ) -> Vec<OutlierRecord> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        self.cache.write().await.retain(|o| o.ts >= cutoff);

        let cache = self.cache.read().await;
        let filtered: Vec<OutlierRecord> = cache
            .iter()
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .filter(|o| market.map_or(true, |m| o.market == m))
            .filter(|o| exchange.map_or(true, |e| o.exchange == e))
            .cloned()
            .collect();
        tail_of(filtered, limit)
    }

    /// Reloads rows within retention, skipping rows that no longer parse.
    ///
    /// # Errors
    /// Returns an error if the select fails.
    pub async fn load_existing(&self) -> Result<usize> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        let rows = sqlx::query(
            r"
            SELECT ts, symbol, market, exchange, side, price, size, z_score, bps_from_mid
            FROM outliers WHERE ts >= ?1 ORDER BY ts ASC
            ",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("loading outliers")?;

        let mut cache = self.cache.write().await;
        let mut skipped = 0usize;
        for row in &rows {
            match parse_row(row) {
                Some(record) => cache.push_back(record),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "skipped unparseable outlier rows");
        }
        Ok(cache.len())
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn parse_row(row: &SqliteRow) -> Option<OutlierRecord> {
    Some(OutlierRecord {
        ts: row.try_get("ts").ok()?,
        symbol: row.try_get("symbol").ok()?,
        market: Market::parse(&row.try_get::<String, _>("market").ok()?)?,
        exchange: Exchange::parse(&row.try_get::<String, _>("exchange").ok()?)?,
        side: Side::parse(&row.try_get::<String, _>("side").ok()?)?,
        price: Decimal::from_str(&row.try_get::<String, _>("price").ok()?).ok()?,
        size: Decimal::from_str(&row.try_get::<String, _>("size").ok()?).ok()?,
        z_score: row.try_get("z_score").ok()?,
        bps_from_mid: row.try_get("bps_from_mid").ok()?,
    })
}
