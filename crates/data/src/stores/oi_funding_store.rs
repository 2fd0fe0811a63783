//! Open-interest/funding tick store. 24-hour retention.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::VecDeque;
use std::str::FromStr;
use tokio::sync::RwLock;

use depthwatch_core::{Exchange, Market};

use crate::models::OiFundingRecord;
use crate::stores::{tail_of, RETENTION_SHORT_MS};

pub struct OiFundingStore {
    pool: SqlitePool,
    cache: RwLock<VecDeque<OiFundingRecord>>,
    retention_ms: i64,
}

impl OiFundingStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: RwLock::new(VecDeque::new()),
            retention_ms: RETENTION_SHORT_MS,
        }
    }

    /// Appends one tick, then prunes.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn append(&self, tick: &OiFundingRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO oi_funding (ts, symbol, market, exchange, open_interest, funding_rate)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(tick.ts)
        .bind(&tick.symbol)
        .bind(tick.market.as_str())
        .bind(tick.exchange.as_str())
        .bind(tick.open_interest.map(|d| d.to_string()))
        .bind(tick.funding_rate.map(|d| d.to_string()))
        .execute(&self.pool)
        .await
        .context("inserting oi-funding tick")?;

        self.cache.write().await.push_back(tick.clone());
        self.prune().await
    }

    /// Drops cache and database rows older than retention.
    ///
    /// # Errors
    /// Returns an error if the database delete fails.
    pub async fn prune(&self) -> Result<()> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        self.cache.write().await.retain(|t| t.ts >= cutoff);
        sqlx::query("DELETE FROM oi_funding WHERE ts < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("pruning oi-funding")?;
        Ok(())
    }

    /// Tail of the cached history with optional filters.
    pub async fn get_history(
        &self,
        limit: usize,
        symbol: Option<&str>,
        market: Option<Market>,
        exchange: Option<Exchange>,
    ) -> Vec<OiFundingRecord> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        self.cache.write().await.retain(|t| t.ts >= cutoff);

        let cache = self.cache.read().await;
        let filtered: Vec<OiFundingRecord> = cache
            .iter()
            .filter(|t| symbol.map_or(true, |s| t.symbol == s))
            .filter(|t| market.map_or(true, |m| t.market == m))
            .filter(|t| exchange.map_or(true, |e| t.exchange == e))
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
            SELECT ts, symbol, market, exchange, open_interest, funding_rate
            FROM oi_funding WHERE ts >= ?1 ORDER BY ts ASC
            ",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("loading oi-funding")?;

        let mut cache = self.cache.write().await;
        let mut skipped = 0usize;
        for row in &rows {
            match parse_row(row) {
                Some(tick) => cache.push_back(tick),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "skipped unparseable oi-funding rows");
        }
        Ok(cache.len())
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn parse_row(row: &SqliteRow) -> Option<OiFundingRecord> {
    let open_interest = row
        .try_get::<Option<String>, _>("open_interest")
        .ok()?
        .and_then(|s| Decimal::from_str(&s).ok());
    let funding_rate = row
        .try_get::<Option<String>, _>("funding_rate")
        .ok()?
        .and_then(|s| Decimal::from_str(&s).ok());

    Some(OiFundingRecord {
        ts: row.try_get("ts").ok()?,
        symbol: row.try_get("symbol").ok()?,
        market: Market::parse(&row.try_get::<String, _>("market").ok()?)?,
        exchange: Exchange::parse(&row.try_get::<String, _>("exchange").ok()?)?,
        open_interest,
        funding_rate,
    })
}
