//! Liquidation event store. 24-hour retention.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::VecDeque;
use std::str::FromStr;
use tokio::sync::RwLock;

use depthwatch_core::{Exchange, Market};

use crate::models::{LiquidationRecord, TradeSide};
use crate::stores::{tail_of, RETENTION_SHORT_MS};

pub struct LiquidationStore {
    pool: SqlitePool,
    cache: RwLock<VecDeque<LiquidationRecord>>,
    retention_ms: i64,
}

impl LiquidationStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: RwLock::new(VecDeque::new()),
            retention_ms: RETENTION_SHORT_MS,
        }
    }

    /// Appends one liquidation, then prunes.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn append(&self, liq: &LiquidationRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO liquidations (ts, symbol, market, exchange, side, price, qty, usd_value)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(liq.ts)
        .bind(&liq.symbol)
        .bind(liq.market.as_str())
        .bind(liq.exchange.as_str())
        .bind(liq.side.as_str())
        .bind(liq.price.to_string())
        .bind(liq.qty.to_string())
        .bind(liq.usd_value.to_string())
        .execute(&self.pool)
        .await
        .context("inserting liquidation")?;

        self.cache.write().await.push_back(liq.clone());
        self.prune().await
    }

    /// Drops cache and database rows older than retention.
    ///
    /// # Errors
    /// Returns an error if the database delete fails.
    pub async fn prune(&self) -> Result<()> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        self.cache.write().await.retain(|l| l.ts >= cutoff);
        sqlx::query("DELETE FROM liquidations WHERE ts < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("pruning liquidations")?;
        Ok(())
    }

    /// Tail of the cached history with optional filters.
    pub async fn get_history(
        &self,
        limit: usize,
        symbol: Option<&str>,
        market: Option<Market>,
        exchange: Option<Exchange>,
    ) -> Vec<LiquidationRecord> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        self.cache.write().await.retain(|l| l.ts >= cutoff);

        let cache = self.cache.read().await;
        let filtered: Vec<LiquidationRecord> = cache
            .iter()
            .filter(|l| symbol.map_or(true, |s| l.symbol == s))
            .filter(|l| market.map_or(true, |m| l.market == m))
            .filter(|l| exchange.map_or(true, |e| l.exchange == e))
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
            SELECT ts, symbol, market, exchange, side, price, qty, usd_value
            FROM liquidations WHERE ts >= ?1 ORDER BY ts ASC
            ",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("loading liquidations")?;

        let mut cache = self.cache.write().await;
        let mut skipped = 0usize;
        for row in &rows {
            match parse_row(row) {
                Some(liq) => cache.push_back(liq),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "skipped unparseable liquidation rows");
        }
        Ok(cache.len())
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn parse_row(row: &SqliteRow) -> Option<LiquidationRecord> {
    Some(LiquidationRecord {
        ts: row.try_get("ts").ok()?,
        symbol: row.try_get("symbol").ok()?,
        market: Market::parse(&row.try_get::<String, _>("market").ok()?)?,
        exchange: Exchange::parse(&row.try_get::<String, _>("exchange").ok()?)?,
        side: TradeSide::parse(&row.try_get::<String, _>("side").ok()?)?,
        price: Decimal::from_str(&row.try_get::<String, _>("price").ok()?).ok()?,
        qty: Decimal::from_str(&row.try_get::<String, _>("qty").ok()?).ok()?,
        usd_value: Decimal::from_str(&row.try_get::<String, _>("usd_value").ok()?).ok()?,
    })
}
