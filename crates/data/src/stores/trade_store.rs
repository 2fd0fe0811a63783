//! Trade print store. 90-day retention.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::VecDeque;
use std::str::FromStr;
use tokio::sync::RwLock;

use depthwatch_core::{Exchange, Market};

use crate::models::{TradeRecord, TradeSide};
use crate::stores::{tail_of, RETENTION_LONG_MS};

pub struct TradeStore {
    pool: SqlitePool,
    cache: RwLock<VecDeque<TradeRecord>>,
    retention_ms: i64,
}

impl TradeStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: RwLock::new(VecDeque::new()),
            retention_ms: RETENTION_LONG_MS,
        }
    }

    /// Appends one trade, then prunes.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn append(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO trades (ts, symbol, market, exchange, side, price, qty)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
        )
        .bind(trade.ts)
        .bind(&trade.symbol)
        .bind(trade.market.as_str())
        .bind(trade.exchange.as_str())
        .bind(trade.side.as_str())
        .bind(trade.price.to_string())
        .bind(trade.qty.to_string())
        .execute(&self.pool)
        .await
        .context("inserting trade")?;

        self.cache.write().await.push_back(trade.clone());
        self.prune().await
    }

    /// Drops cache and database rows older than retention.
    ///
    /// # Errors
    /// Returns an error if the database delete fails.
    pub async fn prune(&self) -> Result<()> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        self.cache.write().await.retain(|t| t.ts >= cutoff);
        sqlx::query("DELETE FROM trades WHERE ts < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("pruning trades")?;
        Ok(())
    }

    /// Tail of the cached history with optional filters.
    pub async fn get_history(
        &self,
        limit: usize,
        symbol: Option<&str>,
        market: Option<Market>,
        exchange: Option<Exchange>,
    ) -> Vec<TradeRecord> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        self.cache.write().await.retain(|t| t.ts >= cutoff);

        let cache = self.cache.read().await;
        let filtered: Vec<TradeRecord> = cache
            .iter()
            .filter(|t| symbol.map_or(true, |s| t.symbol == s))
            .filter(|t| market.map_or(true, |m| t.market == m))
            .filter(|t| exchange.map_or(true, |e| t.exchange == e))
            .cloned()
            .collect();
        tail_of(filtered, limit)
    }

    /// Reloads rows within retention into the cache, skipping rows that no
    /// longer parse.
    ///
    /// # Errors
    /// Returns an error if the select fails.
    pub async fn load_existing(&self) -> Result<usize> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        let rows = sqlx::query(
            r"
            SELECT ts, symbol, market, exchange, side, price, qty
            FROM trades WHERE ts >= ?1 ORDER BY ts ASC
            ",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("loading trades")?;

        let mut cache = self.cache.write().await;
        let mut skipped = 0usize;
        for row in &rows {
            match parse_row(row) {
                Some(trade) => cache.push_back(trade),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "skipped unparseable trade rows");
        }
        Ok(cache.len())
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn parse_row(row: &SqliteRow) -> Option<TradeRecord> {
    Some(TradeRecord {
        ts: row.try_get("ts").ok()?,
        symbol: row.try_get("symbol").ok()?,
        market: Market::parse(&row.try_get::<String, _>("market").ok()?)?,
        exchange: Exchange::parse(&row.try_get::<String, _>("exchange").ok()?)?,
        side: TradeSide::parse(&row.try_get::<String, _>("side").ok()?)?,
        price: Decimal::from_str(&row.try_get::<String, _>("price").ok()?).ok()?,
        qty: Decimal::from_str(&row.try_get::<String, _>("qty").ok()?).ok()?,
    })
}
