//! Large-move store. 24-hour retention; one batch per tick.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::VecDeque;
use std::str::FromStr;
use tokio::sync::RwLock;

use depthwatch_core::Side;

use crate::models::LevelMoveRecord;
use crate::stores::{tail_of, RETENTION_SHORT_MS};

pub struct LargeMoveStore {
    pool: SqlitePool,
    cache: RwLock<VecDeque<LevelMoveRecord>>,
    retention_ms: i64,
}

impl LargeMoveStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: RwLock::new(VecDeque::new()),
            retention_ms: RETENTION_SHORT_MS,
        }
    }

    /// Appends a batch in one transaction, then prunes. Empty batches are
    /// a no-op.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn append_all(&self, moves: &[LevelMoveRecord]) -> Result<()> {
        if moves.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.context("starting large-move batch")?;
        for mv in moves {
            sqlx::query(
                r"
                INSERT INTO large_moves
                    (ts, symbol, side, price, prev_size, next_size,
                     delta_size, notional_delta, bps_from_mid)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ",
            )
            .bind(mv.ts)
            .bind(&mv.symbol)
            .bind(mv.side.as_str())
            .bind(mv.price.to_string())
            .bind(mv.prev_size.to_string())
            .bind(mv.next_size.to_string())
            .bind(mv.delta_size.to_string())
            .bind(mv.notional_delta.to_string())
            .bind(mv.bps_from_mid)
            .execute(&mut *tx)
            .await
            .context("inserting large move")?;
        }
        tx.commit().await.context("committing large-move batch")?;

        {
            let mut cache = self.cache.write().await;
            cache.extend(moves.iter().cloned());
        }
        self.prune().await
    }

    /// Drops cache and database rows older than retention.
    ///
    /// # Errors
    /// Returns an error if the database delete fails.
    pub async fn prune(&self) -> Result<()> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        self.cache.write().await.retain(|m| m.ts >= cutoff);
        sqlx::query("DELETE FROM large_moves WHERE ts < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("pruning large moves")?;
        Ok(())
    }

    /// Tail of the cached history, optionally filtered by symbol.
    pub async fn get_history(&self, limit: usize, symbol: Option<&str>) -> Vec<LevelMoveRecord> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        self.cache.write().await.retain(|m| m.ts >= cutoff);

        let cache = self.cache.read().await;
        let filtered: Vec<LevelMoveRecord> = cache
            .iter()
            .filter(|m| symbol.map_or(true, |s| m.symbol == s))
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
            SELECT ts, symbol, side, price, prev_size, next_size,
                   delta_size, notional_delta, bps_from_mid
            FROM large_moves WHERE ts >= ?1 ORDER BY ts ASC
            ",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .context("loading large moves")?;

        let mut cache = self.cache.write().await;
        let mut skipped = 0usize;
        for row in &rows {
            match parse_row(row) {
                Some(mv) => cache.push_back(mv),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "skipped unparseable large-move rows");
        }
        Ok(cache.len())
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn parse_row(row: &SqliteRow) -> Option<LevelMoveRecord> {
    Some(LevelMoveRecord {
        ts: row.try_get("ts").ok()?,
        symbol: row.try_get("symbol").ok()?,
        side: Side::parse(&row.try_get::<String, _>("side").ok()?)?,
        price: Decimal::from_str(&row.try_get::<String, _>("price").ok()?).ok()?,
        prev_size: Decimal::from_str(&row.try_get::<String, _>("prev_size").ok()?).ok()?,
        next_size: Decimal::from_str(&row.try_get::<String, _>("next_size").ok()?).ok()?,
        delta_size: Decimal::from_str(&row.try_get::<String, _>("delta_size").ok()?).ok()?,
        notional_delta: Decimal::from_str(&row.try_get::<String, _>("notional_delta").ok()?)
            .ok()?,
        bps_from_mid: row.try_get("bps_from_mid").ok()?,
    })
}
