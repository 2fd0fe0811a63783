//! Closed outlier-span store. 90-day retention keyed on `end_ts`.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::VecDeque;
use std::str::FromStr;
use tokio::sync::RwLock;

use depthwatch_core::{Exchange, Market, Side};

use crate::models::{OutlierSpanRecord, SpanContext};
use crate::stores::{tail_of, RETENTION_LONG_MS};

pub struct OutlierSpanStore {
    pool: SqlitePool,
    cache: RwLock<VecDeque<OutlierSpanRecord>>,
    retention_ms: i64,
}

impl OutlierSpanStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: RwLock::new(VecDeque::new()),
            retention_ms: RETENTION_LONG_MS,
        }
    }

    /// Appends one closed span, then prunes.
    ///
    /// # Errors
    /// Returns an error if the write fails.
    pub async fn append(&self, span: &OutlierSpanRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO outlier_spans
                (start_ts, end_ts, duration_ms, symbol, market, exchange, side, price,
                 max_z, avg_z, count, start_size, end_size, filled_pct, start_bps, end_bps,
                 start_book, end_book,
                 start_best_bid, start_best_ask, start_spread_bps, start_imbalance,
                 start_bid_depth, start_ask_depth, start_microprice, start_level_rank,
                 start_vol_1m, start_vol_5m,
                 end_best_bid, end_best_ask, end_spread_bps, end_imbalance,
                 end_bid_depth, end_ask_depth, end_microprice, end_level_rank,
                 end_vol_1m, end_vol_5m,
                 size_delta, size_delta_pct, trade_buy_qty, trade_sell_qty, trade_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30,
                    ?31, ?32, ?33, ?34, ?35, ?36, ?37, ?38, ?39, ?40, ?41, ?42, ?43)
            ",
        )
        .bind(span.start_ts)
        .bind(span.end_ts)
        .bind(span.duration_ms)
        .bind(&span.symbol)
        .bind(span.market.as_str())
        .bind(span.exchange.as_str())
        .bind(span.side.as_str())
        .bind(span.price.to_string())
        .bind(span.max_z)
        .bind(span.avg_z)
        .bind(i64::from(span.count))
        .bind(span.start_size.to_string())
        .bind(span.end_size.to_string())
        .bind(span.filled_pct)
        .bind(span.start_bps)
        .bind(span.end_bps)
        .bind(&span.start_book)
        .bind(&span.end_book)
        .bind(span.start.best_bid.to_string())
        .bind(span.start.best_ask.to_string())
        .bind(span.start.spread_bps)
        .bind(span.start.imbalance)
        .bind(span.start.bid_depth.to_string())
        .bind(span.start.ask_depth.to_string())
        .bind(span.start.microprice.to_string())
        .bind(i64::from(span.start.level_rank))
        .bind(span.start.vol_1m)
        .bind(span.start.vol_5m)
        .bind(span.end.best_bid.to_string())
        .bind(span.end.best_ask.to_string())
        .bind(span.end.spread_bps)
        .bind(span.end.imbalance)
        .bind(span.end.bid_depth.to_string())
        .bind(span.end.ask_depth.to_string())
        .bind(span.end.microprice.to_string())
        .bind(i64::from(span.end.level_rank))
        .bind(span.end.vol_1m)
        .bind(span.end.vol_5m)
        .bind(span.size_delta.to_string())
        .bind(span.size_delta_pct)
        .bind(span.trade_buy_qty.to_string())
        .bind(span.trade_sell_qty.to_string())
        .bind(i64::from(span.trade_count))
        .execute(&self.pool)
        .await
        .context("inserting outlier span")?;

        self.cache.write().await.push_back(span.clone());
        self.prune().await
    }

    /// Drops cache and database rows whose `end_ts` fell out of retention.
    ///
    /// # Errors
    /// Returns an error if the database delete fails.
    pub async fn prune(&self) -> Result<()> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        self.cache.write().await.retain(|s| s.end_ts >= cutoff);
        sqlx::query("DELETE FROM outlier_spans WHERE end_ts < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("pruning outlier spans")?;
        Ok(())
    }

    /// Tail of the cached history with optional filters.
    pub async fn get_history(
        &self,
        limit: usize,
        symbol: Option<&str>,
        market: Option<Market>,
        exchange: Option<Exchange>,
    ) -> Vec<OutlierSpanRecord> {
        let cutoff = Utc::now().timestamp_millis() - self.retention_ms;
        self.cache.write().await.retain(|s| s.end_ts >= cutoff);

        let cache = self.cache.read().await;
        let filtered: Vec<OutlierSpanRecord> = cache
            .iter()
            .filter(|s| symbol.map_or(true, |v| s.symbol == v))
            .filter(|s| market.map_or(true, |m| s.market == m))
            .filter(|s| exchange.map_or(true, |e| s.exchange == e))
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
        let rows = sqlx::query("SELECT * FROM outlier_spans WHERE end_ts >= ?1 ORDER BY end_ts ASC")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .context("loading outlier spans")?;

        let mut cache = self.cache.write().await;
        let mut skipped = 0usize;
        for row in &rows {
            match parse_row(row) {
                Some(span) => cache.push_back(span),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "skipped unparseable outlier-span rows");
        }
        Ok(cache.len())
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }
}

fn decimal(row: &SqliteRow, column: &str) -> Option<Decimal> {
    Decimal::from_str(&row.try_get::<String, _>(column).ok()?).ok()
}

fn context(row: &SqliteRow, prefix: &str) -> Option<SpanContext> {
    Some(SpanContext {
        best_bid: decimal(row, &format!("{prefix}_best_bid"))?,
        best_ask: decimal(row, &format!("{prefix}_best_ask"))?,
        spread_bps: row.try_get(format!("{prefix}_spread_bps").as_str()).ok()?,
        imbalance: row.try_get(format!("{prefix}_imbalance").as_str()).ok()?,
        bid_depth: decimal(row, &format!("{prefix}_bid_depth"))?,
        ask_depth: decimal(row, &format!("{prefix}_ask_depth"))?,
        microprice: decimal(row, &format!("{prefix}_microprice"))?,
        level_rank: u32::try_from(row.try_get::<i64, _>(format!("{prefix}_level_rank").as_str()).ok()?)
            .ok()?,
        vol_1m: row.try_get(format!("{prefix}_vol_1m").as_str()).ok()?,
        vol_5m: row.try_get(format!("{prefix}_vol_5m").as_str()).ok()?,
    })
}

fn parse_row(row: &SqliteRow) -> Option<OutlierSpanRecord> {
    Some(OutlierSpanRecord {
        start_ts: row.try_get("start_ts").ok()?,
        end_ts: row.try_get("end_ts").ok()?,
        duration_ms: row.try_get("duration_ms").ok()?,
        symbol: row.try_get("symbol").ok()?,
        market: Market::parse(&row.try_get::<String, _>("market").ok()?)?,
        exchange: Exchange::parse(&row.try_get::<String, _>("exchange").ok()?)?,
        side: Side::parse(&row.try_get::<String, _>("side").ok()?)?,
        price: decimal(row, "price")?,
        max_z: row.try_get("max_z").ok()?,
        avg_z: row.try_get("avg_z").ok()?,
        count: u32::try_from(row.try_get::<i64, _>("count").ok()?).ok()?,
        start_size: decimal(row, "start_size")?,
        end_size: decimal(row, "end_size")?,
        filled_pct: row.try_get("filled_pct").ok()?,
        start_bps: row.try_get("start_bps").ok()?,
        end_bps: row.try_get("end_bps").ok()?,
        start_book: row.try_get("start_book").ok()?,
        end_book: row.try_get("end_book").ok()?,
        start: context(row, "start")?,
        end: context(row, "end")?,
        size_delta: decimal(row, "size_delta")?,
        size_delta_pct: row.try_get("size_delta_pct").ok()?,
        trade_buy_qty: decimal(row, "trade_buy_qty")?,
        trade_sell_qty: decimal(row, "trade_sell_qty")?,
        trade_count: u32::try_from(row.try_get::<i64, _>("trade_count").ok()?).ok()?,
    })
}
