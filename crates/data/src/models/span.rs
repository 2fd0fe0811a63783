//! Outlier spans: the lifetime of one outlying level, enriched with book
//! and flow context at both ends.

use depthwatch_core::{Exchange, Market, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Book context captured at span open and close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanContext {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub spread_bps: f64,
    pub imbalance: f64,
    pub bid_depth: Decimal,
    pub ask_depth: Decimal,
    pub microprice: Decimal,
    pub level_rank: u32,
    pub vol_1m: f64,
    pub vol_5m: f64,
}

/// A closed (or projected) outlier span.
///
/// Invariants: `end_ts >= start_ts`, `count >= 1`,
/// `filled_pct` in `[0, 1]`, `avg_z <= max_z`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlierSpanRecord {
    pub start_ts: i64,
    pub end_ts: i64,
    pub duration_ms: i64,
    pub symbol: String,
    pub market: Market,
    pub exchange: Exchange,
    pub side: Side,
    pub price: Decimal,
    pub max_z: f64,
    pub avg_z: f64,
    /// Number of ticks that observed the level as an outlier.
    pub count: u32,
    pub start_size: Decimal,
    pub end_size: Decimal,
    /// `clamp((startSize - endSize) / startSize, 0, 1)`; 0 when startSize is 0.
    pub filled_pct: f64,
    pub start_bps: f64,
    pub end_bps: f64,
    /// Opaque JSON book snapshots from the first and last sighting.
    pub start_book: String,
    pub end_book: String,
    pub start: SpanContext,
    pub end: SpanContext,
    pub size_delta: Decimal,
    /// `size_delta / start_size`; 0 when startSize is 0.
    pub size_delta_pct: f64,
    /// Taker flow within 5 bps of the span price while the span was active.
    pub trade_buy_qty: Decimal,
    pub trade_sell_qty: Decimal,
    pub trade_count: u32,
}
