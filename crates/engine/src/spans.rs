//! Outlier span lifecycle tracking.
//!
//! A span opens the first tick a `(symbol, market, exchange, side, price)`
//! key is outlying, extends while the key keeps appearing, and closes the
//! first tick it does not. Trades within 5 bps of the span price accrue to
//! the span while it is active; later trades are ignored.

use depthwatch_core::{Exchange, Market, Side};
use depthwatch_data::{OutlierObservation, OutlierSpanRecord, SpanContext, TradeRecord, TradeSide};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

/// Max distance between a trade and a span price for flow attribution.
const TRADE_MATCH_BPS: f64 = 5.0;

/// Identity of one active span.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpanKey {
    pub symbol: String,
    pub market: Market,
    pub exchange: Exchange,
    pub side: Side,
    pub price: Decimal,
}

impl SpanKey {
    fn from_observation(observation: &OutlierObservation) -> Self {
        let record = &observation.record;
        Self {
            symbol: record.symbol.clone(),
            market: record.market,
            exchange: record.exchange,
            side: record.side,
            price: record.price,
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveSpan {
    start_ts: i64,
    last_ts: i64,
    sum_z: f64,
    max_z: f64,
    count: u32,
    start_size: Decimal,
    last_size: Decimal,
    start_bps: f64,
    last_bps: f64,
    start_book: String,
    last_book: String,
    start_ctx: SpanContext,
    last_ctx: SpanContext,
    trade_buy_qty: Decimal,
    trade_sell_qty: Decimal,
    trade_count: u32,
}

fn context_of(observation: &OutlierObservation) -> SpanContext {
    SpanContext {
        best_bid: observation.best_bid,
        best_ask: observation.best_ask,
        spread_bps: observation.spread_bps,
        imbalance: observation.imbalance,
        bid_depth: observation.bid_depth,
        ask_depth: observation.ask_depth,
        microprice: observation.microprice,
        level_rank: observation.level_rank,
        vol_1m: observation.vol_1m,
        vol_5m: observation.vol_5m,
    }
}

impl ActiveSpan {
    fn open(observation: &OutlierObservation) -> Self {
        let record = &observation.record;
        let ctx = context_of(observation);
        Self {
            start_ts: record.ts,
            last_ts: record.ts,
            sum_z: record.z_score,
            max_z: record.z_score,
            count: 1,
            start_size: record.size,
            last_size: record.size,
            start_bps: record.bps_from_mid,
            last_bps: record.bps_from_mid,
            start_book: observation.book.clone(),
            last_book: observation.book.clone(),
            start_ctx: ctx.clone(),
            last_ctx: ctx,
            trade_buy_qty: Decimal::ZERO,
            trade_sell_qty: Decimal::ZERO,
            trade_count: 0,
        }
    }

    fn extend(&mut self, observation: &OutlierObservation) {
        let record = &observation.record;
        self.last_ts = record.ts;
        self.sum_z += record.z_score;
        self.count += 1;
        if record.z_score > self.max_z {
            self.max_z = record.z_score;
        }
        self.last_size = record.size;
        self.last_bps = record.bps_from_mid;
        self.last_book = observation.book.clone();
        self.last_ctx = context_of(observation);
    }

    fn to_record(&self, key: &SpanKey, end_ts: i64) -> OutlierSpanRecord {
        let duration_ms = (end_ts - self.start_ts).max(0);
        let start_size_f = self.start_size.to_f64().unwrap_or(0.0);
        let size_delta = self.last_size - self.start_size;

        let (filled_pct, size_delta_pct) = if self.start_size > Decimal::ZERO {
            let filled = (start_size_f - self.last_size.to_f64().unwrap_or(0.0)) / start_size_f;
            (
                filled.clamp(0.0, 1.0),
                size_delta.to_f64().unwrap_or(0.0) / start_size_f,
            )
        } else {
            (0.0, 0.0)
        };

        OutlierSpanRecord {
            start_ts: self.start_ts,
            end_ts,
            duration_ms,
            symbol: key.symbol.clone(),
            market: key.market,
            exchange: key.exchange,
            side: key.side,
            price: key.price,
            max_z: self.max_z,
            avg_z: self.sum_z / f64::from(self.count.max(1)),
            count: self.count,
            start_size: self.start_size,
            end_size: self.last_size,
            filled_pct,
            start_bps: self.start_bps,
            end_bps: self.last_bps,
            start_book: self.start_book.clone(),
            end_book: self.last_book.clone(),
            start: self.start_ctx.clone(),
            end: self.last_ctx.clone(),
            size_delta,
            size_delta_pct,
            trade_buy_qty: self.trade_buy_qty,
            trade_sell_qty: self.trade_sell_qty,
            trade_count: self.trade_count,
        }
    }
}

/// Tracks all active spans and closes the ones that stop appearing.
#[derive(Debug, Default)]
pub struct OutlierSpanTracker {
    active: HashMap<SpanKey, ActiveSpan>,
}

impl OutlierSpanTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one tick's candidate set. Opens spans for new keys, extends
    /// spans seen again, and returns the spans whose keys were absent —
    /// closed at their last sighting.
    pub fn update(&mut self, observations: &[OutlierObservation]) -> Vec<OutlierSpanRecord> {
        let mut seen: HashSet<SpanKey> = HashSet::new();

        for observation in observations {
            let key = SpanKey::from_observation(observation);
            seen.insert(key.clone());
            match self.active.get_mut(&key) {
                Some(span) => span.extend(observation),
                None => {
                    self.active.insert(key, ActiveSpan::open(observation));
                }
            }
        }

        let closed_keys: Vec<SpanKey> = self
            .active
            .keys()
            .filter(|key| !seen.contains(key))
            .cloned()
            .collect();

        let mut closed = Vec::with_capacity(closed_keys.len());
        for key in closed_keys {
            if let Some(span) = self.active.remove(&key) {
                closed.push(span.to_record(&key, span.last_ts));
            }
        }
        closed
    }

    /// Attributes a trade to every active span of the same symbol, market
    /// and exchange whose price lies within 5 bps of the print.
    pub fn on_trade(&mut self, trade: &TradeRecord) {
        for (key, span) in &mut self.active {
            if key.symbol != trade.symbol
                || key.market != trade.market
                || key.exchange != trade.exchange
            {
                continue;
            }

            let span_price = key.price.to_f64().unwrap_or(0.0);
            let trade_price = trade.price.to_f64().unwrap_or(0.0);
            let mid = (span_price + trade_price) / 2.0;
            if mid <= 0.0 {
                continue;
            }
            let distance_bps = (span_price - trade_price).abs() / mid * 10_000.0;
            if distance_bps > TRADE_MATCH_BPS {
                continue;
            }

            match trade.side {
                TradeSide::Buy => span.trade_buy_qty += trade.qty,
                TradeSide::Sell => span.trade_sell_qty += trade.qty,
            }
            span.trade_count += 1;
        }
    }

    /// Snapshot projection of every active span as if closed `now`, without
    /// mutating state.
    #[must_use]
    pub fn get_active(&self, now: i64) -> Vec<OutlierSpanRecord> {
        self.active
            .iter()
            .map(|(key, span)| span.to_record(key, now))
            .collect()
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
