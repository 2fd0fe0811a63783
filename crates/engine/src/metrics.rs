//! The metrics tick: merges venue books, computes metrics points, runs the
//! outlier detector and span tracker, detects large moves, persists and
//! broadcasts.
//!
//! Per tick and symbol, all computation happens before any persistence, and
//! all persistence before any broadcast. Outlier records hit their store
//! before the span tracker sees the same observations.

use anyhow::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast;

use depthwatch_core::{Config, Exchange, Market, Side};
use depthwatch_data::{
    BookMoveStats, ExchangeMetrics, LargeLevel, MetricsPoint, OutlierObservation, OutlierRecord,
    Stores,
};
use depthwatch_feeds::{BookLevel, BookRegistry};

use crate::large_move::{detect_large_moves, top_moves, LargeMoveConfig};
use crate::mid_history::{MidHistory, VOL_WINDOW_1M_MS, VOL_WINDOW_5M_MS};
use crate::outlier::{detect, metrics_outlier_count, VenueSnapshot};
use crate::spans::OutlierSpanTracker;

/// Large moves broadcast per side.
const BROADCAST_MOVES_PER_SIDE: usize = 8;

/// Large levels kept per side on a metrics point.
const LARGE_LEVELS_PER_SIDE: usize = 5;

/// One venue book as read at the tick: sorted top-N plus the tracker
/// counters accumulated since the previous tick.
struct VenueBook {
    bids: Vec<BookLevel>,
    asks: Vec<BookLevel>,
    move_stats: BookMoveStats,
}

pub struct MetricsEngine {
    config: Arc<Config>,
    symbols: Vec<String>,
    distance_bins: Vec<f64>,
    registry: Arc<BookRegistry>,
    stores: Stores,
    span_tracker: Arc<tokio::sync::Mutex<OutlierSpanTracker>>,
    events_tx: broadcast::Sender<String>,
    mid_history: MidHistory,
    large_move_config: LargeMoveConfig,
    /// Previous tick's merged perp book per symbol; spot is intentionally
    /// not diffed.
    prev_perp: HashMap<String, (Vec<BookLevel>, Vec<BookLevel>)>,
}

impl MetricsEngine {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        registry: Arc<BookRegistry>,
        stores: Stores,
        span_tracker: Arc<tokio::sync::Mutex<OutlierSpanTracker>>,
        events_tx: broadcast::Sender<String>,
    ) -> Self {
        let symbols = config.symbols();
        let distance_bins = config.distance_bins_bps();
        let large_move_config = LargeMoveConfig {
            base_mm_notional: config.base_mm_notional,
            window_bps: config.large_move_window_bps,
            notional_floor: config.large_move_notional_floor,
        };
        Self {
            config,
            symbols,
            distance_bins,
            registry,
            stores,
            span_tracker,
            events_tx,
            mid_history: MidHistory::new(),
            large_move_config,
            prev_perp: HashMap::new(),
        }
    }

    /// Runs the tick loop forever at the configured cadence.
    pub async fn run(mut self) {
        let mut tick =
            tokio::time::interval(std::time::Duration::from_millis(self.config.metrics_interval_ms));
        loop {
            tick.tick().await;
            let now = chrono::Utc::now().timestamp_millis();
            self.tick(now).await;
        }
    }

    /// One full tick over every configured symbol. Per-symbol failures are
    /// logged and do not stop other symbols.
    pub async fn tick(&mut self, now: i64) {
        let symbols = self.symbols.clone();
        for symbol in &symbols {
            if let Err(error) = self.tick_symbol(symbol, now).await {
                tracing::error!(symbol, %error, "metrics tick failed");
            }
        }
    }

    async fn tick_symbol(&mut self, symbol: &str, now: i64) -> Result<()> {
        // ---- read phase: snapshot all four books under their locks ----
        let bybit_spot = self.venue_book(Exchange::Bybit, Market::Spot, symbol);
        let mexc_spot = self.venue_book(Exchange::Mexc, Market::Spot, symbol);
        let bybit_perp = self.venue_book(Exchange::Bybit, Market::Perp, symbol);
        let mexc_perp = self.venue_book(Exchange::Mexc, Market::Perp, symbol);

        // ---- compute phase ----
        let mut observations = Vec::new();
        for (exchange, market, book) in [
            (Exchange::Bybit, Market::Spot, &bybit_spot),
            (Exchange::Mexc, Market::Spot, &mexc_spot),
            (Exchange::Bybit, Market::Perp, &bybit_perp),
            (Exchange::Mexc, Market::Perp, &mexc_perp),
        ] {
            if let Some(book) = book {
                observations.extend(self.detect_for_venue(exchange, market, symbol, book, now));
            }
        }

        let depth = self.config.depth;
        let (spot_bids, spot_asks) =
            merge_books(&[bybit_spot.as_ref(), mexc_spot.as_ref()], depth);
        let (perp_bids, perp_asks) =
            merge_books(&[bybit_perp.as_ref(), mexc_perp.as_ref()], depth);

        let mut exchanges = BTreeMap::new();
        for (exchange, book) in [
            (Exchange::Bybit, &bybit_perp),
            (Exchange::Mexc, &mexc_perp),
        ] {
            if let Some(metrics) = book.as_ref().and_then(|b| self.exchange_metrics(b)) {
                exchanges.insert(exchange.as_str().to_string(), metrics);
            }
        }

        let point = self.build_point(
            symbol,
            now,
            &perp_bids,
            &perp_asks,
            merged_move_stats(&bybit_perp, &mexc_perp),
            exchanges,
        );

        let (all_moves, broadcast_moves) = match &point {
            Some(point) => {
                let mid = point.mid.to_f64().unwrap_or(0.0);
                let moves = match self.prev_perp.get(symbol) {
                    Some((prev_bids, prev_asks)) => detect_large_moves(
                        now,
                        symbol,
                        prev_bids,
                        prev_asks,
                        &perp_bids,
                        &perp_asks,
                        mid,
                        &self.large_move_config,
                    ),
                    None => Vec::new(),
                };
                let top = top_moves(&moves, BROADCAST_MOVES_PER_SIDE);
                (moves, top)
            }
            None => (Vec::new(), Vec::new()),
        };
        if !perp_bids.is_empty() || !perp_asks.is_empty() {
            self.prev_perp
                .insert(symbol.to_string(), (perp_bids.clone(), perp_asks.clone()));
        }

        // ---- persist phase: outliers strictly before span updates ----
        let records: Vec<OutlierRecord> =
            observations.iter().map(|o| o.record.clone()).collect();
        self.stores.outliers.append_all(&records).await?;

        let closed = {
            let mut tracker = self.span_tracker.lock().await;
            tracker.update(&observations)
        };
        for span in &closed {
            self.stores.spans.append(span).await?;
        }

        self.stores.large_moves.append_all(&all_moves).await?;
        if let Some(point) = &point {
            self.stores.metrics.append(point).await?;
        }

        // ---- broadcast phase ----
        if bybit_spot.is_some() || mexc_spot.is_some() {
            let mid = side_mid(&spot_bids, &spot_asks);
            let data = serde_json::json!({
                "symbol": symbol,
                "mid": mid.map(|m| m.to_string()),
                "bids": wire_levels(&spot_bids),
                "asks": wire_levels(&spot_asks),
                "depth": depth,
                "sources": {
                    "bybit": bybit_spot.is_some(),
                    "mexc": mexc_spot.is_some(),
                },
            });
            self.broadcast("book", data);
        }

        if let Some(point) = &point {
            self.broadcast("metrics", serde_json::to_value(point)?);

            let data = serde_json::json!({
                "symbol": symbol,
                "mid": point.mid.to_string(),
                "bids": wire_levels(&perp_bids),
                "asks": wire_levels(&perp_asks),
                "depth": depth,
                "sources": {
                    "bybit": bybit_perp.is_some(),
                    "mexc": mexc_perp.is_some(),
                },
                "largeMoves": broadcast_moves,
            });
            self.broadcast("perpBook", data);
        }

        Ok(())
    }

    fn broadcast(&self, kind: &str, data: serde_json::Value) {
        let payload = serde_json::json!({ "type": kind, "data": data }).to_string();
        // No receivers is fine; the broadcaster drops laggards on its own.
        let _ = self.events_tx.send(payload);
    }

    /// Snapshots one book under its lock and resets its tracker.
    fn venue_book(&self, exchange: Exchange, market: Market, symbol: &str) -> Option<VenueBook> {
        let handle = self.registry.get_parts(exchange, market, symbol)?;
        let mut book = handle.lock().ok()?;
        if !book.has_data() {
            return None;
        }
        Some(VenueBook {
            bids: book.top_n(Side::Bid, self.config.depth),
            asks: book.top_n(Side::Ask, self.config.depth),
            move_stats: book.take_move_stats(),
        })
    }

    /// Runs the detector over one venue book, recording its mid first.
    fn detect_for_venue(
        &mut self,
        exchange: Exchange,
        market: Market,
        symbol: &str,
        book: &VenueBook,
        now: i64,
    ) -> Vec<OutlierObservation> {
        let snapshot = VenueSnapshot {
            ts: now,
            symbol,
            market,
            exchange,
            bids: &book.bids,
            asks: &book.asks,
            vol_1m: 0.0,
            vol_5m: 0.0,
        };
        let Some(mid) = snapshot.mid() else {
            return Vec::new();
        };

        self.mid_history.record(
            exchange,
            market,
            symbol,
            now,
            mid.to_f64().unwrap_or(0.0),
        );
        let vol_1m =
            self.mid_history
                .realized_vol(exchange, market, symbol, now, VOL_WINDOW_1M_MS);
        let vol_5m =
            self.mid_history
                .realized_vol(exchange, market, symbol, now, VOL_WINDOW_5M_MS);

        detect(&VenueSnapshot {
            vol_1m,
            vol_5m,
            ..snapshot
        })
    }

    /// Per-venue metrics block; `None` when either side is empty.
    fn exchange_metrics(&self, book: &VenueBook) -> Option<ExchangeMetrics> {
        let best_bid = book.bids.first()?;
        let best_ask = book.asks.first()?;
        let mid = (best_bid.price + best_ask.price) / Decimal::TWO;
        let mid_f = mid.to_f64().unwrap_or(0.0);
        if mid_f <= 0.0 {
            return None;
        }

        let bid = side_metrics(&book.bids, mid_f, &self.distance_bins);
        let ask = side_metrics(&book.asks, mid_f, &self.distance_bins);

        Some(ExchangeMetrics {
            best_bid: best_bid.price,
            best_ask: best_ask.price,
            mid,
            total_notional_bid: bid.total_notional,
            total_notional_ask: ask.total_notional,
            distance_bin_counts_bid: bid.bin_counts,
            distance_bin_counts_ask: ask.bin_counts,
            max_distance_bps_bid: bid.max_bps,
            max_distance_bps_ask: ask.max_bps,
            avg_distance_bps_bid: bid.avg_bps,
            avg_distance_bps_ask: ask.avg_bps,
            outlier_count_bid: metrics_outlier_count(&book.bids),
            outlier_count_ask: metrics_outlier_count(&book.asks),
        })
    }

    /// The aggregated metrics point; `None` when either merged side is
    /// empty.
    fn build_point(
        &self,
        symbol: &str,
        now: i64,
        bids: &[BookLevel],
        asks: &[BookLevel],
        move_stats: BookMoveStats,
        exchanges: BTreeMap<String, ExchangeMetrics>,
    ) -> Option<MetricsPoint> {
        let best_bid = bids.first()?;
        let best_ask = asks.first()?;
        let mid = (best_bid.price + best_ask.price) / Decimal::TWO;
        let mid_f = mid.to_f64().unwrap_or(0.0);
        if mid_f <= 0.0 {
            return None;
        }

        let bid = side_metrics(bids, mid_f, &self.distance_bins);
        let ask = side_metrics(asks, mid_f, &self.distance_bins);
        let base = self.config.base_mm_notional;

        Some(MetricsPoint {
            ts: now,
            symbol: symbol.to_string(),
            best_bid: best_bid.price,
            best_ask: best_ask.price,
            mid,
            depth: self.config.depth,
            base_mm_notional: base,
            total_notional_bid: bid.total_notional,
            total_notional_ask: ask.total_notional,
            distance_bins_bps: self.distance_bins.clone(),
            distance_bin_counts_bid: bid.bin_counts,
            distance_bin_counts_ask: ask.bin_counts,
            max_distance_bps_bid: bid.max_bps,
            max_distance_bps_ask: ask.max_bps,
            avg_distance_bps_bid: bid.avg_bps,
            avg_distance_bps_ask: ask.avg_bps,
            outlier_count_bid: metrics_outlier_count(bids),
            outlier_count_ask: metrics_outlier_count(asks),
            large_levels_bid: large_levels(bids, mid_f, base),
            large_levels_ask: large_levels(asks, mid_f, base),
            move_stats,
            exchanges,
        })
    }
}

fn bps_from_mid(price: Decimal, mid: f64) -> f64 {
    let price = price.to_f64().unwrap_or(0.0);
    ((price - mid).abs() / mid) * 10_000.0
}

/// Merges venue books by price with summed sizes, truncated to `depth`.
fn merge_books(
    books: &[Option<&VenueBook>],
    depth: usize,
) -> (Vec<BookLevel>, Vec<BookLevel>) {
    let mut bid_map: BTreeMap<Decimal, Decimal> = BTreeMap::new();
    let mut ask_map: BTreeMap<Decimal, Decimal> = BTreeMap::new();
    for book in books.iter().copied().flatten() {
        for level in &book.bids {
            *bid_map.entry(level.price).or_default() += level.size;
        }
        for level in &book.asks {
            *ask_map.entry(level.price).or_default() += level.size;
        }
    }

    let bids = bid_map
        .iter()
        .rev()
        .take(depth)
        .map(|(&price, &size)| BookLevel { price, size })
        .collect();
    let asks = ask_map
        .iter()
        .take(depth)
        .map(|(&price, &size)| BookLevel { price, size })
        .collect();
    (bids, asks)
}

fn merged_move_stats(a: &Option<VenueBook>, b: &Option<VenueBook>) -> BookMoveStats {
    let mut stats = BookMoveStats::default();
    if let Some(book) = a {
        stats.merge(&book.move_stats);
    }
    if let Some(book) = b {
        stats.merge(&book.move_stats);
    }
    stats
}

/// Levels as the wire expects them: `[price, size]` string pairs.
fn wire_levels(levels: &[BookLevel]) -> serde_json::Value {
    serde_json::Value::Array(
        levels
            .iter()
            .map(|level| serde_json::json!([level.price.to_string(), level.size.to_string()]))
            .collect(),
    )
}

fn side_mid(bids: &[BookLevel], asks: &[BookLevel]) -> Option<Decimal> {
    let best_bid = bids.first()?.price;
    let best_ask = asks.first()?.price;
    Some((best_bid + best_ask) / Decimal::TWO)
}

struct SideCalc {
    total_notional: Decimal,
    bin_counts: Vec<u32>,
    max_bps: f64,
    avg_bps: f64,
}

/// Distance histogram and notional totals for one side. Bin edges are
/// upper bounds; the extra final bucket counts levels beyond the last edge.
fn side_metrics(levels: &[BookLevel], mid: f64, bins: &[f64]) -> SideCalc {
    let mut bin_counts = vec![0u32; bins.len() + 1];
    let mut total_notional = Decimal::ZERO;
    let mut max_bps = 0.0f64;
    let mut sum_bps = 0.0f64;

    for level in levels {
        total_notional += level.price * level.size;
        let bps = bps_from_mid(level.price, mid);
        max_bps = max_bps.max(bps);
        sum_bps += bps;

        let bucket = bins
            .iter()
            .position(|&edge| bps <= edge)
            .unwrap_or(bins.len());
        bin_counts[bucket] += 1;
    }

    let avg_bps = if levels.is_empty() {
        0.0
    } else {
        sum_bps / levels.len() as f64
    };

    SideCalc {
        total_notional,
        bin_counts,
        max_bps,
        avg_bps,
    }
}

/// Levels whose notional clears the base bucket, biggest first, capped at
/// five per side.
fn large_levels(levels: &[BookLevel], mid: f64, base_mm_notional: f64) -> Vec<LargeLevel> {
    let mut out: Vec<LargeLevel> = levels
        .iter()
        .filter_map(|level| {
            let notional = level.price * level.size;
            (notional.to_f64().unwrap_or(0.0) >= base_mm_notional).then(|| LargeLevel {
                price: level.price,
                size: level.size,
                notional,
                bps_from_mid: bps_from_mid(level.price, mid),
            })
        })
        .collect();
    out.sort_by(|a, b| b.notional.cmp(&a.notional));
    out.truncate(LARGE_LEVELS_PER_SIDE);
    out
}
