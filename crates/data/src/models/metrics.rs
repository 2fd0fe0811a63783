//! Per-tick metrics models: the aggregated [`MetricsPoint`] and its
//! per-venue [`ExchangeMetrics`] blocks.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-side level-churn counters accumulated between metrics ticks.
///
/// `size_delta` accumulates the new size for adds, the previous size for
/// removals, and `|new - prev|` for changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveStats {
    pub adds: u64,
    pub changes: u64,
    pub removals: u64,
    pub size_delta: Decimal,
}

impl MoveStats {
    /// Folds another side's counters into this one.
    pub fn merge(&mut self, other: &Self) {
        self.adds += other.adds;
        self.changes += other.changes;
        self.removals += other.removals;
        self.size_delta += other.size_delta;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adds == 0 && self.changes == 0 && self.removals == 0
    }
}

/// Bid and ask [`MoveStats`] for one book.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookMoveStats {
    pub bid: MoveStats,
    pub ask: MoveStats,
}

impl BookMoveStats {
    /// Folds another book's counters into this one (used when aggregating
    /// venues into the merged point).
    pub fn merge(&mut self, other: &Self) {
        self.bid.merge(&other.bid);
        self.ask.merge(&other.ask);
    }
}

/// A resting level whose notional clears the base market-making bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LargeLevel {
    pub price: Decimal,
    pub size: Decimal,
    pub notional: Decimal,
    pub bps_from_mid: f64,
}

/// Per-venue slice of a metrics point: same shape as the aggregated point
/// minus large levels and move stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeMetrics {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub mid: Decimal,
    pub total_notional_bid: Decimal,
    pub total_notional_ask: Decimal,
    pub distance_bin_counts_bid: Vec<u32>,
    pub distance_bin_counts_ask: Vec<u32>,
    pub max_distance_bps_bid: f64,
    pub max_distance_bps_ask: f64,
    pub avg_distance_bps_bid: f64,
    pub avg_distance_bps_ask: f64,
    pub outlier_count_bid: u32,
    pub outlier_count_ask: u32,
}

/// One aggregated metrics observation per symbol per tick.
///
/// `distance_bin_counts_*` always have `distance_bins_bps.len() + 1`
/// buckets; the last bucket counts levels beyond the largest bin edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPoint {
    /// Epoch milliseconds.
    pub ts: i64,
    pub symbol: String,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub mid: Decimal,
    /// Configured top-N depth the point was computed over.
    pub depth: usize,
    pub base_mm_notional: f64,
    pub total_notional_bid: Decimal,
    pub total_notional_ask: Decimal,
    pub distance_bins_bps: Vec<f64>,
    pub distance_bin_counts_bid: Vec<u32>,
    pub distance_bin_counts_ask: Vec<u32>,
    pub max_distance_bps_bid: f64,
    pub max_distance_bps_ask: f64,
    pub avg_distance_bps_bid: f64,
    pub avg_distance_bps_ask: f64,
    pub outlier_count_bid: u32,
    pub outlier_count_ask: u32,
    /// Up to five levels per side, sorted descending by notional.
    pub large_levels_bid: Vec<LargeLevel>,
    pub large_levels_ask: Vec<LargeLevel>,
    pub move_stats: BookMoveStats,
    /// Per-venue blocks, keyed by wire venue name; absent venues are simply
    /// missing, not errors.
    pub exchanges: BTreeMap<String, ExchangeMetrics>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_move_stats_merge() {
        let mut a = MoveStats {
            adds: 2,
            changes: 1,
            removals: 0,
            size_delta: dec!(3.5),
        };
        let b = MoveStats {
            adds: 1,
            changes: 0,
            removals: 2,
            size_delta: dec!(1.5),
        };

        a.merge(&b);

        assert_eq!(a.adds, 3);
        assert_eq!(a.changes, 1);
        assert_eq!(a.removals, 2);
        assert_eq!(a.size_delta, dec!(5.0));
    }

    #[test]
    fn test_move_stats_is_empty() {
        assert!(MoveStats::default().is_empty());

        let stats = MoveStats {
            adds: 1,
            ..MoveStats::default()
        };
        assert!(!stats.is_empty());
    }

    #[test]
    fn test_metrics_point_wire_shape() {
        let point = MetricsPoint {
            ts: 1_700_000_000_000,
            symbol: "BTCUSDT".to_string(),
            best_bid: dec!(100),
            best_ask: dec!(101),
            mid: dec!(100.5),
            depth: 50,
            base_mm_notional: 30_000.0,
            total_notional_bid: dec!(5000),
            total_notional_ask: dec!(4000),
            distance_bins_bps: vec![5.0, 10.0],
            distance_bin_counts_bid: vec![1, 0, 0],
            distance_bin_counts_ask: vec![0, 1, 0],
            max_distance_bps_bid: 3.0,
            max_distance_bps_ask: 8.0,
            avg_distance_bps_bid: 3.0,
            avg_distance_bps_ask: 8.0,
            outlier_count_bid: 0,
            outlier_count_ask: 0,
            large_levels_bid: vec![],
            large_levels_ask: vec![],
            move_stats: BookMoveStats::default(),
            exchanges: BTreeMap::new(),
        };

        let json = serde_json::to_value(&point).unwrap();
        assert!(json.get("bestBid").is_some());
        assert!(json.get("distanceBinCountsBid").is_some());
        assert!(json.get("moveStats").is_some());
        // Bin count arrays carry one overflow bucket beyond the edges.
        assert_eq!(
            json["distanceBinCountsBid"].as_array().unwrap().len(),
            json["distanceBinsBps"].as_array().unwrap().len() + 1
        );
    }

    #[test]
    fn test_metrics_point_roundtrip() {
        let point = MetricsPoint {
            ts: 1,
            symbol: "ETHUSDT".to_string(),
            best_bid: dec!(2000),
            best_ask: dec!(2001),
            mid: dec!(2000.5),
            depth: 50,
            base_mm_notional: 30_000.0,
            total_notional_bid: Decimal::ZERO,
            total_notional_ask: Decimal::ZERO,
            distance_bins_bps: vec![],
            distance_bin_counts_bid: vec![0],
            distance_bin_counts_ask: vec![0],
            max_distance_bps_bid: 0.0,
            max_distance_bps_ask: 0.0,
            avg_distance_bps_bid: 0.0,
            avg_distance_bps_ask: 0.0,
            outlier_count_bid: 0,
            outlier_count_ask: 0,
            large_levels_bid: vec![LargeLevel {
                price: dec!(2000),
                size: dec!(20),
                notional: dec!(40000),
                bps_from_mid: 2.5,
            }],
            large_levels_ask: vec![],
            move_stats: BookMoveStats::default(),
            exchanges: BTreeMap::new(),
        };

        let text = serde_json::to_string(&point).unwrap();
        let back: MetricsPoint = serde_json::from_str(&text).unwrap();
        assert_eq!(point, back);
    }
}
