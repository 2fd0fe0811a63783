//! Rolling mid-price history per book, for realized volatility.

use depthwatch_core::{Exchange, Market};
use std::collections::{HashMap, VecDeque};

/// History retention; also the largest supported volatility window.
const RETENTION_MS: i64 = 5 * 60 * 1_000;

/// One minute, in ms.
pub const VOL_WINDOW_1M_MS: i64 = 60 * 1_000;

/// Five minutes, in ms.
pub const VOL_WINDOW_5M_MS: i64 = 5 * 60 * 1_000;

type Key = (Exchange, Market, String);

/// Per-book rolling `(ts, mid)` series with 5-minute retention.
#[derive(Debug, Default)]
pub struct MidHistory {
    series: HashMap<Key, VecDeque<(i64, f64)>>,
}

impl MidHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one observation and drops expired ones.
    pub fn record(&mut self, exchange: Exchange, market: Market, symbol: &str, ts: i64, mid: f64) {
        if mid <= 0.0 {
            return;
        }
        let series = self
            .series
            .entry((exchange, market, symbol.to_string()))
            .or_default();
        series.push_back((ts, mid));

        let cutoff = ts - RETENTION_MS;
        while series.front().is_some_and(|&(t, _)| t < cutoff) {
            series.pop_front();
        }
    }

    /// Realized volatility over the trailing window:
    /// `sqrt(sum(ln(m_i/m_{i-1})^2) / (n-1))` over observations with
    /// `ts >= now - window`. Zero when fewer than two observations fall in
    /// the window.
    #[must_use]
    pub fn realized_vol(
        &self,
        exchange: Exchange,
        market: Market,
        symbol: &str,
        now: i64,
        window_ms: i64,
    ) -> f64 {
        let Some(series) = self
            .series
            .get(&(exchange, market, symbol.to_string()))
        else {
            return 0.0;
        };

        let cutoff = now - window_ms;
        let mids: Vec<f64> = series
            .iter()
            .filter(|&&(ts, _)| ts >= cutoff)
            .map(|&(_, mid)| mid)
            .collect();
        if mids.len() < 2 {
            return 0.0;
        }

        let sum_sq: f64 = mids
            .windows(2)
            .map(|pair| (pair[1] / pair[0]).ln().powi(2))
            .sum();
        (sum_sq / (mids.len() - 1) as f64).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vol_needs_two_points() {
        let mut history = MidHistory::new();
        assert_eq!(
            history.realized_vol(Exchange::Bybit, Market::Spot, "BTCUSDT", 1_000, 60_000),
            0.0
        );

        history.record(Exchange::Bybit, Market::Spot, "BTCUSDT", 1_000, 100.0);
        assert_eq!(
            history.realized_vol(Exchange::Bybit, Market::Spot, "BTCUSDT", 1_000, 60_000),
            0.0
        );
    }

    #[test]
    fn test_vol_constant_mid_is_zero() {
        let mut history = MidHistory::new();
        for i in 0..5 {
            history.record(Exchange::Bybit, Market::Spot, "BTCUSDT", i * 1_000, 100.0);
        }
        assert_eq!(
            history.realized_vol(Exchange::Bybit, Market::Spot, "BTCUSDT", 5_000, 60_000),
            0.0
        );
    }

    #[test]
    fn test_vol_matches_formula() {
        let mut history = MidHistory::new();
        history.record(Exchange::Bybit, Market::Spot, "BTCUSDT", 0, 100.0);
        history.record(Exchange::Bybit, Market::Spot, "BTCUSDT", 1_000, 101.0);
        history.record(Exchange::Bybit, Market::Spot, "BTCUSDT", 2_000, 100.5);

        let r1 = (101.0f64 / 100.0).ln();
        let r2 = (100.5f64 / 101.0).ln();
        let expected = ((r1 * r1 + r2 * r2) / 2.0).sqrt();

        let vol = history.realized_vol(Exchange::Bybit, Market::Spot, "BTCUSDT", 2_000, 60_000);
        assert!((vol - expected).abs() < 1e-12);
    }

    #[test]
    fn test_window_excludes_old_points() {
        let mut history = MidHistory::new();
        history.record(Exchange::Bybit, Market::Spot, "BTCUSDT", 0, 50.0);
        history.record(Exchange::Bybit, Market::Spot, "BTCUSDT", 100_000, 100.0);
        history.record(Exchange::Bybit, Market::Spot, "BTCUSDT", 101_000, 100.0);

        // The 50.0 point is outside the 60 s window, so returns are flat.
        let vol =
            history.realized_vol(Exchange::Bybit, Market::Spot, "BTCUSDT", 101_000, 60_000);
        assert_eq!(vol, 0.0);
    }

    #[test]
    fn test_retention_caps_series() {
        let mut history = MidHistory::new();
        history.record(Exchange::Mexc, Market::Perp, "BTCUSDT", 0, 100.0);
        history.record(Exchange::Mexc, Market::Perp, "BTCUSDT", RETENTION_MS + 1_000, 101.0);

        let series = history
            .series
            .get(&(Exchange::Mexc, Market::Perp, "BTCUSDT".to_string()))
            .unwrap();
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_non_positive_mid_ignored() {
        let mut history = MidHistory::new();
        history.record(Exchange::Bybit, Market::Spot, "BTCUSDT", 0, 0.0);
        assert!(history.series.is_empty());
    }
}
