//! Resting-size outlier detection.
//!
//! Z-scores use the population standard deviation over one side's sizes. A
//! side with zero deviation, an empty side, or a non-positive mid produces
//! no outliers — that venue simply has no data this tick.

use depthwatch_core::{Exchange, Market, Side, Z_METRICS, Z_OUTLIER};
use depthwatch_data::{OutlierObservation, OutlierRecord};
use depthwatch_feeds::BookLevel;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Levels considered per side for detection and enrichment context
/// (depths, imbalance, book snapshot, level rank).
const CONTEXT_LEVELS: usize = 20;

/// Population z-scores for one side's sizes. `None` when the deviation is
/// zero (including a single-level side).
#[must_use]
pub fn population_zscores(sizes: &[f64]) -> Option<Vec<f64>> {
    if sizes.is_empty() {
        return None;
    }
    let n = sizes.len() as f64;
    let mean = sizes.iter().sum::<f64>() / n;
    let variance = sizes.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return None;
    }
    Some(sizes.iter().map(|s| (s - mean) / std_dev).collect())
}

/// Count of levels at or beyond the metrics z-threshold, for the
/// `outlierCount` summary fields.
#[must_use]
pub fn metrics_outlier_count(levels: &[BookLevel]) -> u32 {
    let sizes: Vec<f64> = levels
        .iter()
        .map(|l| l.size.to_f64().unwrap_or(0.0))
        .collect();
    match population_zscores(&sizes) {
        Some(zs) => zs.iter().filter(|&&z| z >= Z_METRICS).count() as u32,
        None => 0,
    }
}

/// One venue book presented to the detector.
pub struct VenueSnapshot<'a> {
    pub ts: i64,
    pub symbol: &'a str,
    pub market: Market,
    pub exchange: Exchange,
    pub bids: &'a [BookLevel],
    pub asks: &'a [BookLevel],
    pub vol_1m: f64,
    pub vol_5m: f64,
}

impl VenueSnapshot<'_> {
    /// Mid of this venue's best bid and ask; `None` when either side is
    /// empty or the mid is non-positive.
    #[must_use]
    pub fn mid(&self) -> Option<Decimal> {
        let best_bid = self.bids.first()?.price;
        let best_ask = self.asks.first()?.price;
        let mid = (best_bid + best_ask) / Decimal::TWO;
        (mid > Decimal::ZERO).then_some(mid)
    }
}

fn bps_from_mid(price: Decimal, mid: f64) -> f64 {
    let price = price.to_f64().unwrap_or(0.0);
    ((price - mid).abs() / mid) * 10_000.0
}

/// Compact JSON string of the top-20 of both sides, stored on spans.
fn book_snapshot(bids: &[BookLevel], asks: &[BookLevel]) -> String {
    let side = |levels: &[BookLevel]| -> Vec<[String; 2]> {
        levels
            .iter()
            .take(CONTEXT_LEVELS)
            .map(|l| [l.price.to_string(), l.size.to_string()])
            .collect()
    };
    serde_json::json!({ "bids": side(bids), "asks": side(asks) }).to_string()
}

/// Detects outliers on both sides of one venue book and attaches the
/// enrichment context the span tracker stores at span open and close.
///
/// Z-scores are measured over the side's full delivered levels, but only
/// levels inside the top-20 context window are reported, so `level_rank`
/// is always a position within that window.
#[must_use]
pub fn detect(snapshot: &VenueSnapshot<'_>) -> Vec<OutlierObservation> {
    let Some(mid) = snapshot.mid() else {
        return Vec::new();
    };
    let mid_f = mid.to_f64().unwrap_or(0.0);
    if mid_f <= 0.0 {
        return Vec::new();
    }

    let best_bid = snapshot.bids[0];
    let best_ask = snapshot.asks[0];

    let depth_of = |levels: &[BookLevel]| -> Decimal {
        levels
            .iter()
            .take(CONTEXT_LEVELS)
            .map(|l| l.size)
            .sum::<Decimal>()
    };
    let bid_depth = depth_of(snapshot.bids);
    let ask_depth = depth_of(snapshot.asks);

    let total_depth = bid_depth + ask_depth;
    let imbalance = if total_depth > Decimal::ZERO {
        ((bid_depth - ask_depth) / total_depth).to_f64().unwrap_or(0.0)
    } else {
        0.0
    };

    let spread_bps = ((best_ask.price - best_bid.price) / mid * Decimal::from(10_000))
        .to_f64()
        .unwrap_or(0.0);

    let best_size_total = best_bid.size + best_ask.size;
    let microprice = if best_size_total > Decimal::ZERO {
        (best_ask.price * best_bid.size + best_bid.price * best_ask.size) / best_size_total
    } else {
        mid
    };

    let book = book_snapshot(snapshot.bids, snapshot.asks);

    let mut observations = Vec::new();
    for (side, levels) in [(Side::Bid, snapshot.bids), (Side::Ask, snapshot.asks)] {
        let sizes: Vec<f64> = levels
            .iter()
            .map(|l| l.size.to_f64().unwrap_or(0.0))
            .collect();
        let Some(zscores) = population_zscores(&sizes) else {
            continue;
        };

        // Only the context window is reported: every rank stays within the
        // top-20, and deeper levels never reach the span tracker.
        for (index, (level, z)) in levels
            .iter()
            .take(CONTEXT_LEVELS)
            .zip(&zscores)
            .enumerate()
        {
            if *z < Z_OUTLIER {
                continue;
            }
            observations.push(OutlierObservation {
                record: OutlierRecord {
                    ts: snapshot.ts,
                    symbol: snapshot.symbol.to_string(),
                    market: snapshot.market,
                    exchange: snapshot.exchange,
                    side,
                    price: level.price,
                    size: level.size,
                    z_score: *z,
                    bps_from_mid: bps_from_mid(level.price, mid_f),
                },
                mid,
                book: book.clone(),
                best_bid: best_bid.price,
                best_ask: best_ask.price,
                spread_bps,
                imbalance,
                bid_depth,
                ask_depth,
                microprice,
                level_rank: (index + 1) as u32,
                vol_1m: snapshot.vol_1m,
                vol_5m: snapshot.vol_5m,
            });
        }
    }
    observations
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn levels(pairs: &[(i64, i64)]) -> Vec<BookLevel> {
        pairs
            .iter()
            .map(|&(p, s)| BookLevel {
                price: Decimal::from(p),
                size: Decimal::from(s),
            })
            .collect()
    }

    fn snapshot<'a>(bids: &'a [BookLevel], asks: &'a [BookLevel]) -> VenueSnapshot<'a> {
        VenueSnapshot {
            ts: 1_000,
            symbol: "BTCUSDT",
            market: Market::Spot,
            exchange: Exchange::Bybit,
            bids,
            asks,
            vol_1m: 0.001,
            vol_5m: 0.002,
        }
    }

    #[test]
    fn test_moderate_skew_is_not_an_outlier() {
        // All three size profiles top out near z ~ 2-3.3, well under 5.
        for sizes in [
            vec![10, 10, 10, 10, 1000],
            vec![1, 1, 1, 1, 100],
            vec![1, 1, 1, 1, 1, 1, 1, 1, 1, 1000],
        ] {
            let bids: Vec<BookLevel> = sizes
                .iter()
                .enumerate()
                .map(|(i, &s)| BookLevel {
                    price: Decimal::from(100 - i as i64),
                    size: Decimal::from(s),
                })
                .collect();
            let asks = levels(&[(101, 1)]);
            let observations = detect(&snapshot(&bids, &asks));
            assert!(
                observations.iter().all(|o| o.record.side != Side::Bid),
                "sizes {sizes:?} should not produce bid outliers"
            );
        }
    }

    /// 29 one-size levels plus one 100000 inside the window: the big
    /// level's z is ~ 5.4, sorted to rank 6.
    fn bids_with_outlier_at_rank_6() -> Vec<BookLevel> {
        let mut pairs: Vec<(i64, i64)> = (996..=1000).rev().map(|p| (p, 1)).collect();
        pairs.push((995, 100_000));
        pairs.extend((971..=994).rev().map(|p| (p, 1)));
        levels(&pairs)
    }

    #[test]
    fn test_extreme_level_is_detected() {
        let bids = bids_with_outlier_at_rank_6();
        let asks = levels(&[(1001, 1)]);

        let observations = detect(&snapshot(&bids, &asks));
        let bid_outliers: Vec<_> = observations
            .iter()
            .filter(|o| o.record.side == Side::Bid)
            .collect();
        assert_eq!(bid_outliers.len(), 1);
        let outlier = bid_outliers[0];
        assert_eq!(outlier.record.price, dec!(995));
        assert!(outlier.record.z_score >= Z_OUTLIER);
        assert_eq!(outlier.level_rank, 6);
    }

    #[test]
    fn test_outlier_beyond_top20_is_not_reported() {
        // Same size profile, but the big level sorts to rank 30: its
        // full-side z clears the threshold, yet it sits outside the
        // context window and must never be reported.
        let mut pairs: Vec<(i64, i64)> = (0..29).map(|i| (1000 - i, 1)).collect();
        pairs.push((900, 100_000));
        let bids = levels(&pairs);
        let asks = levels(&[(1001, 1)]);

        let sizes: Vec<f64> = bids.iter().map(|l| l.size.to_f64().unwrap()).collect();
        let max_z = population_zscores(&sizes)
            .unwrap()
            .into_iter()
            .fold(f64::MIN, f64::max);
        assert!(max_z >= Z_OUTLIER);

        let observations = detect(&snapshot(&bids, &asks));
        assert!(observations.iter().all(|o| o.record.side != Side::Bid));
    }

    #[test]
    fn test_single_level_side_has_no_outliers() {
        let bids = levels(&[(100, 500)]);
        let asks = levels(&[(101, 1), (102, 1)]);
        let observations = detect(&snapshot(&bids, &asks));
        assert!(observations.iter().all(|o| o.record.side != Side::Bid));
    }

    #[test]
    fn test_empty_side_yields_nothing() {
        let bids = levels(&[(100, 1)]);
        let observations = detect(&snapshot(&bids, &[]));
        assert!(observations.is_empty());
    }

    #[test]
    fn test_enrichment_context() {
        let bids = bids_with_outlier_at_rank_6();
        let asks = levels(&[(1001, 2)]);

        let observations = detect(&snapshot(&bids, &asks));
        let outlier = observations
            .iter()
            .find(|o| o.record.side == Side::Bid)
            .unwrap();

        // Context depths cover the top-20 only: 19 ones plus the big level.
        assert_eq!(outlier.bid_depth, dec!(100019));
        assert_eq!(outlier.ask_depth, dec!(2));
        assert!(outlier.imbalance > 0.0);
        assert!(outlier.book.contains("bids"));
        assert_eq!(outlier.best_bid, dec!(1000));
        assert_eq!(outlier.best_ask, dec!(1001));
        assert_eq!(outlier.level_rank, 6);
        assert_eq!(outlier.vol_1m, 0.001);
    }

    #[test]
    fn test_microprice_falls_back_to_mid_on_zero_sizes() {
        let bids = vec![BookLevel {
            price: dec!(100),
            size: Decimal::ZERO,
        }];
        let asks = vec![BookLevel {
            price: dec!(102),
            size: Decimal::ZERO,
        }];
        let snap = snapshot(&bids, &asks);
        // No outliers possible (zero sizes), but the mid math must hold.
        assert_eq!(snap.mid(), Some(dec!(101)));
        assert!(detect(&snap).is_empty());
    }

    #[test]
    fn test_metrics_outlier_count_uses_lower_threshold() {
        // 19 ones and one 10000: z ~ 4.36 — counted at Z_METRICS=4 but not
        // an outlier at Z_OUTLIER=5.
        let mut pairs: Vec<(i64, i64)> = (0..19).map(|i| (1000 - i, 1)).collect();
        pairs.push((900, 10_000));
        let bids = levels(&pairs);

        assert_eq!(metrics_outlier_count(&bids), 1);

        let asks = levels(&[(1001, 1)]);
        let observations = detect(&snapshot(&bids, &asks));
        assert!(observations.iter().all(|o| o.record.side != Side::Bid));
    }

    #[test]
    fn test_uniform_sizes_count_zero() {
        let bids = levels(&[(100, 5), (99, 5), (98, 5)]);
        assert_eq!(metrics_outlier_count(&bids), 0);
    }
}
