//! Large-move detection between consecutive merged perp books.
//!
//! A move qualifies when its notional delta clears
//! `max(baseMmNotional / windowLevels, floor)`, where `windowLevels` counts
//! the next book's levels within the configured bps window of mid: the
//! busier the window, the higher the bar per level.

use depthwatch_core::Side;
use depthwatch_data::LevelMoveRecord;
use depthwatch_feeds::BookLevel;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Qualification thresholds, taken from config at startup.
#[derive(Debug, Clone, Copy)]
pub struct LargeMoveConfig {
    pub base_mm_notional: f64,
    pub window_bps: f64,
    pub notional_floor: f64,
}

fn bps_from_mid(price: Decimal, mid: f64) -> f64 {
    let price = price.to_f64().unwrap_or(0.0);
    ((price - mid).abs() / mid) * 10_000.0
}

fn side_map(levels: &[BookLevel]) -> BTreeMap<Decimal, Decimal> {
    levels.iter().map(|l| (l.price, l.size)).collect()
}

/// Compares one side of two consecutive books and returns qualifying moves.
fn scan_side(
    ts: i64,
    symbol: &str,
    side: Side,
    prev: &[BookLevel],
    next: &[BookLevel],
    mid: f64,
    min_notional: f64,
) -> Vec<LevelMoveRecord> {
    let prev = side_map(prev);
    let next = side_map(next);

    let mut prices: Vec<Decimal> = prev.keys().chain(next.keys()).copied().collect();
    prices.sort();
    prices.dedup();

    let mut moves = Vec::new();
    for price in prices {
        let prev_size = prev.get(&price).copied().unwrap_or(Decimal::ZERO);
        let next_size = next.get(&price).copied().unwrap_or(Decimal::ZERO);
        let delta_size = next_size - prev_size;
        if delta_size.is_zero() {
            continue;
        }

        let notional_delta = delta_size.abs() * price;
        if notional_delta.to_f64().unwrap_or(0.0) < min_notional {
            continue;
        }

        moves.push(LevelMoveRecord {
            ts,
            symbol: symbol.to_string(),
            side,
            price,
            prev_size,
            next_size,
            delta_size,
            notional_delta,
            bps_from_mid: bps_from_mid(price, mid),
        });
    }
    moves
}

/// Detects large moves between the previous and next merged book.
///
/// Returns nothing when `mid` is non-positive.
#[must_use]
pub fn detect_large_moves(
    ts: i64,
    symbol: &str,
    prev_bids: &[BookLevel],
    prev_asks: &[BookLevel],
    next_bids: &[BookLevel],
    next_asks: &[BookLevel],
    mid: f64,
    config: &LargeMoveConfig,
) -> Vec<LevelMoveRecord> {
    if mid <= 0.0 {
        return Vec::new();
    }

    let window_levels = next_bids
        .iter()
        .chain(next_asks)
        .filter(|level| bps_from_mid(level.price, mid) <= config.window_bps)
        .count();
    let scaled = config.base_mm_notional / window_levels.max(1) as f64;
    let min_notional = scaled.max(config.notional_floor);

    let mut moves = scan_side(
        ts,
        symbol,
        Side::Bid,
        prev_bids,
        next_bids,
        mid,
        min_notional,
    );
    moves.extend(scan_side(
        ts,
        symbol,
        Side::Ask,
        prev_asks,
        next_asks,
        mid,
        min_notional,
    ));
    moves
}

/// The `per_side` biggest moves by absolute notional delta, for broadcast.
#[must_use]
pub fn top_moves(moves: &[LevelMoveRecord], per_side: usize) -> Vec<LevelMoveRecord> {
    let mut top = Vec::new();
    for side in [Side::Bid, Side::Ask] {
        let mut side_moves: Vec<LevelMoveRecord> = moves
            .iter()
            .filter(|m| m.side == side)
            .cloned()
            .collect();
        side_moves.sort_by(|a, b| {
            b.notional_delta
                .cmp(&a.notional_delta)
                .then_with(|| a.price.cmp(&b.price))
        });
        side_moves.truncate(per_side);
        top.extend(side_moves);
    }
    top
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn levels(pairs: &[(Decimal, Decimal)]) -> Vec<BookLevel> {
        pairs
            .iter()
            .map(|&(price, size)| BookLevel { price, size })
            .collect()
    }

    fn config() -> LargeMoveConfig {
        LargeMoveConfig {
            base_mm_notional: 30_000.0,
            window_bps: 200.0,
            notional_floor: 2_000.0,
        }
    }

    #[test]
    fn test_threshold_scaling_rejects_then_accepts() {
        let prev = levels(&[(dec!(101), dec!(50))]);

        // 150 * 101 = 15150 < 30000 / 1 window level: not reported.
        let next = levels(&[(dec!(101), dec!(200))]);
        let moves =
            detect_large_moves(1, "BTCUSDT", &[], &prev, &[], &next, 100.0, &config());
        assert!(moves.is_empty());

        // 450 * 101 = 45450 >= 30000: reported.
        let next = levels(&[(dec!(101), dec!(500))]);
        let moves =
            detect_large_moves(1, "BTCUSDT", &[], &prev, &[], &next, 100.0, &config());
        assert_eq!(moves.len(), 1);
        let mv = &moves[0];
        assert_eq!(mv.side, Side::Ask);
        assert_eq!(mv.delta_size, dec!(450));
        assert_eq!(mv.notional_delta, dec!(45450));
        assert!((mv.bps_from_mid - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_more_window_levels_lower_the_bar() {
        // Ten levels inside the window: scaled threshold is 3000.
        let next: Vec<BookLevel> = (0..10i64)
            .map(|i| BookLevel {
                // 100.0, 100.1, ... 100.9 — all within 200 bps of mid.
                price: Decimal::new(1_000 + i, 1),
                size: dec!(40),
            })
            .collect();
        // 40 * 100 = 4000 >= 3000, so every fresh level qualifies.
        let moves = detect_large_moves(1, "BTCUSDT", &[], &[], &[], &next, 100.0, &config());
        assert_eq!(moves.len(), 10);
    }

    #[test]
    fn test_floor_applies_when_window_is_busy() {
        // 100 levels in window: 30000/100 = 300, floored to 2000.
        let next: Vec<BookLevel> = (0..100i64)
            .map(|i| BookLevel {
                price: dec!(100) + Decimal::new(i, 2),
                size: dec!(15),
            })
            .collect();
        // 15 * ~100 = ~1500 < 2000: nothing qualifies.
        let moves = detect_large_moves(1, "BTCUSDT", &[], &[], &[], &next, 100.0, &config());
        assert!(moves.is_empty());
    }

    #[test]
    fn test_vanished_level_is_a_move() {
        let prev = levels(&[(dec!(100), dec!(500))]);
        let moves = detect_large_moves(1, "BTCUSDT", &prev, &[], &[], &[], 100.0, &config());
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].prev_size, dec!(500));
        assert_eq!(moves[0].next_size, Decimal::ZERO);
        assert_eq!(moves[0].delta_size, dec!(-500));
        assert_eq!(moves[0].notional_delta, dec!(50000));
    }

    #[test]
    fn test_zero_mid_yields_nothing() {
        let next = levels(&[(dec!(100), dec!(500))]);
        let moves = detect_large_moves(1, "BTCUSDT", &[], &[], &[], &next, 0.0, &config());
        assert!(moves.is_empty());
    }

    #[test]
    fn test_top_moves_per_side() {
        let mut moves = Vec::new();
        for i in 1..=12 {
            moves.push(LevelMoveRecord {
                ts: 1,
                symbol: "BTCUSDT".to_string(),
                side: if i % 2 == 0 { Side::Bid } else { Side::Ask },
                price: Decimal::from(100 + i),
                prev_size: Decimal::ZERO,
                next_size: Decimal::from(i),
                delta_size: Decimal::from(i),
                notional_delta: Decimal::from(i * 1_000),
                bps_from_mid: 1.0,
            });
        }

        let top = top_moves(&moves, 2);
        assert_eq!(top.len(), 4);
        let bids: Vec<_> = top.iter().filter(|m| m.side == Side::Bid).collect();
        assert_eq!(bids.len(), 2);
        // Biggest bid notionals are 12000 and 10000.
        assert_eq!(bids[0].notional_delta, dec!(12000));
        assert_eq!(bids[1].notional_delta, dec!(10000));
    }
}
