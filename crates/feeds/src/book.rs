//! Mutable order-book state and the per-book level tracker.
//!
//! Each book is owned by exactly one feed loop; the metrics tick reads a
//! sorted top-N snapshot and resets the tracker under the same per-book
//! lock (see [`crate::registry`]).

use depthwatch_core::Side;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use depthwatch_data::{BookMoveStats, MoveStats};

/// One sorted book level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Per-book add/change/removal counters, reset on each metrics tick.
#[derive(Debug, Default)]
pub struct LevelTracker {
    bid: MoveStats,
    ask: MoveStats,
}

impl LevelTracker {
    /// Records one level transition. `None` sizes mean absent: an add has
    /// no previous size, a removal no next size. A same-size replacement is
    /// not a change.
    pub fn record(&mut self, side: Side, prev: Option<Decimal>, next: Option<Decimal>) {
        let stats = match side {
            Side::Bid => &mut self.bid,
            Side::Ask => &mut self.ask,
        };

        match (prev, next) {
            (None, Some(new_size)) => {
                stats.adds += 1;
                stats.size_delta += new_size;
            }
            (Some(prev_size), None) => {
                stats.removals += 1;
                stats.size_delta += prev_size;
            }
            (Some(prev_size), Some(new_size)) if prev_size != new_size => {
                stats.changes += 1;
                stats.size_delta += (new_size - prev_size).abs();
            }
            _ => {}
        }
    }

    /// Returns the accumulated counters and resets them.
    pub fn snapshot_and_reset(&mut self) -> BookMoveStats {
        BookMoveStats {
            bid: std::mem::take(&mut self.bid),
            ask: std::mem::take(&mut self.ask),
        }
    }
}

/// Price-keyed book for one venue, market and symbol.
///
/// Invariant: every entry has `size > 0`; deletions remove the entry.
#[derive(Debug, Default)]
pub struct BookState {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    tracker: LevelTracker,
    /// Epoch ms of the last applied venue message; 0 until first data.
    pub last_update_ms: i64,
}

impl BookState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn side_mut(&mut self, side: Side) -> &mut BTreeMap<Decimal, Decimal> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    fn side(&self, side: Side) -> &BTreeMap<Decimal, Decimal> {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Applies one incremental `[price, size]` update. A zero size deletes
    /// the level; deleting an absent level is a no-op and records nothing.
    pub fn apply_update(&mut self, side: Side, price: Decimal, size: Decimal) {
        let map = self.side_mut(side);
        if size.is_zero() {
            if let Some(prev) = map.remove(&price) {
                self.tracker.record(side, Some(prev), None);
            }
            return;
        }
        let prev = map.insert(price, size);
        self.tracker.record(side, prev, Some(size));
    }

    /// Replaces one side with a full snapshot, recording the diff against
    /// the previous state: vanished prices become removals. Non-positive
    /// snapshot sizes are ignored.
    pub fn apply_snapshot(&mut self, side: Side, levels: &[(Decimal, Decimal)]) {
        let mut next = BTreeMap::new();
        for &(price, size) in levels {
            if size > Decimal::ZERO {
                next.insert(price, size);
            }
        }

        let prev = std::mem::replace(self.side_mut(side), BTreeMap::new());
        for (&price, &size) in &next {
            self.tracker.record(side, prev.get(&price).copied(), Some(size));
        }
        for (&price, &size) in &prev {
            if !next.contains_key(&price) {
                self.tracker.record(side, Some(size), None);
            }
        }
        *self.side_mut(side) = next;
    }

    /// Sorted top-N: bids descending, asks ascending by price.
    #[must_use]
    pub fn top_n(&self, side: Side, n: usize) -> Vec<BookLevel> {
        let map = self.side(side);
        match side {
            Side::Bid => map
                .iter()
                .rev()
                .take(n)
                .map(|(&price, &size)| BookLevel { price, size })
                .collect(),
            Side::Ask => map
                .iter()
                .take(n)
                .map(|(&price, &size)| BookLevel { price, size })
                .collect(),
        }
    }

    #[must_use]
    pub fn best_bid(&self) -> Option<BookLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(&price, &size)| BookLevel { price, size })
    }

    #[must_use]
    pub fn best_ask(&self) -> Option<BookLevel> {
        self.asks
            .iter()
            .next()
            .map(|(&price, &size)| BookLevel { price, size })
    }

    /// True when either side has at least one level.
    #[must_use]
    pub fn has_data(&self) -> bool {
        !self.bids.is_empty() || !self.asks.is_empty()
    }

    /// Tick-side read of the accumulated move stats; resets the tracker.
    pub fn take_move_stats(&mut self) -> BookMoveStats {
        self.tracker.snapshot_and_reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_incremental_then_delete() {
        let mut book = BookState::new();

        book.apply_update(Side::Bid, dec!(100.0), dec!(2.0));
        book.apply_update(Side::Bid, dec!(101.0), dec!(1.0));

        let bids = book.top_n(Side::Bid, 10);
        assert_eq!(bids.len(), 2);
        assert_eq!(bids[0].price, dec!(101.0));
        assert_eq!(bids[0].size, dec!(1.0));
        assert_eq!(bids[1].price, dec!(100.0));
        assert_eq!(bids[1].size, dec!(2.0));

        book.apply_update(Side::Bid, dec!(100.0), Decimal::ZERO);
        let bids = book.top_n(Side::Bid, 10);
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].price, dec!(101.0));

        let stats = book.take_move_stats();
        assert_eq!(stats.bid.adds, 2);
        assert_eq!(stats.bid.removals, 1);
        // 2.0 + 1.0 added, then 2.0 removed
        assert_eq!(stats.bid.size_delta, dec!(5.0));
    }

    #[test]
    fn test_delete_absent_level_is_noop() {
        let mut book = BookState::new();
        book.apply_update(Side::Ask, dec!(100), Decimal::ZERO);

        assert!(!book.has_data());
        let stats = book.take_move_stats();
        assert_eq!(stats.ask, MoveStats::default());
    }

    #[test]
    fn test_same_size_replace_is_not_a_change() {
        let mut book = BookState::new();
        book.apply_update(Side::Bid, dec!(100), dec!(1.0));
        book.take_move_stats();

        book.apply_update(Side::Bid, dec!(100), dec!(1.0));
        let stats = book.take_move_stats();
        assert_eq!(stats.bid.changes, 0);
        assert_eq!(stats.bid.size_delta, Decimal::ZERO);
    }

    #[test]
    fn test_snapshot_diff() {
        let mut book = BookState::new();
        book.apply_update(Side::Bid, dec!(100), dec!(1));
        book.apply_update(Side::Bid, dec!(99), dec!(2));
        book.take_move_stats();

        book.apply_snapshot(Side::Bid, &[(dec!(100), dec!(3)), (dec!(98), dec!(1))]);

        let bids = book.top_n(Side::Bid, 10);
        assert_eq!(bids.len(), 2);
        assert_eq!(bids[0].price, dec!(100));
        assert_eq!(bids[0].size, dec!(3));
        assert_eq!(bids[1].price, dec!(98));

        let stats = book.take_move_stats();
        assert_eq!(stats.bid.changes, 1); // 100: 1 -> 3
        assert_eq!(stats.bid.adds, 1); // 98
        assert_eq!(stats.bid.removals, 1); // 99
    }

    #[test]
    fn test_snapshot_ignores_non_positive_sizes() {
        let mut book = BookState::new();
        book.apply_snapshot(Side::Ask, &[(dec!(101), dec!(1)), (dec!(102), Decimal::ZERO)]);

        let asks = book.top_n(Side::Ask, 10);
        assert_eq!(asks.len(), 1);
        assert_eq!(asks[0].price, dec!(101));
    }

    #[test]
    fn test_top_n_truncates_and_sorts() {
        let mut book = BookState::new();
        for i in 0..10 {
            book.apply_update(Side::Ask, Decimal::from(100 + i), dec!(1));
            book.apply_update(Side::Bid, Decimal::from(99 - i), dec!(1));
        }

        let asks = book.top_n(Side::Ask, 3);
        let ask_prices: Vec<Decimal> = asks.iter().map(|l| l.price).collect();
        assert_eq!(ask_prices, vec![dec!(100), dec!(101), dec!(102)]);

        let bids = book.top_n(Side::Bid, 3);
        let bid_prices: Vec<Decimal> = bids.iter().map(|l| l.price).collect();
        assert_eq!(bid_prices, vec![dec!(99), dec!(98), dec!(97)]);
    }

    #[test]
    fn test_best_bid_ask() {
        let mut book = BookState::new();
        book.apply_update(Side::Bid, dec!(99), dec!(1));
        book.apply_update(Side::Bid, dec!(100), dec!(2));
        book.apply_update(Side::Ask, dec!(101), dec!(3));
        book.apply_update(Side::Ask, dec!(102), dec!(4));

        assert_eq!(book.best_bid().unwrap().price, dec!(100));
        assert_eq!(book.best_ask().unwrap().price, dec!(101));
    }

    #[test]
    fn test_change_accumulates_absolute_delta() {
        let mut book = BookState::new();
        book.apply_update(Side::Bid, dec!(100), dec!(5));
        book.take_move_stats();

        book.apply_update(Side::Bid, dec!(100), dec!(2));
        let stats = book.take_move_stats();
        assert_eq!(stats.bid.changes, 1);
        assert_eq!(stats.bid.size_delta, dec!(3));
    }
}
