//! Shared registry of per-venue book states.
//!
//! Built once at startup for every (venue, market, symbol) combination and
//! never resized. Each book sits behind its own mutex: the owning feed loop
//! applies updates, the metrics tick snapshots and resets under the same
//! lock. Neither holds the lock across an await point.

use depthwatch_core::{Exchange, Market};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::book::BookState;

/// Identity of one book.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookKey {
    pub exchange: Exchange,
    pub market: Market,
    pub symbol: String,
}

impl BookKey {
    #[must_use]
    pub fn new(exchange: Exchange, market: Market, symbol: impl Into<String>) -> Self {
        Self {
            exchange,
            market,
            symbol: symbol.into(),
        }
    }
}

/// Immutable map of all monitored books.
pub struct BookRegistry {
    books: HashMap<BookKey, Arc<Mutex<BookState>>>,
}

impl BookRegistry {
    /// Creates one empty book per venue and market for every symbol.
    #[must_use]
    pub fn new(symbols: &[String]) -> Self {
        let mut books = HashMap::new();
        for symbol in symbols {
            for exchange in [Exchange::Bybit, Exchange::Mexc] {
                for market in [Market::Spot, Market::Perp] {
                    books.insert(
                        BookKey::new(exchange, market, symbol.clone()),
                        Arc::new(Mutex::new(BookState::new())),
                    );
                }
            }
        }
        Self { books }
    }

    /// The book for a key; `None` for unmonitored symbols.
    #[must_use]
    pub fn get(&self, key: &BookKey) -> Option<Arc<Mutex<BookState>>> {
        self.books.get(key).cloned()
    }

    #[must_use]
    pub fn get_parts(
        &self,
        exchange: Exchange,
        market: Market,
        symbol: &str,
    ) -> Option<Arc<Mutex<BookState>>> {
        self.books
            .get(&BookKey::new(exchange, market, symbol))
            .cloned()
    }

    /// Number of books currently holding data, for the console summary.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.books
            .values()
            .filter(|book| book.lock().map(|b| b.has_data()).unwrap_or(false))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthwatch_core::Side;
    use rust_decimal_macros::dec;

    #[test]
    fn test_registry_builds_all_combinations() {
        let registry = BookRegistry::new(&["BTCUSDT".to_string(), "ETHUSDT".to_string()]);

        for symbol in ["BTCUSDT", "ETHUSDT"] {
            for exchange in [Exchange::Bybit, Exchange::Mexc] {
                for market in [Market::Spot, Market::Perp] {
                    assert!(registry.get_parts(exchange, market, symbol).is_some());
                }
            }
        }
        assert!(registry
            .get_parts(Exchange::Bybit, Market::Spot, "SOLUSDT")
            .is_none());
    }

    #[test]
    fn test_live_count_tracks_data() {
        let registry = BookRegistry::new(&["BTCUSDT".to_string()]);
        assert_eq!(registry.live_count(), 0);

        let book = registry
            .get_parts(Exchange::Bybit, Market::Spot, "BTCUSDT")
            .unwrap();
        book.lock()
            .unwrap()
            .apply_update(Side::Bid, dec!(100), dec!(1));

        assert_eq!(registry.live_count(), 1);
    }
}
