//! Forced-liquidation events.

use depthwatch_core::{Exchange, Market};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::trade::TradeSide;

/// One liquidation print, normalized across venues.
///
/// `side` is the side of the forced order as it hit the book: a `Sell`
/// liquidation closed a long position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidationRecord {
    /// Epoch milliseconds.
    pub ts: i64,
    pub symbol: String,
    pub market: Market,
    pub exchange: Exchange,
    pub side: TradeSide,
    pub price: Decimal,
    pub qty: Decimal,
    pub usd_value: Decimal,
}

impl LiquidationRecord {
    /// Builds a record, computing the USD value from price and quantity.
    #[must_use]
    pub fn new(
        ts: i64,
        symbol: String,
        market: Market,
        exchange: Exchange,
        side: TradeSide,
        price: Decimal,
        qty: Decimal,
    ) -> Self {
        let usd_value = price * qty;
        Self {
            ts,
            symbol,
            market,
            exchange,
            side,
            price,
            qty,
            usd_value,
        }
    }
}
