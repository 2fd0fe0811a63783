//! Normalized trade prints.

use depthwatch_core::{Exchange, Market};
use serde::{Deserialize, Serialize};

use rust_decimal::Decimal;

/// Taker side of a print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "Buy",
            Self::Sell => "Sell",
        }
    }

    /// Parses a side, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "buy" | "bid" => Some(Self::Buy),
            "sell" | "ask" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// One normalized trade print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    /// Epoch milliseconds.
    pub ts: i64,
    pub symbol: String,
    pub market: Market,
    pub exchange: Exchange,
    pub side: TradeSide,
    pub price: Decimal,
    pub qty: Decimal,
}

impl TradeRecord {
    /// Trade notional in quote units.
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.price * self.qty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trade_side_parse() {
        assert_eq!(TradeSide::parse("buy"), Some(TradeSide::Buy));
        assert_eq!(TradeSide::parse("SELL"), Some(TradeSide::Sell));
        assert_eq!(TradeSide::parse("hold"), None);
    }

    #[test]
    fn test_trade_notional() {
        let trade = TradeRecord {
            ts: 1,
            symbol: "BTCUSDT".to_string(),
            market: Market::Spot,
            exchange: Exchange::Bybit,
            side: TradeSide::Buy,
            price: dec!(50000),
            qty: dec!(0.5),
        };

        assert_eq!(trade.notional(), dec!(25000));
    }

    #[test]
    fn test_trade_wire_shape() {
        let trade = TradeRecord {
            ts: 1,
            symbol: "BTCUSDT".to_string(),
            market: Market::Perp,
            exchange: Exchange::Mexc,
            side: TradeSide::Sell,
            price: dec!(1.5),
            qty: dec!(10),
        };

        let json = serde_json::to_value(&trade).unwrap();
        assert_eq!(json["market"], "Perp");
        assert_eq!(json["exchange"], "mexc");
        assert_eq!(json["side"], "Sell");
    }
}
