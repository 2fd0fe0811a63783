//! Open-interest and funding-rate ticks.

use depthwatch_core::{Exchange, Market};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One open-interest/funding observation.
///
/// Venues publish these on different channels and cadences; a tick carries
/// whatever the venue sent, so either field may be absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OiFundingRecord {
    /// Epoch milliseconds.
    pub ts: i64,
    pub symbol: String,
    pub market: Market,
    pub exchange: Exchange,
    pub open_interest: Option<Decimal>,
    pub funding_rate: Option<Decimal>,
}

impl OiFundingRecord {
    /// True when the venue sent neither field; such ticks are dropped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.open_interest.is_none() && self.funding_rate.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_empty_tick() {
        let tick = OiFundingRecord {
            ts: 1,
            symbol: "BTCUSDT".to_string(),
            market: Market::Perp,
            exchange: Exchange::Bybit,
            open_interest: None,
            funding_rate: None,
        };
        assert!(tick.is_empty());

        let tick = OiFundingRecord {
            funding_rate: Some(dec!(0.0001)),
            ..tick
        };
        assert!(!tick.is_empty());
    }
}
