//! Resting-depth outliers: the persisted record and the transient,
//! enrichment-bearing detector observation.

use depthwatch_core::{Exchange, Market, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A level whose size z-score within its side cleared the outlier
/// threshold. This is the durable shape; enrichment lives on
/// [`OutlierObservation`] and only survives inside spans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlierRecord {
    /// Epoch milliseconds of the observing tick.
    pub ts: i64,
    pub symbol: String,
    pub market: Market,
    pub exchange: Exchange,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub z_score: f64,
    pub bps_from_mid: f64,
}

/// Detector output handed to the span tracker: the record plus the book
/// context it was observed in. Context is computed over the top-20 levels of
/// the observing venue's book.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlierObservation {
    pub record: OutlierRecord,
    pub mid: Decimal,
    /// Compact JSON snapshot of the top-of-book, kept as an opaque string.
    pub book: String,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub spread_bps: f64,
    /// `(bidDepth - askDepth) / (bidDepth + askDepth)` over top-20.
    pub imbalance: f64,
    pub bid_depth: Decimal,
    pub ask_depth: Decimal,
    pub microprice: Decimal,
    /// 1-based index of the outlying level within the top-20 of its side.
    pub level_rank: u32,
    pub vol_1m: f64,
    pub vol_5m: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_record_wire_shape() {
        let record = OutlierRecord {
            ts: 1,
            symbol: "BTCUSDT".to_string(),
            market: Market::Spot,
            exchange: Exchange::Bybit,
            side: Side::Bid,
            price: dec!(100),
            size: dec!(500),
            z_score: 6.2,
            bps_from_mid: 12.0,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["market"], "Spot");
        assert_eq!(json["side"], "Bid");
        assert_eq!(json["zScore"], 6.2);
        assert_eq!(json["bpsFromMid"], 12.0);
    }
}
