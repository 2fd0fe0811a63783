//! Bybit v5 public websocket payloads.
//!
//! Only the channels the monitor subscribes to get typed shapes; anything
//! else decodes to `Ignore`. Prices and sizes stay strings until the feed
//! loop parses them, so one malformed level drops that level, not the
//! message.

use serde::Deserialize;
use serde_json::Value;

/// Push envelope shared by all Bybit topics.
#[derive(Debug, Clone, Deserialize)]
pub struct BybitPush<T> {
    pub topic: String,
    /// `"snapshot"` or `"delta"`; absent on some channels.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub ts: i64,
    pub data: T,
}

/// Order book payload: `b`/`a` carry `[price, size]` string pairs; a zero
/// size deletes the level.
#[derive(Debug, Clone, Deserialize)]
pub struct BybitBookData {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b", default)]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a", default)]
    pub asks: Vec<[String; 2]>,
}

/// One public trade.
#[derive(Debug, Clone, Deserialize)]
pub struct BybitTrade {
    #[serde(rename = "T")]
    pub ts: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    /// Taker side, `"Buy"` or `"Sell"`.
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "v")]
    pub qty: String,
    #[serde(rename = "p")]
    pub price: String,
}

/// Ticker payload; delta frames only carry changed fields.
#[derive(Debug, Clone, Deserialize)]
pub struct BybitTicker {
    pub symbol: String,
    #[serde(rename = "openInterest", default)]
    pub open_interest: Option<String>,
    #[serde(rename = "fundingRate", default)]
    pub funding_rate: Option<String>,
}

/// One liquidation order.
#[derive(Debug, Clone, Deserialize)]
pub struct BybitLiquidation {
    #[serde(rename = "T")]
    pub ts: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    /// Side of the forced order, `"Buy"` or `"Sell"`.
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "v")]
    pub qty: String,
    #[serde(rename = "p")]
    pub price: String,
}

/// Reply to an `op` request (subscribe, ping).
#[derive(Debug, Clone, Deserialize)]
pub struct BybitResponse {
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub ret_msg: Option<String>,
}

/// Decoded Bybit frame.
#[derive(Debug)]
pub enum BybitMessage {
    Book(BybitPush<BybitBookData>),
    Trades(BybitPush<Vec<BybitTrade>>),
    Ticker(BybitPush<BybitTicker>),
    Liquidations(BybitPush<Vec<BybitLiquidation>>),
    Response(BybitResponse),
    Ignore,
}

/// Decodes one text frame. Unknown topics and malformed frames come back
/// as `Ignore`; the feed loop drops them and continues.
#[must_use]
pub fn parse_message(text: &str) -> BybitMessage {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return BybitMessage::Ignore;
    };

    if let Some(topic) = value.get("topic").and_then(Value::as_str) {
        let topic = topic.to_string();
        if topic.starts_with("orderbook.") {
            if let Ok(push) = serde_json::from_value(value) {
                return BybitMessage::Book(push);
            }
        } else if topic.starts_with("publicTrade.") {
            if let Ok(push) = serde_json::from_value(value) {
                return BybitMessage::Trades(push);
            }
        } else if topic.starts_with("tickers.") {
            if let Ok(push) = serde_json::from_value(value) {
                return BybitMessage::Ticker(push);
            }
        } else if topic.starts_with("allLiquidation.") || topic.starts_with("liquidation.") {
            if let Ok(push) = serde_json::from_value(value) {
                return BybitMessage::Liquidations(push);
            }
        }
        return BybitMessage::Ignore;
    }

    if value.get("op").is_some() {
        if let Ok(response) = serde_json::from_value(value) {
            return BybitMessage::Response(response);
        }
    }

    BybitMessage::Ignore
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_book_delta() {
        let text = r#"{
            "topic": "orderbook.50.BTCUSDT",
            "type": "delta",
            "ts": 1700000000000,
            "data": {
                "s": "BTCUSDT",
                "b": [["100.0", "2.0"], ["99.5", "0"]],
                "a": [["101.0", "1.0"]],
                "u": 5,
                "seq": 7
            }
        }"#;

        match parse_message(text) {
            BybitMessage::Book(push) => {
                assert_eq!(push.kind.as_deref(), Some("delta"));
                assert_eq!(push.data.symbol, "BTCUSDT");
                assert_eq!(push.data.bids.len(), 2);
                assert_eq!(push.data.bids[1], ["99.5".to_string(), "0".to_string()]);
                assert_eq!(push.data.asks.len(), 1);
            }
            other => panic!("expected book, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_trades() {
        let text = r#"{
            "topic": "publicTrade.BTCUSDT",
            "type": "snapshot",
            "ts": 1700000000000,
            "data": [
                {"T": 1700000000001, "s": "BTCUSDT", "S": "Buy", "v": "0.5", "p": "42000.1"}
            ]
        }"#;

        match parse_message(text) {
            BybitMessage::Trades(push) => {
                assert_eq!(push.data.len(), 1);
                assert_eq!(push.data[0].side, "Buy");
                assert_eq!(push.data[0].price, "42000.1");
            }
            other => panic!("expected trades, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_ticker_delta_with_partial_fields() {
        let text = r#"{
            "topic": "tickers.BTCUSDT",
            "type": "delta",
            "ts": 1700000000000,
            "data": {"symbol": "BTCUSDT", "fundingRate": "0.0001"}
        }"#;

        match parse_message(text) {
            BybitMessage::Ticker(push) => {
                assert_eq!(push.data.funding_rate.as_deref(), Some("0.0001"));
                assert_eq!(push.data.open_interest, None);
            }
            other => panic!("expected ticker, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_subscribe_rejection() {
        let text = r#"{"op": "subscribe", "success": false, "ret_msg": "bad topic"}"#;

        match parse_message(text) {
            BybitMessage::Response(response) => {
                assert_eq!(response.success, Some(false));
                assert_eq!(response.ret_msg.as_deref(), Some("bad topic"));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_topic_is_ignored() {
        let text = r#"{"topic": "kline.1.BTCUSDT", "data": {}}"#;
        assert!(matches!(parse_message(text), BybitMessage::Ignore));
    }

    #[test]
    fn test_garbage_is_ignored() {
        assert!(matches!(parse_message("not json"), BybitMessage::Ignore));
    }
}
