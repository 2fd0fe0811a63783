//! MEXC websocket payloads.
//!
//! The contract (perp) endpoint pushes `{channel, symbol, data, ts}` frames
//! and two flavors of ping the client must answer symmetrically. Prices and
//! sizes arrive as JSON numbers or strings depending on channel; both decode
//! through [`decimal_from_value`].

use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// One normalized perp deal.
#[derive(Debug, Clone, PartialEq)]
pub struct MexcDeal {
    pub ts: i64,
    pub price: Decimal,
    pub qty: Decimal,
    /// Taker bought (deal type 1); type 2 is a taker sell.
    pub taker_buy: bool,
}

/// Ping flavors the venue sends.
#[derive(Debug, Clone, PartialEq)]
pub enum MexcPing {
    /// `{"method":"ping"}` — answered with `{"method":"pong"}`.
    Method,
    /// `{"ping": <seq>}` — answered with `{"pong": <seq>}`.
    Seq(i64),
}

impl MexcPing {
    /// The symmetric reply frame.
    #[must_use]
    pub fn reply(&self) -> String {
        match self {
            Self::Method => r#"{"method":"pong"}"#.to_string(),
            Self::Seq(seq) => format!(r#"{{"pong":{seq}}}"#),
        }
    }
}

/// Decoded MEXC perp frame.
#[derive(Debug)]
pub enum MexcMessage {
    /// Full top-N snapshot; applied by diffing against the previous book.
    DepthSnapshot {
        symbol: String,
        ts: i64,
        bids: Vec<(Decimal, Decimal)>,
        asks: Vec<(Decimal, Decimal)>,
    },
    Deals {
        symbol: String,
        deals: Vec<MexcDeal>,
    },
    FundingRate {
        symbol: String,
        ts: i64,
        rate: Decimal,
    },
    Ping(MexcPing),
    /// Subscription error payload, e.g. an unsupported depth.
    SubError(String),
    Ignore,
}

/// Decodes a price or size that may be a JSON number or string.
fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s).ok(),
        // Going through the printed representation avoids binary-float
        // artifacts in the Decimal.
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Decodes a `[price, size, ...]` level array; extra elements (order count)
/// are ignored.
fn level_from_value(value: &Value) -> Option<(Decimal, Decimal)> {
    let arr = value.as_array()?;
    let price = decimal_from_value(arr.first()?)?;
    let size = decimal_from_value(arr.get(1)?)?;
    Some((price, size))
}

fn levels_from_value(value: Option<&Value>) -> Vec<(Decimal, Decimal)> {
    value
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(level_from_value).collect())
        .unwrap_or_default()
}

/// The symbol for a frame: an explicit `symbol`/`s` field when present,
/// otherwise derived from `…@<SYMBOL>@…` channel names after stripping the
/// known non-symbol tokens.
#[must_use]
pub fn frame_symbol(value: &Value) -> Option<String> {
    if let Some(symbol) = value
        .get("symbol")
        .or_else(|| value.get("s"))
        .and_then(Value::as_str)
    {
        return Some(symbol.to_string());
    }

    let channel = value.get("channel").or_else(|| value.get("c"))?.as_str()?;
    channel
        .split('@')
        .find(|segment| {
            !segment.is_empty()
                && !segment.contains('.')
                && !segment.chars().all(|c| c.is_ascii_digit())
                && !matches!(*segment, "spot" | "contract" | "public" | "private")
        })
        .map(ToString::to_string)
}

fn deal_from_value(value: &Value, fallback_ts: i64) -> Option<MexcDeal> {
    let price = decimal_from_value(value.get("p")?)?;
    let qty = decimal_from_value(value.get("v").or_else(|| value.get("q"))?)?;
    let ts = value.get("t").and_then(Value::as_i64).unwrap_or(fallback_ts);
    let taker_buy = value.get("T").and_then(Value::as_i64).unwrap_or(1) == 1;
    Some(MexcDeal {
        ts,
        price,
        qty,
        taker_buy,
    })
}

/// Decodes one perp text frame. Unknown channels decode to `Ignore`.
#[must_use]
pub fn parse_perp_message(text: &str) -> MexcMessage {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return MexcMessage::Ignore;
    };

    if value.get("method").and_then(Value::as_str) == Some("ping") {
        return MexcMessage::Ping(MexcPing::Method);
    }
    if let Some(seq) = value.get("ping").and_then(Value::as_i64) {
        return MexcMessage::Ping(MexcPing::Seq(seq));
    }

    let Some(channel) = value.get("channel").and_then(Value::as_str) else {
        return MexcMessage::Ignore;
    };

    match channel {
        "push.depth.full" => {
            let Some(symbol) = frame_symbol(&value) else {
                return MexcMessage::Ignore;
            };
            let ts = value.get("ts").and_then(Value::as_i64).unwrap_or(0);
            let data = value.get("data");
            MexcMessage::DepthSnapshot {
                symbol,
                ts,
                bids: levels_from_value(data.and_then(|d| d.get("bids"))),
                asks: levels_from_value(data.and_then(|d| d.get("asks"))),
            }
        }
        "push.deal" => {
            let Some(symbol) = frame_symbol(&value) else {
                return MexcMessage::Ignore;
            };
            let ts = value.get("ts").and_then(Value::as_i64).unwrap_or(0);
            let deals = match value.get("data") {
                // Either a single deal object or {"deals": [...]}.
                Some(data) if data.get("deals").is_some() => data
                    .get("deals")
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().filter_map(|d| deal_from_value(d, ts)).collect())
                    .unwrap_or_default(),
                Some(data) => deal_from_value(data, ts).into_iter().collect(),
                None => vec![],
            };
            MexcMessage::Deals { symbol, deals }
        }
        "push.funding.rate" => {
            let Some(symbol) = frame_symbol(&value) else {
                return MexcMessage::Ignore;
            };
            let ts = value.get("ts").and_then(Value::as_i64).unwrap_or(0);
            match value
                .get("data")
                .and_then(|d| d.get("rate"))
                .and_then(decimal_from_value)
            {
                Some(rate) => MexcMessage::FundingRate { symbol, ts, rate },
                None => MexcMessage::Ignore,
            }
        }
        "rs.error" => MexcMessage::SubError(
            value
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        ),
        _ => MexcMessage::Ignore,
    }
}
