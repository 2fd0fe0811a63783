//! MEXC feeds: perp over the contract websocket, spot depth over REST.

pub mod message;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use depthwatch_core::types::{mexc_perp_symbol, neutral_symbol};
use depthwatch_core::{Exchange, Market, Side};
use depthwatch_data::{OiFundingRecord, TradeRecord, TradeSide};

use crate::registry::BookRegistry;
use crate::{closest_depth, RECONNECT_DELAY};
use message::{parse_perp_message, MexcMessage};

const PERP_WS: &str = "wss://contract.mexc.com/edge";

/// Depths the contract endpoint accepts for `sub.depth.full`.
const PERP_DEPTHS: &[usize] = &[5, 10, 20];

const SPOT_DEPTH_URL: &str = "https://api.mexc.com/api/v3/depth";

const PING_INTERVAL: Duration = Duration::from_secs(15);

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Perp feed: full-snapshot depth, deals and funding rate over one socket.
///
/// Symbols are subscribed in venue form (`BTC_USDT`) and normalized back on
/// every frame.
pub struct MexcPerpFeed {
    symbols: Vec<String>,
    depth: usize,
    registry: Arc<BookRegistry>,
    trade_tx: mpsc::Sender<TradeRecord>,
    oi_tx: mpsc::Sender<OiFundingRecord>,
    sub_error_logged: AtomicBool,
}

impl MexcPerpFeed {
    #[must_use]
    pub fn new(
        symbols: Vec<String>,
        depth: usize,
        registry: Arc<BookRegistry>,
        trade_tx: mpsc::Sender<TradeRecord>,
        oi_tx: mpsc::Sender<OiFundingRecord>,
    ) -> Self {
        let negotiated = closest_depth(depth, PERP_DEPTHS);
        if negotiated != depth {
            tracing::info!(
                requested = depth,
                negotiated,
                "mexc perp depth not supported, using closest"
            );
        }
        Self {
            symbols,
            depth: negotiated,
            registry,
            trade_tx,
            oi_tx,
            sub_error_logged: AtomicBool::new(false),
        }
    }

    /// Runs the feed forever, reconnecting on socket errors.
    pub async fn run(&self) {
        loop {
            if let Err(error) = self.collect_stream().await {
                tracing::warn!(%error, "mexc perp stream error");
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn subscribe_all(&self, sink: &mut WsSink) -> Result<()> {
        for symbol in &self.symbols {
            let venue_symbol = mexc_perp_symbol(symbol);
            for request in [
                serde_json::json!({
                    "method": "sub.depth.full",
                    "param": { "symbol": venue_symbol, "limit": self.depth }
                }),
                serde_json::json!({
                    "method": "sub.deal",
                    "param": { "symbol": venue_symbol }
                }),
                serde_json::json!({
                    "method": "sub.funding.rate",
                    "param": { "symbol": venue_symbol }
                }),
            ] {
                sink.send(Message::Text(request.to_string()))
                    .await
                    .context("sending mexc subscribe")?;
            }
        }
        Ok(())
    }

    async fn collect_stream(&self) -> Result<()> {
        let (ws, _) = connect_async(PERP_WS)
            .await
            .context("connecting mexc contract")?;
        tracing::info!("mexc perp feed connected");

        let (mut sink, mut stream) = ws.split();
        self.subscribe_all(&mut sink).await?;

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    sink.send(Message::Text(r#"{"method":"ping"}"#.to_string()))
                        .await
                        .context("sending ping")?;
                }
                frame = stream.next() => {
                    let Some(frame) = frame else { break };
                    match frame? {
                        Message::Text(text) => {
                            if let Some(reply) = self.handle(&text).await {
                                sink.send(Message::Text(reply))
                                    .await
                                    .context("sending pong")?;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            }
        }

        Ok(())
    }

    /// Handles one frame; returns a reply to send (pong) when required.
    async fn handle(&self, text: &str) -> Option<String> {
        match parse_perp_message(text) {
            MexcMessage::DepthSnapshot {
                symbol,
                ts,
                bids,
                asks,
            } => {
                let neutral = neutral_symbol(&symbol);
                let book = self
                    .registry
                    .get_parts(Exchange::Mexc, Market::Perp, &neutral)?;
                let mut book = book.lock().ok()?;
                book.apply_snapshot(Side::Bid, &bids);
                book.apply_snapshot(Side::Ask, &asks);
                book.last_update_ms = ts;
                None
            }
            MexcMessage::Deals { symbol, deals } => {
                let neutral = neutral_symbol(&symbol);
                for deal in deals {
                    let record = TradeRecord {
                        ts: deal.ts,
                        symbol: neutral.clone(),
                        market: Market::Perp,
                        exchange: Exchange::Mexc,
                        side: if deal.taker_buy {
                            TradeSide::Buy
                        } else {
                            TradeSide::Sell
                        },
                        price: deal.price,
                        qty: deal.qty,
                    };
                    if self.trade_tx.send(record).await.is_err() {
                        break;
                    }
                }
                None
            }
            MexcMessage::FundingRate { symbol, ts, rate } => {
                let record = OiFundingRecord {
                    ts,
                    symbol: neutral_symbol(&symbol),
                    market: Market::Perp,
                    exchange: Exchange::Mexc,
                    open_interest: None,
                    funding_rate: Some(rate),
                };
                let _ = self.oi_tx.send(record).await;
                None
            }
            MexcMessage::Ping(ping) => Some(ping.reply()),
            MexcMessage::SubError(error) => {
                if !self.sub_error_logged.swap(true, Ordering::Relaxed) {
                    tracing::warn!(%error, "mexc subscription error");
                }
                None
            }
            MexcMessage::Ignore => None,
        }
    }
}

/// Spot depth response, `[price, qty]` string pairs.
#[derive(Debug, Deserialize)]
struct SpotDepthResponse {
    #[serde(default)]
    bids: Vec<[String; 2]>,
    #[serde(default)]
    asks: Vec<[String; 2]>,
}

/// Spot book adapter: polls the REST depth endpoint and applies full
/// snapshots with diff semantics. Any HTTP or parse failure drops that
/// poll tick silently.
pub struct MexcSpotBookFeed {
    symbols: Vec<String>,
    depth: usize,
    poll_interval: Duration,
    registry: Arc<BookRegistry>,
    client: reqwest::Client,
}

impl MexcSpotBookFeed {
    #[must_use]
    pub fn new(
        symbols: Vec<String>,
        depth: usize,
        poll_interval: Duration,
        registry: Arc<BookRegistry>,
    ) -> Self {
        Self {
            symbols,
            depth,
            poll_interval,
            registry,
            client: reqwest::Client::new(),
        }
    }

    /// Polls forever at the configured cadence.
    pub async fn run(&self) {
        let mut tick = tokio::time::interval(self.poll_interval);
        loop {
            tick.tick().await;
            for symbol in &self.symbols {
                self.poll_symbol(symbol).await;
            }
        }
    }

    async fn poll_symbol(&self, symbol: &str) {
        let url = format!("{SPOT_DEPTH_URL}?symbol={symbol}&limit={}", self.depth);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(symbol, %error, "mexc spot depth poll failed");
                return;
            }
        };
        let depth = match response.json::<SpotDepthResponse>().await {
            Ok(depth) => depth,
            Err(error) => {
                tracing::debug!(symbol, %error, "mexc spot depth parse failed");
                return;
            }
        };

        self.apply(symbol, &depth);
    }

    fn apply(&self, symbol: &str, depth: &SpotDepthResponse) {
        let Some(book) = self
            .registry
            .get_parts(Exchange::Mexc, Market::Spot, symbol)
        else {
            return;
        };
        let Ok(mut book) = book.lock() else { return };

        let parse = |levels: &[[String; 2]]| -> Vec<(Decimal, Decimal)> {
            levels
                .iter()
                .filter_map(|pair| {
                    Some((
                        Decimal::from_str(&pair[0]).ok()?,
                        Decimal::from_str(&pair[1]).ok()?,
                    ))
                })
                .collect()
        };

        book.apply_snapshot(Side::Bid, &parse(&depth.bids));
        book.apply_snapshot(Side::Ask, &parse(&depth.asks));
        book.last_update_ms = chrono::Utc::now().timestamp_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_perp_depth_snapshot_applies_diff() {
        let registry = Arc::new(BookRegistry::new(&["BTCUSDT".to_string()]));
        let (trade_tx, _trade_rx) = mpsc::channel(8);
        let (oi_tx, _oi_rx) = mpsc::channel(8);
        let feed = MexcPerpFeed::new(
            vec!["BTCUSDT".to_string()],
            20,
            registry.clone(),
            trade_tx,
            oi_tx,
        );

        feed.handle(
            r#"{"channel":"push.depth.full","symbol":"BTC_USDT","ts":1,
                "data":{"bids":[[100.0,1.0,1],[99.0,2.0,1]],"asks":[[101.0,1.0,1]]}}"#,
        )
        .await;
        feed.handle(
            r#"{"channel":"push.depth.full","symbol":"BTC_USDT","ts":2,
                "data":{"bids":[[100.0,3.0,1],[98.0,1.0,1]],"asks":[[101.0,1.0,1]]}}"#,
        )
        .await;

        let book = registry
            .get_parts(Exchange::Mexc, Market::Perp, "BTCUSDT")
            .unwrap();
        let mut book = book.lock().unwrap();
        let bids = book.top_n(Side::Bid, 10);
        assert_eq!(bids.len(), 2);
        assert_eq!(bids[0].price, dec!(100.0));
        assert_eq!(bids[0].size, dec!(3.0));
        assert_eq!(bids[1].price, dec!(98.0));

        let stats = book.take_move_stats();
        assert_eq!(stats.bid.changes, 1); // 100: 1 -> 3
        assert_eq!(stats.bid.adds, 3); // first snapshot 2 + 98 add
        assert_eq!(stats.bid.removals, 1); // 99 vanished
    }

    #[tokio::test]
    async fn test_perp_deal_normalizes_symbol_and_side() {
        let registry = Arc::new(BookRegistry::new(&["BTCUSDT".to_string()]));
        let (trade_tx, mut trade_rx) = mpsc::channel(8);
        let (oi_tx, _oi_rx) = mpsc::channel(8);
        let feed = MexcPerpFeed::new(vec!["BTCUSDT".to_string()], 20, registry, trade_tx, oi_tx);

        feed.handle(
            r#"{"channel":"push.deal","symbol":"BTC_USDT","ts":7,
                "data":{"p":28000.5,"v":3,"T":2,"t":9}}"#,
        )
        .await;

        let record = trade_rx.recv().await.unwrap();
        assert_eq!(record.symbol, "BTCUSDT");
        assert_eq!(record.side, TradeSide::Sell);
        assert_eq!(record.price, dec!(28000.5));
        assert_eq!(record.ts, 9);
    }

    #[tokio::test]
    async fn test_ping_gets_symmetric_reply() {
        let registry = Arc::new(BookRegistry::new(&[]));
        let (trade_tx, _trade_rx) = mpsc::channel(8);
        let (oi_tx, _oi_rx) = mpsc::channel(8);
        let feed = MexcPerpFeed::new(vec![], 20, registry, trade_tx, oi_tx);

        let reply = feed.handle(r#"{"method":"ping"}"#).await;
        assert_eq!(reply.as_deref(), Some(r#"{"method":"pong"}"#));

        let reply = feed.handle(r#"{"ping":42}"#).await;
        assert_eq!(reply.as_deref(), Some(r#"{"pong":42}"#));
    }

    #[test]
    fn test_spot_apply_snapshot() {
        let registry = Arc::new(BookRegistry::new(&["BTCUSDT".to_string()]));
        let feed = MexcSpotBookFeed::new(
            vec!["BTCUSDT".to_string()],
            50,
            Duration::from_secs(2),
            registry.clone(),
        );

        feed.apply(
            "BTCUSDT",
            &SpotDepthResponse {
                bids: vec![["100.5".to_string(), "2".to_string()]],
                asks: vec![["100.7".to_string(), "1".to_string()]],
            },
        );

        let book = registry
            .get_parts(Exchange::Mexc, Market::Spot, "BTCUSDT")
            .unwrap();
        let book = book.lock().unwrap();
        assert_eq!(book.best_bid().unwrap().price, dec!(100.5));
        assert_eq!(book.best_ask().unwrap().price, dec!(100.7));
    }
}
