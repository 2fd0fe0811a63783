//! Bybit v5 public websocket feeds.
//!
//! One socket per concern: incremental order books (spot and linear),
//! public trades, perp tickers (open interest + funding) and liquidations.
//! Every loop reconnects with a fixed backoff and never lets one bad frame
//! take the feed down.

pub mod message;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use depthwatch_core::{Exchange, Market, Side};
use depthwatch_data::{LiquidationRecord, OiFundingRecord, TradeRecord, TradeSide};

use crate::registry::BookRegistry;
use crate::{closest_depth, RECONNECT_DELAY};
use message::{parse_message, BybitMessage};

const SPOT_WS: &str = "wss://stream.bybit.com/v5/public/spot";
const LINEAR_WS: &str = "wss://stream.bybit.com/v5/public/linear";

/// Depths Bybit accepts on `orderbook.<depth>.<symbol>` topics.
const BOOK_DEPTHS: &[usize] = &[1, 50, 200];

const PING_INTERVAL: Duration = Duration::from_secs(20);

fn ws_url(market: Market) -> &'static str {
    match market {
        Market::Spot => SPOT_WS,
        Market::Perp => LINEAR_WS,
    }
}

fn parse_level(pair: &[String; 2]) -> Option<(Decimal, Decimal)> {
    let price = Decimal::from_str(&pair[0]).ok()?;
    let size = Decimal::from_str(&pair[1]).ok()?;
    Some((price, size))
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

async fn subscribe(sink: &mut WsSink, topics: &[String]) -> Result<()> {
    let request = serde_json::json!({ "op": "subscribe", "args": topics });
    sink.send(Message::Text(request.to_string()))
        .await
        .context("sending subscribe")?;
    Ok(())
}

/// Incremental order-book feed for one Bybit market.
pub struct BybitBookFeed {
    market: Market,
    symbols: Vec<String>,
    depth: usize,
    registry: Arc<BookRegistry>,
}

impl BybitBookFeed {
    #[must_use]
    pub fn new(
        market: Market,
        symbols: Vec<String>,
        depth: usize,
        registry: Arc<BookRegistry>,
    ) -> Self {
        let negotiated = closest_depth(depth, BOOK_DEPTHS);
        if negotiated != depth {
            tracing::info!(
                requested = depth,
                negotiated,
                market = %market,
                "bybit book depth not supported, using closest"
            );
        }
        Self {
            market,
            symbols,
            depth: negotiated,
            registry,
        }
    }

    fn topics(&self) -> Vec<String> {
        self.symbols
            .iter()
            .map(|s| format!("orderbook.{}.{}", self.depth, s))
            .collect()
    }

    /// Runs the feed forever, reconnecting on socket errors.
    pub async fn run(&self) {
        loop {
            if let Err(error) = self.collect_stream().await {
                tracing::warn!(market = %self.market, %error, "bybit book stream error");
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn collect_stream(&self) -> Result<()> {
        let url = ws_url(self.market);
        let (ws, _) = connect_async(url)
            .await
            .with_context(|| format!("connecting {url}"))?;
        tracing::info!(market = %self.market, "bybit book feed connected");

        let (mut sink, mut stream) = ws.split();
        subscribe(&mut sink, &self.topics()).await?;

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    sink.send(Message::Text(r#"{"op":"ping"}"#.to_string()))
                        .await
                        .context("sending ping")?;
                }
                frame = stream.next() => {
                    let Some(frame) = frame else { break };
                    match frame? {
                        Message::Text(text) => self.handle(&text),
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            }
        }

        Ok(())
    }

    fn handle(&self, text: &str) {
        match parse_message(text) {
            BybitMessage::Book(push) => {
                let symbol = push.data.symbol.to_ascii_uppercase();
                let Some(book) = self.registry.get_parts(Exchange::Bybit, self.market, &symbol)
                else {
                    return;
                };
                let Ok(mut book) = book.lock() else { return };

                if push.kind.as_deref() == Some("snapshot") {
                    let bids: Vec<_> = push.data.bids.iter().filter_map(parse_level).collect();
                    let asks: Vec<_> = push.data.asks.iter().filter_map(parse_level).collect();
                    book.apply_snapshot(Side::Bid, &bids);
                    book.apply_snapshot(Side::Ask, &asks);
                } else {
                    for pair in &push.data.bids {
                        if let Some((price, size)) = parse_level(pair) {
                            book.apply_update(Side::Bid, price, size);
                        }
                    }
                    for pair in &push.data.asks {
                        if let Some((price, size)) = parse_level(pair) {
                            book.apply_update(Side::Ask, price, size);
                        }
                    }
                }
                book.last_update_ms = push.ts;
            }
            BybitMessage::Response(response) if response.success == Some(false) => {
                tracing::warn!(
                    ret_msg = response.ret_msg.as_deref().unwrap_or(""),
                    "bybit rejected book subscription"
                );
            }
            _ => {}
        }
    }
}

/// Public trade feed for one Bybit market.
pub struct BybitTradeFeed {
    market: Market,
    symbols: Vec<String>,
    tx: mpsc::Sender<TradeRecord>,
}

impl BybitTradeFeed {
    #[must_use]
    pub fn new(market: Market, symbols: Vec<String>, tx: mpsc::Sender<TradeRecord>) -> Self {
        Self {
            market,
            symbols,
            tx,
        }
    }

    /// Runs the feed forever, reconnecting on socket errors.
    pub async fn run(&self) {
        loop {
            if let Err(error) = self.collect_stream().await {
                tracing::warn!(market = %self.market, %error, "bybit trade stream error");
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn collect_stream(&self) -> Result<()> {
        let url = ws_url(self.market);
        let (ws, _) = connect_async(url)
            .await
            .with_context(|| format!("connecting {url}"))?;
        tracing::info!(market = %self.market, "bybit trade feed connected");

        let (mut sink, mut stream) = ws.split();
        let topics: Vec<String> = self
            .symbols
            .iter()
            .map(|s| format!("publicTrade.{s}"))
            .collect();
        subscribe(&mut sink, &topics).await?;

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    sink.send(Message::Text(r#"{"op":"ping"}"#.to_string()))
                        .await
                        .context("sending ping")?;
                }
                frame = stream.next() => {
                    let Some(frame) = frame else { break };
                    match frame? {
                        Message::Text(text) => self.handle(&text).await,
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle(&self, text: &str) {
        if let BybitMessage::Trades(push) = parse_message(text) {
            for trade in &push.data {
                let (Ok(price), Ok(qty)) =
                    (Decimal::from_str(&trade.price), Decimal::from_str(&trade.qty))
                else {
                    continue;
                };
                let Some(side) = TradeSide::parse(&trade.side) else {
                    continue;
                };
                let record = TradeRecord {
                    ts: trade.ts,
                    symbol: trade.symbol.to_ascii_uppercase(),
                    market: self.market,
                    exchange: Exchange::Bybit,
                    side,
                    price,
                    qty,
                };
                if self.tx.send(record).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Perp ticker feed: open interest and funding rate.
pub struct BybitTickerFeed {
    symbols: Vec<String>,
    tx: mpsc::Sender<OiFundingRecord>,
}

impl BybitTickerFeed {
    #[must_use]
    pub fn new(symbols: Vec<String>, tx: mpsc::Sender<OiFundingRecord>) -> Self {
        Self { symbols, tx }
    }

    /// Runs the feed forever, reconnecting on socket errors.
    pub async fn run(&self) {
        loop {
            if let Err(error) = self.collect_stream().await {
                tracing::warn!(%error, "bybit ticker stream error");
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn collect_stream(&self) -> Result<()> {
        let (ws, _) = connect_async(LINEAR_WS)
            .await
            .context("connecting bybit linear")?;
        tracing::info!("bybit ticker feed connected");

        let (mut sink, mut stream) = ws.split();
        let topics: Vec<String> = self.symbols.iter().map(|s| format!("tickers.{s}")).collect();
        subscribe(&mut sink, &topics).await?;

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    sink.send(Message::Text(r#"{"op":"ping"}"#.to_string()))
                        .await
                        .context("sending ping")?;
                }
                frame = stream.next() => {
                    let Some(frame) = frame else { break };
                    match frame? {
                        Message::Text(text) => self.handle(&text).await,
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle(&self, text: &str) {
        if let BybitMessage::Ticker(push) = parse_message(text) {
            let record = OiFundingRecord {
                ts: push.ts,
                symbol: push.data.symbol.to_ascii_uppercase(),
                market: Market::Perp,
                exchange: Exchange::Bybit,
                open_interest: push
                    .data
                    .open_interest
                    .as_deref()
                    .and_then(|s| Decimal::from_str(s).ok()),
                funding_rate: push
                    .data
                    .funding_rate
                    .as_deref()
                    .and_then(|s| Decimal::from_str(s).ok()),
            };
            if record.is_empty() {
                return;
            }
            let _ = self.tx.send(record).await;
        }
    }
}

/// Row shape for the optional REST liquidation fallback.
#[derive(Debug, Deserialize)]
struct RestLiquidation {
    ts: i64,
    symbol: String,
    side: String,
    qty: String,
    price: String,
}

/// Liquidation feed.
///
/// Subscribes to `allLiquidation.<symbol>`; if the venue rejects that, it
/// retries once with the legacy `liquidation.<symbol>` topics. If both are
/// rejected the feed falls back to REST polling when a poll URL is
/// configured, otherwise it logs once and goes dormant.
pub struct BybitLiquidationFeed {
    symbols: Vec<String>,
    tx: mpsc::Sender<LiquidationRecord>,
    rest_poll_url: Option<String>,
    use_legacy_topic: std::sync::atomic::AtomicBool,
    rejected: std::sync::atomic::AtomicBool,
}

impl BybitLiquidationFeed {
    #[must_use]
    pub fn new(
        symbols: Vec<String>,
        tx: mpsc::Sender<LiquidationRecord>,
        rest_poll_url: Option<String>,
    ) -> Self {
        Self {
            symbols,
            tx,
            rest_poll_url,
            use_legacy_topic: std::sync::atomic::AtomicBool::new(false),
            rejected: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn topics(&self) -> Vec<String> {
        let prefix = if self.use_legacy_topic.load(std::sync::atomic::Ordering::Relaxed) {
            "liquidation"
        } else {
            "allLiquidation"
        };
        self.symbols
            .iter()
            .map(|s| format!("{prefix}.{s}"))
            .collect()
    }

    /// Runs the feed until it goes dormant or forever when healthy.
    pub async fn run(&self) {
        loop {
            if self.rejected.load(std::sync::atomic::Ordering::Relaxed) {
                match &self.rest_poll_url {
                    Some(url) => {
                        tracing::warn!("liquidation subscription rejected, polling REST");
                        self.poll_loop(url).await;
                    }
                    None => {
                        tracing::warn!("liquidation subscription rejected, feed dormant");
                    }
                }
                return;
            }

            if let Err(error) = self.collect_stream().await {
                tracing::warn!(%error, "bybit liquidation stream error");
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn collect_stream(&self) -> Result<()> {
        let (ws, _) = connect_async(LINEAR_WS)
            .await
            .context("connecting bybit linear")?;
        tracing::info!("bybit liquidation feed connected");

        let (mut sink, mut stream) = ws.split();
        subscribe(&mut sink, &self.topics()).await?;

        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    sink.send(Message::Text(r#"{"op":"ping"}"#.to_string()))
                        .await
                        .context("sending ping")?;
                }
                frame = stream.next() => {
                    let Some(frame) = frame else { break };
                    match frame? {
                        Message::Text(text) => {
                            if self.handle(&text).await {
                                // Subscription rejected: leave the socket and
                                // let run() pick the next strategy.
                                return Ok(());
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

    /// Returns true when the subscription was rejected.
    async fn handle(&self, text: &str) -> bool {
        use std::sync::atomic::Ordering;

        match parse_message(text) {
            BybitMessage::Liquidations(push) => {
                for liq in &push.data {
                    let (Ok(price), Ok(qty)) =
                        (Decimal::from_str(&liq.price), Decimal::from_str(&liq.qty))
                    else {
                        continue;
                    };
                    let Some(side) = TradeSide::parse(&liq.side) else {
                        continue;
                    };
                    let record = LiquidationRecord::new(
                        liq.ts,
                        liq.symbol.to_ascii_uppercase(),
                        Market::Perp,
                        Exchange::Bybit,
                        side,
                        price,
                        qty,
                    );
                    if self.tx.send(record).await.is_err() {
                        return false;
                    }
                }
                false
            }
            BybitMessage::Response(response) if response.success == Some(false) => {
                if self.use_legacy_topic.swap(true, Ordering::Relaxed) {
                    self.rejected.store(true, Ordering::Relaxed);
                } else {
                    tracing::warn!(
                        ret_msg = response.ret_msg.as_deref().unwrap_or(""),
                        "allLiquidation rejected, retrying legacy topic"
                    );
                }
                true
            }
            _ => false,
        }
    }

    async fn poll_loop(&self, url: &str) {
        let client = reqwest::Client::new();
        let mut tick = tokio::time::interval(Duration::from_secs(10));

        loop {
            tick.tick().await;
            let response = match client.get(url).send().await {
                Ok(response) => response,
                Err(error) => {
                    tracing::debug!(%error, "liquidation poll failed");
                    continue;
                }
            };
            let rows = match response.json::<Vec<RestLiquidation>>().await {
                Ok(rows) => rows,
                Err(error) => {
                    tracing::debug!(%error, "liquidation poll parse failed");
                    continue;
                }
            };
            for row in rows {
                let (Ok(price), Ok(qty)) =
                    (Decimal::from_str(&row.price), Decimal::from_str(&row.qty))
                else {
                    continue;
                };
                let Some(side) = TradeSide::parse(&row.side) else {
                    continue;
                };
                let record = LiquidationRecord::new(
                    row.ts,
                    row.symbol.to_ascii_uppercase(),
                    Market::Perp,
                    Exchange::Bybit,
                    side,
                    price,
                    qty,
                );
                if self.tx.send(record).await.is_err() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_depth_negotiation() {
        let registry = Arc::new(BookRegistry::new(&["BTCUSDT".to_string()]));
        let feed = BybitBookFeed::new(Market::Spot, vec!["BTCUSDT".to_string()], 50, registry);
        assert_eq!(feed.topics(), vec!["orderbook.50.BTCUSDT"]);

        let registry = Arc::new(BookRegistry::new(&["BTCUSDT".to_string()]));
        let feed = BybitBookFeed::new(Market::Perp, vec!["BTCUSDT".to_string()], 60, registry);
        // 60 is unsupported; 50 is closest.
        assert_eq!(feed.topics(), vec!["orderbook.50.BTCUSDT"]);
    }

    #[test]
    fn test_book_handle_applies_updates() {
        let registry = Arc::new(BookRegistry::new(&["BTCUSDT".to_string()]));
        let feed = BybitBookFeed::new(
            Market::Spot,
            vec!["BTCUSDT".to_string()],
            50,
            registry.clone(),
        );

        feed.handle(
            r#"{"topic":"orderbook.50.BTCUSDT","type":"delta","ts":1,
                "data":{"s":"BTCUSDT","b":[["100.0","2.0"],["101.0","1.0"]],"a":[]}}"#,
        );
        feed.handle(
            r#"{"topic":"orderbook.50.BTCUSDT","type":"delta","ts":2,
                "data":{"s":"BTCUSDT","b":[["100.0","0"]],"a":[]}}"#,
        );

        let book = registry
            .get_parts(Exchange::Bybit, Market::Spot, "BTCUSDT")
            .unwrap();
        let book = book.lock().unwrap();
        let bids = book.top_n(Side::Bid, 10);
        assert_eq!(bids.len(), 1);
        assert_eq!(bids[0].price, Decimal::from(101));
        assert_eq!(book.last_update_ms, 2);
    }

    #[tokio::test]
    async fn test_trade_handle_normalizes() {
        let (tx, mut rx) = mpsc::channel(8);
        let feed = BybitTradeFeed::new(Market::Perp, vec!["BTCUSDT".to_string()], tx);

        feed.handle(
            r#"{"topic":"publicTrade.BTCUSDT","type":"snapshot","ts":1,
                "data":[{"T":5,"s":"BTCUSDT","S":"Sell","v":"0.25","p":"42000"}]}"#,
        )
        .await;

        let record = rx.recv().await.unwrap();
        assert_eq!(record.ts, 5);
        assert_eq!(record.side, TradeSide::Sell);
        assert_eq!(record.market, Market::Perp);
        assert_eq!(record.exchange, Exchange::Bybit);
    }

    #[tokio::test]
    async fn test_ticker_handle_drops_empty_ticks() {
        let (tx, mut rx) = mpsc::channel(8);
        let feed = BybitTickerFeed::new(vec!["BTCUSDT".to_string()], tx);

        feed.handle(
            r#"{"topic":"tickers.BTCUSDT","type":"delta","ts":1,
                "data":{"symbol":"BTCUSDT"}}"#,
        )
        .await;
        feed.handle(
            r#"{"topic":"tickers.BTCUSDT","type":"delta","ts":2,
                "data":{"symbol":"BTCUSDT","openInterest":"5000"}}"#,
        )
        .await;

        let record = rx.recv().await.unwrap();
        assert_eq!(record.ts, 2);
        assert_eq!(record.open_interest, Some(Decimal::from(5000)));
    }

    #[tokio::test]
    async fn test_liquidation_rejection_escalates() {
        let (tx, _rx) = mpsc::channel(8);
        let feed = BybitLiquidationFeed::new(vec!["BTCUSDT".to_string()], tx, None);
        assert_eq!(feed.topics(), vec!["allLiquidation.BTCUSDT"]);

        let rejected = feed
            .handle(r#"{"op":"subscribe","success":false,"ret_msg":"unknown topic"}"#)
            .await;
        assert!(rejected);
        assert_eq!(feed.topics(), vec!["liquidation.BTCUSDT"]);

        let rejected = feed
            .handle(r#"{"op":"subscribe","success":false,"ret_msg":"unknown topic"}"#)
            .await;
        assert!(rejected);
        assert!(feed.rejected.load(std::sync::atomic::Ordering::Relaxed));
    }
}
