//! depthwatch process entry point: configuration, wiring, task spawning.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};

use depthwatch_core::{Config, Market};
use depthwatch_data::{Database, LiquidationRecord, OiFundingRecord, Stores, TradeRecord};
use depthwatch_engine::{MetricsEngine, OutlierSpanTracker};
use depthwatch_feeds::bybit::{
    BybitBookFeed, BybitLiquidationFeed, BybitTickerFeed, BybitTradeFeed,
};
use depthwatch_feeds::mexc::{MexcPerpFeed, MexcSpotBookFeed};
use depthwatch_feeds::BookRegistry;
use depthwatch_web::{ApiServer, AppState};

#[derive(Parser)]
#[command(name = "depthwatch")]
#[command(about = "Real-time market microstructure monitor", long_about = None)]
struct Cli {
    /// Alternate .env file path (default: ./.env when present).
    #[arg(long)]
    env_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // .env never overrides the real environment.
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path).ok();
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    run().await
}

async fn run() -> Result<()> {
    let config = Arc::new(Config::load()?);
    let symbols = config.symbols();
    tracing::info!(symbols = ?symbols, live = config.live_monitoring, "starting depthwatch");

    let db = Database::connect(&config.data_dir).await?;
    let stores = Stores::new(&db);
    stores.load_existing().await?;

    let (events_tx, _) = broadcast::channel::<String>(4_096);
    let registry = Arc::new(BookRegistry::new(&symbols));
    let span_tracker = Arc::new(Mutex::new(OutlierSpanTracker::new()));

    let (trade_tx, trade_rx) = mpsc::channel::<TradeRecord>(1_024);
    let (oi_tx, oi_rx) = mpsc::channel::<OiFundingRecord>(256);
    let (liq_tx, liq_rx) = mpsc::channel::<LiquidationRecord>(256);

    spawn_dispatchers(
        stores.clone(),
        span_tracker.clone(),
        events_tx.clone(),
        trade_rx,
        oi_rx,
        liq_rx,
    );

    if config.live_monitoring {
        spawn_feeds(
            &config,
            &symbols,
            registry.clone(),
            trade_tx,
            oi_tx,
            liq_tx,
        );
    } else {
        tracing::info!("live monitoring disabled, serving stored history only");
    }

    let engine = MetricsEngine::new(
        config.clone(),
        registry.clone(),
        stores.clone(),
        span_tracker.clone(),
        events_tx.clone(),
    );
    tokio::spawn(engine.run());

    spawn_console_log(
        config.log_interval_ms,
        stores.clone(),
        registry,
        span_tracker.clone(),
    );

    let state = AppState {
        config: config.clone(),
        stores,
        events_tx,
        span_tracker,
    };
    let addr = format!("{}:{}", config.host, config.port);
    ApiServer::new(state).serve(&addr).await
}

/// Forwards normalized feed events into stores, the span tracker and the
/// broadcast channel. A store write failure is fatal: the process cannot
/// recover lost rows.
fn spawn_dispatchers(
    stores: Stores,
    span_tracker: Arc<Mutex<OutlierSpanTracker>>,
    events_tx: broadcast::Sender<String>,
    mut trade_rx: mpsc::Receiver<TradeRecord>,
    mut oi_rx: mpsc::Receiver<OiFundingRecord>,
    mut liq_rx: mpsc::Receiver<LiquidationRecord>,
) {
    {
        let stores = stores.clone();
        let events_tx = events_tx.clone();
        tokio::spawn(async move {
            while let Some(trade) = trade_rx.recv().await {
                if let Err(error) = stores.trades.append(&trade).await {
                    tracing::error!(%error, "trade store write failed");
                    std::process::exit(1);
                }
                span_tracker.lock().await.on_trade(&trade);
                broadcast_event(&events_tx, "trade", &trade);
            }
        });
    }

    {
        let stores = stores.clone();
        let events_tx = events_tx.clone();
        tokio::spawn(async move {
            while let Some(tick) = oi_rx.recv().await {
                if let Err(error) = stores.oi_funding.append(&tick).await {
                    tracing::error!(%error, "oi-funding store write failed");
                    std::process::exit(1);
                }
                broadcast_event(&events_tx, "oiFunding", &tick);
            }
        });
    }

    tokio::spawn(async move {
        while let Some(liq) = liq_rx.recv().await {
            if let Err(error) = stores.liquidations.append(&liq).await {
                tracing::error!(%error, "liquidation store write failed");
                std::process::exit(1);
            }
            broadcast_event(&events_tx, "liquidation", &liq);
        }
    });
}

fn broadcast_event<T: serde::Serialize>(
    events_tx: &broadcast::Sender<String>,
    kind: &str,
    data: &T,
) {
    match serde_json::to_value(data) {
        Ok(value) => {
            let payload = serde_json::json!({ "type": kind, "data": value }).to_string();
            let _ = events_tx.send(payload);
        }
        Err(error) => tracing::warn!(%error, kind, "event serialization failed"),
    }
}

fn spawn_feeds(
    config: &Config,
    symbols: &[String],
    registry: Arc<BookRegistry>,
    trade_tx: mpsc::Sender<TradeRecord>,
    oi_tx: mpsc::Sender<OiFundingRecord>,
    liq_tx: mpsc::Sender<LiquidationRecord>,
) {
    let depth = config.depth;

    for market in [Market::Spot, Market::Perp] {
        let feed = BybitBookFeed::new(market, symbols.to_vec(), depth, registry.clone());
        tokio::spawn(async move { feed.run().await });

        let feed = BybitTradeFeed::new(market, symbols.to_vec(), trade_tx.clone());
        tokio::spawn(async move { feed.run().await });
    }

    let feed = BybitTickerFeed::new(symbols.to_vec(), oi_tx.clone());
    tokio::spawn(async move { feed.run().await });

    let feed = BybitLiquidationFeed::new(symbols.to_vec(), liq_tx, None);
    tokio::spawn(async move { feed.run().await });

    let feed = MexcPerpFeed::new(
        symbols.to_vec(),
        depth,
        registry.clone(),
        trade_tx,
        oi_tx,
    );
    tokio::spawn(async move { feed.run().await });

    let feed = MexcSpotBookFeed::new(
        symbols.to_vec(),
        depth,
        Duration::from_millis(config.mexc_spot_poll_ms()),
        registry,
    );
    tokio::spawn(async move { feed.run().await });
}

/// Periodic one-line health summary.
fn spawn_console_log(
    interval_ms: u64,
    stores: Stores,
    registry: Arc<BookRegistry>,
    span_tracker: Arc<Mutex<OutlierSpanTracker>>,
) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(interval_ms.max(1_000)));
        loop {
            tick.tick().await;
            let active_spans = span_tracker.lock().await.active_count();
            let live_books = registry.live_count();
            let metrics = stores.metrics.len().await;
            let trades = stores.trades.len().await;
            let liquidations = stores.liquidations.len().await;
            let oi_funding = stores.oi_funding.len().await;
            let outliers = stores.outliers.len().await;
            let spans = stores.spans.len().await;
            let large_moves = stores.large_moves.len().await;
            tracing::info!(
                live_books,
                metrics,
                trades,
                liquidations,
                oi_funding,
                outliers,
                spans,
                large_moves,
                active_spans,
                "monitor status"
            );
        }
    });
}
