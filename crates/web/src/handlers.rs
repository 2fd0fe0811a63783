//! Read-only JSON endpoints over the store caches.
//!
//! Every history endpoint serves the tail of its in-memory cache; the
//! database is never queried on these paths.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use depthwatch_core::{Exchange, Market};
use depthwatch_data::{
    LevelMoveRecord, LiquidationRecord, MetricsPoint, OiFundingRecord, OutlierRecord,
    OutlierSpanRecord, TradeRecord,
};

use crate::state::AppState;

const DEFAULT_LIMIT: usize = 500;

/// Common query shape for the history endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub symbol: Option<String>,
    pub market: Option<String>,
    pub exchange: Option<String>,
    /// Spans only: project currently-active spans instead of closed ones.
    pub active: Option<bool>,
}

impl HistoryQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }

    fn market(&self) -> Result<Option<Market>, StatusCode> {
        match &self.market {
            None => Ok(None),
            Some(raw) => Market::parse(raw)
                .map(Some)
                .ok_or(StatusCode::BAD_REQUEST),
        }
    }

    fn exchange(&self) -> Result<Option<Exchange>, StatusCode> {
        match &self.exchange {
            None => Ok(None),
            Some(raw) => Exchange::parse(raw)
                .map(Some)
                .ok_or(StatusCode::BAD_REQUEST),
        }
    }
}

/// `GET /api/config`
pub async fn get_config(State(state): State<AppState>) -> Json<Value> {
    let config = &state.config;
    Json(json!({
        "symbols": config.symbols(),
        "depth": config.depth,
        "baseMmNotional": config.base_mm_notional,
        "largeMoveNotional": config.large_move_notional,
        "sizeBins": config.size_bins(),
    }))
}

/// `GET /api/status`
pub async fn get_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "liveMonitoring": state.config.live_monitoring }))
}

/// `GET /api/history`
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<MetricsPoint>> {
    let points = state
        .stores
        .metrics
        .get_history(query.limit(), query.symbol.as_deref())
        .await;
    Json(points)
}

/// `GET /api/trades`
pub async fn get_trades(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<TradeRecord>>, StatusCode> {
    let trades = state
        .stores
        .trades
        .get_history(
            query.limit(),
            query.symbol.as_deref(),
            query.market()?,
            query.exchange()?,
        )
        .await;
    Ok(Json(trades))
}

/// `GET /api/liquidations`
pub async fn get_liquidations(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<LiquidationRecord>>, StatusCode> {
    let liquidations = state
        .stores
        .liquidations
        .get_history(
            query.limit(),
            query.symbol.as_deref(),
            query.market()?,
            query.exchange()?,
        )
        .await;
    Ok(Json(liquidations))
}

/// `GET /api/oi-funding`
pub async fn get_oi_funding(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<OiFundingRecord>>, StatusCode> {
    let ticks = state
        .stores
        .oi_funding
        .get_history(
            query.limit(),
            query.symbol.as_deref(),
            query.market()?,
            query.exchange()?,
        )
        .await;
    Ok(Json(ticks))
}

/// `GET /api/outliers`
pub async fn get_outliers(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<OutlierRecord>>, StatusCode> {
    let outliers = state
        .stores
        .outliers
        .get_history(
            query.limit(),
            query.symbol.as_deref(),
            query.market()?,
            query.exchange()?,
        )
        .await;
    Ok(Json(outliers))
}

/// `GET /api/outliers/spans`
///
/// Closed spans by default; `?active=true` projects the currently-active
/// spans as if they closed now.
pub async fn get_spans(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<OutlierSpanRecord>>, StatusCode> {
    if query.active.unwrap_or(false) {
        let now = chrono::Utc::now().timestamp_millis();
        let tracker = state.span_tracker.lock().await;
        let mut spans = tracker.get_active(now);
        spans.retain(|span| {
            query
                .symbol
                .as_deref()
                .map_or(true, |symbol| span.symbol == symbol)
        });
        return Ok(Json(spans));
    }

    let spans = state
        .stores
        .spans
        .get_history(
            query.limit(),
            query.symbol.as_deref(),
            query.market()?,
            query.exchange()?,
        )
        .await;
    Ok(Json(spans))
}

/// `GET /api/large-moves`
pub async fn get_large_moves(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<LevelMoveRecord>> {
    let moves = state
        .stores
        .large_moves
        .get_history(query.limit(), query.symbol.as_deref())
        .await;
    Json(moves)
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthwatch_core::Config;
    use depthwatch_data::{Database, Stores, TradeSide};
    use depthwatch_engine::OutlierSpanTracker;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use tokio::sync::{broadcast, Mutex};

    async fn state_fixture() -> AppState {
        let db = Database::in_memory().await.unwrap();
        let (events_tx, _) = broadcast::channel(16);
        AppState {
            config: Arc::new(Config::default()),
            stores: Stores::new(&db),
            events_tx,
            span_tracker: Arc::new(Mutex::new(OutlierSpanTracker::new())),
        }
    }

    #[tokio::test]
    async fn test_config_shape() {
        let state = state_fixture().await;
        let Json(value) = get_config(State(state)).await;

        assert_eq!(value["symbols"][0], "WHITEWHALEUSDT");
        assert_eq!(value["depth"], 50);
        assert_eq!(value["baseMmNotional"], 30_000.0);
        assert_eq!(value["largeMoveNotional"], 30_000.0);
        assert_eq!(value["sizeBins"].as_array().unwrap().len(), 7);
    }

    #[tokio::test]
    async fn test_status_reports_live_monitoring() {
        let state = state_fixture().await;
        let Json(value) = get_status(State(state)).await;
        assert_eq!(value["liveMonitoring"], true);
    }

    #[tokio::test]
    async fn test_trades_endpoint_filters() {
        let state = state_fixture().await;
        let now = chrono::Utc::now().timestamp_millis();
        state
            .stores
            .trades
            .append(&TradeRecord {
                ts: now,
                symbol: "BTCUSDT".to_string(),
                market: Market::Spot,
                exchange: Exchange::Bybit,
                side: TradeSide::Buy,
                price: dec!(100),
                qty: dec!(1),
            })
            .await
            .unwrap();

        let query = HistoryQuery {
            exchange: Some("bybit".to_string()),
            ..HistoryQuery::default()
        };
        let Json(trades) = get_trades(State(state.clone()), Query(query)).await.unwrap();
        assert_eq!(trades.len(), 1);

        let query = HistoryQuery {
            exchange: Some("mexc".to_string()),
            ..HistoryQuery::default()
        };
        let Json(trades) = get_trades(State(state.clone()), Query(query)).await.unwrap();
        assert!(trades.is_empty());

        let query = HistoryQuery {
            exchange: Some("nasdaq".to_string()),
            ..HistoryQuery::default()
        };
        let result = get_trades(State(state), Query(query)).await;
        assert_eq!(result.unwrap_err(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_active_spans_projection() {
        let state = state_fixture().await;
        // Empty tracker: empty projection, no error.
        let query = HistoryQuery {
            active: Some(true),
            ..HistoryQuery::default()
        };
        let Json(spans) = get_spans(State(state), Query(query)).await.unwrap();
        assert!(spans.is_empty());
    }
}
