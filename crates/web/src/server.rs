//! Router assembly and serving.

use anyhow::Result;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{handlers, report, websocket};

/// HTTP + websocket server over the store caches.
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Builds the router. Everything, including the websocket upgrade at
    /// the root, sits under the configured base path.
    #[must_use]
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let api = Router::new()
            .route("/", get(websocket::ws_handler))
            .route("/api/config", get(handlers::get_config))
            .route("/api/status", get(handlers::get_status))
            .route("/api/history", get(handlers::get_history))
            .route("/api/trades", get(handlers::get_trades))
            .route("/api/liquidations", get(handlers::get_liquidations))
            .route("/api/oi-funding", get(handlers::get_oi_funding))
            .route("/api/outliers", get(handlers::get_outliers))
            .route("/api/outliers/spans", get(handlers::get_spans))
            .route("/api/outliers/report.csv", get(report::span_report_csv))
            .route("/api/large-moves", get(handlers::get_large_moves))
            .with_state(self.state.clone());

        let base_path = self.state.config.base_path();
        let router = if base_path.is_empty() {
            api
        } else {
            Router::new().nest(&base_path, api)
        };

        router.layer(cors).layer(TraceLayer::new_for_http())
    }

    /// Binds and serves until the process exits.
    ///
    /// # Errors
    /// Returns an error if the bind fails.
    pub async fn serve(self, addr: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!(addr, "http server listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depthwatch_core::Config;
    use depthwatch_data::{Database, Stores};
    use depthwatch_engine::OutlierSpanTracker;
    use std::sync::Arc;
    use tokio::sync::{broadcast, Mutex};

    async fn state(base_path: &str) -> AppState {
        let db = Database::in_memory().await.unwrap();
        let (events_tx, _) = broadcast::channel(16);
        AppState {
            config: Arc::new(Config {
                base_path: base_path.to_string(),
                ..Config::default()
            }),
            stores: Stores::new(&db),
            events_tx,
            span_tracker: Arc::new(Mutex::new(OutlierSpanTracker::new())),
        }
    }

    #[tokio::test]
    async fn test_router_builds_without_base_path() {
        let server = ApiServer::new(state("").await);
        let _router = server.router();
    }

    #[tokio::test]
    async fn test_router_builds_with_base_path() {
        let server = ApiServer::new(state("/monitor").await);
        let _router = server.router();
    }
}
