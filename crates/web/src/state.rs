//! Shared state handed to every handler.

use depthwatch_core::Config;
use depthwatch_data::Stores;
use depthwatch_engine::OutlierSpanTracker;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Stores,
    /// Pre-serialized `{type, data}` envelopes from the engine and the
    /// dispatcher; every websocket client gets its own receiver.
    pub events_tx: broadcast::Sender<String>,
    pub span_tracker: Arc<Mutex<OutlierSpanTracker>>,
}
