//! Data models, SQLite persistence and the append-with-retention stores.
//!
//! All prices, sizes and notionals use `rust_decimal::Decimal`; derived
//! statistics (z-scores, bps distances, volatilities) are `f64`.

pub mod database;
pub mod models;
pub mod stores;

pub use database::Database;
pub use models::{
    BookMoveStats, ExchangeMetrics, LargeLevel, LevelMoveRecord, LiquidationRecord, MetricsPoint,
    MoveStats, OiFundingRecord, OutlierObservation, OutlierRecord, OutlierSpanRecord, SpanContext,
    TradeRecord, TradeSide,
};
pub use stores::{
    LargeMoveStore, LiquidationStore, MetricsStore, OiFundingStore, OutlierSpanStore, OutlierStore,
    Stores, TradeStore, RETENTION_LONG_MS, RETENTION_SHORT_MS,
};
