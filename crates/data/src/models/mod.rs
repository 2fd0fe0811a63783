//! Wire and storage models.
//!
//! Field names are serialized in camelCase: the dashboard and the HTTP API
//! share these shapes verbatim.

pub mod large_move;
pub mod liquidation;
pub mod metrics;
pub mod oi_funding;
pub mod outlier;
pub mod span;
pub mod trade;

pub use large_move::LevelMoveRecord;
pub use liquidation::LiquidationRecord;
pub use metrics::{BookMoveStats, ExchangeMetrics, LargeLevel, MetricsPoint, MoveStats};
pub use oi_funding::OiFundingRecord;
pub use outlier::{OutlierObservation, OutlierRecord};
pub use span::{OutlierSpanRecord, SpanContext};
pub use trade::{TradeRecord, TradeSide};
