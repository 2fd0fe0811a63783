//! Append-only stores with in-memory caches and time-based retention.
//!
//! Every store follows the same contract: `append`/`append_all` write
//! through to SQLite and update the cache, `get_history` serves the tail of
//! the filtered cache (never the database — hot path), `prune` runs
//! opportunistically on writes and drops both cache rows and database rows
//! older than the retention horizon, and `load_existing` rebuilds the cache
//! on startup, skipping rows that no longer parse.

pub mod large_move_store;
pub mod liquidation_store;
pub mod metrics_store;
pub mod oi_funding_store;
pub mod outlier_store;
pub mod span_store;
pub mod trade_store;

pub use large_move_store::LargeMoveStore;
pub use liquidation_store::LiquidationStore;
pub use metrics_store::MetricsStore;
pub use oi_funding_store::OiFundingStore;
pub use outlier_store::OutlierStore;
pub use span_store::OutlierSpanStore;
pub use trade_store::TradeStore;

use crate::database::Database;
use anyhow::Result;
use std::sync::Arc;

/// All seven stores over one database.
#[derive(Clone)]
pub struct Stores {
    pub metrics: Arc<MetricsStore>,
    pub trades: Arc<TradeStore>,
    pub liquidations: Arc<LiquidationStore>,
    pub oi_funding: Arc<OiFundingStore>,
    pub outliers: Arc<OutlierStore>,
    pub spans: Arc<OutlierSpanStore>,
    pub large_moves: Arc<LargeMoveStore>,
}

impl Stores {
    #[must_use]
    pub fn new(db: &Database) -> Self {
        let pool = db.pool().clone();
        Self {
            metrics: Arc::new(MetricsStore::new(pool.clone())),
            trades: Arc::new(TradeStore::new(pool.clone())),
            liquidations: Arc::new(LiquidationStore::new(pool.clone())),
            oi_funding: Arc::new(OiFundingStore::new(pool.clone())),
            outliers: Arc::new(OutlierStore::new(pool.clone())),
            spans: Arc::new(OutlierSpanStore::new(pool.clone())),
            large_moves: Arc::new(LargeMoveStore::new(pool)),
        }
    }

    /// Rebuilds every cache from rows still within retention.
    ///
    /// # Errors
    /// Returns an error if any store's load fails.
    pub async fn load_existing(&self) -> Result<()> {
        let metrics = self.metrics.load_existing().await?;
        let trades = self.trades.load_existing().await?;
        let liquidations = self.liquidations.load_existing().await?;
        let oi_funding = self.oi_funding.load_existing().await?;
        let outliers = self.outliers.load_existing().await?;
        let spans = self.spans.load_existing().await?;
        let large_moves = self.large_moves.load_existing().await?;
        tracing::info!(
            metrics,
            trades,
            liquidations,
            oi_funding,
            outliers,
            spans,
            large_moves,
            "loaded persisted history"
        );
        Ok(())
    }
}

/// 24 hours, for metrics, liquidations, oi-funding and large moves.
pub const RETENTION_SHORT_MS: i64 = 24 * 60 * 60 * 1_000;

/// 90 days, for trades, outliers and outlier spans.
pub const RETENTION_LONG_MS: i64 = 90 * 24 * 60 * 60 * 1_000;

/// Last `limit` entries of an already-filtered history slice.
pub(crate) fn tail_of<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    let skip = items.len().saturating_sub(limit);
    if skip > 0 {
        items.drain(..skip);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_of_shorter_than_limit() {
        assert_eq!(tail_of(vec![1, 2, 3], 5), vec![1, 2, 3]);
    }

    #[test]
    fn test_tail_of_truncates_front() {
        assert_eq!(tail_of(vec![1, 2, 3, 4], 2), vec![3, 4]);
    }

    #[test]
    fn test_tail_of_zero_limit() {
        assert_eq!(tail_of(vec![1, 2, 3], 0), Vec::<i32>::new());
    }
}
