//! Large resting-size moves between consecutive merged perp books.

use depthwatch_core::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A level whose size change between two ticks cleared the scaled notional
/// threshold. Computed over the merged perp book, so no venue field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelMoveRecord {
    /// Epoch milliseconds of the tick that observed the move.
    pub ts: i64,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    /// Size at the previous tick; zero for a fresh level.
    pub prev_size: Decimal,
    /// Size at the current tick; zero for a vanished level.
    pub next_size: Decimal,
    pub delta_size: Decimal,
    /// `|delta_size| * price`, always non-negative.
    pub notional_delta: Decimal,
    pub bps_from_mid: f64,
}
