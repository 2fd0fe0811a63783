//! Market vocabulary shared by every crate: venues, market kinds, book sides.
//!
//! Serde renames pin the wire contract the dashboard expects
//! (`"bybit"`/`"mexc"`, `"Spot"`/`"Perp"`, `"Bid"`/`"Ask"`).

use serde::{Deserialize, Serialize};

/// Z-score threshold for resting-depth outliers fed to the span tracker.
pub const Z_OUTLIER: f64 = 5.0;

/// Z-score threshold for the `outlierCount` summary fields on metrics points.
pub const Z_METRICS: f64 = 4.0;

/// A monitored venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Exchange {
    #[serde(rename = "bybit")]
    Bybit,
    #[serde(rename = "mexc")]
    Mexc,
}

impl Exchange {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bybit => "bybit",
            Self::Mexc => "mexc",
        }
    }

    /// Parses a venue name, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bybit" => Some(Self::Bybit),
            "mexc" => Some(Self::Mexc),
            _ => None,
        }
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spot or perpetual market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Market {
    Spot,
    Perp,
}

impl Market {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spot => "Spot",
            Self::Perp => "Perp",
        }
    }

    /// Parses a market kind, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Some(Self::Spot),
            "perp" => Some(Self::Perp),
            _ => None,
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Book side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bid => "Bid",
            Self::Ask => "Ask",
        }
    }

    /// Parses a side, case-insensitively.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bid" => Some(Self::Bid),
            "ask" => Some(Self::Ask),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quote assets recognized when splitting an exchange-neutral symbol.
const KNOWN_QUOTES: &[&str] = &["USDT", "USDC", "USD", "BTC", "ETH"];

/// Translates an exchange-neutral symbol (`BTCUSDT`) into MEXC perp form
/// (`BTC_USDT`) by inserting an underscore before the quote asset.
///
/// Symbols with no recognized quote suffix are returned unchanged.
#[must_use]
pub fn mexc_perp_symbol(symbol: &str) -> String {
    let upper = symbol.to_ascii_uppercase();
    for quote in KNOWN_QUOTES {
        if upper.len() > quote.len() && upper.ends_with(quote) {
            let base = &upper[..upper.len() - quote.len()];
            return format!("{base}_{quote}");
        }
    }
    upper
}

/// Reverses [`mexc_perp_symbol`]: strips underscores and upper-cases.
#[must_use]
pub fn neutral_symbol(venue_symbol: &str) -> String {
    venue_symbol.replace('_', "").to_ascii_uppercase()
}
