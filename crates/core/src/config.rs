//! Process configuration.
//!
//! Everything is driven by environment variables with workable defaults, so
//! the monitor can run bare (`cargo run`) against the default symbol. A
//! `.env` file is loaded by the binary before this module reads the
//! environment; real environment values always win.

use anyhow::Result;
use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Environment variables consumed by [`Config::load`].
const ENV_KEYS: &[&str] = &[
    "symbols",
    "depth",
    "base_mm_notional",
    "large_move_notional",
    "large_move_window_bps",
    "large_move_notional_floor",
    "size_bins",
    "distance_bins_bps",
    "log_interval_ms",
    "metrics_interval_ms",
    "data_dir",
    "base_path",
    "live_monitoring",
    "host",
    "port",
    "mexc_spot_poll_ms",
];

/// Monitor configuration, merged from defaults and the environment.
///
/// List-valued settings (`SYMBOLS`, `SIZE_BINS`, `DISTANCE_BINS_BPS`) are
/// kept as raw comma-separated strings and parsed by accessors, because the
/// environment only carries strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Comma list of exchange-neutral symbols (upper-cased by [`Config::symbols`]).
    pub symbols: String,
    /// Top-N levels kept per book side.
    pub depth: usize,
    /// Base notional bucket for large-level and large-move scaling.
    pub base_mm_notional: f64,
    /// Display threshold surfaced via `/api/config`; not part of the
    /// large-move qualification formula.
    pub large_move_notional: f64,
    /// Window around mid scanned for large moves, in bps.
    pub large_move_window_bps: f64,
    /// Absolute floor for large-move qualification.
    pub large_move_notional_floor: f64,
    /// Comma list of size histogram bin edges.
    pub size_bins: String,
    /// Comma list of distance histogram bin edges, in bps.
    pub distance_bins_bps: String,
    /// Console summary cadence.
    pub log_interval_ms: u64,
    /// Metrics tick cadence.
    pub metrics_interval_ms: u64,
    /// Directory holding the SQLite database.
    pub data_dir: String,
    /// Path prefix when running behind a reverse proxy (empty = none).
    pub base_path: String,
    /// When false, no feed connections are made; the HTTP API still serves
    /// whatever the stores already hold.
    pub live_monitoring: bool,
    /// HTTP bind host.
    pub host: String,
    /// HTTP bind port.
    pub port: u16,
    /// MEXC spot depth poll cadence; clamped to >= 1000 ms.
    pub mexc_spot_poll_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: "WHITEWHALEUSDT".to_string(),
            depth: 50,
            base_mm_notional: 30_000.0,
            large_move_notional: 30_000.0,
            large_move_window_bps: 200.0,
            large_move_notional_floor: 2_000.0,
            size_bins: "500,1000,2500,5000,10000,25000,50000".to_string(),
            distance_bins_bps: "5,10,25,50,100,200".to_string(),
            log_interval_ms: 5_000,
            metrics_interval_ms: 1_000,
            data_dir: "data".to_string(),
            base_path: String::new(),
            live_monitoring: true,
            host: "127.0.0.1".to_string(),
            port: 3000,
            mexc_spot_poll_ms: 2_000,
        }
    }
}

impl Config {
    /// Loads configuration by merging defaults with the environment.
    ///
    /// # Errors
    /// Returns an error if an environment value cannot be parsed into its
    /// field type (e.g. a non-numeric `DEPTH`).
    pub fn load() -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(
                Env::raw()
                    .map(|key| key.as_str().to_ascii_lowercase().into())
                    .only(ENV_KEYS),
            )
            .extract()?;
        Ok(config)
    }

    /// Configured symbols: split, trimmed, upper-cased, empties dropped.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        split_list(&self.symbols)
            .map(|s| s.to_ascii_uppercase())
            .collect()
    }

    /// Size histogram bin edges. Malformed entries are dropped.
    #[must_use]
    pub fn size_bins(&self) -> Vec<f64> {
        split_list(&self.size_bins)
            .filter_map(|s| s.parse().ok())
            .collect()
    }

    /// Distance histogram bin edges in bps. Malformed entries are dropped.
    #[must_use]
    pub fn distance_bins_bps(&self) -> Vec<f64> {
        split_list(&self.distance_bins_bps)
            .filter_map(|s| s.parse().ok())
            .collect()
    }

    /// Spot poll cadence with the 1 s minimum applied.
    #[must_use]
    pub fn mexc_spot_poll_ms(&self) -> u64 {
        self.mexc_spot_poll_ms.max(1_000)
    }

    /// Normalized base path: empty, or `/prefix` with no trailing slash.
    #[must_use]
    pub fn base_path(&self) -> String {
        let trimmed = self.base_path.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return String::new();
        }
        if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        }
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();

        assert_eq!(config.symbols(), vec!["WHITEWHALEUSDT"]);
        assert_eq!(config.depth, 50);
        assert_eq!(config.base_mm_notional, 30_000.0);
        assert_eq!(config.metrics_interval_ms, 1_000);
        assert_eq!(config.port, 3000);
        assert!(config.live_monitoring);
    }

    #[test]
    fn test_symbols_are_uppercased_and_trimmed() {
        let config = Config {
            symbols: " btcusdt, ethusdt ,,SOLUSDT".to_string(),
            ..Config::default()
        };

        assert_eq!(config.symbols(), vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
    }

    #[test]
    fn test_bin_lists_parse() {
        let config = Config::default();

        assert_eq!(
            config.distance_bins_bps(),
            vec![5.0, 10.0, 25.0, 50.0, 100.0, 200.0]
        );
        assert_eq!(config.size_bins().len(), 7);
    }

    #[test]
    fn test_bin_lists_drop_garbage() {
        let config = Config {
            distance_bins_bps: "5,abc,10".to_string(),
            ..Config::default()
        };

        assert_eq!(config.distance_bins_bps(), vec![5.0, 10.0]);
    }

    #[test]
    fn test_spot_poll_minimum() {
        let config = Config {
            mexc_spot_poll_ms: 250,
            ..Config::default()
        };

        assert_eq!(config.mexc_spot_poll_ms(), 1_000);
    }

    #[test]
    fn test_base_path_normalization() {
        let mut config = Config::default();
        assert_eq!(config.base_path(), "");

        config.base_path = "monitor/".to_string();
        assert_eq!(config.base_path(), "/monitor");

        config.base_path = "/monitor".to_string();
        assert_eq!(config.base_path(), "/monitor");
    }
}
