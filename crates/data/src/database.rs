//! SQLite database bootstrap.
//!
//! One database file under the data directory holds every store's table.
//! Journal mode is WAL so feed writers and HTTP readers do not stall each
//! other. The `outlier_spans` table has grown columns over time, so startup
//! applies an additive migration instead of recreating it.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;

/// Database file name under `DATA_DIR`.
const DB_FILE: &str = "depthwatch.db";

/// Columns added to `outlier_spans` after its initial schema, with their
/// declarations. Startup adds whichever are missing.
const SPAN_ADDED_COLUMNS: &[(&str, &str)] = &[
    ("start_book", "TEXT NOT NULL DEFAULT '[]'"),
    ("end_book", "TEXT NOT NULL DEFAULT '[]'"),
    ("start_best_bid", "TEXT NOT NULL DEFAULT '0'"),
    ("start_best_ask", "TEXT NOT NULL DEFAULT '0'"),
    ("start_spread_bps", "REAL NOT NULL DEFAULT 0"),
    ("start_imbalance", "REAL NOT NULL DEFAULT 0"),
    ("start_bid_depth", "TEXT NOT NULL DEFAULT '0'"),
    ("start_ask_depth", "TEXT NOT NULL DEFAULT '0'"),
    ("start_microprice", "TEXT NOT NULL DEFAULT '0'"),
    ("start_level_rank", "INTEGER NOT NULL DEFAULT 0"),
    ("start_vol_1m", "REAL NOT NULL DEFAULT 0"),
    ("start_vol_5m", "REAL NOT NULL DEFAULT 0"),
    ("end_best_bid", "TEXT NOT NULL DEFAULT '0'"),
    ("end_best_ask", "TEXT NOT NULL DEFAULT '0'"),
    ("end_spread_bps", "REAL NOT NULL DEFAULT 0"),
    ("end_imbalance", "REAL NOT NULL DEFAULT 0"),
    ("end_bid_depth", "TEXT NOT NULL DEFAULT '0'"),
    ("end_ask_depth", "TEXT NOT NULL DEFAULT '0'"),
    ("end_microprice", "TEXT NOT NULL DEFAULT '0'"),
    ("end_level_rank", "INTEGER NOT NULL DEFAULT 0"),
    ("end_vol_1m", "REAL NOT NULL DEFAULT 0"),
    ("end_vol_5m", "REAL NOT NULL DEFAULT 0"),
    ("size_delta", "TEXT NOT NULL DEFAULT '0'"),
    ("size_delta_pct", "REAL NOT NULL DEFAULT 0"),
    ("trade_buy_qty", "TEXT NOT NULL DEFAULT '0'"),
    ("trade_sell_qty", "TEXT NOT NULL DEFAULT '0'"),
    ("trade_count", "INTEGER NOT NULL DEFAULT 0"),
];

/// Shared handle to the monitor's SQLite database.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if missing) the database under `data_dir`, switches
    /// to WAL and ensures the schema is current.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or the database
    /// cannot be opened or migrated.
    pub async fn connect(data_dir: &str) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data dir {data_dir}"))?;
        let path = Path::new(data_dir).join(DB_FILE);

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("opening {}", path.display()))?;

        let db = Self { pool };
        db.create_schema().await?;
        db.migrate_spans().await?;
        Ok(db)
    }

    /// In-memory database for tests. A single connection, because every
    /// SQLite `:memory:` connection is its own database.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.create_schema().await?;
        db.migrate_spans().await?;
        Ok(db)
    }

    /// The underlying pool, shared by the stores.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_schema(&self) -> Result<()> {
        let statements = [
            r"
            CREATE TABLE IF NOT EXISTS metrics (
                ts INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                point TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_metrics_ts ON metrics(ts)",
            "CREATE INDEX IF NOT EXISTS idx_metrics_symbol_ts ON metrics(symbol, ts)",
            r"
            CREATE TABLE IF NOT EXISTS trades (
                ts INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                market TEXT NOT NULL,
                exchange TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                qty TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_trades_ts ON trades(ts)",
            "CREATE INDEX IF NOT EXISTS idx_trades_symbol_ts ON trades(symbol, ts)",
            r"
            CREATE TABLE IF NOT EXISTS liquidations (
                ts INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                market TEXT NOT NULL,
                exchange TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                qty TEXT NOT NULL,
                usd_value TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_liquidations_ts ON liquidations(ts)",
            "CREATE INDEX IF NOT EXISTS idx_liquidations_symbol_ts ON liquidations(symbol, ts)",
            r"
            CREATE TABLE IF NOT EXISTS oi_funding (
                ts INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                market TEXT NOT NULL,
                exchange TEXT NOT NULL,
                open_interest TEXT,
                funding_rate TEXT
            )",
            "CREATE INDEX IF NOT EXISTS idx_oi_funding_ts ON oi_funding(ts)",
            "CREATE INDEX IF NOT EXISTS idx_oi_funding_symbol_ts ON oi_funding(symbol, ts)",
            r"
            CREATE TABLE IF NOT EXISTS outliers (
                ts INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                market TEXT NOT NULL,
                exchange TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                size TEXT NOT NULL,
                z_score REAL NOT NULL,
                bps_from_mid REAL NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_outliers_ts ON outliers(ts)",
            "CREATE INDEX IF NOT EXISTS idx_outliers_symbol_ts ON outliers(symbol, ts)",
            r"CREATE INDEX IF NOT EXISTS idx_outliers_key_ts
              ON outliers(symbol, market, exchange, ts)",
            r"
            CREATE TABLE IF NOT EXISTS outlier_spans (
                start_ts INTEGER NOT NULL,
                end_ts INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                market TEXT NOT NULL,
                exchange TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                max_z REAL NOT NULL,
                avg_z REAL NOT NULL,
                count INTEGER NOT NULL,
                start_size TEXT NOT NULL,
                end_size TEXT NOT NULL,
                filled_pct REAL NOT NULL,
                start_bps REAL NOT NULL,
                end_bps REAL NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_spans_ts ON outlier_spans(end_ts)",
            "CREATE INDEX IF NOT EXISTS idx_spans_symbol_ts ON outlier_spans(symbol, end_ts)",
            r"CREATE INDEX IF NOT EXISTS idx_spans_key_ts
              ON outlier_spans(symbol, market, exchange, end_ts)",
            r"
            CREATE TABLE IF NOT EXISTS large_moves (
                ts INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                prev_size TEXT NOT NULL,
                next_size TEXT NOT NULL,
                delta_size TEXT NOT NULL,
                notional_delta TEXT NOT NULL,
                bps_from_mid REAL NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_large_moves_ts ON large_moves(ts)",
            "CREATE INDEX IF NOT EXISTS idx_large_moves_symbol_ts ON large_moves(symbol, ts)",
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("creating schema")?;
        }

        Ok(())
    }

    /// Adds any `outlier_spans` columns introduced after the table was
    /// first created. Purely additive; existing rows get safe defaults.
    async fn migrate_spans(&self) -> Result<()> {
        let rows = sqlx::query("PRAGMA table_info(outlier_spans)")
            .fetch_all(&self.pool)
            .await
            .context("reading outlier_spans columns")?;

        let existing: std::collections::HashSet<String> = rows
            .iter()
            .filter_map(|row| row.try_get::<String, _>("name").ok())
            .collect();

        for (name, decl) in SPAN_ADDED_COLUMNS {
            if existing.contains(*name) {
                continue;
            }
            tracing::info!(column = name, "migrating outlier_spans: adding column");
            sqlx::query(&format!("ALTER TABLE outlier_spans ADD COLUMN {name} {decl}"))
                .execute(&self.pool)
                .await
                .with_context(|| format!("adding outlier_spans.{name}"))?;
        }

        Ok(())
    }
}
