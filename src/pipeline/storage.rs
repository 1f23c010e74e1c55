//! Storage abstraction for pipeline state.
//!
//! Defines the persistence contract for market snapshots, alert flags, the
//! notify cursor, and webhook signals, with a SQLite implementation. Alert
//! flag writes are monotonic upserts and the cursor only moves forward, so
//! concurrent scan invocations stay safe under last-writer-wins per key.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, FromRow, Pool, Sqlite};
use std::sync::Arc;
use tracing::{debug, info};

use crate::pipeline::errors::PipelineError;
use crate::types::{AlertState, MarketSnapshot, SocialSignal};

/// Persistence contract for the pipeline. The alert scanner exclusively
/// owns the alert-state and cursor rows; no other component writes them.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Overwrite the market snapshot for a token (last write wins).
    async fn upsert_market(&self, snapshot: &MarketSnapshot) -> Result<()>;

    /// Read the market snapshot for a token.
    async fn market(&self, token_address: &str) -> Result<Option<MarketSnapshot>>;

    /// Read the alert state for a token; `None` when never alerted.
    async fn alert_state(&self, token_address: &str) -> Result<Option<AlertState>>;

    /// Set the score-alert flag true (never back to false).
    async fn mark_score_alerted(&self, token_address: &str) -> Result<()>;

    /// Set the volume-alert flag true (never back to false).
    async fn mark_vol_alerted(&self, token_address: &str) -> Result<()>;

    /// Read the scan cursor.
    async fn notify_cursor(&self) -> Result<Option<DateTime<Utc>>>;

    /// Advance the cursor; a value older than the stored one is ignored.
    async fn advance_cursor(&self, last_seen_at: DateTime<Utc>) -> Result<()>;

    /// Persist an accepted webhook signal, idempotent on cast hash.
    async fn insert_social_signal(&self, signal: &SocialSignal) -> Result<()>;

    /// Count stored signals mentioning a token by ticker or address.
    async fn count_token_mentions(&self, symbol: &str, address: Option<&str>) -> Result<i64>;

    /// Health check for the storage backend.
    async fn health_check(&self) -> Result<bool>;
}

#[derive(FromRow)]
struct MarketRow {
    token_address: String,
    price_usd: Option<f64>,
    market_cap_usd: Option<f64>,
    liquidity_usd: Option<f64>,
    volume_24h_usd: Option<f64>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct AlertStateRow {
    token_address: String,
    alerted_score_90: bool,
    alerted_vol_1000: bool,
    updated_at: DateTime<Utc>,
}

/// SQLite implementation of [`PipelineStore`].
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub async fn new(db_path: &str) -> Result<Arc<Self>> {
        Self::connect(&format!("sqlite:{}?mode=rwc", db_path), 5).await
    }

    /// In-memory database, used by tests. A single pooled connection keeps
    /// every query on the same in-memory instance.
    pub async fn new_in_memory() -> Result<Arc<Self>> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn connect(url: &str, max_connections: u32) -> Result<Arc<Self>> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .context("Failed to connect to SQLite database")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS markets (
                token_address TEXT PRIMARY KEY,
                price_usd REAL,
                market_cap_usd REAL,
                liquidity_usd REAL,
                volume_24h_usd REAL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await
        .context("Failed to create markets table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS token_alert_state (
                token_address TEXT PRIMARY KEY,
                alerted_score_90 BOOLEAN NOT NULL DEFAULT FALSE,
                alerted_vol_1000 BOOLEAN NOT NULL DEFAULT FALSE,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await
        .context("Failed to create token_alert_state table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notify_cursor (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                last_seen_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await
        .context("Failed to create notify_cursor table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS social_signals (
                cast_hash TEXT PRIMARY KEY,
                author_fid INTEGER NOT NULL,
                author_username TEXT NOT NULL,
                author_score REAL NOT NULL,
                text TEXT NOT NULL,
                tickers TEXT NOT NULL,
                contracts TEXT NOT NULL,
                cast_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await
        .context("Failed to create social_signals table")?;

        info!("SqliteStore initialized");

        Ok(Arc::new(Self { pool }))
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl PipelineStore for SqliteStore {
    async fn upsert_market(&self, snapshot: &MarketSnapshot) -> Result<()> {
        debug!("Upserting market snapshot for {}", snapshot.token_address);

        sqlx::query(
            r#"
            INSERT INTO markets (
                token_address, price_usd, market_cap_usd, liquidity_usd,
                volume_24h_usd, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (token_address) DO UPDATE SET
                price_usd = excluded.price_usd,
                market_cap_usd = excluded.market_cap_usd,
                liquidity_usd = excluded.liquidity_usd,
                volume_24h_usd = excluded.volume_24h_usd,
                updated_at = excluded.updated_at;
            "#,
        )
        .bind(&snapshot.token_address)
        .bind(snapshot.price_usd)
        .bind(snapshot.market_cap_usd)
        .bind(snapshot.liquidity_usd)
        .bind(snapshot.volume_24h_usd)
        .bind(snapshot.updated_at)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::Persistence)
        .context("Failed to upsert market snapshot")?;

        Ok(())
    }

    async fn market(&self, token_address: &str) -> Result<Option<MarketSnapshot>> {
        let row: Option<MarketRow> =
            sqlx::query_as("SELECT * FROM markets WHERE token_address = ?")
                .bind(token_address)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch market snapshot")?;

        Ok(row.map(|r| MarketSnapshot {
            token_address: r.token_address,
            price_usd: r.price_usd,
            market_cap_usd: r.market_cap_usd,
            liquidity_usd: r.liquidity_usd,
            volume_24h_usd: r.volume_24h_usd,
            updated_at: r.updated_at,
        }))
    }

    async fn alert_state(&self, token_address: &str) -> Result<Option<AlertState>> {
        let row: Option<AlertStateRow> =
            sqlx::query_as("SELECT * FROM token_alert_state WHERE token_address = ?")
                .bind(token_address)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch alert state")?;

        Ok(row.map(|r| AlertState {
            token_address: r.token_address,
            alerted_score_90: r.alerted_score_90,
            alerted_vol_1000: r.alerted_vol_1000,
            updated_at: r.updated_at,
        }))
    }

    async fn mark_score_alerted(&self, token_address: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO token_alert_state (token_address, alerted_score_90, alerted_vol_1000, updated_at)
            VALUES (?, TRUE, FALSE, ?)
            ON CONFLICT (token_address) DO UPDATE SET
                alerted_score_90 = TRUE,
                updated_at = excluded.updated_at;
            "#,
        )
        .bind(token_address)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(PipelineError::Persistence)
        .context("Failed to mark score alert")?;

        Ok(())
    }

    async fn mark_vol_alerted(&self, token_address: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO token_alert_state (token_address, alerted_score_90, alerted_vol_1000, updated_at)
            VALUES (?, FALSE, TRUE, ?)
            ON CONFLICT (token_address) DO UPDATE SET
                alerted_vol_1000 = TRUE,
                updated_at = excluded.updated_at;
            "#,
        )
        .bind(token_address)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(PipelineError::Persistence)
        .context("Failed to mark volume alert")?;

        Ok(())
    }

    async fn notify_cursor(&self) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(DateTime<Utc>,)> =
            sqlx::query_as("SELECT last_seen_at FROM notify_cursor WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch notify cursor")?;

        Ok(row.map(|(ts,)| ts))
    }

    async fn advance_cursor(&self, last_seen_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notify_cursor (id, last_seen_at) VALUES (1, ?)
            ON CONFLICT (id) DO UPDATE SET
                last_seen_at = MAX(last_seen_at, excluded.last_seen_at);
            "#,
        )
        .bind(last_seen_at)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::Persistence)
        .context("Failed to advance notify cursor")?;

        Ok(())
    }

    async fn insert_social_signal(&self, signal: &SocialSignal) -> Result<()> {
        debug!("Storing social signal {}", signal.cast_hash);

        sqlx::query(
            r#"
            INSERT INTO social_signals (
                cast_hash, author_fid, author_username, author_score,
                text, tickers, contracts, cast_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (cast_hash) DO NOTHING;
            "#,
        )
        .bind(&signal.cast_hash)
        .bind(signal.author_fid as i64)
        .bind(&signal.author_username)
        .bind(signal.author_score)
        .bind(&signal.text)
        .bind(serde_json::to_string(&signal.tickers)?)
        .bind(serde_json::to_string(&signal.contracts)?)
        .bind(signal.cast_at)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::Persistence)
        .context("Failed to insert social signal")?;

        Ok(())
    }

    async fn count_token_mentions(&self, symbol: &str, address: Option<&str>) -> Result<i64> {
        // Ticker and contract lists are stored as JSON arrays; a quoted
        // LIKE match keeps the lookup simple without a JSON extension.
        // An empty needle has no wildcards and matches no stored row.
        let ticker_needle = format!("%\"{}\"%", symbol.to_uppercase());
        let contract_needle = address
            .map(|a| format!("%\"{}\"%", a.to_lowercase()))
            .unwrap_or_default();

        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM social_signals
            WHERE tickers LIKE ? OR contracts LIKE ?;
            "#,
        )
        .bind(ticker_needle)
        .bind(contract_needle)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count token mentions")?;

        Ok(count.0)
    }

    async fn health_check(&self) -> Result<bool> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}
