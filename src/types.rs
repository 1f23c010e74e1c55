//! Core types and data structures shared across the discovery pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Launch platform a token was discovered on. One tag per source adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSource {
    Clanker,
    Flaunch,
}

impl TokenSource {
    /// Returns the string tag used in logs and persisted rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenSource::Clanker => "clanker",
            TokenSource::Flaunch => "flaunch",
        }
    }
}

impl std::fmt::Display for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical token record. `address` is the primary key across the whole
/// pipeline; every other field fills progressively and never regresses from
/// a known value back to empty/absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Lower-cased hex contract address
    pub address: String,
    /// Token name, empty string when the platform omits it
    pub name: String,
    /// Ticker symbol, empty string when the platform omits it
    pub symbol: String,
    /// Platform that first reported this record
    pub source: TokenSource,
    /// Platform page for the token, derived from the address when missing
    pub source_url: String,
    /// Earliest known creation time across all sources
    pub first_seen_at: Option<DateTime<Utc>>,
    /// External project website
    pub website_url: Option<String>,
    /// X / Twitter profile link
    pub x_url: Option<String>,
    /// Farcaster profile link
    pub farcaster_url: Option<String>,
    /// Telegram link
    pub telegram_url: Option<String>,
    /// On-chain contract creator
    pub creator_address: Option<String>,
    /// Resolved social-graph id of the creator
    pub creator_fid: Option<u64>,
    /// Resolved social-graph username of the creator
    pub creator_username: Option<String>,
}

impl Token {
    /// Minimal record as produced by adapter normalization.
    pub fn new(address: String, source: TokenSource, source_url: String) -> Self {
        Self {
            address,
            name: String::new(),
            symbol: String::new(),
            source,
            source_url,
            first_seen_at: None,
            website_url: None,
            x_url: None,
            farcaster_url: None,
            telegram_url: None,
            creator_address: None,
            creator_fid: None,
            creator_username: None,
        }
    }

    /// Resolved creator identity, if the fid is known.
    pub fn creator_identity(&self) -> Option<CreatorIdentity> {
        self.creator_fid.map(|fid| CreatorIdentity {
            fid,
            username: self.creator_username.clone().unwrap_or_default(),
        })
    }
}

/// Point-in-time market stats for a token. Overwritten on every enrichment
/// pass, never historized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub token_address: String,
    pub price_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub volume_24h_usd: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// Resolved social identity of a contract creator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatorIdentity {
    pub fid: u64,
    pub username: String,
}

/// One follower drawn from the social-graph sample. `score` is absent when
/// the graph has not scored that account.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowerSample {
    pub score: Option<f64>,
    pub power_badge: bool,
}

/// Aggregate quality of a creator's follower sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowersQuality {
    /// Mean score over sampled followers that carry a score
    pub avg_follower_score: f64,
    /// Fraction of the full sample flagged as power-badge accounts
    pub power_badge_ratio: f64,
    /// Full sample size, including unscored members
    pub sampled: usize,
    /// Members that contributed to `avg_follower_score`
    pub scored: usize,
    /// Clamped weighted aggregate in [0, 1]
    pub value: f64,
}

/// Composite reputation score. Derived on demand, never a source of truth.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HatchrScore {
    pub creator_score: Option<f64>,
    pub followers_quality: Option<f64>,
    pub hatchr_score: Option<f64>,
}

impl HatchrScore {
    pub fn empty() -> Self {
        Self {
            creator_score: None,
            followers_quality: None,
            hatchr_score: None,
        }
    }
}

/// Persisted alert flags for one token. Both flags only ever transition
/// false -> true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertState {
    pub token_address: String,
    pub alerted_score_90: bool,
    pub alerted_vol_1000: bool,
    pub updated_at: DateTime<Utc>,
}

impl AlertState {
    /// Default state for a token with no persisted row.
    pub fn unalerted(token_address: &str) -> Self {
        Self {
            token_address: token_address.to_string(),
            alerted_score_90: false,
            alerted_vol_1000: false,
            updated_at: Utc::now(),
        }
    }
}

/// A cast accepted from the webhook intake and persisted as a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialSignal {
    pub cast_hash: String,
    pub author_fid: u64,
    pub author_username: String,
    pub author_score: f64,
    pub text: String,
    /// `$TICKER` style mentions found in the cast text
    pub tickers: Vec<String>,
    /// Contract addresses found in the cast text, lower-cased
    pub contracts: Vec<String>,
    pub cast_at: DateTime<Utc>,
}

/// Per-scan counters for dispatched notifications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SentCounts {
    pub score90: usize,
    pub vol1000: usize,
}

/// JSON summary returned by one alert scan invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub ok: bool,
    /// Unique tokens seen after merge
    pub checked: usize,
    /// Tokens strictly newer than the cursor
    pub fresh: usize,
    /// Cursor value after this scan
    pub cursor: Option<DateTime<Utc>>,
    pub sent: SentCounts,
}

/// Versioned scoring constants. Hoisted into configuration so formula
/// changes are auditable and testable independently of call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreConfig {
    /// Formula version, bumped whenever a weight or threshold changes
    pub version: u32,
    /// Weight of the creator score in the composite
    pub creator_weight: f64,
    /// Weight of followers quality in the composite
    pub followers_weight: f64,
    /// Weight of the mean follower score inside followers quality
    pub follower_score_weight: f64,
    /// Weight of the power-badge ratio inside followers quality
    pub power_badge_weight: f64,
    /// Followers drawn per sample
    pub follower_sample_size: usize,
    /// Reference audience size for the size-aware variant
    pub size_factor_max_ref: u64,
    /// Composite score above which a score alert fires
    pub score_alert_threshold: f64,
    /// 24h USD volume above which a volume alert fires
    pub volume_alert_threshold_usd: f64,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            version: 1,
            creator_weight: 0.6,
            followers_weight: 0.4,
            follower_score_weight: 0.85,
            power_badge_weight: 0.15,
            follower_sample_size: 150,
            size_factor_max_ref: 1000,
            score_alert_threshold: 0.9,
            volume_alert_threshold_usd: 1000.0,
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Scoring constants
    pub scoring: ScoreConfig,
    /// Block-explorer API key; creator resolution is disabled without it
    pub explorer_api_key: Option<String>,
    /// Social-graph API key; identity lookups and scoring need it
    pub social_graph_api_key: Option<String>,
    /// Shared secret for webhook signature verification
    pub webhook_secret: Option<String>,
    /// Per-adapter fetch timeout in seconds
    pub adapter_timeout_secs: u64,
    /// Deadline for the gather phase of one scan, in seconds
    pub scan_timeout_secs: u64,
    /// Retry attempts for the market-data fetch
    pub market_retry_attempts: usize,
    /// Bounded concurrency for per-token enrichment
    pub max_parallel_enrichments: usize,
    /// Social-graph requests per second
    pub social_graph_rps: u32,
    /// Market-data requests per second
    pub market_data_rps: u32,
    /// Lookback window used when no cursor row exists, in seconds
    pub lookback_window_secs: i64,
    /// Resolved-identity cache TTL in seconds
    pub identity_cache_ttl_secs: u64,
    /// Maximum resolved-identity cache entries
    pub identity_cache_max_entries: u64,
    /// Webhook authors below this score are dropped
    pub min_author_score: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scoring: ScoreConfig::default(),
            explorer_api_key: None,
            social_graph_api_key: None,
            webhook_secret: None,
            adapter_timeout_secs: 15,
            scan_timeout_secs: 12,
            market_retry_attempts: 3,
            max_parallel_enrichments: 8,
            social_graph_rps: 5,
            market_data_rps: 5,
            lookback_window_secs: 86_400,
            identity_cache_ttl_secs: 3_600,
            identity_cache_max_entries: 10_000,
            min_author_score: 0.6,
        }
    }
}
