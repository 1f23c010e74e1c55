//! Enrichment stage: social scrape, market snapshot, creator resolution.
//!
//! Runs once per unique token after merge. The three augmentations are
//! independently fallible and independently skippable; a failure for one
//! token never affects another token's enrichment, and a failed sub-step
//! yields an absent value, never a zeroed one.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use moka::future::Cache;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tracing::{debug, instrument, warn};

use crate::pipeline::errors::PipelineError;
use crate::pipeline::social_graph::SocialGraph;
use crate::pipeline::storage::PipelineStore;
use crate::types::{CreatorIdentity, MarketSnapshot, PipelineConfig, Token};

const DEXSCREENER_BASE_URL: &str = "https://api.dexscreener.com";
const BASESCAN_BASE_URL: &str = "https://api.basescan.org";

/// Market-data lookups keyed by token address.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Best trading pair for a token; `None` when no pair exists yet.
    async fn pair_by_address(&self, address: &str) -> Result<Option<MarketSnapshot>>;
}

/// Block-explorer lookups.
#[async_trait]
pub trait ChainExplorer: Send + Sync {
    /// The address that deployed a contract; `None` when unknown.
    async fn contract_creator(&self, address: &str) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct PairsResponse {
    pairs: Option<Vec<PairRaw>>,
}

#[derive(Debug, Deserialize)]
struct PairRaw {
    #[serde(rename = "priceUsd")]
    price_usd: Option<String>,
    #[serde(rename = "marketCap")]
    market_cap: Option<f64>,
    liquidity: Option<LiquidityRaw>,
    volume: Option<VolumeRaw>,
}

#[derive(Debug, Deserialize)]
struct LiquidityRaw {
    usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct VolumeRaw {
    h24: Option<f64>,
}

/// DexScreener-backed [`MarketDataProvider`].
pub struct DexScreenerProvider {
    http_client: Client,
    base_url: String,
    limiter: Arc<DefaultDirectRateLimiter>,
    timeout: Duration,
}

impl DexScreenerProvider {
    pub fn new(http_client: Client, requests_per_second: u32) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::new(1).unwrap()),
        );
        Self {
            http_client,
            base_url: DEXSCREENER_BASE_URL.to_string(),
            limiter: Arc::new(RateLimiter::direct(quota)),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl MarketDataProvider for DexScreenerProvider {
    #[instrument(skip(self))]
    async fn pair_by_address(&self, address: &str) -> Result<Option<MarketSnapshot>> {
        self.limiter.until_ready().await;

        let url = format!("{}/latest/dex/tokens/{}", self.base_url, address);
        let response: PairsResponse = self
            .http_client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .context("Market data request failed")?
            .error_for_status()
            .context("Market data provider returned an error status")?
            .json()
            .await
            .context("Failed to parse market data response")?;

        let pair = match response.pairs.and_then(|pairs| pairs.into_iter().next()) {
            Some(pair) => pair,
            None => {
                debug!("No trading pair for {}", address);
                return Ok(None);
            }
        };

        Ok(Some(MarketSnapshot {
            token_address: address.to_string(),
            price_usd: pair.price_usd.as_deref().and_then(|p| p.parse().ok()),
            market_cap_usd: pair.market_cap,
            liquidity_usd: pair.liquidity.and_then(|l| l.usd),
            volume_24h_usd: pair.volume.and_then(|v| v.h24),
            updated_at: Utc::now(),
        }))
    }
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    result: Option<Vec<ContractCreationRaw>>,
}

#[derive(Debug, Deserialize)]
struct ContractCreationRaw {
    #[serde(rename = "contractCreator")]
    contract_creator: Option<String>,
}

/// Basescan-style [`ChainExplorer`].
pub struct BasescanExplorer {
    http_client: Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl BasescanExplorer {
    /// Build the client. The API key is required; creator resolution is
    /// disabled without it.
    pub fn new(http_client: Client, api_key: Option<String>) -> Result<Self, PipelineError> {
        let api_key = api_key.ok_or(PipelineError::ConfigMissing("block explorer API key"))?;
        Ok(Self {
            http_client,
            base_url: BASESCAN_BASE_URL.to_string(),
            api_key,
            timeout: Duration::from_secs(10),
        })
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl ChainExplorer for BasescanExplorer {
    #[instrument(skip(self))]
    async fn contract_creator(&self, address: &str) -> Result<Option<String>> {
        let url = format!(
            "{}/api?module=contract&action=getcontractcreation&contractaddresses={}&apikey={}",
            self.base_url, address, self.api_key
        );
        let response: ExplorerResponse = self
            .http_client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .context("Explorer request failed")?
            .error_for_status()
            .context("Explorer returned an error status")?
            .json()
            .await
            .context("Failed to parse explorer response")?;

        if response.status != "1" {
            debug!("Explorer returned no creation record for {}", address);
            return Ok(None);
        }

        Ok(response
            .result
            .and_then(|r| r.into_iter().next())
            .and_then(|r| r.contract_creator)
            .map(|c| c.to_lowercase()))
    }
}

// Link extraction patterns applied to scraped platform pages.
static X_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://(?:www\.)?(?:x\.com|twitter\.com)/[A-Za-z0-9_]+[^\s"'<>)]*"#).unwrap()
});

static FARCASTER_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://(?:www\.)?(?:warpcast\.com|farcaster\.xyz)/[^\s"'<>)]+"#).unwrap()
});

static TELEGRAM_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://(?:www\.)?(?:t\.me|telegram\.me)/[^\s"'<>)]+"#).unwrap()
});

static ANY_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>)]+"#).unwrap());

static FARCASTER_PROFILE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/profiles?/(\d+)").unwrap());

static FARCASTER_USERNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:warpcast\.com|farcaster\.xyz)/([A-Za-z0-9][A-Za-z0-9_.-]*)").unwrap()
});

/// Domains that are launch platforms, aggregators, or social hosts; never a
/// project's own website.
const AGGREGATOR_DOMAINS: &[&str] = &[
    "clanker.world",
    "flaunch.gg",
    "dexscreener.com",
    "dextools.io",
    "geckoterminal.com",
    "coingecko.com",
    "basescan.org",
    "etherscan.io",
    "x.com",
    "twitter.com",
    "warpcast.com",
    "farcaster.xyz",
    "t.me",
    "telegram.me",
];

/// Social links found on a scraped page. All fields optional; the patch is
/// applied additively and never clears a known value.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SocialLinkPatch {
    pub website_url: Option<String>,
    pub x_url: Option<String>,
    pub farcaster_url: Option<String>,
    pub telegram_url: Option<String>,
}

/// Extract the first matching social links from page HTML.
pub fn extract_social_links(html: &str) -> SocialLinkPatch {
    let x_url = X_URL_RE.find(html).map(|m| m.as_str().to_string());
    let farcaster_url = FARCASTER_URL_RE.find(html).map(|m| m.as_str().to_string());
    let telegram_url = TELEGRAM_URL_RE.find(html).map(|m| m.as_str().to_string());

    let website_url = ANY_URL_RE
        .find_iter(html)
        .map(|m| m.as_str())
        .find(|url| !is_aggregator_url(url))
        .map(|url| url.to_string());

    SocialLinkPatch {
        website_url,
        x_url,
        farcaster_url,
        telegram_url,
    }
}

fn is_aggregator_url(url: &str) -> bool {
    let host = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.")
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .to_lowercase();

    AGGREGATOR_DOMAINS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)))
}

/// Numeric profile id embedded in a Farcaster profile URL.
pub fn farcaster_fid_from_url(url: &str) -> Option<u64> {
    FARCASTER_PROFILE_ID_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Username embedded in a Farcaster profile URL. Reserved path segments
/// (`~`, numeric profile paths) yield `None`.
pub fn farcaster_username_from_url(url: &str) -> Option<String> {
    if farcaster_fid_from_url(url).is_some() {
        return None;
    }
    FARCASTER_USERNAME_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|name| name != "~")
}

/// Outcome of one token's enrichment pass, for logging and summaries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentOutcome {
    pub social: bool,
    pub market: bool,
    pub identity: bool,
}

/// A token after enrichment, with its market snapshot when one exists.
#[derive(Debug, Clone)]
pub struct EnrichedToken {
    pub token: Token,
    pub market: Option<MarketSnapshot>,
    pub outcome: EnrichmentOutcome,
}

/// Enrichment stage. External collaborators are injected so tests can
/// substitute fakes.
pub struct Enricher {
    http_client: Client,
    market: Arc<dyn MarketDataProvider>,
    explorer: Option<Arc<dyn ChainExplorer>>,
    social_graph: Option<Arc<dyn SocialGraph>>,
    identity_cache: Cache<String, CreatorIdentity>,
    market_retry_attempts: usize,
    max_parallel: usize,
    scrape_timeout: Duration,
}

impl Enricher {
    pub fn new(
        http_client: Client,
        market: Arc<dyn MarketDataProvider>,
        explorer: Option<Arc<dyn ChainExplorer>>,
        social_graph: Option<Arc<dyn SocialGraph>>,
        config: &PipelineConfig,
    ) -> Self {
        let identity_cache = Cache::builder()
            .max_capacity(config.identity_cache_max_entries)
            .time_to_live(Duration::from_secs(config.identity_cache_ttl_secs))
            .build();

        Self {
            http_client,
            market,
            explorer,
            social_graph,
            identity_cache,
            market_retry_attempts: config.market_retry_attempts,
            max_parallel: config.max_parallel_enrichments.max(1),
            scrape_timeout: Duration::from_secs(10),
        }
    }

    /// Enrich all tokens with bounded concurrency. Per-token failures are
    /// logged and swallowed; the output always has one entry per input.
    #[instrument(skip(self, tokens, store))]
    pub async fn enrich_all(
        &self,
        tokens: Vec<Token>,
        store: &dyn PipelineStore,
    ) -> Vec<EnrichedToken> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        let tasks = tokens.into_iter().map(|token| {
            let semaphore = semaphore.clone();
            async move {
                // Holding a permit bounds concurrent third-party calls.
                let _permit = semaphore.acquire().await;
                self.enrich_one(token, store).await
            }
        });

        join_all(tasks).await
    }

    /// Enrich one token: scrape, market, creator. Sub-steps run in order
    /// because creator resolution depends on scrape results.
    #[instrument(skip(self, store), fields(address = %token.address))]
    async fn enrich_one(&self, mut token: Token, store: &dyn PipelineStore) -> EnrichedToken {
        let mut outcome = EnrichmentOutcome::default();

        // 1. Social scrape: additive patch, empty on failure.
        if needs_social_scrape(&token) {
            match self.scrape_social_links(&token.source_url).await {
                Ok(patch) => {
                    apply_social_patch(&mut token, patch);
                    outcome.social = true;
                }
                Err(e) => warn!("Social scrape failed for {}: {:#}", token.address, e),
            }
        }

        // 2. Market snapshot: absent on failure or no pair, never zero.
        let market = match self.fetch_market_with_retries(&token.address).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Market enrichment failed for {}: {:#}", token.address, e);
                None
            }
        };
        if let Some(snapshot) = &market {
            outcome.market = true;
            if let Err(e) = store.upsert_market(snapshot).await {
                warn!("Market persist failed for {}: {:#}", token.address, e);
            }
        }

        // 3. Creator resolution, isolated per token.
        match self.resolve_creator(&mut token).await {
            Ok(resolved) => outcome.identity = resolved,
            Err(e) => warn!("Creator resolution failed for {}: {:#}", token.address, e),
        }

        EnrichedToken {
            token,
            market,
            outcome,
        }
    }

    /// Fetch the platform page and extract links.
    async fn scrape_social_links(&self, source_url: &str) -> Result<SocialLinkPatch> {
        let html = self
            .http_client
            .get(source_url)
            .timeout(self.scrape_timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(PipelineError::Http)
            .context("Failed to fetch platform page")?
            .text()
            .await
            .map_err(PipelineError::Http)
            .context("Failed to read platform page body")?;

        Ok(extract_social_links(&html))
    }

    async fn fetch_market_with_retries(&self, address: &str) -> Result<Option<MarketSnapshot>> {
        let retry_strategy = ExponentialBackoff::from_millis(200)
            .max_delay(Duration::from_secs(3))
            .take(self.market_retry_attempts);

        Retry::spawn(retry_strategy, || self.market.pair_by_address(address)).await
    }

    /// Resolve the creator's on-chain address and social identity.
    ///
    /// Identity resolution order is fixed: explicit profile id in a scraped
    /// Farcaster URL, then username from that URL, then lookup by creator
    /// address. The first successful step wins. Returns whether an identity
    /// is attached after this pass.
    async fn resolve_creator(&self, token: &mut Token) -> Result<bool> {
        if token.creator_fid.is_some() && token.creator_username.is_some() {
            return Ok(true);
        }

        if let Some(identity) = self.identity_cache.get(&token.address).await {
            attach_identity(token, &identity);
            return Ok(true);
        }

        // Contract creator comes from the explorer when the platform
        // listing didn't carry one.
        if token.creator_address.is_none() {
            if let Some(explorer) = &self.explorer {
                token.creator_address = explorer.contract_creator(&token.address).await?;
            }
        }

        let social_graph = match &self.social_graph {
            Some(graph) => graph,
            None => return Ok(token.creator_fid.is_some()),
        };

        let mut identity: Option<CreatorIdentity> = None;

        // (a) explicit numeric profile id, also covers a platform-supplied fid
        let known_fid = token
            .creator_fid
            .or_else(|| token.farcaster_url.as_deref().and_then(farcaster_fid_from_url));
        if let Some(fid) = known_fid {
            if let Some(user) = social_graph.user_by_fid(fid).await? {
                identity = Some(CreatorIdentity {
                    fid: user.fid,
                    username: user.username,
                });
            }
        }

        // (b) username embedded in the scraped Farcaster URL
        if identity.is_none() {
            if let Some(username) = token
                .farcaster_url
                .as_deref()
                .and_then(farcaster_username_from_url)
            {
                if let Some(user) = social_graph.user_by_username(&username).await? {
                    identity = Some(CreatorIdentity {
                        fid: user.fid,
                        username: user.username,
                    });
                }
            }
        }

        // (c) lookup by creator address
        if identity.is_none() {
            if let Some(creator) = token.creator_address.as_deref() {
                if let Some(user) = social_graph.user_by_address(creator).await? {
                    identity = Some(CreatorIdentity {
                        fid: user.fid,
                        username: user.username,
                    });
                }
            }
        }

        match identity {
            Some(identity) => {
                attach_identity(token, &identity);
                self.identity_cache
                    .insert(token.address.clone(), identity)
                    .await;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn needs_social_scrape(token: &Token) -> bool {
    token.website_url.is_none()
        || token.x_url.is_none()
        || token.farcaster_url.is_none()
        || token.telegram_url.is_none()
}

/// Additive merge: the patch only fills absent fields.
fn apply_social_patch(token: &mut Token, patch: SocialLinkPatch) {
    if token.website_url.is_none() {
        token.website_url = patch.website_url;
    }
    if token.x_url.is_none() {
        token.x_url = patch.x_url;
    }
    if token.farcaster_url.is_none() {
        token.farcaster_url = patch.farcaster_url;
    }
    if token.telegram_url.is_none() {
        token.telegram_url = patch.telegram_url;
    }
}

fn attach_identity(token: &mut Token, identity: &CreatorIdentity) {
    if token.creator_fid.is_none() {
        token.creator_fid = Some(identity.fid);
    }
    if token.creator_username.is_none() && !identity.username.is_empty() {
        token.creator_username = Some(identity.username.clone());
    }
}
