//! Source adapters for the launch platforms the pipeline polls.
//!
//! Each adapter fetches the platform's raw listing shape and normalizes it
//! to the canonical `Token` record. Adapters are independent: a failing or
//! timed-out adapter contributes an empty list and a log line, never an
//! aborted run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::pipeline::errors::PipelineError;
use crate::types::{Token, TokenSource};

const CLANKER_BASE_URL: &str = "https://www.clanker.world";
const FLAUNCH_BASE_URL: &str = "https://flaunch.gg";

/// A launch platform the pipeline can poll for fresh tokens.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Tag identifying this adapter.
    fn source(&self) -> TokenSource;

    /// Fetch the platform listing and normalize it. Network errors surface
    /// as `Err`; the caller decides whether to degrade.
    async fn fetch(&self) -> Result<Vec<Token>>;
}

/// Fan out to all adapters concurrently, joining the normalized lists.
///
/// Each adapter gets its own deadline. A failure or timeout is logged and
/// yields an empty list for that adapter only.
#[instrument(skip(adapters))]
pub async fn fetch_all_sources(
    adapters: &[Arc<dyn SourceAdapter>],
    timeout: Duration,
) -> Vec<Token> {
    let fetches = adapters.iter().map(|adapter| {
        let adapter = adapter.clone();
        async move {
            match tokio::time::timeout(timeout, adapter.fetch()).await {
                Ok(Ok(tokens)) => {
                    debug!("{} returned {} records", adapter.source(), tokens.len());
                    tokens
                }
                Ok(Err(e)) => {
                    warn!(
                        "{}",
                        PipelineError::SourceUnavailable(format!(
                            "{}: {:#}",
                            adapter.source(),
                            e
                        ))
                    );
                    Vec::new()
                }
                Err(_) => {
                    warn!(
                        "{}",
                        PipelineError::SourceUnavailable(format!(
                            "{} timed out after {:?}",
                            adapter.source(),
                            timeout
                        ))
                    );
                    Vec::new()
                }
            }
        }
    });

    join_all(fetches).await.into_iter().flatten().collect()
}

/// Raw listing response from the Clanker deployments endpoint.
#[derive(Debug, Deserialize)]
pub struct ClankerListing {
    pub data: Vec<ClankerTokenRaw>,
}

#[derive(Debug, Deserialize)]
pub struct ClankerTokenRaw {
    pub contract_address: Option<String>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub created_at: Option<String>,
    pub requestor_fid: Option<u64>,
}

/// Adapter for the Clanker launch platform.
pub struct ClankerAdapter {
    http_client: Client,
    base_url: String,
}

impl ClankerAdapter {
    pub fn new(http_client: Client) -> Self {
        Self {
            http_client,
            base_url: CLANKER_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(http_client: Client, base_url: String) -> Self {
        Self {
            http_client,
            base_url,
        }
    }

    /// Fetch the latest deployments page.
    #[instrument(skip(self))]
    pub async fn fetch_raw(&self) -> Result<ClankerListing> {
        let url = format!("{}/api/tokens?sort=desc&page=1", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch Clanker listing")?
            .error_for_status()
            .context("Clanker listing returned an error status")?;

        response
            .json::<ClankerListing>()
            .await
            .context("Failed to parse Clanker listing")
    }

    /// Normalize the raw listing to canonical records.
    pub fn normalize(&self, raw: ClankerListing) -> Vec<Token> {
        raw.data
            .into_iter()
            .filter_map(|entry| {
                let address = entry
                    .contract_address
                    .as_deref()
                    .unwrap_or_default()
                    .trim()
                    .to_lowercase();
                if address.is_empty() {
                    return None;
                }

                let mut token = Token::new(
                    address.clone(),
                    TokenSource::Clanker,
                    format!("{}/clanker/{}", self.base_url, address),
                );
                token.name = entry.name.unwrap_or_default();
                token.symbol = entry.symbol.unwrap_or_default();
                token.first_seen_at = entry.created_at.as_deref().and_then(parse_timestamp);
                token.creator_fid = entry.requestor_fid;
                Some(token)
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for ClankerAdapter {
    fn source(&self) -> TokenSource {
        TokenSource::Clanker
    }

    async fn fetch(&self) -> Result<Vec<Token>> {
        let raw = self.fetch_raw().await?;
        Ok(self.normalize(raw))
    }
}

/// Raw entries from the Flaunch latest-coins endpoint. The platform returns
/// a flat array with social links inlined on each coin.
#[derive(Debug, Deserialize)]
pub struct FlaunchTokenRaw {
    pub address: Option<String>,
    pub name: Option<String>,
    pub ticker: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
    #[serde(rename = "websiteUrl")]
    pub website_url: Option<String>,
    #[serde(rename = "twitterUrl")]
    pub twitter_url: Option<String>,
    #[serde(rename = "telegramUrl")]
    pub telegram_url: Option<String>,
    pub creator: Option<FlaunchCreatorRaw>,
}

#[derive(Debug, Deserialize)]
pub struct FlaunchCreatorRaw {
    pub address: Option<String>,
}

/// Adapter for the Flaunch launch platform.
pub struct FlaunchAdapter {
    http_client: Client,
    base_url: String,
}

impl FlaunchAdapter {
    pub fn new(http_client: Client) -> Self {
        Self {
            http_client,
            base_url: FLAUNCH_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(http_client: Client, base_url: String) -> Self {
        Self {
            http_client,
            base_url,
        }
    }

    /// Fetch the latest coins listing.
    #[instrument(skip(self))]
    pub async fn fetch_raw(&self) -> Result<Vec<FlaunchTokenRaw>> {
        let url = format!("{}/api/v1/coins/latest", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .context("Failed to fetch Flaunch listing")?
            .error_for_status()
            .context("Flaunch listing returned an error status")?;

        response
            .json::<Vec<FlaunchTokenRaw>>()
            .await
            .context("Failed to parse Flaunch listing")
    }

    /// Normalize the raw listing to canonical records.
    pub fn normalize(&self, raw: Vec<FlaunchTokenRaw>) -> Vec<Token> {
        raw.into_iter()
            .filter_map(|entry| {
                let address = entry
                    .address
                    .as_deref()
                    .unwrap_or_default()
                    .trim()
                    .to_lowercase();
                if address.is_empty() {
                    return None;
                }

                let mut token = Token::new(
                    address.clone(),
                    TokenSource::Flaunch,
                    format!("{}/base/coin/{}", self.base_url, address),
                );
                token.name = entry.name.unwrap_or_default();
                token.symbol = entry.ticker.unwrap_or_default();
                token.first_seen_at = entry.created_at.as_deref().and_then(parse_timestamp);
                token.website_url = non_empty(entry.website_url);
                token.x_url = non_empty(entry.twitter_url);
                token.telegram_url = non_empty(entry.telegram_url);
                token.creator_address = entry
                    .creator
                    .and_then(|c| non_empty(c.address))
                    .map(|a| a.to_lowercase());
                Some(token)
            })
            .collect()
    }
}

#[async_trait]
impl SourceAdapter for FlaunchAdapter {
    fn source(&self) -> TokenSource {
        TokenSource::Flaunch
    }

    async fn fetch(&self) -> Result<Vec<Token>> {
        let raw = self.fetch_raw().await?;
        Ok(self.normalize(raw))
    }
}

/// Parse an RFC3339 timestamp; unparseable values stay absent.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    match raw.parse::<DateTime<Utc>>() {
        Ok(ts) => Some(ts),
        Err(_) => {
            debug!("Unparseable timestamp: {}", raw);
            None
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clanker() -> ClankerAdapter {
        ClankerAdapter::new(Client::new())
    }

    fn flaunch() -> FlaunchAdapter {
        FlaunchAdapter::new(Client::new())
    }

    #[test]
    fn test_clanker_normalize_lowercases_and_links() {
        let raw = ClankerListing {
            data: vec![ClankerTokenRaw {
                contract_address: Some("0xABCdef0000000000000000000000000000000001".to_string()),
                name: Some("Hatch".to_string()),
                symbol: Some("HTCH".to_string()),
                created_at: Some("2024-06-01T10:00:00Z".to_string()),
                requestor_fid: Some(777),
            }],
        };

        let tokens = clanker().normalize(raw);

        assert_eq!(tokens.len(), 1);
        assert_eq!(
            tokens[0].address,
            "0xabcdef0000000000000000000000000000000001"
        );
        assert_eq!(tokens[0].source, TokenSource::Clanker);
        assert!(tokens[0].source_url.ends_with(&tokens[0].address));
        assert_eq!(tokens[0].creator_fid, Some(777));
        assert!(tokens[0].first_seen_at.is_some());
    }

    #[test]
    fn test_clanker_normalize_drops_missing_address() {
        let raw = ClankerListing {
            data: vec![
                ClankerTokenRaw {
                    contract_address: None,
                    name: Some("ghost".to_string()),
                    symbol: None,
                    created_at: None,
                    requestor_fid: None,
                },
                ClankerTokenRaw {
                    contract_address: Some("  ".to_string()),
                    name: None,
                    symbol: None,
                    created_at: None,
                    requestor_fid: None,
                },
            ],
        };

        assert!(clanker().normalize(raw).is_empty());
    }

    #[test]
    fn test_clanker_normalize_defaults_name_and_symbol() {
        let raw = ClankerListing {
            data: vec![ClankerTokenRaw {
                contract_address: Some("0xaaa".to_string()),
                name: None,
                symbol: None,
                created_at: Some("not-a-timestamp".to_string()),
                requestor_fid: None,
            }],
        };

        let tokens = clanker().normalize(raw);

        assert_eq!(tokens[0].name, "");
        assert_eq!(tokens[0].symbol, "");
        assert_eq!(tokens[0].first_seen_at, None);
    }

    #[test]
    fn test_flaunch_normalize_carries_platform_links() {
        let raw = vec![FlaunchTokenRaw {
            address: Some("0xBBB".to_string()),
            name: Some("Paws".to_string()),
            ticker: Some("PAWS".to_string()),
            created_at: Some("2024-06-02T00:00:00Z".to_string()),
            website_url: Some("https://paws.example".to_string()),
            twitter_url: Some("".to_string()),
            telegram_url: Some("https://t.me/paws".to_string()),
            creator: Some(FlaunchCreatorRaw {
                address: Some("0xCREATOR".to_string()),
            }),
        }];

        let tokens = flaunch().normalize(raw);

        assert_eq!(tokens[0].address, "0xbbb");
        assert_eq!(tokens[0].website_url.as_deref(), Some("https://paws.example"));
        // Empty platform fields stay absent rather than empty strings.
        assert_eq!(tokens[0].x_url, None);
        assert_eq!(tokens[0].telegram_url.as_deref(), Some("https://t.me/paws"));
        assert_eq!(tokens[0].creator_address.as_deref(), Some("0xcreator"));
    }

    #[tokio::test]
    async fn test_fetch_all_sources_degrades_on_failure() {
        // Unroutable base URLs: both adapters fail, the fan-out still
        // returns an (empty) list instead of erroring.
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(ClankerAdapter::with_base_url(
                Client::new(),
                "http://127.0.0.1:1".to_string(),
            )),
            Arc::new(FlaunchAdapter::with_base_url(
                Client::new(),
                "http://127.0.0.1:1".to_string(),
            )),
        ];

        let tokens = fetch_all_sources(&adapters, Duration::from_secs(2)).await;

        assert!(tokens.is_empty());
    }
}
