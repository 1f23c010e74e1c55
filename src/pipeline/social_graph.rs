//! Social-graph API client: creator identity lookups and follower samples.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::pipeline::errors::PipelineError;
use crate::types::FollowerSample;

const SOCIAL_GRAPH_BASE_URL: &str = "https://api.neynar.com";

/// A user profile as the social graph reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct SocialUser {
    pub fid: u64,
    pub username: String,
    /// Graph-assigned quality score in [0, 1], absent for unscored accounts
    pub score: Option<f64>,
    pub follower_count: u64,
    pub power_badge: bool,
}

/// Identity and reputation lookups against the social graph.
#[async_trait]
pub trait SocialGraph: Send + Sync {
    async fn user_by_fid(&self, fid: u64) -> Result<Option<SocialUser>>;

    async fn user_by_username(&self, username: &str) -> Result<Option<SocialUser>>;

    /// Look up the user holding a verified on-chain address.
    async fn user_by_address(&self, address: &str) -> Result<Option<SocialUser>>;

    /// Sample up to `limit` followers of a user.
    async fn follower_sample(&self, fid: u64, limit: usize) -> Result<Vec<FollowerSample>>;
}

#[derive(Debug, Deserialize)]
struct UsersResponse {
    users: Vec<UserRaw>,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: UserRaw,
}

#[derive(Debug, Deserialize)]
struct UserRaw {
    fid: u64,
    username: Option<String>,
    score: Option<f64>,
    follower_count: Option<u64>,
    power_badge: Option<bool>,
}

impl UserRaw {
    fn into_user(self) -> SocialUser {
        SocialUser {
            fid: self.fid,
            username: self.username.unwrap_or_default(),
            score: self.score,
            follower_count: self.follower_count.unwrap_or(0),
            power_badge: self.power_badge.unwrap_or(false),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FollowersResponse {
    users: Vec<FollowerEnvelope>,
}

#[derive(Debug, Deserialize)]
struct FollowerEnvelope {
    user: UserRaw,
}

/// HTTP implementation of [`SocialGraph`].
pub struct HttpSocialGraph {
    http_client: Client,
    base_url: String,
    api_key: String,
    limiter: Arc<DefaultDirectRateLimiter>,
    timeout: Duration,
}

impl HttpSocialGraph {
    /// Build the client. The API key is required; callers without one must
    /// disable the dependent operations instead.
    pub fn new(
        http_client: Client,
        api_key: Option<String>,
        requests_per_second: u32,
    ) -> Result<Self, PipelineError> {
        let api_key = api_key.ok_or(PipelineError::ConfigMissing("social graph API key"))?;
        let quota = Quota::per_second(
            NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::new(1).unwrap()),
        );

        Ok(Self {
            http_client,
            base_url: SOCIAL_GRAPH_BASE_URL.to_string(),
            api_key,
            limiter: Arc::new(RateLimiter::direct(quota)),
            timeout: Duration::from_secs(10),
        })
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// GET a JSON endpoint; a 404 maps to `None` rather than an error.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<Option<T>> {
        self.limiter.until_ready().await;

        let response = self
            .http_client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .context("Social graph request failed")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let parsed = response
            .error_for_status()
            .context("Social graph returned an error status")?
            .json::<T>()
            .await
            .context("Failed to parse social graph response")?;
        Ok(Some(parsed))
    }
}

#[async_trait]
impl SocialGraph for HttpSocialGraph {
    #[instrument(skip(self))]
    async fn user_by_fid(&self, fid: u64) -> Result<Option<SocialUser>> {
        let url = format!("{}/v2/farcaster/user/bulk?fids={}", self.base_url, fid);
        let response: Option<UsersResponse> = self.get_json(url).await?;

        Ok(response
            .and_then(|r| r.users.into_iter().next())
            .map(UserRaw::into_user))
    }

    #[instrument(skip(self))]
    async fn user_by_username(&self, username: &str) -> Result<Option<SocialUser>> {
        let url = format!(
            "{}/v2/farcaster/user/by_username?username={}",
            self.base_url, username
        );
        let response: Option<UserEnvelope> = self.get_json(url).await?;

        Ok(response.map(|r| r.user.into_user()))
    }

    #[instrument(skip(self))]
    async fn user_by_address(&self, address: &str) -> Result<Option<SocialUser>> {
        let url = format!(
            "{}/v2/farcaster/user/bulk-by-address?addresses={}",
            self.base_url, address
        );
        // Keyed by the queried address, values are the matching users.
        let response: Option<std::collections::HashMap<String, Vec<UserRaw>>> =
            self.get_json(url).await?;

        let user = response
            .into_iter()
            .flat_map(|m| m.into_values())
            .flatten()
            .next()
            .map(UserRaw::into_user);
        debug!("Address lookup resolved: {}", user.is_some());
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn follower_sample(&self, fid: u64, limit: usize) -> Result<Vec<FollowerSample>> {
        let url = format!(
            "{}/v2/farcaster/followers?fid={}&limit={}",
            self.base_url, fid, limit
        );
        let response: Option<FollowersResponse> = self.get_json(url).await?;

        Ok(response
            .map(|r| r.users)
            .unwrap_or_default()
            .into_iter()
            .map(|envelope| FollowerSample {
                score: envelope.user.score,
                power_badge: envelope.user.power_badge.unwrap_or(false),
            })
            .collect())
    }
}
