//! Reputation scorer: follower-quality aggregation and the composite score.
//!
//! Scoring is pure over [`ScoreConfig`]; [`ScoreService`] drives the social
//! graph to collect the inputs. The composite degrades gracefully: it is
//! never absent merely because one sub-score is missing while the other is
//! present.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::pipeline::social_graph::{SocialGraph, SocialUser};
use crate::pipeline::storage::PipelineStore;
use crate::types::{FollowerSample, FollowersQuality, HatchrScore, ScoreConfig};

/// Aggregate a follower sample into a quality score.
///
/// Followers without a score are excluded from the mean entirely; the
/// power-badge ratio is taken over the full sample. Returns `None` exactly
/// when the sample is empty or carries no scored member.
pub fn followers_quality(samples: &[FollowerSample], cfg: &ScoreConfig) -> Option<FollowersQuality> {
    if samples.is_empty() {
        return None;
    }

    let scores: Vec<f64> = samples.iter().filter_map(|s| s.score).collect();
    if scores.is_empty() {
        return None;
    }

    let avg_follower_score = scores.iter().sum::<f64>() / scores.len() as f64;
    let power_count = samples.iter().filter(|s| s.power_badge).count();
    let power_badge_ratio = power_count as f64 / samples.len() as f64;

    let value = (cfg.follower_score_weight * avg_follower_score
        + cfg.power_badge_weight * power_badge_ratio)
        .clamp(0.0, 1.0);

    Some(FollowersQuality {
        avg_follower_score,
        power_badge_ratio,
        sampled: samples.len(),
        scored: scores.len(),
        value,
    })
}

/// Combine creator score and followers quality into the composite.
///
/// Both present: weighted sum. Only one present: that one, clamped. Neither:
/// `None`.
pub fn hatchr_score(
    creator_score: Option<f64>,
    followers_quality: Option<f64>,
    cfg: &ScoreConfig,
) -> Option<f64> {
    match (creator_score, followers_quality) {
        (Some(creator), Some(followers)) => {
            Some((cfg.creator_weight * creator + cfg.followers_weight * followers).clamp(0.0, 1.0))
        }
        (Some(creator), None) => Some(creator.clamp(0.0, 1.0)),
        (None, Some(followers)) => Some(followers.clamp(0.0, 1.0)),
        (None, None) => None,
    }
}

/// Audience-size-aware variant: the mean follower score is damped for small
/// audiences via `log10(n+1) / log10(max_ref+1)`.
pub fn followers_score_size_aware(
    mean_follower_score: f64,
    follower_count: u64,
    cfg: &ScoreConfig,
) -> f64 {
    let size_factor = ((follower_count as f64 + 1.0).log10()
        / (cfg.size_factor_max_ref as f64 + 1.0).log10())
    .clamp(0.0, 1.0);

    (mean_follower_score * (0.5 + 0.5 * size_factor)).clamp(0.0, 1.0)
}

/// Query for the score endpoint: a creator by fid or username, plus
/// optional token context for mention counting.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreQuery {
    pub fid: Option<u64>,
    pub username: Option<String>,
    pub address: Option<String>,
    pub token_created_at: Option<String>,
    pub token_name: Option<String>,
    pub token_symbol: Option<String>,
}

/// Creator context echoed back with a score report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorContext {
    pub fid: u64,
    pub username: String,
    pub power_badge: bool,
}

/// Full response of the score query.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreReport {
    pub creator_score: Option<f64>,
    pub followers_quality: Option<f64>,
    pub hatchr_score: Option<f64>,
    pub follower_count: u64,
    pub followers_analytics: Option<FollowersQuality>,
    pub token_mentions: Option<i64>,
    pub creator_context: Option<CreatorContext>,
}

/// Computes reputation scores on demand. Results are derived, not stored;
/// callers may cache them externally.
pub struct ScoreService {
    social_graph: Arc<dyn SocialGraph>,
    config: ScoreConfig,
}

impl ScoreService {
    pub fn new(social_graph: Arc<dyn SocialGraph>, config: ScoreConfig) -> Self {
        Self {
            social_graph,
            config,
        }
    }

    pub fn config(&self) -> &ScoreConfig {
        &self.config
    }

    /// Score a creator by fid: fetch the profile and a follower sample,
    /// then aggregate.
    #[instrument(skip(self))]
    pub async fn score_creator(&self, fid: u64) -> Result<HatchrScore> {
        let user = match self.social_graph.user_by_fid(fid).await? {
            Some(user) => user,
            None => return Ok(HatchrScore::empty()),
        };

        Ok(self.score_user(&user).await?.0)
    }

    /// Score a resolved user, returning the aggregate detail alongside.
    async fn score_user(&self, user: &SocialUser) -> Result<(HatchrScore, Option<FollowersQuality>)> {
        let samples = self
            .social_graph
            .follower_sample(user.fid, self.config.follower_sample_size)
            .await
            .unwrap_or_else(|e| {
                debug!("Follower sample failed for fid {}: {:#}", user.fid, e);
                Vec::new()
            });

        let quality = followers_quality(&samples, &self.config);
        let quality_value = quality.as_ref().map(|q| q.value);
        let composite = hatchr_score(user.score, quality_value, &self.config);

        Ok((
            HatchrScore {
                creator_score: user.score,
                followers_quality: quality_value,
                hatchr_score: composite,
            },
            quality,
        ))
    }

    /// Full score query: resolve the creator, score them, and attach token
    /// mention counts from stored signals when token context is given.
    #[instrument(skip(self, store))]
    pub async fn score_query(
        &self,
        query: &ScoreQuery,
        store: &dyn PipelineStore,
    ) -> Result<ScoreReport> {
        let user = match (query.fid, query.username.as_deref()) {
            (Some(fid), _) => self.social_graph.user_by_fid(fid).await?,
            (None, Some(username)) => self.social_graph.user_by_username(username).await?,
            (None, None) => None,
        };

        let user = match user {
            Some(user) => user,
            None => {
                return Ok(ScoreReport {
                    creator_score: None,
                    followers_quality: None,
                    hatchr_score: None,
                    follower_count: 0,
                    followers_analytics: None,
                    token_mentions: None,
                    creator_context: None,
                })
            }
        };

        let (score, analytics) = self.score_user(&user).await?;

        let token_mentions = match query.token_symbol.as_deref() {
            Some(symbol) => Some(
                store
                    .count_token_mentions(symbol, query.address.as_deref())
                    .await?,
            ),
            None => None,
        };

        Ok(ScoreReport {
            creator_score: score.creator_score,
            followers_quality: score.followers_quality,
            hatchr_score: score.hatchr_score,
            follower_count: user.follower_count,
            followers_analytics: analytics,
            token_mentions,
            creator_context: Some(CreatorContext {
                fid: user.fid,
                username: user.username.clone(),
                power_badge: user.power_badge,
            }),
        })
    }
}
