//! Discovery pipeline: ingest, normalize, merge, enrich, score, alert.
//!
//! Data flows strictly forward: adapters feed the merge engine, merged
//! records are enriched, scores are computed on demand, and the alert
//! scanner gates notifications behind persisted per-token flags.

pub mod adapters;
pub mod alerts;
pub mod enrich;
pub mod errors;
pub mod merge;
pub mod notify;
pub mod scorer;
pub mod social_graph;
pub mod storage;
pub mod webhook;

// Re-export main public types
pub use adapters::{fetch_all_sources, ClankerAdapter, FlaunchAdapter, SourceAdapter};
pub use alerts::AlertScanner;
pub use enrich::{
    BasescanExplorer, ChainExplorer, DexScreenerProvider, EnrichedToken, Enricher,
    MarketDataProvider,
};
pub use errors::PipelineError;
pub use merge::merge_tokens;
pub use notify::{DeliveryReceipt, HttpNotificationSink, Notification, NotificationSink};
pub use scorer::{
    followers_quality, followers_score_size_aware, hatchr_score, ScoreQuery, ScoreReport,
    ScoreService,
};
pub use social_graph::{HttpSocialGraph, SocialGraph, SocialUser};
pub use storage::{PipelineStore, SqliteStore};
pub use webhook::{WebhookOutcome, WebhookProcessor};

use std::sync::Arc;

use anyhow::Result;
use reqwest::Client;
use std::time::Duration;
use tracing::warn;

use crate::types::{PipelineConfig, ScoreConfig};

/// Builder wiring the pipeline components from configuration.
pub struct PipelineBuilder {
    config: PipelineConfig,
}

impl PipelineBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the block-explorer API key.
    pub fn with_explorer_api_key(mut self, key: Option<String>) -> Self {
        self.config.explorer_api_key = key;
        self
    }

    /// Set the social-graph API key.
    pub fn with_social_graph_api_key(mut self, key: Option<String>) -> Self {
        self.config.social_graph_api_key = key;
        self
    }

    /// Set the webhook shared secret.
    pub fn with_webhook_secret(mut self, secret: Option<String>) -> Self {
        self.config.webhook_secret = secret;
        self
    }

    /// Set the lookback window used when no cursor exists.
    pub fn with_lookback_window_secs(mut self, secs: i64) -> Self {
        self.config.lookback_window_secs = secs;
        self
    }

    /// Set scoring constants.
    pub fn with_scoring(mut self, scoring: ScoreConfig) -> Self {
        self.config.scoring = scoring;
        self
    }

    /// Set the bounded enrichment concurrency.
    pub fn with_max_parallel_enrichments(mut self, max: usize) -> Self {
        self.config.max_parallel_enrichments = max;
        self
    }

    /// Build just the configuration.
    pub fn build_config(self) -> PipelineConfig {
        self.config
    }

    /// Build the webhook processor. Fails with `ConfigMissing` when no
    /// shared secret is configured.
    pub fn build_webhook_processor(
        &self,
        store: Arc<dyn PipelineStore>,
    ) -> Result<WebhookProcessor, PipelineError> {
        WebhookProcessor::new(
            self.config.webhook_secret.clone(),
            self.config.min_author_score,
            store,
        )
    }

    /// Build the alert scanner with the default adapters and providers.
    ///
    /// Missing credentials disable their dependent stages (creator
    /// resolution, score alerts) instead of failing the build.
    pub fn build_scanner(
        self,
        store: Arc<dyn PipelineStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<AlertScanner> {
        let config = self.config;
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.adapter_timeout_secs))
            .build()?;

        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(ClankerAdapter::new(http_client.clone())),
            Arc::new(FlaunchAdapter::new(http_client.clone())),
        ];

        let market: Arc<dyn MarketDataProvider> = Arc::new(DexScreenerProvider::new(
            http_client.clone(),
            config.market_data_rps,
        ));

        let explorer: Option<Arc<dyn ChainExplorer>> =
            match BasescanExplorer::new(http_client.clone(), config.explorer_api_key.clone()) {
                Ok(explorer) => Some(Arc::new(explorer)),
                Err(e) => {
                    warn!("Creator resolution disabled: {}", e);
                    None
                }
            };

        let social_graph: Option<Arc<dyn SocialGraph>> = match HttpSocialGraph::new(
            http_client.clone(),
            config.social_graph_api_key.clone(),
            config.social_graph_rps,
        ) {
            Ok(graph) => Some(Arc::new(graph)),
            Err(e) => {
                warn!("Identity lookups and score alerts disabled: {}", e);
                None
            }
        };

        let enricher = Enricher::new(
            http_client,
            market,
            explorer,
            social_graph.clone(),
            &config,
        );

        let score_service = social_graph
            .map(|graph| ScoreService::new(graph, config.scoring.clone()));

        Ok(AlertScanner::new(
            adapters,
            enricher,
            score_service,
            store,
            sink,
            config,
        ))
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
