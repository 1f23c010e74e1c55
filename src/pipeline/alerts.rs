//! Alert state machine: incremental scan over freshly discovered tokens.
//!
//! Each scan is stateless apart from the persisted cursor and per-token
//! alert flags, which this component exclusively owns. Every notification
//! tag fires at most once ever per token, enforced by the persisted
//! check-then-set, not by delivery-layer dedup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::pipeline::adapters::{fetch_all_sources, SourceAdapter};
use crate::pipeline::errors::PipelineError;
use crate::pipeline::enrich::{EnrichedToken, Enricher};
use crate::pipeline::merge::merge_tokens;
use crate::pipeline::notify::{Notification, NotificationSink};
use crate::pipeline::scorer::ScoreService;
use crate::pipeline::storage::PipelineStore;
use crate::types::{AlertState, PipelineConfig, ScanSummary, SentCounts, Token};

/// Periodic alert scanner over the discovery pipeline.
pub struct AlertScanner {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    enricher: Enricher,
    /// Absent when the social-graph credential is missing; score alerts are
    /// then skipped, volume alerts still run.
    score_service: Option<ScoreService>,
    store: Arc<dyn PipelineStore>,
    sink: Arc<dyn NotificationSink>,
    config: PipelineConfig,
}

impl AlertScanner {
    pub fn new(
        adapters: Vec<Arc<dyn SourceAdapter>>,
        enricher: Enricher,
        score_service: Option<ScoreService>,
        store: Arc<dyn PipelineStore>,
        sink: Arc<dyn NotificationSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            adapters,
            enricher,
            score_service,
            store,
            sink,
            config,
        }
    }

    /// Run one scan cycle and return its summary.
    #[instrument(skip(self))]
    pub async fn run_scan(&self) -> Result<ScanSummary> {
        let stored_cursor = self.store.notify_cursor().await?;
        let cursor = stored_cursor.unwrap_or_else(|| {
            Utc::now() - chrono::Duration::seconds(self.config.lookback_window_secs)
        });
        debug!("Scanning for tokens fresh after {}", cursor);

        // Gather runs under one deadline; hitting it cancels in-flight
        // fetches and fails this cycle only.
        let gather = async {
            let raw = fetch_all_sources(
                &self.adapters,
                Duration::from_secs(self.config.adapter_timeout_secs),
            )
            .await;
            let merged = merge_tokens(raw);
            self.enricher.enrich_all(merged, self.store.as_ref()).await
        };

        let enriched = match tokio::time::timeout(
            Duration::from_secs(self.config.scan_timeout_secs),
            gather,
        )
        .await
        {
            Ok(enriched) => enriched,
            Err(_) => {
                warn!(
                    "Scan gather phase exceeded {}s, leaving state unchanged",
                    self.config.scan_timeout_secs
                );
                return Ok(ScanSummary {
                    ok: false,
                    checked: 0,
                    fresh: 0,
                    cursor: stored_cursor,
                    sent: SentCounts::default(),
                });
            }
        };

        let checked = enriched.len();
        let fresh: Vec<&EnrichedToken> = enriched
            .iter()
            .filter(|e| e.token.first_seen_at.map_or(false, |ts| ts > cursor))
            .collect();

        let mut sent = SentCounts::default();
        let mut max_seen: Option<DateTime<Utc>> = None;

        for entry in &fresh {
            let token = &entry.token;
            let state = self
                .store
                .alert_state(&token.address)
                .await?
                .unwrap_or_else(|| AlertState::unalerted(&token.address));

            if !state.alerted_score_90 {
                if self.check_score_alert(entry).await {
                    sent.score90 += 1;
                }
            }

            if !state.alerted_vol_1000 {
                if self.check_volume_alert(entry).await {
                    sent.vol1000 += 1;
                }
            }

            if let Some(ts) = token.first_seen_at {
                max_seen = Some(max_seen.map_or(ts, |m: DateTime<Utc>| m.max(ts)));
            }
        }

        // Advance only on a parseable timestamp, and never backward.
        if let Some(ts) = max_seen {
            self.store.advance_cursor(ts).await?;
        }

        let summary = ScanSummary {
            ok: true,
            checked,
            fresh: fresh.len(),
            cursor: max_seen.max(stored_cursor),
            sent,
        };
        info!(
            "Scan done: checked={} fresh={} score90={} vol1000={}",
            summary.checked, summary.fresh, summary.sent.score90, summary.sent.vol1000
        );
        Ok(summary)
    }

    /// Score-threshold alert for one fresh token. Returns whether a
    /// notification went out.
    async fn check_score_alert(&self, entry: &EnrichedToken) -> bool {
        let token = &entry.token;

        // No resolvable identity: skipped this cycle, retried on the next
        // once resolution succeeds.
        let identity = match token.creator_identity() {
            Some(identity) => identity,
            None => {
                debug!(
                    "{}, skipping score check this cycle",
                    PipelineError::IdentityUnresolved(token.address.clone())
                );
                return false;
            }
        };
        let score_service = match &self.score_service {
            Some(service) => service,
            None => return false,
        };

        let score = match score_service.score_creator(identity.fid).await {
            Ok(score) => score,
            Err(e) => {
                warn!("Scoring failed for {}: {:#}", token.address, e);
                return false;
            }
        };

        let threshold = self.config.scoring.score_alert_threshold;
        let composite = match score.hatchr_score {
            Some(value) if value > threshold => value,
            _ => return false,
        };

        let notification = Notification {
            notification_id: format!("score90:{}", token.address),
            title: format!("High-reputation launch: {}", display_name(token)),
            body: format!(
                "{} launched by @{} (Hatchr score {:.0}/100)",
                display_name(token),
                identity.username,
                composite * 100.0
            ),
            target_url: token.source_url.clone(),
        };

        self.dispatch(notification, token, DispatchKind::Score).await
    }

    /// Volume-threshold alert for one fresh token.
    async fn check_volume_alert(&self, entry: &EnrichedToken) -> bool {
        let token = &entry.token;
        let volume = match entry.market.as_ref().and_then(|m| m.volume_24h_usd) {
            Some(volume) => volume,
            None => return false,
        };
        if volume <= self.config.scoring.volume_alert_threshold_usd {
            return false;
        }

        let notification = Notification {
            notification_id: format!("vol1000:{}", token.address),
            title: format!("Volume spike: {}", display_name(token)),
            body: format!(
                "{} traded ${:.0} in the last 24h",
                display_name(token),
                volume
            ),
            target_url: token.source_url.clone(),
        };

        self.dispatch(notification, token, DispatchKind::Volume).await
    }

    /// Send a notification, then persist its flag. A failed send leaves the
    /// flag unset; a failed flag write is logged and retried naturally next
    /// cycle because the stored flag still reads false.
    async fn dispatch(&self, notification: Notification, token: &Token, kind: DispatchKind) -> bool {
        let id = notification.notification_id.clone();
        if let Err(e) = self.sink.send(&notification).await {
            warn!("Dispatch failed for {}: {:#}", id, e);
            return false;
        }

        let marked = match kind {
            DispatchKind::Score => self.store.mark_score_alerted(&token.address).await,
            DispatchKind::Volume => self.store.mark_vol_alerted(&token.address).await,
        };
        if let Err(e) = marked {
            warn!("Flag persist failed for {}: {:#}", id, e);
        }

        info!("Dispatched {}", id);
        true
    }
}

enum DispatchKind {
    Score,
    Volume,
}

fn display_name(token: &Token) -> String {
    if !token.symbol.is_empty() {
        format!("${}", token.symbol)
    } else if !token.name.is_empty() {
        token.name.clone()
    } else {
        token.address.clone()
    }
}
