//! Notification dispatch to the external delivery service.
//!
//! Delivery transport is external; this module only posts the
//! title/body/target triple and surfaces invalid subscriber tokens back to
//! the caller.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// One notification to dispatch. The id doubles as the dedup tag, e.g.
/// `score90:<address>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub notification_id: String,
    pub title: String,
    pub body: String,
    pub target_url: String,
}

/// Delivery response. Stale subscriber tokens come back for deactivation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    #[serde(default)]
    pub invalid_tokens: Vec<String>,
}

/// Outbound notification sink.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<DeliveryReceipt>;
}

/// HTTP sink posting to the delivery endpoint.
pub struct HttpNotificationSink {
    http_client: Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpNotificationSink {
    pub fn new(http_client: Client, endpoint: String) -> Self {
        Self {
            http_client,
            endpoint,
            timeout: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl NotificationSink for HttpNotificationSink {
    #[instrument(skip(self, notification), fields(id = %notification.notification_id))]
    async fn send(&self, notification: &Notification) -> Result<DeliveryReceipt> {
        let receipt: DeliveryReceipt = self
            .http_client
            .post(&self.endpoint)
            .json(notification)
            .timeout(self.timeout)
            .send()
            .await
            .context("Notification dispatch failed")?
            .error_for_status()
            .context("Delivery service returned an error status")?
            .json()
            .await
            .context("Failed to parse delivery receipt")?;

        if !receipt.invalid_tokens.is_empty() {
            debug!(
                "Delivery reported {} invalid subscriber tokens",
                receipt.invalid_tokens.len()
            );
        }

        Ok(receipt)
    }
}
