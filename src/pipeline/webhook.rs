//! Webhook intake for social signals.
//!
//! Integrity is an HMAC-SHA256 signature over the raw body, compared in
//! constant time. Verified payloads from low-score authors, or with no
//! ticker/contract reference, are accepted but intentionally dropped.

use std::sync::Arc;
use std::sync::LazyLock;

use anyhow::Context;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use regex::Regex;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::pipeline::errors::PipelineError;
use crate::pipeline::storage::PipelineStore;
use crate::types::SocialSignal;

type HmacSha256 = Hmac<Sha256>;

static TICKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z][A-Za-z0-9]{1,9})\b").unwrap());

static CONTRACT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b0x[a-fA-F0-9]{40}\b").unwrap());

/// Inbound webhook payload.
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub cast: CastPayload,
}

#[derive(Debug, Deserialize)]
pub struct CastPayload {
    pub text: String,
    pub hash: String,
    pub timestamp: Option<String>,
    pub author: CastAuthor,
}

#[derive(Debug, Deserialize)]
pub struct CastAuthor {
    pub fid: u64,
    pub username: Option<String>,
    pub score: Option<f64>,
}

/// Why a verified payload was dropped instead of persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    LowAuthorScore,
    NoTokenReference,
}

/// Result of processing one verified payload.
#[derive(Debug)]
pub enum WebhookOutcome {
    /// Signal persisted.
    Stored(SocialSignal),
    /// Accepted but intentionally not persisted.
    Dropped(DropReason),
}

/// Verifies and persists webhook signals.
pub struct WebhookProcessor {
    secret: Vec<u8>,
    min_author_score: f64,
    store: Arc<dyn PipelineStore>,
}

impl WebhookProcessor {
    /// Build the processor. The shared secret is required; without it the
    /// intake is disabled rather than running unverified.
    pub fn new(
        secret: Option<String>,
        min_author_score: f64,
        store: Arc<dyn PipelineStore>,
    ) -> Result<Self, PipelineError> {
        let secret = secret.ok_or(PipelineError::ConfigMissing("webhook shared secret"))?;
        Ok(Self {
            secret: secret.into_bytes(),
            min_author_score,
            store,
        })
    }

    /// Verify the signature over the raw body. Constant-time comparison;
    /// any mismatch or undecodable signature rejects the request.
    pub fn verify_signature(&self, raw_body: &[u8], signature_hex: &str) -> Result<(), PipelineError> {
        let signature = hex::decode(signature_hex.trim_start_matches("sha256="))
            .map_err(|_| PipelineError::SignatureInvalid)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| PipelineError::SignatureInvalid)?;
        mac.update(raw_body);
        mac.verify_slice(&signature)
            .map_err(|_| PipelineError::SignatureInvalid)
    }

    /// Verify, parse, filter, and persist one webhook delivery. No state is
    /// mutated unless the signature checks out and the payload passes both
    /// gates.
    #[instrument(skip(self, raw_body, signature_hex))]
    pub async fn process(
        &self,
        raw_body: &[u8],
        signature_hex: &str,
    ) -> anyhow::Result<WebhookOutcome> {
        self.verify_signature(raw_body, signature_hex)?;

        let payload: WebhookPayload = serde_json::from_slice(raw_body)
            .map_err(PipelineError::Payload)
            .context("Failed to parse webhook payload")?;
        let cast = payload.cast;

        let author_score = cast.author.score.unwrap_or(0.0);
        if author_score < self.min_author_score {
            debug!(
                "Dropping cast {} from low-score author (score {:.2})",
                cast.hash, author_score
            );
            return Ok(WebhookOutcome::Dropped(DropReason::LowAuthorScore));
        }

        let tickers = extract_tickers(&cast.text);
        let contracts = extract_contracts(&cast.text);
        if tickers.is_empty() && contracts.is_empty() {
            debug!("Dropping cast {} with no token reference", cast.hash);
            return Ok(WebhookOutcome::Dropped(DropReason::NoTokenReference));
        }

        let cast_at = cast
            .timestamp
            .as_deref()
            .and_then(|t| t.parse::<DateTime<Utc>>().ok())
            .unwrap_or_else(|| {
                warn!("Cast {} carries no parseable timestamp", cast.hash);
                Utc::now()
            });

        let signal = SocialSignal {
            cast_hash: cast.hash,
            author_fid: cast.author.fid,
            author_username: cast.author.username.unwrap_or_default(),
            author_score,
            text: cast.text,
            tickers,
            contracts,
            cast_at,
        };

        self.store.insert_social_signal(&signal).await?;
        Ok(WebhookOutcome::Stored(signal))
    }
}

/// `$TICKER` mentions, upper-cased and deduplicated in order.
pub fn extract_tickers(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for capture in TICKER_RE.captures_iter(text) {
        let ticker = capture[1].to_uppercase();
        if !seen.contains(&ticker) {
            seen.push(ticker);
        }
    }
    seen
}

/// Contract addresses, lower-cased and deduplicated in order.
pub fn extract_contracts(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for m in CONTRACT_RE.find_iter(text) {
        let contract = m.as_str().to_lowercase();
        if !seen.contains(&contract) {
            seen.push(contract);
        }
    }
    seen
}

/// Compute the hex signature for a body, as the sender would.
#[cfg(test)]
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}
