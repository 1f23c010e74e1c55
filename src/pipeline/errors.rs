//! Failure taxonomy for the discovery pipeline.
//!
//! Failures local to one token or one adapter degrade to an absent value and
//! a log line; only configuration and authentication failures surface to the
//! caller.

use thiserror::Error;

/// Typed pipeline failures. Orchestration code that does not need to branch
/// on the failure class keeps using `anyhow::Result`.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An adapter or enrichment sub-call failed or timed out.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// No creator identity could be resolved for a token this cycle.
    #[error("creator identity unresolved for {0}")]
    IdentityUnresolved(String),

    /// Webhook body failed HMAC verification.
    #[error("webhook signature invalid")]
    SignatureInvalid,

    /// A required credential or secret is absent; the dependent operation
    /// is disabled rather than attempted.
    #[error("missing configuration: {0}")]
    ConfigMissing(&'static str),

    /// A store write or read failed. Alert flags are never assumed set
    /// after this, so the next cycle retries naturally.
    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    /// An outbound HTTP call failed below the degradation boundary.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// An inbound payload did not match the expected shape.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}
