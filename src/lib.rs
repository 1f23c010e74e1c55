//! Hatchr - token launch discovery, reputation scoring, and alerting.
//!
//! Discovers newly created tokens across launch platforms, reconciles them
//! into one record per address, enriches each with market and social data,
//! and gates at-most-once notifications behind a bounded reputation score.

pub mod pipeline;
pub mod types;

// Re-export main types for convenience
pub use types::{HatchrScore, MarketSnapshot, ScanSummary, Token, TokenSource};
