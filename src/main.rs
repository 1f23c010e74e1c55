//! Main entry point: run one alert scan and print its JSON summary.

use std::sync::Arc;

use anyhow::Result;
use hatchr::pipeline::{HttpNotificationSink, PipelineBuilder, SqliteStore};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting Hatchr alert scan");

    let db_path = std::env::var("HATCHR_DB").unwrap_or_else(|_| "./hatchr.db".to_string());
    let notify_endpoint = std::env::var("HATCHR_NOTIFY_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:8787/notify".to_string());

    let store = SqliteStore::new(&db_path).await?;
    let sink = Arc::new(HttpNotificationSink::new(
        reqwest::Client::new(),
        notify_endpoint,
    ));

    let scanner = PipelineBuilder::new()
        .with_explorer_api_key(std::env::var("BASESCAN_API_KEY").ok())
        .with_social_graph_api_key(std::env::var("NEYNAR_API_KEY").ok())
        .with_webhook_secret(std::env::var("WEBHOOK_SECRET").ok())
        .build_scanner(store, sink)?;

    let summary = scanner.run_scan().await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}
