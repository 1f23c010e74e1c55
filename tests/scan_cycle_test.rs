//! End-to-end scan cycle tests over fake adapters, providers, and sink.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use hatchr::pipeline::{
    AlertScanner, DeliveryReceipt, Enricher, MarketDataProvider, Notification, NotificationSink,
    PipelineStore, ScoreService, SocialGraph, SocialUser, SourceAdapter, SqliteStore,
};
use hatchr::types::{
    AlertState, FollowerSample, MarketSnapshot, PipelineConfig, SocialSignal, Token, TokenSource,
};

fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

/// A token with every link present so the enricher skips page scraping.
fn linked_token(address: &str, first_seen: &str) -> Token {
    let mut token = Token::new(
        address.to_string(),
        TokenSource::Clanker,
        format!("https://clanker.world/clanker/{}", address),
    );
    token.symbol = "HTCH".to_string();
    token.first_seen_at = Some(ts(first_seen));
    token.website_url = Some("https://hatch.example".to_string());
    token.x_url = Some("https://x.com/hatch".to_string());
    token.farcaster_url = Some("https://warpcast.com/hatcher".to_string());
    token.telegram_url = Some("https://t.me/hatch".to_string());
    token
}

struct FakeAdapter {
    tokens: Mutex<Vec<Token>>,
}

impl FakeAdapter {
    fn new(tokens: Vec<Token>) -> Arc<Self> {
        Arc::new(Self {
            tokens: Mutex::new(tokens),
        })
    }

    async fn set_tokens(&self, tokens: Vec<Token>) {
        *self.tokens.lock().await = tokens;
    }
}

#[async_trait]
impl SourceAdapter for FakeAdapter {
    fn source(&self) -> TokenSource {
        TokenSource::Clanker
    }

    async fn fetch(&self) -> Result<Vec<Token>> {
        Ok(self.tokens.lock().await.clone())
    }
}

struct FakeMarket {
    volumes: Mutex<HashMap<String, f64>>,
}

impl FakeMarket {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            volumes: Mutex::new(HashMap::new()),
        })
    }

    async fn set_volume(&self, address: &str, volume: f64) {
        self.volumes.lock().await.insert(address.to_string(), volume);
    }
}

#[async_trait]
impl MarketDataProvider for FakeMarket {
    async fn pair_by_address(&self, address: &str) -> Result<Option<MarketSnapshot>> {
        Ok(self.volumes.lock().await.get(address).map(|&volume| {
            MarketSnapshot {
                token_address: address.to_string(),
                price_usd: Some(0.01),
                market_cap_usd: Some(50_000.0),
                liquidity_usd: Some(10_000.0),
                volume_24h_usd: Some(volume),
                updated_at: Utc::now(),
            }
        }))
    }
}

struct FakeSocialGraph {
    user: Mutex<Option<SocialUser>>,
    followers: Vec<FollowerSample>,
}

impl FakeSocialGraph {
    fn new(user: Option<SocialUser>, followers: Vec<FollowerSample>) -> Arc<Self> {
        Arc::new(Self {
            user: Mutex::new(user),
            followers,
        })
    }

    async fn set_user(&self, user: Option<SocialUser>) {
        *self.user.lock().await = user;
    }
}

#[async_trait]
impl SocialGraph for FakeSocialGraph {
    async fn user_by_fid(&self, _fid: u64) -> Result<Option<SocialUser>> {
        Ok(self.user.lock().await.clone())
    }

    async fn user_by_username(&self, _username: &str) -> Result<Option<SocialUser>> {
        Ok(self.user.lock().await.clone())
    }

    async fn user_by_address(&self, _address: &str) -> Result<Option<SocialUser>> {
        Ok(self.user.lock().await.clone())
    }

    async fn follower_sample(&self, _fid: u64, _limit: usize) -> Result<Vec<FollowerSample>> {
        Ok(self.followers.clone())
    }
}

struct RecordingSink {
    sent: Mutex<Vec<String>>,
    fail_next: Mutex<bool>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail_next: Mutex::new(false),
        })
    }

    async fn sent_ids(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }

    async fn fail_next(&self) {
        *self.fail_next.lock().await = true;
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, notification: &Notification) -> Result<DeliveryReceipt> {
        let mut fail = self.fail_next.lock().await;
        if *fail {
            *fail = false;
            anyhow::bail!("delivery unavailable");
        }
        self.sent
            .lock()
            .await
            .push(notification.notification_id.clone());
        Ok(DeliveryReceipt::default())
    }
}

/// Store wrapper that never advances the cursor, so the same token stays
/// fresh across scans and the flag check-then-set carries the dedup alone.
struct FrozenCursorStore {
    inner: Arc<SqliteStore>,
}

#[async_trait]
impl PipelineStore for FrozenCursorStore {
    async fn upsert_market(&self, snapshot: &MarketSnapshot) -> Result<()> {
        self.inner.upsert_market(snapshot).await
    }
    async fn market(&self, token_address: &str) -> Result<Option<MarketSnapshot>> {
        self.inner.market(token_address).await
    }
    async fn alert_state(&self, token_address: &str) -> Result<Option<AlertState>> {
        self.inner.alert_state(token_address).await
    }
    async fn mark_score_alerted(&self, token_address: &str) -> Result<()> {
        self.inner.mark_score_alerted(token_address).await
    }
    async fn mark_vol_alerted(&self, token_address: &str) -> Result<()> {
        self.inner.mark_vol_alerted(token_address).await
    }
    async fn notify_cursor(&self) -> Result<Option<DateTime<Utc>>> {
        self.inner.notify_cursor().await
    }
    async fn advance_cursor(&self, _last_seen_at: DateTime<Utc>) -> Result<()> {
        Ok(())
    }
    async fn insert_social_signal(&self, signal: &SocialSignal) -> Result<()> {
        self.inner.insert_social_signal(signal).await
    }
    async fn count_token_mentions(&self, symbol: &str, address: Option<&str>) -> Result<i64> {
        self.inner.count_token_mentions(symbol, address).await
    }
    async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }
}

struct Harness {
    adapter: Arc<FakeAdapter>,
    market: Arc<FakeMarket>,
    graph: Arc<FakeSocialGraph>,
    sink: Arc<RecordingSink>,
    store: Arc<dyn PipelineStore>,
    scanner: AlertScanner,
}

async fn harness(
    tokens: Vec<Token>,
    user: Option<SocialUser>,
    freeze_cursor: bool,
) -> Harness {
    let sqlite = SqliteStore::new_in_memory().await.unwrap();
    let store: Arc<dyn PipelineStore> = if freeze_cursor {
        Arc::new(FrozenCursorStore { inner: sqlite })
    } else {
        sqlite
    };

    let adapter = FakeAdapter::new(tokens);
    let market = FakeMarket::new();
    let followers = vec![
        FollowerSample {
            score: Some(1.0),
            power_badge: true,
        };
        10
    ];
    let graph = FakeSocialGraph::new(user, followers);
    let sink = RecordingSink::new();

    let config = PipelineConfig::default();
    let enricher = Enricher::new(
        reqwest::Client::new(),
        market.clone(),
        None,
        Some(graph.clone()),
        &config,
    );
    let score_service = ScoreService::new(graph.clone(), config.scoring.clone());

    let scanner = AlertScanner::new(
        vec![adapter.clone()],
        enricher,
        Some(score_service),
        store.clone(),
        sink.clone(),
        config,
    );

    Harness {
        adapter,
        market,
        graph,
        sink,
        store,
        scanner,
    }
}

fn high_score_user() -> SocialUser {
    SocialUser {
        fid: 42,
        username: "hatcher".to_string(),
        score: Some(0.95),
        follower_count: 900,
        power_badge: true,
    }
}

#[tokio::test]
async fn test_vol1000_alert_fires_exactly_once() {
    let h = harness(vec![linked_token("0xaaa", "2024-06-01T00:00:00Z")], None, true).await;
    h.market.set_volume("0xaaa", 1500.0).await;

    let first = h.scanner.run_scan().await.unwrap();
    assert!(first.ok);
    assert_eq!(first.checked, 1);
    assert_eq!(first.fresh, 1);
    assert_eq!(first.sent.vol1000, 1);
    assert_eq!(h.sink.sent_ids().await, vec!["vol1000:0xaaa".to_string()]);

    let state = h.store.alert_state("0xaaa").await.unwrap().unwrap();
    assert!(state.alerted_vol_1000);

    // Cursor is frozen, so the token is fresh again; only the persisted
    // flag prevents a second dispatch even at higher volume.
    h.market.set_volume("0xaaa", 2000.0).await;
    let second = h.scanner.run_scan().await.unwrap();
    assert_eq!(second.fresh, 1);
    assert_eq!(second.sent.vol1000, 0);
    assert_eq!(h.sink.sent_ids().await.len(), 1);
}

#[tokio::test]
async fn test_volume_at_threshold_does_not_alert() {
    let h = harness(vec![linked_token("0xaaa", "2024-06-01T00:00:00Z")], None, false).await;
    h.market.set_volume("0xaaa", 1000.0).await;

    let summary = h.scanner.run_scan().await.unwrap();

    // The threshold is strict: exactly 1000 stays quiet.
    assert_eq!(summary.sent.vol1000, 0);
    assert!(h.sink.sent_ids().await.is_empty());
}

#[tokio::test]
async fn test_cursor_advances_to_max_first_seen() {
    let tokens = vec![
        linked_token("0xaaa", "2024-06-01T00:00:00Z"),
        linked_token("0xbbb", "2024-06-02T00:00:00Z"),
    ];
    let h = harness(tokens, None, false).await;

    let first = h.scanner.run_scan().await.unwrap();
    assert_eq!(first.fresh, 2);
    assert_eq!(first.cursor, Some(ts("2024-06-02T00:00:00Z")));
    assert_eq!(
        h.store.notify_cursor().await.unwrap(),
        Some(ts("2024-06-02T00:00:00Z"))
    );

    // Nothing is strictly newer than the cursor on the next pass.
    let second = h.scanner.run_scan().await.unwrap();
    assert_eq!(second.fresh, 0);
    assert_eq!(second.cursor, Some(ts("2024-06-02T00:00:00Z")));
}

#[tokio::test]
async fn test_stale_tokens_are_ignored() {
    let h = harness(vec![linked_token("0xaaa", "2024-06-01T00:00:00Z")], None, false).await;
    h.market.set_volume("0xaaa", 5000.0).await;
    h.store
        .advance_cursor(ts("2024-07-01T00:00:00Z"))
        .await
        .unwrap();

    let summary = h.scanner.run_scan().await.unwrap();

    assert_eq!(summary.checked, 1);
    assert_eq!(summary.fresh, 0);
    assert_eq!(summary.sent.vol1000, 0);
}

#[tokio::test]
async fn test_score_alert_skipped_until_identity_resolves() {
    // No identity resolvable on the first pass: the graph knows nobody.
    let h = harness(vec![linked_token("0xaaa", "2024-06-01T00:00:00Z")], None, true).await;

    let first = h.scanner.run_scan().await.unwrap();
    assert_eq!(first.sent.score90, 0);

    // Identity resolves on a later cycle; the skip was not permanent.
    h.graph.set_user(Some(high_score_user())).await;
    let second = h.scanner.run_scan().await.unwrap();
    assert_eq!(second.sent.score90, 1);
    assert_eq!(h.sink.sent_ids().await, vec!["score90:0xaaa".to_string()]);

    let state = h.store.alert_state("0xaaa").await.unwrap().unwrap();
    assert!(state.alerted_score_90);
    assert!(!state.alerted_vol_1000);

    // Score stays high forever; the flag still allows only one dispatch.
    let third = h.scanner.run_scan().await.unwrap();
    assert_eq!(third.sent.score90, 0);
    assert_eq!(h.sink.sent_ids().await.len(), 1);
}

#[tokio::test]
async fn test_failed_dispatch_leaves_flag_unset_for_retry() {
    let h = harness(vec![linked_token("0xaaa", "2024-06-01T00:00:00Z")], None, true).await;
    h.market.set_volume("0xaaa", 1500.0).await;
    h.sink.fail_next().await;

    let first = h.scanner.run_scan().await.unwrap();
    assert_eq!(first.sent.vol1000, 0);
    assert!(h.store.alert_state("0xaaa").await.unwrap().is_none());

    // Natural retry: the flag still reads false next cycle.
    let second = h.scanner.run_scan().await.unwrap();
    assert_eq!(second.sent.vol1000, 1);
    assert_eq!(h.sink.sent_ids().await, vec!["vol1000:0xaaa".to_string()]);
}

#[tokio::test]
async fn test_both_alerts_fire_independently() {
    let h = harness(
        vec![linked_token("0xaaa", "2024-06-01T00:00:00Z")],
        Some(high_score_user()),
        false,
    )
    .await;
    h.market.set_volume("0xaaa", 2500.0).await;

    let summary = h.scanner.run_scan().await.unwrap();

    assert_eq!(summary.sent.score90, 1);
    assert_eq!(summary.sent.vol1000, 1);

    let state = h.store.alert_state("0xaaa").await.unwrap().unwrap();
    assert!(state.alerted_score_90 && state.alerted_vol_1000);
}

#[tokio::test]
async fn test_unparseable_timestamps_leave_cursor_alone() {
    let mut token = linked_token("0xaaa", "2024-06-01T00:00:00Z");
    token.first_seen_at = None;
    let h = harness(vec![token], None, false).await;

    let summary = h.scanner.run_scan().await.unwrap();

    assert_eq!(summary.checked, 1);
    assert_eq!(summary.fresh, 0);
    assert_eq!(h.store.notify_cursor().await.unwrap(), None);
}

#[tokio::test]
async fn test_adapter_update_discovers_new_tokens() {
    let h = harness(vec![linked_token("0xaaa", "2024-06-01T00:00:00Z")], None, false).await;

    let first = h.scanner.run_scan().await.unwrap();
    assert_eq!(first.fresh, 1);

    h.adapter
        .set_tokens(vec![
            linked_token("0xaaa", "2024-06-01T00:00:00Z"),
            linked_token("0xbbb", "2024-06-03T00:00:00Z"),
        ])
        .await;

    let second = h.scanner.run_scan().await.unwrap();
    assert_eq!(second.checked, 2);
    assert_eq!(second.fresh, 1);
    assert_eq!(second.cursor, Some(ts("2024-06-03T00:00:00Z")));
}
