//! End-to-end coverage of the ingestion surface through the real axum `Router`, driven with
//! `tower::ServiceExt::oneshot` rather than a bound socket. Collaborators (identity, sink,
//! campaign store, dedup, DLQ) are the same trait objects the binary wires up in `main.rs`,
//! swapped for in-memory/mock implementations so the suite never reaches the network.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{self, Request, StatusCode};
use time::OffsetDateTime;
use tokio::sync::Mutex as AsyncMutex;
use tower::ServiceExt as _;

use clickgate::config::{ConfFile, ConfHandle};
use clickgate::dedup::{DedupClaimer, DedupStore, LocalDedupStore};
use clickgate::identity::{AuthError, IdentityClient};
use clickgate::metrics::Metrics;
use clickgate::model::{CapturedEvent, FraudFlag, TenantContext};
use clickgate::pipeline::dlq::InMemoryDlq;
use clickgate::pipeline::{AsyncPipeline, Dlq, EventSink, WorkerTask};
use clickgate::router::store::InMemoryCampaignStore;
use clickgate::router::{Campaign, CampaignSnapshot, CampaignStatus, CampaignStore, Operator, Router as CampaignRouter, Rule};
use clickgate::GatewayState;

use clickgate_task::{ChildTask, ShutdownHandle, Task};

/// Resolves any token present in its map to a fixed tenant, everything else is rejected —
/// enough to drive the auth middleware without a real identity service.
#[derive(Default)]
struct MockIdentityClient {
    tokens: HashMap<String, String>,
}

#[async_trait::async_trait]
impl IdentityClient for MockIdentityClient {
    async fn validate_credential(&self, token: &str, _deadline: Duration) -> Result<TenantContext, AuthError> {
        self.tokens
            .get(token)
            .map(|tenant_id| TenantContext {
                tenant_id: tenant_id.clone(),
                permissions: Vec::new(),
                rate_limit: None,
            })
            .ok_or(AuthError::Rejected)
    }
}

/// Captures every appended batch in order, for assertions.
#[derive(Default)]
struct CapturingEventSink {
    events: AsyncMutex<Vec<CapturedEvent>>,
}

#[async_trait::async_trait]
impl EventSink for CapturingEventSink {
    async fn append_batch(&self, events: &[CapturedEvent], _deadline: Duration) -> anyhow::Result<()> {
        self.events.lock().await.extend_from_slice(events);
        Ok(())
    }
}

/// Always fails, to exercise the worker's DLQ fallback on sink outage.
struct FailingEventSink;

#[async_trait::async_trait]
impl EventSink for FailingEventSink {
    async fn append_batch(&self, _events: &[CapturedEvent], _deadline: Duration) -> anyhow::Result<()> {
        anyhow::bail!("sink unavailable")
    }
}

/// Everything a test needs to drive the router plus the collaborators it wired up, so
/// assertions can reach past the HTTP boundary (e.g. into the DLQ or the campaign store).
struct Harness {
    app: axum::Router,
    dlq: Arc<InMemoryDlq>,
    campaign_store: Arc<InMemoryCampaignStore>,
    #[allow(dead_code)]
    shutdown: ShutdownHandle,
}

async fn build_harness(
    identity: HashMap<String, String>,
    campaigns: Vec<Campaign>,
    fallback_urls: HashMap<String, String>,
    sink: Arc<dyn EventSink>,
) -> Harness {
    let conf_file = ConfFile {
        sink_batch_max_size: 1,
        sink_batch_max_age_ms: 15,
        sink_append_deadline_ms: 200,
        queue_capacity: 64,
        queue_warning_threshold_pct: 80,
        queue_shed_threshold_pct: 95,
        dedup_window_secs: 5,
        ..Default::default()
    };
    let conf_handle = ConfHandle::mock(conf_file).expect("mock conf must validate");
    let conf = conf_handle.get_conf();

    let identity_client: Arc<dyn IdentityClient> = Arc::new(MockIdentityClient { tokens: identity });

    let dedup_store: Arc<dyn DedupStore> = Arc::new(LocalDedupStore::default());
    let dedup = Arc::new(DedupClaimer::new(
        dedup_store,
        conf.dedup_breaker_failure_threshold,
        conf.dedup_breaker_cooldown,
    ));

    let campaign_store = Arc::new(InMemoryCampaignStore::new());
    campaign_store.seed(campaigns);
    for (tenant_id, url) in fallback_urls {
        campaign_store.set_fallback_url(tenant_id, url);
    }

    let router = CampaignRouter::new();
    let snapshot = CampaignSnapshot::new(
        campaign_store.list_active_campaigns().await.unwrap(),
        campaign_store.list_fallback_urls().await.unwrap(),
    );
    router.swap(snapshot);

    let dlq = Arc::new(InMemoryDlq::new());
    let (pipeline, receiver) = AsyncPipeline::bounded(
        conf.queue_capacity,
        conf.queue_warning_threshold_pct,
        conf.queue_shed_threshold_pct,
        dlq.clone() as Arc<dyn Dlq>,
    );

    let metrics = Arc::new(Metrics::new());

    let (shutdown, shutdown_signal) = ShutdownHandle::new();

    let worker = WorkerTask {
        worker_id: 0,
        receiver,
        sink,
        dlq: dlq.clone() as Arc<dyn Dlq>,
        batch_max_size: conf.sink_batch_max_size,
        batch_max_age: conf.sink_batch_max_age,
        append_deadline: conf.sink_append_deadline,
        metrics: metrics.clone(),
    };
    ChildTask::spawn(worker.run(shutdown_signal)).detach();

    let state = GatewayState {
        conf_handle,
        identity_client,
        dedup,
        router,
        campaign_store: campaign_store.clone() as Arc<dyn CampaignStore>,
        pipeline,
        metrics,
    };

    let app = clickgate::make_http_service(state).layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 51234))));

    Harness {
        app,
        dlq,
        campaign_store,
        shutdown,
    }
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(http::header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(token) = token {
        builder = builder.header(http::header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::AUTHORIZATION, format!("Bearer {token}"))
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn active_campaign(tenant_id: &str, campaign_id: &str, destination: &str, append_params: bool, rules: Vec<Rule>) -> Campaign {
    let now = OffsetDateTime::now_utc();
    Campaign {
        tenant_id: tenant_id.into(),
        campaign_id: campaign_id.into(),
        name: campaign_id.into(),
        status: CampaignStatus::Active,
        rules,
        default_destination: destination.into(),
        append_params,
        created_at: now,
        updated_at: now,
    }
}

/// Polls the sink's captured events until at least `n` have landed or the budget runs out —
/// the worker flushes off a batch timer, so the event is never visible synchronously with the
/// request that produced it.
async fn wait_for_events(sink: &CapturingEventSink, n: usize) -> Vec<CapturedEvent> {
    for _ in 0..100 {
        {
            let events = sink.events.lock().await;
            if events.len() >= n {
                return events.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {n} captured event(s)");
}

async fn wait_for_dlq_len(dlq: &InMemoryDlq, n: usize) {
    for _ in 0..100 {
        if dlq.len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {n} DLQ entr(y/ies)");
}

#[tokio::test]
async fn direct_campaign_hit_redirects_and_appends_inbound_params() {
    let mut identity = HashMap::new();
    identity.insert("org-a-token".to_owned(), "org_a".to_owned());

    let campaign = active_campaign("org_a", "summer", "https://shop.example.com/s", true, vec![]);
    let sink = Arc::new(CapturingEventSink::default());

    let harness = build_harness(identity, vec![campaign], HashMap::new(), sink.clone()).await;

    let response = harness
        .app
        .oneshot(get("/in/summer?click_id=abc&src=fb", Some("org-a-token")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers().get(http::header::LOCATION).unwrap().to_str().unwrap();
    let url = url::Url::parse(location).unwrap();
    let pairs: HashMap<String, String> = url.query_pairs().into_owned().collect();
    assert_eq!(pairs.get("click_id"), Some(&"abc".to_owned()));
    assert_eq!(pairs.get("src"), Some(&"fb".to_owned()));

    let events = wait_for_events(&sink, 1).await;
    assert_eq!(events[0].tenant_id, "org_a");
    assert_eq!(events[0].campaign_id, "summer");
    assert_eq!(events[0].click_id, "abc");
}

#[tokio::test]
async fn rule_based_match_picks_highest_scoring_campaign() {
    let mut identity = HashMap::new();
    identity.insert("org-a-token".to_owned(), "org_a".to_owned());

    let rule = Rule {
        field: "country".into(),
        operator: Operator::In,
        values: vec!["US".into(), "CA".into()],
        priority: 90,
    };
    let campaign = active_campaign("org_a", "na-launch", "https://na.example.com/x", false, vec![rule]);
    let sink = Arc::new(CapturingEventSink::default());

    let harness = build_harness(identity, vec![campaign], HashMap::new(), sink.clone()).await;

    let response = harness
        .app
        .oneshot(get("/in?click_id=abc&country=US", Some("org-a-token")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response.headers().get(http::header::LOCATION).unwrap().to_str().unwrap();
    assert!(location.starts_with("https://na.example.com/x"));

    let events = wait_for_events(&sink, 1).await;
    assert_eq!(events[0].campaign_id, "na-launch");
}

#[tokio::test]
async fn second_identical_click_is_flagged_duplicate() {
    let mut identity = HashMap::new();
    identity.insert("org-a-token".to_owned(), "org_a".to_owned());

    let campaign = active_campaign("org_a", "summer", "https://shop.example.com/s", false, vec![]);
    let sink = Arc::new(CapturingEventSink::default());

    let harness = build_harness(identity, vec![campaign], HashMap::new(), sink.clone()).await;

    let first = harness.app.clone().oneshot(get("/in/summer?click_id=rep-1", Some("org-a-token"))).await.unwrap();
    assert_eq!(first.status(), StatusCode::FOUND);

    let second = harness.app.clone().oneshot(get("/in/summer?click_id=rep-1", Some("org-a-token"))).await.unwrap();
    assert_eq!(second.status(), StatusCode::FOUND);

    let events = wait_for_events(&sink, 2).await;
    let first_event = events.iter().find(|e| e.fraud_flags.is_empty()).expect("one fresh claim");
    let duplicate_event = events
        .iter()
        .find(|e| e.fraud_flags.contains(&FraudFlag::DuplicateClick))
        .expect("one duplicate claim");

    assert_eq!(first_event.click_id, "rep-1");
    assert_eq!(duplicate_event.click_id, "rep-1");
}

#[tokio::test]
async fn missing_bearer_token_is_rejected_with_401() {
    let harness = build_harness(HashMap::new(), vec![], HashMap::new(), Arc::new(CapturingEventSink::default())).await;

    let response = harness.app.oneshot(get("/in", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_token_is_rejected_with_401() {
    let harness = build_harness(HashMap::new(), vec![], HashMap::new(), Arc::new(CapturingEventSink::default())).await;

    let response = harness.app.oneshot(get("/in", Some("not-a-real-token"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn no_campaign_and_no_fallback_returns_404() {
    let mut identity = HashMap::new();
    identity.insert("org-a-token".to_owned(), "org_a".to_owned());

    let harness = build_harness(identity, vec![], HashMap::new(), Arc::new(CapturingEventSink::default())).await;

    let response = harness.app.oneshot(get("/in", Some("org-a-token"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn postback_without_click_id_is_rejected_with_400() {
    let mut identity = HashMap::new();
    identity.insert("org-a-token".to_owned(), "org_a".to_owned());

    let harness = build_harness(identity, vec![], HashMap::new(), Arc::new(CapturingEventSink::default())).await;

    let response = harness.app.oneshot(post("/postback", Some("org-a-token"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn postback_with_click_id_is_captured() {
    let mut identity = HashMap::new();
    identity.insert("org-a-token".to_owned(), "org_a".to_owned());

    let sink = Arc::new(CapturingEventSink::default());
    let harness = build_harness(identity, vec![], HashMap::new(), sink.clone()).await;

    let response = harness
        .app
        .oneshot(post("/postback?click_id=conv-1", Some("org-a-token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let events = wait_for_events(&sink, 1).await;
    assert_eq!(events[0].click_id, "conv-1");
}

#[tokio::test]
async fn pixel_always_serves_the_image() {
    let mut identity = HashMap::new();
    identity.insert("org-a-token".to_owned(), "org_a".to_owned());

    let sink = Arc::new(CapturingEventSink::default());
    let harness = build_harness(identity, vec![], HashMap::new(), sink.clone()).await;

    let response = harness
        .app
        .oneshot(get("/pixel.gif?click_id=px-1", Some("org-a-token")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(http::header::CONTENT_TYPE).unwrap(),
        "image/gif"
    );

    let events = wait_for_events(&sink, 1).await;
    assert_eq!(events[0].click_id, "px-1");
}

#[tokio::test]
async fn health_and_ready_do_not_require_a_credential() {
    let harness = build_harness(HashMap::new(), vec![], HashMap::new(), Arc::new(CapturingEventSink::default())).await;

    let health = harness.app.clone().oneshot(get("/health", None)).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let ready = harness.app.oneshot(get("/ready", None)).await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
}

#[tokio::test]
async fn cross_tenant_admin_mutation_is_rejected_with_403() {
    let mut identity = HashMap::new();
    identity.insert("org-a-token".to_owned(), "org_a".to_owned());

    let harness = build_harness(identity, vec![], HashMap::new(), Arc::new(CapturingEventSink::default())).await;

    let payload = serde_json::json!({
        "tenant_id": "org_b",
        "campaign_id": "promo",
        "name": "Promo",
        "status": "active",
        "rules": [],
        "default_destination": "https://promo.example.com",
        "append_params": false,
    });

    let response = harness
        .app
        .oneshot(json_request("POST", "/admin/campaigns", "org-a-token", payload))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_created_campaign_is_immediately_routable() {
    let mut identity = HashMap::new();
    identity.insert("org-a-token".to_owned(), "org_a".to_owned());

    let harness = build_harness(identity, vec![], HashMap::new(), Arc::new(CapturingEventSink::default())).await;

    let payload = serde_json::json!({
        "tenant_id": "org_a",
        "campaign_id": "promo",
        "name": "Promo",
        "status": "active",
        "rules": [],
        "default_destination": "https://promo.example.com/landing",
        "append_params": false,
    });

    let create = harness
        .app
        .clone()
        .oneshot(json_request("POST", "/admin/campaigns", "org-a-token", payload))
        .await
        .unwrap();
    assert_eq!(create.status(), StatusCode::CREATED);

    assert_eq!(harness.campaign_store.list_active_campaigns().await.unwrap().len(), 1);

    let redirect = harness
        .app
        .oneshot(get("/in/promo?click_id=abc", Some("org-a-token")))
        .await
        .unwrap();

    assert_eq!(redirect.status(), StatusCode::FOUND);
    assert_eq!(
        redirect.headers().get(http::header::LOCATION).unwrap(),
        "https://promo.example.com/landing"
    );
}

#[tokio::test]
async fn sink_outage_routes_batch_to_the_dlq() {
    let mut identity = HashMap::new();
    identity.insert("org-a-token".to_owned(), "org_a".to_owned());

    let campaign = active_campaign("org_a", "summer", "https://shop.example.com/s", false, vec![]);
    let harness = build_harness(identity, vec![campaign], HashMap::new(), Arc::new(FailingEventSink)).await;

    let response = harness
        .app
        .oneshot(get("/in/summer?click_id=abc", Some("org-a-token")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    wait_for_dlq_len(&harness.dlq, 1).await;
}
