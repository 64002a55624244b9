use std::collections::HashSet;
use std::sync::{Arc, Once};

use filter_engine::{
    keys, BatchCoordinator, BatchItem, ClassifierSettings, ClassifyError, Endpoints, KeyValueStore,
    MemoryStore, ReqwestTransport, StoreConfigResolver, TransportSettings, DEFAULT_MODEL,
    NO_RESPONSE,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(filter_logging::initialize_for_tests);
}

fn endpoints(server: &MockServer) -> Endpoints {
    Endpoints {
        direct_url: format!("{}/direct", server.uri()),
        proxy_url: format!("{}/proxy", server.uri()),
        ..Endpoints::default()
    }
}

fn coordinator(server: &MockServer, store: Arc<MemoryStore>) -> BatchCoordinator {
    init_logging();
    let transport = ReqwestTransport::new(TransportSettings::default()).unwrap();
    let resolver = StoreConfigResolver::new(store.clone(), endpoints(server));
    BatchCoordinator::new(
        Arc::new(transport),
        Arc::new(resolver),
        store,
        ClassifierSettings::default(),
    )
}

fn store_with(values: Value) -> Arc<MemoryStore> {
    let Value::Object(map) = values else {
        panic!("expected object");
    };
    Arc::new(MemoryStore::with_values(map))
}

fn completion(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"content": content}}],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
}

/// Answers "k. → YES" for odd k and "k. → NO" for even k, sized by the item count.
fn alternating(request: &Request) -> ResponseTemplate {
    let body: Value = request.body_json().unwrap();
    let count = body["postCount"].as_u64().unwrap_or(1);
    let lines = (1..=count)
        .map(|k| format!("{k}. → {}", if k % 2 == 1 { "YES" } else { "NO" }))
        .collect::<Vec<_>>()
        .join("\n");
    completion(&lines)
}

fn items(count: usize) -> Vec<BatchItem> {
    (1..=count)
        .map(|i| BatchItem::new(i, format!("Story number {i}")))
        .collect()
}

fn topics() -> Vec<String> {
    vec!["block politics".to_owned()]
}

fn prompt_text(request: &Request) -> String {
    let body: Value = request.body_json().unwrap();
    body["messages"][0]["content"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn four_items_map_positionally() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/proxy"))
        .respond_with(completion("1. → YES\n2. → NO\n3. → YES\n4. → NO"))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = coordinator(&server, Arc::new(MemoryStore::new()));
    let outcome = coordinator.classify(items(4), &topics()).await.unwrap();

    let allowed: Vec<bool> = outcome.decisions.iter().map(|d| d.is_allowed).collect();
    assert_eq!(allowed, vec![true, false, true, false]);
    assert_eq!(outcome.decisions[1].response_line, "2. → NO");
    assert!(outcome.failures.is_empty());
}

#[tokio::test]
async fn large_batch_is_split_into_disjoint_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/proxy"))
        .respond_with(alternating)
        .expect(3)
        .mount(&server)
        .await;

    let coordinator = coordinator(&server, Arc::new(MemoryStore::new()));
    let outcome = coordinator.classify(items(150), &topics()).await.unwrap();

    let indices: Vec<usize> = outcome.decisions.iter().map(|d| d.index).collect();
    assert_eq!(indices, (1..=150).collect::<Vec<_>>());
    for decision in &outcome.decisions {
        assert_eq!(decision.is_allowed, decision.index % 2 == 1, "item {}", decision.index);
    }

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
    let mut seen = HashSet::new();
    for request in &requests {
        let body: Value = request.body_json().unwrap();
        assert_eq!(body["postCount"], 50);
        assert_eq!(body["temperature"], 0.0);
        let text = prompt_text(request);
        let in_chunk: Vec<usize> = (1..=150)
            .filter(|i| text.contains(&format!(". Story number {i}\n")) || text.ends_with(&format!(". Story number {i}")))
            .collect();
        assert_eq!(in_chunk.len(), 50);
        for i in in_chunk {
            assert!(seen.insert(i), "item {i} sent twice");
        }
    }
    assert_eq!(seen.len(), 150);
}

#[tokio::test]
async fn missing_and_reordered_lines() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion("3. yes\n\n1. Yes, keep it\n"))
        .mount(&server)
        .await;

    let coordinator = coordinator(&server, Arc::new(MemoryStore::new()));
    let outcome = coordinator.classify(items(3), &topics()).await.unwrap();

    let allowed: Vec<bool> = outcome.decisions.iter().map(|d| d.is_allowed).collect();
    assert_eq!(allowed, vec![true, false, true]);
    assert_eq!(outcome.decisions[1].response_line, NO_RESPONSE);
}

#[tokio::test]
async fn unreadable_reply_blocks_every_item() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let coordinator = coordinator(&server, Arc::new(MemoryStore::new()));
    let outcome = coordinator.classify(items(2), &topics()).await.unwrap();

    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.decisions.len(), 2);
    assert!(outcome
        .decisions
        .iter()
        .all(|d| !d.is_allowed && d.response_line == NO_RESPONSE));
}

#[tokio::test]
async fn daily_limit_is_reported_and_counter_still_moves() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": "Daily limit exceeded",
            "message": "Try again tomorrow",
            "dailyLimit": 1000,
            "currentUsage": 1000,
            "remaining": 0,
            "resetTime": "2025-06-01T00:00:00Z"
        })))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let coordinator = coordinator(&server, store.clone());
    let outcome = coordinator.classify(items(3), &topics()).await.unwrap();

    assert!(outcome.decisions.is_empty());
    assert_eq!(outcome.failures.len(), 1);
    match &outcome.failures[0].error {
        ClassifyError::DailyLimitExceeded(details) => {
            assert_eq!(details.reset_time.as_deref(), Some("2025-06-01T00:00:00Z"));
            assert_eq!(details.remaining, Some(0));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(coordinator.request_count().await, 3);
    let stored = store.get(&[keys::GLOBAL_API_REQUEST_COUNT]).await.unwrap();
    assert_eq!(stored[keys::GLOBAL_API_REQUEST_COUNT], 3);
}

#[tokio::test]
async fn other_failures_surface_as_request_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({"error": "slow down"})))
        .mount(&server)
        .await;

    let coordinator = coordinator(&server, Arc::new(MemoryStore::new()));
    let outcome = coordinator.classify(items(1), &topics()).await.unwrap();
    assert!(matches!(
        outcome.failures[0].error,
        ClassifyError::RequestFailed { status: 429, .. }
    ));
}

#[tokio::test]
async fn one_failed_chunk_does_not_spoil_its_siblings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(|request: &Request| {
            if prompt_text(request).contains("Story number 51\n") {
                ResponseTemplate::new(502)
            } else {
                alternating(request)
            }
        })
        .mount(&server)
        .await;

    let coordinator = coordinator(&server, Arc::new(MemoryStore::new()));
    let outcome = coordinator.classify(items(100), &topics()).await.unwrap();

    assert_eq!(outcome.decisions.len(), 50);
    assert!(outcome.decisions.iter().all(|d| d.index <= 50));
    assert_eq!(outcome.failures.len(), 1);
    let failed: Vec<usize> = outcome.failures[0].items.iter().map(|i| i.index).collect();
    assert_eq!(failed, (51..=100).collect::<Vec<_>>());
}

#[tokio::test]
async fn own_key_sends_auth_and_no_post_count() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/direct"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(header("X-Title", "Great Filter Extension"))
        .respond_with(completion("1. YES"))
        .expect(1)
        .mount(&server)
        .await;

    let store = store_with(json!({
        "useOwnApiKey": true,
        "apiKey": "sk-test",
        "selectedModel": "vendor/model-x"
    }));
    let coordinator = coordinator(&server, store);
    let outcome = coordinator.classify(items(1), &topics()).await.unwrap();
    assert!(outcome.decisions[0].is_allowed);

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[0].body_json().unwrap();
    assert!(body.get("postCount").is_none());
    assert_eq!(body["model"], "vendor/model-x");
}

#[tokio::test]
async fn configuration_errors_fail_the_call() {
    let server = MockServer::start().await;
    let store = store_with(json!({"useOwnApiKey": true}));
    let coordinator = coordinator(&server, store);

    let err = coordinator.classify(items(2), &topics()).await.unwrap_err();
    assert_eq!(err, ClassifyError::MissingApiKey);

    let coordinator = self::coordinator(&server, Arc::new(MemoryStore::new()));
    let err = coordinator.classify(items(2), &[]).await.unwrap_err();
    assert_eq!(err, ClassifyError::NoTopics);
    assert_eq!(err.code(), "NO_TOPICS");

    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn counter_resumes_from_storage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(alternating)
        .mount(&server)
        .await;

    let store = store_with(json!({"globalApiRequestCount": 40}));
    let coordinator = coordinator(&server, store.clone());
    coordinator.initialize_counter().await;
    coordinator.classify(items(5), &topics()).await.unwrap();
    coordinator.classify(Vec::new(), &topics()).await.unwrap();

    assert_eq!(coordinator.request_count().await, 45);
    let mut expected = Map::new();
    expected.insert(keys::GLOBAL_API_REQUEST_COUNT.to_owned(), json!(45));
    assert_eq!(
        store.get(&[keys::GLOBAL_API_REQUEST_COUNT]).await.unwrap(),
        expected
    );
}

#[tokio::test]
async fn recommendation_returns_raw_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(completion("  Block celebrity gossip \n"))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = coordinator(&server, Arc::new(MemoryStore::new()));
    let titles: Vec<String> = (1..=30).map(|i| format!("Title {i}")).collect();
    let text = coordinator.recommend(&titles).await.unwrap();
    assert_eq!(text, "Block celebrity gossip");

    let requests = server.received_requests().await.unwrap();
    let body: Value = requests[0].body_json().unwrap();
    assert_eq!(body["model"], DEFAULT_MODEL);
    assert_eq!(body["temperature"], 1.0);
    assert_eq!(body["max_tokens"], 300);
    assert_eq!(body["postCount"], 20);
    let prompt = prompt_text(&requests[0]);
    assert!(prompt.contains("Title 20"));
    assert!(!prompt.contains("Title 21"));

    assert_eq!(
        coordinator.recommend(&[]).await.unwrap_err(),
        ClassifyError::NoItems
    );
}
