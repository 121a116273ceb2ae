//! Integration tests for model availability against a mock backend
//!
//! A `wiremock` server stands in for Ollama: `/v1/models` for listings,
//! `/api/pull` for pulls and `/v1/chat/completions` for validation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use agentmesh::availability::{ModelAvailabilityManager, PollBackoff, PullState};
use agentmesh::backend::{BackendConfig, BackendError, UnavailableReason};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer, model: &str) -> Arc<BackendConfig> {
    Arc::new(
        BackendConfig::builder("mock", format!("{}/v1", server.uri()), model)
            .timeout_secs(5)
            .build()
            .unwrap(),
    )
}

fn fast_manager() -> ModelAvailabilityManager {
    ModelAvailabilityManager::with_backoff(PollBackoff {
        base: Duration::from_millis(20),
        cap: Duration::from_millis(100),
    })
}

fn listing(ids: &[&str]) -> ResponseTemplate {
    let data: Vec<_> = ids
        .iter()
        .map(|id| serde_json::json!({ "id": id, "object": "model" }))
        .collect();
    ResponseTemplate::new(200).set_body_json(serde_json::json!({ "object": "list", "data": data }))
}

fn pull_accepted() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string("{\"status\":\"pulling manifest\"}\n")
}

#[tokio::test]
async fn test_present_model_needs_no_pull() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .and(header("authorization", "Bearer ollama"))
        .respond_with(listing(&["qwen2.5:7b", "starcoder2:3b"]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/pull"))
        .respond_with(pull_accepted())
        .expect(0)
        .mount(&server)
        .await;

    let backend = backend(&server, "qwen2.5:7b");
    let status = fast_manager()
        .ensure_available(&backend, "qwen2.5:7b", Duration::from_secs(5))
        .await
        .unwrap();

    assert!(status.present);
    assert_eq!(status.pull_state, PullState::Ready);
    assert_eq!(status.model_name, "qwen2.5:7b");
}

#[tokio::test]
async fn test_latest_tag_satisfies_bare_name() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{ "name": "llama3:latest" }]
        })))
        .mount(&server)
        .await;

    let backend = backend(&server, "llama3");
    let status = fast_manager().check_availability(&backend).await;
    assert!(status.present);
}

#[tokio::test]
async fn test_unreachable_backend_reports_failed_check() {
    let backend = Arc::new(
        BackendConfig::builder("down", "http://127.0.0.1:1/v1", "qwen2.5:7b")
            .timeout_secs(2)
            .build()
            .unwrap(),
    );

    let status = fast_manager().check_availability(&backend).await;
    assert!(!status.present);
    assert_eq!(status.pull_state, PullState::Failed);
}

#[tokio::test]
async fn test_missing_model_is_pulled_then_ready() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(listing(&[]))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(listing(&["qwen2.5:7b"]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/pull"))
        .and(body_partial_json(serde_json::json!({ "model": "qwen2.5:7b", "stream": true })))
        .respond_with(pull_accepted())
        .expect(1)
        .mount(&server)
        .await;

    let manager = fast_manager();
    let backend = backend(&server, "qwen2.5:7b");
    let status = manager
        .ensure_available(&backend, "qwen2.5:7b", Duration::from_secs(5))
        .await
        .unwrap();

    assert!(status.present);
    assert_eq!(status.pull_state, PullState::Ready);
    assert!(!manager.is_pulling(&backend, "qwen2.5:7b"));
}

#[tokio::test]
async fn test_concurrent_callers_share_one_pull() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(listing(&[]))
        .up_to_n_times(3)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(listing(&["qwen2.5:7b"]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/pull"))
        .respond_with(pull_accepted())
        .expect(1)
        .mount(&server)
        .await;

    let manager = fast_manager();
    let backend = backend(&server, "qwen2.5:7b");

    let (first, second) = tokio::join!(
        manager.ensure_available(&backend, "qwen2.5:7b", Duration::from_secs(5)),
        manager.ensure_available(&backend, "qwen2.5:7b", Duration::from_secs(5)),
    );

    let first = first.unwrap();
    let second = second.unwrap();
    assert!(first.present && second.present);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_pull_that_never_lands_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(listing(&[]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/pull"))
        .respond_with(pull_accepted())
        .mount(&server)
        .await;

    let backend = backend(&server, "qwen2.5:7b");
    let started = Instant::now();
    let err = ModelAvailabilityManager::new()
        .ensure_available(&backend, "qwen2.5:7b", Duration::from_secs(5))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(matches!(err.reason, UnavailableReason::Timeout { waited } if waited >= Duration::from_secs(5)));
    assert!(elapsed >= Duration::from_secs(5), "returned early: {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(7), "overshot max_wait: {:?}", elapsed);
}

#[tokio::test]
async fn test_pull_error_line_fails_fast() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(listing(&[]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/pull"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "{\"status\":\"pulling manifest\"}\n{\"error\":\"pull model manifest: file does not exist\"}\n",
        ))
        .mount(&server)
        .await;

    let backend = backend(&server, "no-such-model");
    let started = Instant::now();
    let err = fast_manager()
        .ensure_available(&backend, "no-such-model", Duration::from_secs(10))
        .await
        .unwrap_err();

    assert!(!err.is_timeout());
    match err.reason {
        UnavailableReason::PullFailed { detail } => assert!(detail.contains("file does not exist")),
        other => panic!("expected PullFailed, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_rejected_pull_request_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(listing(&[]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/pull"))
        .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
        .mount(&server)
        .await;

    let backend = backend(&server, "qwen2.5:7b");
    let err = fast_manager()
        .ensure_available(&backend, "qwen2.5:7b", Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err.reason, UnavailableReason::PullFailed { .. }));
    assert_eq!(err.model, "qwen2.5:7b");
}

#[tokio::test]
async fn test_validate_protocol_accepts_chat_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": "ready" } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend(&server, "qwen2.5:7b");
    fast_manager().validate_protocol(&backend).await.unwrap();
}

#[tokio::test]
async fn test_validate_protocol_distinguishes_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": "this is the native generate shape"
        })))
        .mount(&server)
        .await;

    let manager = fast_manager();
    let err = manager
        .validate_protocol(&backend(&server, "qwen2.5:7b"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::ProtocolMismatch { .. }));
    assert_eq!(err.category().to_string(), "bad response shape");

    let down = Arc::new(
        BackendConfig::builder("down", "http://127.0.0.1:1/v1", "qwen2.5:7b")
            .timeout_secs(2)
            .build()
            .unwrap(),
    );
    let err = manager.validate_protocol(&down).await.unwrap_err();
    assert!(matches!(err, BackendError::Connectivity { .. }));
    assert_eq!(err.category().to_string(), "backend down");
}

#[tokio::test]
async fn test_validate_protocol_reports_missing_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": { "message": "model \"qwen2.5:7b\" not found, try pulling it first" }
        })))
        .mount(&server)
        .await;

    let err = fast_manager()
        .validate_protocol(&backend(&server, "qwen2.5:7b"))
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::ModelMissing { ref model, .. } if model == "qwen2.5:7b"));
}

#[tokio::test]
async fn test_abandoned_caller_does_not_leave_stale_pull() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(listing(&[]))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/pull"))
        .respond_with(pull_accepted())
        .expect(2)
        .mount(&server)
        .await;

    let manager = fast_manager();
    let backend = backend(&server, "qwen2.5:7b");

    // The caller gives up long before its own max_wait
    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        manager.ensure_available(&backend, "qwen2.5:7b", Duration::from_millis(500)),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(manager.is_pulling(&backend, "qwen2.5:7b"));

    // The pull keeps running to its own deadline and then releases the model
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert!(!manager.is_pulling(&backend, "qwen2.5:7b"));

    let started = Instant::now();
    let err = manager
        .ensure_available(&backend, "qwen2.5:7b", Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_secs(1), "inherited a stale deadline");
}

#[tokio::test]
async fn test_slow_backend_cannot_stretch_max_wait() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(listing(&["qwen2.5:7b"]).set_delay(Duration::from_secs(8)))
        .mount(&server)
        .await;

    let manager = fast_manager();
    let backend = Arc::new(
        BackendConfig::builder("slow", format!("{}/v1", server.uri()), "qwen2.5:7b")
            .timeout_secs(30)
            .build()
            .unwrap(),
    );

    let started = Instant::now();
    let err = manager
        .ensure_available(&backend, "qwen2.5:7b", Duration::from_secs(2))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(err.is_timeout());
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(4), "overshot max_wait: {:?}", elapsed);
    assert!(!manager.is_pulling(&backend, "qwen2.5:7b"));
}
