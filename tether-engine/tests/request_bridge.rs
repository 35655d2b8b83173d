//! Request bridge behaviour against a mock worker

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::json;
use tether_config::HttpConfig;
use tether_engine::{EngineError, ReadinessGate, RequestBridge, RequestOptions, RequestRetryPolicy};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

struct Gate(AtomicBool);

impl ReadinessGate for Gate {
    fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn gate(ready: bool) -> Arc<Gate> {
    Arc::new(Gate(AtomicBool::new(ready)))
}

fn policy(max_attempts: u32, backoff_ms: u64) -> RequestRetryPolicy {
    RequestRetryPolicy {
        max_attempts,
        per_attempt_timeout: Duration::from_secs(5),
        backoff_base: Duration::from_millis(backoff_ms),
    }
}

fn bridge(server: &MockServer, gate: Arc<Gate>, policy: RequestRetryPolicy) -> RequestBridge {
    RequestBridge::new(&server.uri(), gate, policy, &HttpConfig::default()).unwrap()
}

/// Records when each attempt arrived and always fails
struct FailingRecorder(Arc<Mutex<Vec<Instant>>>);

impl Respond for FailingRecorder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.0.lock().unwrap().push(Instant::now());
        ResponseTemplate::new(500).set_body_string("worker busy")
    }
}

#[tokio::test]
async fn test_not_ready_makes_no_network_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let bridge = bridge(&server, gate(false), policy(3, 10));
    let err = bridge
        .post_json("/api/video/info", json!({"url": "https://example.com/v"}))
        .await
        .unwrap_err();

    assert_eq!(err, EngineError::EngineNotReady);
    server.verify().await;
}

#[tokio::test]
async fn test_retries_with_linear_backoff() {
    let server = MockServer::start().await;
    let arrivals = Arc::new(Mutex::new(Vec::new()));
    Mock::given(method("POST"))
        .and(path("/api/audio/download"))
        .respond_with(FailingRecorder(arrivals.clone()))
        .expect(3)
        .mount(&server)
        .await;

    let base = Duration::from_millis(100);
    let bridge = bridge(&server, gate(true), policy(3, 100));
    let err = bridge
        .post_json("/api/audio/download", json!({"url": "u", "format_id": "140"}))
        .await
        .unwrap_err();

    match err {
        EngineError::RequestFailed {
            endpoint,
            attempts,
            message,
        } => {
            assert_eq!(endpoint, "/api/audio/download");
            assert_eq!(attempts, 3);
            assert!(message.contains("500"));
            assert!(message.contains("worker busy"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let arrivals = arrivals.lock().unwrap().clone();
    assert_eq!(arrivals.len(), 3);
    assert!(arrivals[1] - arrivals[0] >= base);
    assert!(arrivals[2] - arrivals[1] >= base * 2);
    server.verify().await;
}

#[tokio::test]
async fn test_recovers_on_later_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/video/info"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/video/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "title": "clip"})))
        .with_priority(2)
        .mount(&server)
        .await;

    let bridge = bridge(&server, gate(true), policy(2, 10));
    let response = bridge
        .post_json("/api/video/info", json!({"url": "u"}))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body["title"], "clip");
}

#[tokio::test]
async fn test_single_attempt_by_default() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let bridge = RequestBridge::from_config(
        &server.uri(),
        gate(true),
        &HttpConfig::default(),
        tether_config::RuntimeMode::Packaged,
    )
    .unwrap();
    let err = bridge
        .post_json("/api/video/download-combined", json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::RequestFailed { attempts: 1, .. }));
    assert!(!err.is_fatal());
    server.verify().await;
}

#[tokio::test]
async fn test_sends_body_and_configured_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/video/info"))
        .and(header("x-client", "desktop"))
        .and(body_json(json!({"url": "https://example.com/v"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = HttpConfig::default();
    config.headers.insert("x-client".into(), "desktop".into());
    let bridge = RequestBridge::new(&server.uri(), gate(true), policy(1, 10), &config).unwrap();

    let response = bridge
        .send(
            "api/video/info",
            RequestOptions::post(json!({"url": "https://example.com/v"}))
                .with_timeout(Duration::from_secs(2)),
        )
        .await
        .unwrap();

    assert_eq!(response.body, json!({"success": true}));
    server.verify().await;
}

#[tokio::test]
async fn test_empty_and_invalid_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/empty"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/garbled"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let bridge = bridge(&server, gate(true), policy(1, 10));

    let empty = bridge.send("/empty", RequestOptions::get()).await.unwrap();
    assert_eq!(empty.status, 204);
    assert!(empty.body.is_null());

    let err = bridge.send("/garbled", RequestOptions::get()).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidResponse(_)));
}
