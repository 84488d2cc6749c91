//! End-to-end tests driving the client over real HTTP against a mock server

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rc_http::CircuitBreakerConfig;
use rc_http::CircuitState;
use rc_http::ErrorKind;
use rc_http::RequestDescriptor;
use rc_http::ResilientClient;
use rc_http::ResponseEnvelope;
use rc_http::RetryConfig;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::body_json;
use wiremock::matchers::header;
use wiremock::matchers::header_exists;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;

#[derive(Debug, Deserialize, PartialEq)]
struct Instruction {
    id: u32,
    title: String,
}

fn quick_retry() -> RetryConfig {
    RetryConfig { max_retries: 2, base_delay_ms: 10, max_delay_ms: 50, backoff_multiplier: 2.0, jitter: false }
}

fn client_for(server: &MockServer) -> ResilientClient {
    ResilientClient::builder().base_url(server.uri()).retry_config(quick_retry()).timeout_ms(2_000).build().expect("client")
}

#[tokio::test]
async fn test_get_json_with_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/instructions/7"))
        .and(query_param("lang", "en"))
        .and(header_exists("x-request-id"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7, "title": "Lockout procedure"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let envelope: ResponseEnvelope<Instruction> = client.request(RequestDescriptor::get("/instructions/7").query("lang", "en")).await;

    assert!(envelope.success, "{:?}", envelope.error);
    assert_eq!(envelope.status, 200);
    assert_eq!(envelope.data, Some(Instruction { id: 7, title: "Lockout procedure".into() }));
}

#[tokio::test]
async fn test_post_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/instructions"))
        .and(body_json(json!({"title": "Hot work permit"})))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 11, "title": "Hot work permit"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let envelope: ResponseEnvelope<Instruction> = client.post("/instructions", &json!({"title": "Hot work permit"})).await;

    assert_eq!(envelope.status, 201);
    assert_eq!(envelope.data.map(|i| i.id), Some(11));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let server = MockServer::start().await;
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(move |_req: &wiremock::Request| -> ResponseTemplate {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 { ResponseTemplate::new(503) } else { ResponseTemplate::new(200).set_body_string("ok") }
        })
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let envelope: ResponseEnvelope<String> = client.get("/health").await;

    assert!(envelope.success);
    assert_eq!(envelope.data.as_deref(), Some("ok"));
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    let stats = client.circuit_breakers().get_all_stats();
    let breaker = stats.values().next().expect("breaker for server host");
    assert_eq!(breaker.requests, 3);
    assert_eq!(breaker.failures, 2);
    assert_eq!(breaker.state, CircuitState::Closed);
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/instructions/404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"detail": "instruction not found"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let envelope: ResponseEnvelope<Value> = client.get("/instructions/404").await;

    assert!(!envelope.success);
    assert_eq!(envelope.status, 404);
    let err = envelope.error.expect("error");
    assert_eq!(err.kind(), ErrorKind::Client);
    assert_eq!(err.message(), "instruction not found");
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let envelope: ResponseEnvelope<Value> = client.request(RequestDescriptor::get("/slow").timeout_ms(50).no_retry()).await;

    assert_eq!(envelope.error_kind(), Some(ErrorKind::Timeout));
    assert_eq!(envelope.status, 0);
}

#[tokio::test]
async fn test_breaker_opens_and_rejects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let breaker = CircuitBreakerConfig { failure_threshold: 3, volume_threshold: 3, reset_timeout_ms: 60_000, ..Default::default() };
    let client = ResilientClient::builder().base_url(server.uri()).retry_config(RetryConfig::none()).circuit_breaker_config(breaker).build().expect("client");

    for _ in 0..3 {
        let envelope: ResponseEnvelope<Value> = client.get("/down").await;
        assert_eq!(envelope.error_kind(), Some(ErrorKind::Server));
    }

    let rejected: ResponseEnvelope<Value> = client.get("/down").await;
    assert_eq!(rejected.error_kind(), Some(ErrorKind::ServiceUnavailable));

    let stats = client.circuit_breakers().get_all_stats();
    let stats = stats.values().next().expect("breaker");
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.total_rejections, 1);

    client.circuit_breakers().reset_all();
    assert!(client.circuit_breakers().get_all_stats().values().all(|s| s.state == CircuitState::Closed));
}
