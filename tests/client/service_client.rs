//! ServiceClient against a scripted transport: headers, retries, breaker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use interlink::breaker::{CircuitBreakerConfig, CircuitState};
use interlink::client::{
    HttpResponse, Method, RequestError, RequestOptions, ScriptedTransport, ServiceClient,
    ServiceClientConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Review {
    id: String,
    booking_id: String,
    rating: u8,
}

fn quick_config() -> ServiceClientConfig {
    interlink::telemetry::init_for_tests();
    ServiceClientConfig::default().with_retry_delay(Duration::from_millis(2))
}

fn reviews(transport: &Arc<ScriptedTransport>, config: ServiceClientConfig) -> ServiceClient {
    ServiceClient::new(
        "reviews",
        "http://reviews:8080",
        "bookings",
        config,
        transport.clone(),
    )
}

#[test]
fn decodes_typed_responses() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push(Ok(HttpResponse::json_body(
        200,
        &json!({ "id": "r1", "bookingId": "b1", "rating": 5 }),
    )));
    let client = reviews(&transport, quick_config());

    let review: Review = client.get("/reviews/r1", RequestOptions::new()).unwrap();
    assert_eq!(
        review,
        Review {
            id: "r1".into(),
            booking_id: "b1".into(),
            rating: 5
        }
    );
}

#[test]
fn every_verb_uses_its_method_and_body() {
    let transport = Arc::new(ScriptedTransport::new());
    let client = reviews(&transport, quick_config());
    let body = json!({ "rating": 3 });

    let _: Value = client.get("/r", RequestOptions::new()).unwrap();
    let _: Value = client.post("/r", &body, RequestOptions::new()).unwrap();
    let _: Value = client.put("/r/1", &body, RequestOptions::new()).unwrap();
    let _: Value = client.patch("/r/1", &body, RequestOptions::new()).unwrap();
    let _: Value = client.delete("/r/1", RequestOptions::new()).unwrap();

    let sent = transport.requests();
    let methods: Vec<Method> = sent.iter().map(|r| r.method).collect();
    assert_eq!(
        methods,
        vec![Method::Get, Method::Post, Method::Put, Method::Patch, Method::Delete]
    );
    assert_eq!(sent[0].body, None);
    assert_eq!(sent[1].body, Some(body.clone()));
    assert_eq!(sent[4].body, None);
    assert_eq!(sent[2].url, "http://reviews:8080/r/1");
}

#[test]
fn propagates_caller_context() {
    let transport = Arc::new(ScriptedTransport::new());
    let client = reviews(&transport, quick_config());

    let options = RequestOptions::new()
        .with_correlation_id("req-77")
        .with_auth_token("secret")
        .with_user_id("user-3")
        .with_header("x-tenant", "acme");
    let _: Value = client.get("/reviews", options).unwrap();

    let sent = transport.last_request().unwrap();
    assert_eq!(sent.header("x-service-name"), Some("bookings"));
    assert_eq!(sent.header("x-correlation-id"), Some("req-77"));
    assert_eq!(sent.header("authorization"), Some("Bearer secret"));
    assert_eq!(sent.header("x-auth-token"), Some("secret"));
    assert_eq!(sent.header("x-user-id"), Some("user-3"));
    assert_eq!(sent.header("x-tenant"), Some("acme"));
}

#[test]
fn no_identity_headers_without_caller_values() {
    let transport = Arc::new(ScriptedTransport::new());
    let client = reviews(&transport, quick_config());

    let _: Value = client.get("/reviews", RequestOptions::new()).unwrap();

    let sent = transport.last_request().unwrap();
    let names: Vec<&str> = sent.headers.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(names, vec!["x-service-name"]);
}

#[test]
fn client_errors_are_not_retried() {
    for status in [400, 401, 403, 404, 409, 422] {
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_fallback(Ok(HttpResponse::new(status, "nope")));
        let client = reviews(&transport, quick_config());

        let err = client
            .get::<Value>("/reviews/x", RequestOptions::new())
            .unwrap_err();
        assert_eq!(err.status(), Some(status));
        assert_eq!(transport.calls(), 1, "status {} was retried", status);
    }
}

#[test]
fn server_errors_are_retried_up_to_the_limit() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_fallback(Ok(HttpResponse::new(503, "unavailable")));
    let client = reviews(&transport, quick_config());

    let err = client
        .get::<Value>("/reviews", RequestOptions::new())
        .unwrap_err();
    assert_eq!(
        err,
        RequestError::Status {
            status: 503,
            body: "unavailable".into()
        }
    );
    assert_eq!(transport.calls(), 3);
}

#[test]
fn network_errors_are_retried_and_can_recover() {
    let transport = Arc::new(ScriptedTransport::new());
    transport
        .push_network_error("connection refused")
        .push_network_error("connection reset")
        .push(Ok(HttpResponse::json_body(200, &json!({ "ok": true }))));
    let client = reviews(&transport, quick_config());

    let body: Value = client.get("/health-ish", RequestOptions::new()).unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(transport.calls(), 3);
    assert_eq!(client.circuit_snapshot().failures, 0);
}

#[test]
fn retry_delays_grow_linearly() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_fallback(Err(RequestError::Network("down".into())));
    let client = reviews(
        &transport,
        ServiceClientConfig::default().with_retry_delay(Duration::from_millis(20)),
    );

    let started = Instant::now();
    let _ = client.get::<Value>("/x", RequestOptions::new());
    // 20 ms after the first attempt, 40 ms after the second.
    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(transport.calls(), 3);
}

#[test]
fn sixth_call_is_rejected_without_reaching_the_target() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_fallback(Err(RequestError::Network("refused".into())));
    let client = reviews(&transport, quick_config().with_retries(1));

    for _ in 0..5 {
        let err = client.get::<Value>("/x", RequestOptions::new()).unwrap_err();
        assert!(matches!(err, RequestError::Network(_)));
    }
    assert_eq!(client.circuit_state(), CircuitState::Open);
    assert_eq!(transport.calls(), 5);

    let err = client.get::<Value>("/x", RequestOptions::new()).unwrap_err();
    assert!(err.is_circuit_open());
    assert!(!err.is_retryable());
    assert_eq!(transport.calls(), 5);
}

#[test]
fn one_exhausted_retry_sequence_is_one_breaker_failure() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_fallback(Ok(HttpResponse::new(500, "")));
    let client = reviews(&transport, quick_config());

    let _ = client.get::<Value>("/x", RequestOptions::new());
    assert_eq!(transport.calls(), 3);
    assert_eq!(client.circuit_snapshot().failures, 1);
}

#[test]
fn skip_flag_bypasses_the_breaker() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_fallback(Err(RequestError::Network("refused".into())));
    let client = reviews(
        &transport,
        quick_config()
            .with_retries(1)
            .with_circuit_breaker(CircuitBreakerConfig::default().with_failure_threshold(2)),
    );

    for _ in 0..2 {
        let _ = client.get::<Value>("/x", RequestOptions::new());
    }
    assert_eq!(client.circuit_state(), CircuitState::Open);

    transport.set_fallback(Ok(HttpResponse::json_body(200, &json!({ "probe": 1 }))));
    let body: Value = client
        .get("/x", RequestOptions::new().skip_circuit_breaker())
        .unwrap();
    assert_eq!(body["probe"], 1);
    assert_eq!(client.circuit_state(), CircuitState::Open);

    // Skipped calls do not feed the breaker either way.
    transport.set_fallback(Err(RequestError::Network("refused".into())));
    let _ = client.get::<Value>("/x", RequestOptions::new().skip_circuit_breaker());
    assert_eq!(client.circuit_snapshot().failures, 2);
}

#[test]
fn breaker_recovers_after_reset_timeout() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.set_fallback(Err(RequestError::Network("refused".into())));
    let client = reviews(
        &transport,
        quick_config().with_retries(1).with_circuit_breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_reset_timeout(Duration::from_millis(20))
                .with_half_open_requests(1),
        ),
    );

    let _ = client.get::<Value>("/x", RequestOptions::new());
    assert_eq!(client.circuit_state(), CircuitState::Open);

    std::thread::sleep(Duration::from_millis(30));
    transport.set_fallback(Ok(HttpResponse::new(200, "")));
    let body: Option<Value> = client.get("/x", RequestOptions::new()).unwrap();
    assert_eq!(body, None);
    assert_eq!(client.circuit_state(), CircuitState::Closed);
}

#[test]
fn decode_failure_is_reported() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_status(200, r#"{"id": 12}"#);
    let client = reviews(&transport, quick_config());

    let err = client.get::<Review>("/reviews/1", RequestOptions::new()).unwrap_err();
    assert!(matches!(err, RequestError::Decode(_)));
    assert_eq!(transport.calls(), 1);
}

#[test]
fn health_check_reflects_target_status() {
    let transport = Arc::new(ScriptedTransport::new());
    let client = reviews(&transport, quick_config());

    transport.push_status(200, "{}");
    assert!(client.health_check());

    transport.push_status(503, "");
    assert!(!client.health_check());
    assert_eq!(transport.calls(), 2);
    assert_eq!(client.circuit_snapshot().failures, 0);
}
