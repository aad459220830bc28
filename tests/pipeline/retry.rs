//! In-request retry on the same server.

use super::support::{backend_with_models, fast_config, generate_ctx, generate_payload, orchestrator};
use herd_circuitbreaker::CircuitState;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn transient_503s_retry_in_place_and_succeed() {
    let backend = backend_with_models(&["m"]).await;
    // Two 503s, then success. Mount order decides precedence.
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503).set_body_string("service unavailable"))
        .up_to_n_times(2)
        .mount(&backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"done": true})))
        .mount(&backend)
        .await;

    let mut config = fast_config();
    config.retry.max_retries_per_server = 2;
    config.retry.retryable_status_codes = vec![503];
    let orchestrator = orchestrator(config, &[("s1", &backend)]).await;

    let value = orchestrator
        .dispatch(generate_ctx("r1", "m"), generate_payload("m"))
        .await
        .unwrap();
    assert_eq!(value["done"], true);

    // A single success is recorded; the in-place retries never became
    // failures, no failover happened, the breaker never tripped.
    let snapshot = orchestrator.metrics_snapshot("s1", "m").unwrap();
    assert_eq!(snapshot.successes, 1);
    assert_eq!(snapshot.failures, 0);
    let breaker = orchestrator
        .breaker_snapshots()
        .into_iter()
        .find(|b| b.server_id == "s1")
        .unwrap();
    assert_eq!(breaker.state, CircuitState::Closed);
    assert_eq!(orchestrator.decisions().len(), 1);
}

#[tokio::test]
async fn retries_exhaust_into_a_recorded_failure() {
    let backend = backend_with_models(&["m"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503).set_body_string("service unavailable"))
        .mount(&backend)
        .await;

    let mut config = fast_config();
    config.retry.max_retries_per_server = 1;
    config.retry.retryable_status_codes = vec![503];
    let orchestrator = orchestrator(config, &[("s1", &backend)]).await;

    let err = orchestrator
        .dispatch(generate_ctx("r1", "m"), generate_payload("m"))
        .await
        .unwrap_err();
    // Single candidate, exhausted after the in-place retries.
    assert_eq!(err.attempts().len(), 1);
    assert_eq!(err.attempts()[0].server_id, "s1");

    let snapshot = orchestrator.metrics_snapshot("s1", "m").unwrap();
    assert_eq!(snapshot.failures, 1);
}

#[tokio::test]
async fn non_retryable_status_is_not_retried_in_place() {
    let backend = backend_with_models(&["m"]).await;
    let guard = Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid request"))
        .expect(1)
        .mount_as_scoped(&backend)
        .await;

    let mut config = fast_config();
    config.retry.max_retries_per_server = 3;
    let orchestrator = orchestrator(config, &[("s1", &backend)]).await;

    let err = orchestrator
        .dispatch(generate_ctx("r1", "m"), generate_payload("m"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), herd_core::ErrorKind::BadRequest);
    drop(guard);
}
