//! Failover across candidates.

use super::support::{backend_with_models, fast_config, generate_ctx, generate_payload, orchestrator};
use herd_circuitbreaker::CircuitState;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn non_retryable_failure_fails_over_and_poisons_the_pair() {
    let s1 = backend_with_models(&["m"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model 'm' not found"))
        .mount(&s1)
        .await;

    // s2 enumerates slowly, so fastest-response deterministically prefers
    // s1 on the first dispatch.
    let s2 = wiremock::MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(150))
                .set_body_json(serde_json::json!({ "models": [{ "name": "m" }] })),
        )
        .mount(&s2)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
        .mount(&s2)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"done": true})),
        )
        .mount(&s2)
        .await;

    let mut config = fast_config();
    // Keep the breaker open for the whole test.
    config.circuit_breaker = herd_circuitbreaker::CircuitBreakerConfig::builder()
        .open_timeout(Duration::from_secs(60))
        .build()
        .unwrap();
    let orchestrator = orchestrator(config, &[("s1", &s1), ("s2", &s2)]).await;

    // The request still succeeds, transparently, on s2.
    let value = orchestrator
        .dispatch(generate_ctx("r1", "m"), generate_payload("m"))
        .await
        .unwrap();
    assert_eq!(value["done"], true);

    // The (s1, m) breaker opened on the single non-retryable failure.
    let breaker = orchestrator
        .breaker_snapshots()
        .into_iter()
        .find(|b| b.server_id == "s1")
        .unwrap();
    assert_eq!(breaker.state, CircuitState::Open);
    assert_eq!(
        breaker.last_error_kind,
        Some(herd_core::ErrorKind::ModelNotFound)
    );

    // Subsequent selections skip s1 entirely.
    orchestrator
        .dispatch(generate_ctx("r2", "m"), generate_payload("m"))
        .await
        .unwrap();
    let last = orchestrator.decisions().pop().unwrap();
    assert_eq!(last.selected_server_id, "s2");
    assert!(last.candidates.iter().all(|c| c.server_id != "s1"));
}

#[tokio::test]
async fn failover_never_reuses_a_server() {
    // Three servers, all failing: every attempt lands on a distinct server.
    let mut backends = Vec::new();
    for _ in 0..3 {
        let server = backend_with_models(&["m"]).await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;
        backends.push(server);
    }

    let mut config = fast_config();
    config.retry.max_retries_per_server = 0;
    let orchestrator = orchestrator(
        config,
        &[
            ("a", &backends[0]),
            ("b", &backends[1]),
            ("c", &backends[2]),
        ],
    )
    .await;

    let err = orchestrator
        .dispatch(generate_ctx("r1", "m"), generate_payload("m"))
        .await
        .unwrap_err();
    let attempts = err.attempts();
    assert_eq!(attempts.len(), 3);
    let mut servers: Vec<&str> = attempts.iter().map(|a| a.server_id.as_str()).collect();
    servers.sort_unstable();
    servers.dedup();
    assert_eq!(servers.len(), 3, "a server was attempted twice");
}

#[tokio::test]
async fn cooldown_keeps_a_failed_pair_out_until_expiry() {
    let s1 = backend_with_models(&["m"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .up_to_n_times(1)
        .mount(&s1)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"done": true})),
        )
        .mount(&s1)
        .await;

    let mut config = fast_config();
    config.retry.max_retries_per_server = 0;
    config.cooldown.failure_cooldown = Duration::from_millis(150);
    // One transient failure must not trip the breaker.
    config.circuit_breaker = herd_circuitbreaker::CircuitBreakerConfig::builder()
        .base_failure_threshold(5)
        .build()
        .unwrap();
    let orchestrator = orchestrator(config, &[("s1", &s1)]).await;

    // First dispatch fails and puts (s1, m) in cooldown.
    assert!(orchestrator
        .dispatch(generate_ctx("r1", "m"), generate_payload("m"))
        .await
        .is_err());

    // While cooling down the pair is invisible.
    let err = orchestrator
        .dispatch(generate_ctx("r2", "m"), generate_payload("m"))
        .await
        .unwrap_err();
    assert!(matches!(err, herd_core::HerdError::NoCandidate { .. }));

    // After expiry it serves again.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(orchestrator
        .dispatch(generate_ctx("r3", "m"), generate_payload("m"))
        .await
        .is_ok());
}
