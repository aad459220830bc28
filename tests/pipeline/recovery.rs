//! Circuit trip and staged recovery through the health scheduler.

use super::support::{backend_with_models, fast_config, generate_ctx, generate_payload, orchestrator};
use herd_circuitbreaker::{CircuitBreakerConfig, CircuitState};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn trip_then_half_open_then_close_via_active_tests() {
    let backend = backend_with_models(&["m"]).await;
    // Three failing dispatches trip the breaker; everything after that
    // (the scheduler's active tests) succeeds.
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503).set_body_string("service unavailable"))
        .up_to_n_times(3)
        .mount(&backend)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"done": true})),
        )
        .mount(&backend)
        .await;

    let mut config = fast_config();
    config.retry.max_retries_per_server = 0;
    config.cooldown.failure_cooldown = Duration::from_millis(20);
    config.circuit_breaker = CircuitBreakerConfig::builder()
        .base_failure_threshold(3)
        .threshold_range(3, 10)
        .open_timeout(Duration::from_secs(1))
        .half_open_max_requests(2)
        .recovery_success_threshold(2)
        .adaptive_thresholds(false)
        .build()
        .unwrap();
    let orchestrator = orchestrator(config, &[("s1", &backend)]).await;

    for i in 0..3 {
        let result = orchestrator
            .dispatch(generate_ctx(&format!("r{i}"), "m"), generate_payload("m"))
            .await;
        assert!(result.is_err());
        // Let the cooldown lapse so each failure lands on the server, not
        // on an empty candidate set.
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    let breaker = orchestrator
        .breaker_snapshots()
        .into_iter()
        .find(|b| b.server_id == "s1")
        .unwrap();
    assert_eq!(breaker.state, CircuitState::Open);

    // Before the open timeout the pair is not eligible and not tested.
    orchestrator.run_health_check().await;
    assert_eq!(orchestrator.scheduler_metrics().active_tests, 0);

    // Past the timeout the first eligibility check half-opens the pair and
    // the scheduler starts testing: two passes close it.
    tokio::time::sleep(Duration::from_millis(1_100)).await;
    orchestrator.run_health_check().await;
    let mid = orchestrator
        .breaker_snapshots()
        .into_iter()
        .find(|b| b.server_id == "s1")
        .unwrap();
    assert_eq!(mid.state, CircuitState::HalfOpen);
    assert_eq!(orchestrator.scheduler_metrics().active_tests, 1);

    orchestrator.run_health_check().await;
    let closed = orchestrator
        .breaker_snapshots()
        .into_iter()
        .find(|b| b.server_id == "s1")
        .unwrap();
    assert_eq!(closed.state, CircuitState::Closed);
    assert_eq!(closed.consecutive_failures, 0);
    assert_eq!(closed.consecutive_successes, 0);

    // And traffic flows again.
    assert!(orchestrator
        .dispatch(generate_ctx("after", "m"), generate_payload("m"))
        .await
        .is_ok());
}

#[tokio::test]
async fn recovery_cycle_brings_back_a_dead_server() {
    let backend = wiremock::MockServer::start().await;
    // The first enumeration fails hard, everything after recovers.
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .up_to_n_times(1)
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "models": [{ "name": "m" }] })),
        )
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
        .mount(&backend)
        .await;

    let mut config = fast_config();
    config.health = herd_healthcheck::HealthCheckConfig::builder()
        .timeout(Duration::from_millis(500))
        .thresholds(1, 1)
        .retries(0, Duration::from_millis(10), 2.0)
        .build()
        .unwrap();
    let orchestrator = orchestrator(config, &[("s1", &backend)]).await;

    // The failed probe (threshold 1) took the server out.
    assert!(!orchestrator.server("s1").unwrap().healthy);

    // The recovery loop probes unhealthy servers and brings it back.
    orchestrator.run_recovery_check().await;
    let server = orchestrator.server("s1").unwrap();
    assert!(server.healthy);
    assert_eq!(server.models, vec!["m".to_string()]);
    assert!(orchestrator.scheduler_metrics().servers_recovered >= 1);
    assert!(!orchestrator.recovery_failures().is_empty());
}
