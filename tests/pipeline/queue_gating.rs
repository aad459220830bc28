//! Admission gating through the queue when the fleet is saturated.

use super::support::{backend_with_models, fast_config, generate_ctx, generate_payload, orchestrator};
use herd_core::HerdError;
use herd_queue::QueueConfig;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn saturated_server_queues_then_serves() {
    let backend = backend_with_models(&["m"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(250))
                .set_body_json(serde_json::json!({"done": true})),
        )
        .mount(&backend)
        .await;

    let mut config = fast_config();
    config.cooldown.default_max_concurrency = 1;
    let orchestrator = orchestrator(config, &[("s1", &backend)]).await;
    orchestrator.start().await;

    // Two requests against one slot: the second arrives mid-flight, waits
    // in the queue, and both complete.
    let first = orchestrator.dispatch(generate_ctx("r1", "m"), generate_payload("m"));
    let second = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator
            .dispatch(generate_ctx("r2", "m"), generate_payload("m"))
            .await
    };
    let (a, b) = tokio::join!(first, second);
    assert!(a.is_ok(), "{a:?}");
    assert!(b.is_ok(), "{b:?}");

    orchestrator.stop().await;
}

#[tokio::test]
async fn queue_full_rejects_immediately() {
    let backend = backend_with_models(&["m"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(400))
                .set_body_json(serde_json::json!({"done": true})),
        )
        .mount(&backend)
        .await;

    let mut config = fast_config();
    config.cooldown.default_max_concurrency = 1;
    config.queue = QueueConfig::builder().max_size(1).build().unwrap();
    let orchestrator = orchestrator(config, &[("s1", &backend)]).await;
    orchestrator.start().await;

    let first = orchestrator.dispatch(generate_ctx("r1", "m"), generate_payload("m"));
    let second = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator
            .dispatch(generate_ctx("r2", "m"), generate_payload("m"))
            .await
    };
    let third = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        orchestrator
            .dispatch(generate_ctx("r3", "m"), generate_payload("m"))
            .await
    };
    let (a, b, c) = tokio::join!(first, second, third);

    // One served immediately, one queued, one rejected at the gate.
    let results = [a, b, c];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let full = results
        .iter()
        .filter(|r| matches!(r, Err(HerdError::QueueFull { .. })))
        .count();
    assert_eq!(ok, 2, "{results:?}");
    assert_eq!(full, 1, "{results:?}");

    orchestrator.stop().await;
}

#[tokio::test]
async fn disabled_queue_rejects_saturation_with_no_candidate() {
    let backend = backend_with_models(&["m"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(300))
                .set_body_json(serde_json::json!({"done": true})),
        )
        .mount(&backend)
        .await;

    let mut config = fast_config();
    config.cooldown.default_max_concurrency = 1;
    config.enable_queue = false;
    let orchestrator = orchestrator(config, &[("s1", &backend)]).await;

    let first = orchestrator.dispatch(generate_ctx("r1", "m"), generate_payload("m"));
    let second = async {
        // Give the first dispatch a head start into the backend.
        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator
            .dispatch(generate_ctx("r2", "m"), generate_payload("m"))
            .await
    };
    let (a, b) = tokio::join!(first, second);
    assert!(a.is_ok());
    assert!(matches!(b, Err(HerdError::NoCandidate { .. })));
}

#[tokio::test]
async fn drain_completes_once_idle() {
    let backend = backend_with_models(&["m"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"done": true})))
        .mount(&backend)
        .await;

    let orchestrator = orchestrator(fast_config(), &[("s1", &backend)]).await;
    orchestrator
        .dispatch(generate_ctx("r1", "m"), generate_payload("m"))
        .await
        .unwrap();
    assert!(orchestrator.drain(Duration::from_millis(200)).await);

    // Paused: admission still works, dequeue does not.
    orchestrator.pause();
    assert!(orchestrator.queue_stats().paused);
    orchestrator.resume();
    assert!(!orchestrator.queue_stats().paused);
}
