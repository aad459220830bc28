//! Streaming dispatch with chunk bookkeeping.

use super::support::{backend_with_models, fast_config, generate_ctx, orchestrator};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn streaming_payload(model: &str) -> serde_json::Value {
    serde_json::json!({ "model": model, "prompt": "hello", "stream": true })
}

#[tokio::test]
async fn stream_forwards_chunks_and_settles_bookkeeping() {
    let backend = backend_with_models(&["m"]).await;
    let body = concat!(
        r#"{"response":"Hel","done":false}"#,
        "\n",
        r#"{"response":"lo","done":false}"#,
        "\n",
        r#"{"response":"","done":true,"eval_count":42,"prompt_eval_count":7}"#,
        "\n",
    );
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"))
        .mount(&backend)
        .await;

    let orchestrator = orchestrator(fast_config(), &[("s1", &backend)]).await;
    let mut stream = orchestrator
        .dispatch_streaming(generate_ctx("r1", "m"), streaming_payload("m"))
        .await
        .unwrap();

    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next_chunk().await {
        chunks.push(String::from_utf8_lossy(&chunk).into_owned());
    }
    assert_eq!(chunks.len(), 3);
    assert!(chunks[0].contains("Hel"));
    assert!(chunks[2].contains("\"done\":true"));

    let stats = stream.finish().await.unwrap();
    assert_eq!(stats.chunks, 3);
    assert_eq!(stats.tokens_generated, Some(42));
    assert_eq!(stats.tokens_prompt, Some(7));
    assert!(stats.ttft_ms.is_some());

    // The streaming outcome reached the aggregator.
    let snapshot = orchestrator.metrics_snapshot("s1", "m").unwrap();
    assert_eq!(snapshot.successes, 1);
    assert_eq!(snapshot.windows["1m"].streaming_count, 1);

    let history = orchestrator.requests();
    let record = &history["s1"][0];
    assert!(record.streaming);
    assert!(record.success);
    assert_eq!(record.tokens_generated, Some(42));
}

#[tokio::test]
async fn streaming_connect_failure_fails_over() {
    let bad = backend_with_models(&["m"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503).set_body_string("service unavailable"))
        .mount(&bad)
        .await;

    let good = wiremock::MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(std::time::Duration::from_millis(150))
                .set_body_json(serde_json::json!({ "models": [{ "name": "m" }] })),
        )
        .mount(&good)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
        .mount(&good)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            concat!(r#"{"response":"ok","done":true}"#, "\n"),
            "application/x-ndjson",
        ))
        .mount(&good)
        .await;

    let mut config = fast_config();
    config.retry.max_retries_per_server = 0;
    let orchestrator = orchestrator(config, &[("bad", &bad), ("good", &good)]).await;

    let mut stream = orchestrator
        .dispatch_streaming(generate_ctx("r1", "m"), streaming_payload("m"))
        .await
        .unwrap();
    let mut chunks = 0;
    while stream.next_chunk().await.is_some() {
        chunks += 1;
    }
    assert_eq!(chunks, 1);
    assert!(stream.finish().await.is_ok());

    // The connect failure on the first server was recorded as a failure.
    let snapshot = orchestrator.metrics_snapshot("bad", "m").unwrap();
    assert_eq!(snapshot.failures, 1);
}

#[tokio::test]
async fn disabled_streaming_is_rejected() {
    let backend = backend_with_models(&["m"]).await;
    let mut config = fast_config();
    config.enable_streaming = false;
    let orchestrator = orchestrator(config, &[("s1", &backend)]).await;
    assert!(orchestrator
        .dispatch_streaming(generate_ctx("r1", "m"), streaming_payload("m"))
        .await
        .is_err());
}
