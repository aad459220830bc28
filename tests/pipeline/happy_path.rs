//! One healthy server, one request, everything recorded.

use super::support::{backend_with_models, fast_config, generate_ctx, generate_payload, orchestrator};
use herd_core::HerdError;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn single_server_dispatch_records_everything() {
    let backend = backend_with_models(&["m"]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(120))
                .set_body_json(serde_json::json!({
                    "response": "hi",
                    "done": true,
                    "eval_count": 64,
                    "prompt_eval_count": 12,
                })),
        )
        .mount(&backend)
        .await;

    let orchestrator = orchestrator(fast_config(), &[("s1", &backend)]).await;
    let value = orchestrator
        .dispatch(generate_ctx("r1", "m"), generate_payload("m"))
        .await
        .unwrap();
    assert_eq!(value["response"], "hi");

    let snapshot = orchestrator.metrics_snapshot("s1", "m").unwrap();
    let minute = &snapshot.windows["1m"];
    assert_eq!(minute.count, 1);
    assert_eq!(minute.errors, 0);
    assert!((snapshot.success_rate - 1.0).abs() < f64::EPSILON);
    assert_eq!(snapshot.in_flight, 0);
    assert!(snapshot.last_response_time >= 120);
    assert_eq!(minute.tokens_generated, 64);

    let decisions = orchestrator.decisions();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].selected_server_id, "s1");
    assert_eq!(decisions[0].algorithm, "fastest-response");

    let history = orchestrator.requests();
    assert_eq!(history["s1"].len(), 1);
    assert!(history["s1"][0].success);
    assert_eq!(history["s1"][0].tokens_generated, Some(64));
}

#[tokio::test]
async fn unknown_model_is_no_candidate() {
    let backend = backend_with_models(&["m"]).await;
    let orchestrator = orchestrator(fast_config(), &[("s1", &backend)]).await;
    let err = orchestrator
        .dispatch(generate_ctx("r1", "unknown"), generate_payload("unknown"))
        .await
        .unwrap_err();
    assert!(matches!(err, HerdError::NoCandidate { model } if model == "unknown"));
}

#[tokio::test]
async fn maintenance_server_is_never_selected() {
    let backend = backend_with_models(&["m"]).await;
    let orchestrator = orchestrator(fast_config(), &[("s1", &backend)]).await;
    orchestrator
        .update_server(
            "s1",
            herd_registry::ServerUpdate {
                max_concurrency: Some(Some(0)),
                ..Default::default()
            },
        )
        .unwrap();
    let err = orchestrator
        .dispatch(generate_ctx("r1", "m"), generate_payload("m"))
        .await
        .unwrap_err();
    assert!(matches!(err, HerdError::NoCandidate { .. }));
}

#[tokio::test]
async fn banned_pair_is_skipped() {
    let backend = backend_with_models(&["m"]).await;
    let orchestrator = orchestrator(fast_config(), &[("s1", &backend)]).await;
    orchestrator.ban_model("s1", "m", "operator", None);
    let err = orchestrator
        .dispatch(generate_ctx("r1", "m"), generate_payload("m"))
        .await
        .unwrap_err();
    assert!(matches!(err, HerdError::NoCandidate { .. }));

    orchestrator.unban_model("s1", "m");
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"done": true})))
        .mount(&backend)
        .await;
    assert!(orchestrator
        .dispatch(generate_ctx("r2", "m"), generate_payload("m"))
        .await
        .is_ok());
}
