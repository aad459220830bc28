//! Common helpers for the pipeline tests.

use herd_core::{Endpoint, RequestContext};
use herd_orchestrator::{Orchestrator, OrchestratorConfig};
use herd_registry::ServerSpec;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mounts the enumeration endpoints every healthy backend answers.
pub async fn mount_models(server: &MockServer, models: &[&str]) {
    let models: Vec<serde_json::Value> = models
        .iter()
        .map(|m| serde_json::json!({ "name": m }))
        .collect();
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "models": models })),
        )
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ps"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "models": [] })),
        )
        .mount(server)
        .await;
}

/// A backend that knows the given models but has no call behavior mounted
/// yet.
pub async fn backend_with_models(models: &[&str]) -> MockServer {
    let server = MockServer::start().await;
    mount_models(&server, models).await;
    server
}

/// Defaults tuned for fast tests: short retries, short cooldowns, tight
/// probe timeout.
pub fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.retry.retry_delay = Duration::from_millis(10);
    config.retry.max_retry_delay = Duration::from_millis(100);
    config.cooldown.failure_cooldown = Duration::from_millis(50);
    config.health.timeout = Duration::from_millis(500);
    config
}

/// Builds an orchestrator over the given mock backends and primes the
/// registry with one health-check cycle.
pub async fn orchestrator(
    config: OrchestratorConfig,
    backends: &[(&str, &MockServer)],
) -> Arc<Orchestrator> {
    let orchestrator = Orchestrator::new(config).expect("config must validate");
    for (id, server) in backends {
        orchestrator
            .add_server(ServerSpec::new(server.uri()).id(*id))
            .expect("server registration");
    }
    orchestrator.run_health_check().await;
    orchestrator
}

pub fn generate_ctx(id: &str, model: &str) -> RequestContext {
    RequestContext::new(id, model, Endpoint::Generate)
}

pub fn generate_payload(model: &str) -> serde_json::Value {
    serde_json::json!({ "model": model, "prompt": "hello", "stream": false })
}
