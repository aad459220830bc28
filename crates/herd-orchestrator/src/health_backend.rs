//! The orchestrator's implementation of the scheduler's callback surface.

use herd_circuitbreaker::BreakerMap;
use herd_core::ErrorKind;
use herd_healthcheck::{HealthBackend, ProbeReport, ProbeTarget};
use herd_proxy::{BackendEndpoint, HttpBackend};
use herd_registry::{LoadedModel, ProbeUpdate, Registry};
use std::sync::Arc;
use std::time::Duration;

/// Bridges the health scheduler to the registry, breaker map, and proxy
/// without handing it direct references.
pub(crate) struct SchedulerBackend {
    pub registry: Arc<Registry>,
    pub breakers: Arc<BreakerMap>,
    pub proxy: Arc<HttpBackend>,
    pub probe_timeout: Duration,
    pub circuit_breaker_enabled: bool,
}

impl SchedulerBackend {
    fn endpoint(&self, server_id: &str) -> Option<BackendEndpoint> {
        let server = self.registry.get(server_id)?;
        let mut endpoint = BackendEndpoint::new(server_id, server.url);
        endpoint.api_key = server.api_key;
        Some(endpoint)
    }
}

impl HealthBackend for SchedulerBackend {
    fn probe_targets(&self) -> Vec<ProbeTarget> {
        self.registry
            .list()
            .into_iter()
            .map(|server| ProbeTarget {
                server_id: server.id,
                healthy: server.healthy,
            })
            .collect()
    }

    async fn probe(&self, server_id: &str) -> ProbeReport {
        let Some(endpoint) = self.endpoint(server_id) else {
            return ProbeReport::failed(ErrorKind::InternalState, "server no longer registered");
        };
        let summary = self.proxy.probe(&endpoint, self.probe_timeout).await;

        // Reconcile placement and capabilities; the health flag itself is
        // flipped by the scheduler once its thresholds are met.
        let update = ProbeUpdate {
            healthy: None,
            response_time: summary.response_time_ms,
            models: summary
                .models
                .as_ref()
                .map(|models| models.iter().map(|m| m.name.clone()).collect()),
            loaded_models: summary.loaded.as_ref().map(|loaded| {
                loaded
                    .iter()
                    .map(|l| LoadedModel {
                        name: l.name.clone(),
                        vram_bytes: l.size_vram,
                        expires_at: l.expires_at_millis(),
                        digest: l.digest.clone(),
                    })
                    .collect()
            }),
            supports_primary: summary.supports_primary,
            supports_compat: summary.supports_compat,
        };
        let _ = self.registry.record_probe(server_id, update);

        if summary.healthy {
            ProbeReport::ok(summary.response_time_ms.unwrap_or(0))
        } else {
            let (kind, message) = summary
                .error
                .map(|e| (e.kind, e.message))
                .unwrap_or((ErrorKind::Timeout, "no enumeration endpoint answered".into()));
            ProbeReport::failed(kind, message)
        }
    }

    fn half_open_pairs(&self) -> Vec<(String, String)> {
        if !self.circuit_breaker_enabled {
            return Vec::new();
        }
        self.breakers.half_open_models()
    }

    async fn run_recovery_test(
        &self,
        server_id: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<u64, (ErrorKind, String)> {
        let Some(endpoint) = self.endpoint(server_id) else {
            return Err((
                ErrorKind::InternalState,
                "server no longer registered".to_string(),
            ));
        };
        if !self.breakers.can_execute(server_id, model) {
            return Err((
                ErrorKind::CircuitOpen,
                "half-open probe budget exhausted".to_string(),
            ));
        }
        match self.proxy.recovery_test(&endpoint, model, timeout).await {
            Ok(response_ms) => {
                self.breakers.record_success(server_id, model);
                Ok(response_ms)
            }
            Err(e) => {
                // The acquired half-open slot must be paid back exactly
                // once, whatever the failure kind.
                self.breakers
                    .record_failure(server_id, model, &e.kind, &e.message);
                Err((e.kind, e.message))
            }
        }
    }

    fn set_server_health(&self, server_id: &str, healthy: bool) {
        let _ = self.registry.set_healthy(server_id, healthy);
    }
}
