//! The scheduler's view of the rest of the engine.

use herd_core::ErrorKind;
use std::future::Future;
use std::time::Duration;

/// One server the scheduler should probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub server_id: String,
    pub healthy: bool,
}

/// Result of one probe fan-out against one server.
///
/// The backend implementation owns the per-endpoint semantics (installed
/// models fatal-gating, loaded models and alt-API discovery non-fatal) and
/// reconciles the registry itself; the scheduler only needs the verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    /// Any enumeration endpoint answered in time.
    pub healthy: bool,
    /// Whether the failure kind is worth an in-cycle retry.
    pub retryable: bool,
    pub response_time_ms: Option<u64>,
    pub error: Option<(ErrorKind, String)>,
}

impl ProbeReport {
    pub fn ok(response_time_ms: u64) -> Self {
        Self {
            healthy: true,
            retryable: false,
            response_time_ms: Some(response_time_ms),
            error: None,
        }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        let retryable = matches!(
            kind,
            ErrorKind::Timeout
                | ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::DnsFailure
                | ErrorKind::HttpGateway(_)
        );
        Self {
            healthy: false,
            retryable,
            response_time_ms: None,
            error: Some((kind, message.into())),
        }
    }
}

/// Callback surface the orchestrator hands to the scheduler. The scheduler
/// holds no direct references into the registry or breaker map.
pub trait HealthBackend: Send + Sync + 'static {
    /// Servers to probe this cycle.
    fn probe_targets(&self) -> Vec<ProbeTarget>;

    /// Runs the probe fan-out against one server, including registry
    /// reconciliation of models and capabilities.
    fn probe(&self, server_id: &str) -> impl Future<Output = ProbeReport> + Send;

    /// (server, model) pairs whose breaker is currently half-open.
    fn half_open_pairs(&self) -> Vec<(String, String)>;

    /// Issues one minimal model-level request and records the outcome on
    /// the breaker. Returns the response time on success.
    fn run_recovery_test(
        &self,
        server_id: &str,
        model: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<u64, (ErrorKind, String)>> + Send;

    /// Flips a server's health flag after the consecutive thresholds are
    /// met.
    fn set_server_health(&self, server_id: &str, healthy: bool);
}
