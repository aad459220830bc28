//! The balancer's view of one eligible server.

use herd_circuitbreaker::CircuitState;
use serde::{Deserialize, Serialize};

/// Telemetry snapshot for one (server, model) candidate, assembled by the
/// orchestrator from the registry, the aggregator, and the breaker map.
/// Candidates arrive prefiltered; the balancer only ranks them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub server_id: String,
    pub max_concurrency: u32,
    pub in_flight: u32,
    pub queued: u32,
    /// Blended latency estimate in ms (recent/historical mix).
    pub latency_ms: f64,
    pub success_rate: f64,
    /// Error rate inside the most recent one-minute window.
    pub recent_error_rate: f64,
    /// Error rate over the whole tracked horizon.
    pub overall_error_rate: f64,
    pub consecutive_failures: u32,
    pub circuit_state: CircuitState,
    /// Current adaptive request timeout for this pair, in ms.
    pub adaptive_timeout_ms: u64,
    /// True when the model is resident in backend memory.
    pub model_loaded: bool,
    /// Time until the loaded model is evicted, when known. Negative values
    /// mean the backend already reported it past due.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_expires_in_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttft_avg_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttft_p95_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming_duration_avg_ms: Option<f64>,
}

impl Candidate {
    /// A healthy, idle candidate with neutral telemetry; tests and callers
    /// override the fields they care about.
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            max_concurrency: 4,
            in_flight: 0,
            queued: 0,
            latency_ms: 1_000.0,
            success_rate: 1.0,
            recent_error_rate: 0.0,
            overall_error_rate: 0.0,
            consecutive_failures: 0,
            circuit_state: CircuitState::Closed,
            adaptive_timeout_ms: 120_000,
            model_loaded: false,
            loaded_expires_in_ms: None,
            ttft_avg_ms: None,
            ttft_p95_ms: None,
            streaming_duration_avg_ms: None,
        }
    }

    /// In-flight plus queued work attributed to this pair.
    pub fn total_load(&self) -> u32 {
        self.in_flight + self.queued
    }

    /// Remaining request slots.
    pub fn available(&self) -> u32 {
        self.max_concurrency.saturating_sub(self.in_flight)
    }
}
