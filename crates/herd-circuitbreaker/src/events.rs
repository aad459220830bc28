use crate::CircuitState;
use herd_core::{ErrorKind, HerdEvent};
use std::time::Instant;

/// Events emitted by the breaker map. `key` is `"<serverId>/<model>"`.
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    StateTransition {
        key: String,
        timestamp: Instant,
        from_state: CircuitState,
        to_state: CircuitState,
    },
    CallPermitted {
        key: String,
        timestamp: Instant,
        state: CircuitState,
    },
    CallRejected {
        key: String,
        timestamp: Instant,
    },
    SuccessRecorded {
        key: String,
        timestamp: Instant,
        state: CircuitState,
    },
    FailureRecorded {
        key: String,
        timestamp: Instant,
        state: CircuitState,
        kind: ErrorKind,
    },
    ThresholdAdjusted {
        key: String,
        timestamp: Instant,
        threshold: u32,
    },
}

impl HerdEvent for CircuitBreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::StateTransition { .. } => "StateTransition",
            CircuitBreakerEvent::CallPermitted { .. } => "CallPermitted",
            CircuitBreakerEvent::CallRejected { .. } => "CallRejected",
            CircuitBreakerEvent::SuccessRecorded { .. } => "SuccessRecorded",
            CircuitBreakerEvent::FailureRecorded { .. } => "FailureRecorded",
            CircuitBreakerEvent::ThresholdAdjusted { .. } => "ThresholdAdjusted",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CircuitBreakerEvent::StateTransition { timestamp, .. }
            | CircuitBreakerEvent::CallPermitted { timestamp, .. }
            | CircuitBreakerEvent::CallRejected { timestamp, .. }
            | CircuitBreakerEvent::SuccessRecorded { timestamp, .. }
            | CircuitBreakerEvent::FailureRecorded { timestamp, .. }
            | CircuitBreakerEvent::ThresholdAdjusted { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            CircuitBreakerEvent::StateTransition { key, .. }
            | CircuitBreakerEvent::CallPermitted { key, .. }
            | CircuitBreakerEvent::CallRejected { key, .. }
            | CircuitBreakerEvent::SuccessRecorded { key, .. }
            | CircuitBreakerEvent::FailureRecorded { key, .. }
            | CircuitBreakerEvent::ThresholdAdjusted { key, .. } => key,
        }
    }
}
