use herd_core::{ErrorKind, HerdEvent};
use std::time::{Duration, Instant};

/// Events emitted by the health scheduler.
#[derive(Debug, Clone)]
pub enum HealthEvent {
    ProbeSucceeded {
        server_id: String,
        response_time_ms: u64,
        timestamp: Instant,
    },
    ProbeFailed {
        server_id: String,
        kind: ErrorKind,
        attempt: u32,
        timestamp: Instant,
    },
    ServerRecovered {
        server_id: String,
        timestamp: Instant,
    },
    ServerLost {
        server_id: String,
        timestamp: Instant,
    },
    RecoveryTestPassed {
        server_id: String,
        model: String,
        timestamp: Instant,
    },
    RecoveryTestFailed {
        server_id: String,
        model: String,
        kind: ErrorKind,
        timestamp: Instant,
    },
    CycleCompleted {
        recovery: bool,
        probed: usize,
        duration: Duration,
        timestamp: Instant,
    },
}

impl HerdEvent for HealthEvent {
    fn event_type(&self) -> &'static str {
        match self {
            HealthEvent::ProbeSucceeded { .. } => "ProbeSucceeded",
            HealthEvent::ProbeFailed { .. } => "ProbeFailed",
            HealthEvent::ServerRecovered { .. } => "ServerRecovered",
            HealthEvent::ServerLost { .. } => "ServerLost",
            HealthEvent::RecoveryTestPassed { .. } => "RecoveryTestPassed",
            HealthEvent::RecoveryTestFailed { .. } => "RecoveryTestFailed",
            HealthEvent::CycleCompleted { .. } => "CycleCompleted",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            HealthEvent::ProbeSucceeded { timestamp, .. }
            | HealthEvent::ProbeFailed { timestamp, .. }
            | HealthEvent::ServerRecovered { timestamp, .. }
            | HealthEvent::ServerLost { timestamp, .. }
            | HealthEvent::RecoveryTestPassed { timestamp, .. }
            | HealthEvent::RecoveryTestFailed { timestamp, .. }
            | HealthEvent::CycleCompleted { timestamp, .. } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        match self {
            HealthEvent::ProbeSucceeded { server_id, .. }
            | HealthEvent::ProbeFailed { server_id, .. }
            | HealthEvent::ServerRecovered { server_id, .. }
            | HealthEvent::ServerLost { server_id, .. }
            | HealthEvent::RecoveryTestPassed { server_id, .. }
            | HealthEvent::RecoveryTestFailed { server_id, .. } => server_id,
            HealthEvent::CycleCompleted { .. } => "health-scheduler",
        }
    }
}
