use herd_core::HerdEvent;
use std::time::{Duration, Instant};

/// Events emitted by the request queue.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Enqueued {
        id: String,
        priority: u32,
        depth: usize,
        timestamp: Instant,
    },
    Dequeued {
        id: String,
        waited: Duration,
        depth: usize,
        timestamp: Instant,
    },
    Rejected {
        depth: usize,
        timestamp: Instant,
    },
    TimedOut {
        id: String,
        waited: Duration,
        timestamp: Instant,
    },
    Boosted {
        id: String,
        priority: u32,
        timestamp: Instant,
    },
    Paused {
        timestamp: Instant,
    },
    Resumed {
        timestamp: Instant,
    },
}

impl HerdEvent for QueueEvent {
    fn event_type(&self) -> &'static str {
        match self {
            QueueEvent::Enqueued { .. } => "Enqueued",
            QueueEvent::Dequeued { .. } => "Dequeued",
            QueueEvent::Rejected { .. } => "Rejected",
            QueueEvent::TimedOut { .. } => "TimedOut",
            QueueEvent::Boosted { .. } => "Boosted",
            QueueEvent::Paused { .. } => "Paused",
            QueueEvent::Resumed { .. } => "Resumed",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            QueueEvent::Enqueued { timestamp, .. }
            | QueueEvent::Dequeued { timestamp, .. }
            | QueueEvent::Rejected { timestamp, .. }
            | QueueEvent::TimedOut { timestamp, .. }
            | QueueEvent::Boosted { timestamp, .. }
            | QueueEvent::Paused { timestamp }
            | QueueEvent::Resumed { timestamp } => *timestamp,
        }
    }

    fn component(&self) -> &str {
        "queue"
    }
}
