//! Selection decisions and their bounded history.

use crate::candidate::Candidate;
use herd_core::{now_millis, EpochMillis};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Per-candidate sub-scores as used by the algorithm that made the call.
/// Cost-based algorithms put their cost in `total` and leave the weighted
/// components zeroed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub latency: f64,
    pub success_rate: f64,
    pub load: f64,
    pub capacity: f64,
    pub circuit_breaker: f64,
    pub timeout: f64,
    pub total: f64,
}

/// One candidate's entry in a decision event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateScore {
    pub server_id: String,
    pub total_score: f64,
    pub breakdown: ScoreBreakdown,
    /// The telemetry the decision was made from.
    pub snapshot: Candidate,
}

/// One recorded selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionEvent {
    pub timestamp: EpochMillis,
    pub model: String,
    pub selected_server_id: String,
    pub algorithm: String,
    pub candidates: Vec<CandidateScore>,
    pub selection_reason: String,
}

/// Persisted layout of `decision-history.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionHistoryPersisted {
    pub timestamp: EpochMillis,
    pub events: Vec<DecisionEvent>,
}

/// Bounded single-writer decision log; readers copy on read.
pub struct DecisionHistory {
    events: Mutex<VecDeque<DecisionEvent>>,
    retention: Duration,
    max_events: usize,
}

impl DecisionHistory {
    pub fn new(retention: Duration, max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            retention,
            max_events: max_events.max(1),
        }
    }

    pub fn record(&self, event: DecisionEvent) {
        let cutoff = now_millis().saturating_sub(self.retention.as_millis() as u64);
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push_back(event);
        while events.len() > self.max_events {
            events.pop_front();
        }
        while events
            .front()
            .map(|e| e.timestamp < cutoff)
            .unwrap_or(false)
        {
            events.pop_front();
        }
    }

    pub fn events(&self) -> Vec<DecisionEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn export(&self) -> DecisionHistoryPersisted {
        DecisionHistoryPersisted {
            timestamp: now_millis(),
            events: self.events(),
        }
    }
}
