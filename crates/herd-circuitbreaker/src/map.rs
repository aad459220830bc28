//! The partitioned breaker collection.

use crate::circuit::{BreakerSnapshot, Circuit, CircuitState, Transition};
use crate::config::CircuitBreakerConfig;
use crate::events::CircuitBreakerEvent;
use herd_core::{now_millis, EpochMillis, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// One persisted breaker transition, kept for `recovery-failures.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub timestamp: EpochMillis,
    pub server_id: String,
    pub model: String,
    pub from: CircuitState,
    pub to: CircuitState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

struct Inner {
    circuits: HashMap<(String, String), Circuit>,
    transitions: Vec<TransitionRecord>,
}

const MAX_TRANSITION_RECORDS: usize = 1_000;

/// All breakers, partitioned by (server, model) under one mutex.
pub struct BreakerMap {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl BreakerMap {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                circuits: HashMap::new(),
                transitions: Vec::new(),
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn key(server_id: &str, model: &str) -> String {
        format!("{server_id}/{model}")
    }

    fn push_transition(
        inner: &mut Inner,
        server_id: &str,
        model: &str,
        transition: Transition,
        reason: Option<String>,
    ) {
        inner.transitions.push(TransitionRecord {
            timestamp: now_millis(),
            server_id: server_id.to_string(),
            model: model.to_string(),
            from: transition.from,
            to: transition.to,
            reason,
        });
        let excess = inner.transitions.len().saturating_sub(MAX_TRANSITION_RECORDS);
        if excess > 0 {
            inner.transitions.drain(..excess);
        }
    }

    fn emit_transition(&self, server_id: &str, model: &str, transition: Transition) {
        let key = Self::key(server_id, model);

        #[cfg(feature = "tracing")]
        tracing::info!(
            server = %server_id,
            model = %model,
            from = transition.from.label(),
            to = transition.to.label(),
            "circuit state transition"
        );

        #[cfg(feature = "metrics")]
        {
            metrics::counter!(
                "herd_circuit_transitions_total",
                "server" => server_id.to_string(),
                "model" => model.to_string(),
                "from" => transition.from.label(),
                "to" => transition.to.label()
            )
            .increment(1);
            metrics::gauge!(
                "herd_circuit_state",
                "server" => server_id.to_string(),
                "model" => model.to_string()
            )
            .set(match transition.to {
                CircuitState::Closed => 0.0,
                CircuitState::Open => 1.0,
                CircuitState::HalfOpen => 2.0,
            });
        }

        self.config
            .event_listeners
            .emit(&CircuitBreakerEvent::StateTransition {
                key,
                timestamp: Instant::now(),
                from_state: transition.from,
                to_state: transition.to,
            });
    }

    /// Gate for one call against (server, model). A `true` in half-open
    /// consumes one probe slot that exactly one `record_*` call pays back.
    pub fn can_execute(&self, server_id: &str, model: &str) -> bool {
        self.can_execute_at(server_id, model, Instant::now())
    }

    pub fn can_execute_at(&self, server_id: &str, model: &str, now: Instant) -> bool {
        let (permitted, transition, state) = {
            let mut inner = self.lock();
            let circuit = inner
                .circuits
                .entry((server_id.to_string(), model.to_string()))
                .or_insert_with(|| Circuit::new(&self.config));
            let (permitted, transition) = circuit.try_acquire(&self.config, now);
            let state = circuit.state();
            if let Some(t) = transition {
                Self::push_transition(&mut inner, server_id, model, t, None);
            }
            (permitted, transition, state)
        };

        if let Some(t) = transition {
            self.emit_transition(server_id, model, t);
        }
        let key = Self::key(server_id, model);
        if permitted {
            self.config
                .event_listeners
                .emit(&CircuitBreakerEvent::CallPermitted {
                    key,
                    timestamp: Instant::now(),
                    state,
                });
        } else {
            self.config
                .event_listeners
                .emit(&CircuitBreakerEvent::CallRejected {
                    key,
                    timestamp: Instant::now(),
                });
        }
        permitted
    }

    pub fn record_success(&self, server_id: &str, model: &str) {
        self.record_success_at(server_id, model, Instant::now());
    }

    pub fn record_success_at(&self, server_id: &str, model: &str, now: Instant) {
        let (transition, state) = {
            let mut inner = self.lock();
            let circuit = inner
                .circuits
                .entry((server_id.to_string(), model.to_string()))
                .or_insert_with(|| Circuit::new(&self.config));
            let transition = circuit.record_success(&self.config, now);
            let state = circuit.state();
            if let Some(t) = transition {
                Self::push_transition(&mut inner, server_id, model, t, None);
            }
            (transition, state)
        };

        if let Some(t) = transition {
            self.emit_transition(server_id, model, t);
        }
        self.config
            .event_listeners
            .emit(&CircuitBreakerEvent::SuccessRecorded {
                key: Self::key(server_id, model),
                timestamp: Instant::now(),
                state,
            });
    }

    pub fn record_failure(&self, server_id: &str, model: &str, kind: &ErrorKind, reason: &str) {
        self.record_failure_at(server_id, model, kind, reason, Instant::now());
    }

    pub fn record_failure_at(
        &self,
        server_id: &str,
        model: &str,
        kind: &ErrorKind,
        reason: &str,
        now: Instant,
    ) {
        let (transition, adjusted, state) = {
            let mut inner = self.lock();
            let circuit = inner
                .circuits
                .entry((server_id.to_string(), model.to_string()))
                .or_insert_with(|| Circuit::new(&self.config));
            let (transition, adjusted) = circuit.record_failure(&self.config, now, kind, reason);
            let state = circuit.state();
            if let Some(t) = transition {
                Self::push_transition(&mut inner, server_id, model, t, Some(reason.to_string()));
            }
            (transition, adjusted, state)
        };

        if let Some(t) = transition {
            self.emit_transition(server_id, model, t);
        }
        let key = Self::key(server_id, model);
        if let Some(threshold) = adjusted {
            #[cfg(feature = "tracing")]
            tracing::debug!(server = %server_id, model = %model, threshold, "failure threshold adapted");

            self.config
                .event_listeners
                .emit(&CircuitBreakerEvent::ThresholdAdjusted {
                    key: key.clone(),
                    timestamp: Instant::now(),
                    threshold,
                });
        }
        self.config
            .event_listeners
            .emit(&CircuitBreakerEvent::FailureRecorded {
                key,
                timestamp: Instant::now(),
                state,
                kind: kind.clone(),
            });
    }

    /// Pays back an acquired half-open slot when the call was abandoned
    /// before an outcome existed.
    pub fn release(&self, server_id: &str, model: &str) {
        let mut inner = self.lock();
        if let Some(circuit) = inner
            .circuits
            .get_mut(&(server_id.to_string(), model.to_string()))
        {
            circuit.release();
        }
    }

    /// Administrative reset to closed.
    pub fn force_close(&self, server_id: &str, model: &str) {
        let transition = {
            let mut inner = self.lock();
            let circuit = inner
                .circuits
                .entry((server_id.to_string(), model.to_string()))
                .or_insert_with(|| Circuit::new(&self.config));
            let transition = circuit.force_close(Instant::now());
            if let Some(t) = transition {
                Self::push_transition(&mut inner, server_id, model, t, Some("force-close".into()));
            }
            transition
        };
        if let Some(t) = transition {
            self.emit_transition(server_id, model, t);
        }
    }

    /// Current state; pairs never seen report closed. Reading the state of
    /// an open pair past its timeout is an eligibility check and performs
    /// the lazy `open → half-open` transition.
    pub fn state(&self, server_id: &str, model: &str) -> CircuitState {
        let now = Instant::now();
        let (state, transition) = {
            let mut inner = self.lock();
            let Some(circuit) = inner
                .circuits
                .get_mut(&(server_id.to_string(), model.to_string()))
            else {
                return CircuitState::Closed;
            };
            let transition = circuit.maybe_half_open(&self.config, now);
            let state = circuit.state();
            if let Some(t) = transition {
                Self::push_transition(&mut inner, server_id, model, t, None);
            }
            (state, transition)
        };
        if let Some(t) = transition {
            self.emit_transition(server_id, model, t);
        }
        state
    }

    /// Every pair currently half-open, for the health scheduler's active
    /// recovery tests. Open pairs past their timeout transition on the way.
    pub fn half_open_models(&self) -> Vec<(String, String)> {
        let now = Instant::now();
        let (half_open, transitions) = {
            let mut inner = self.lock();
            let mut transitions = Vec::new();
            let keys: Vec<(String, String)> = inner.circuits.keys().cloned().collect();
            for key in &keys {
                if let Some(circuit) = inner.circuits.get_mut(key) {
                    if let Some(t) = circuit.maybe_half_open(&self.config, now) {
                        transitions.push((key.clone(), t));
                    }
                }
            }
            for ((server, model), t) in &transitions {
                Self::push_transition(&mut inner, server, model, *t, None);
            }
            let half_open = inner
                .circuits
                .iter()
                .filter(|(_, c)| c.state() == CircuitState::HalfOpen)
                .map(|(k, _)| k.clone())
                .collect();
            (half_open, transitions)
        };
        for ((server, model), t) in transitions {
            self.emit_transition(&server, &model, t);
        }
        half_open
    }

    /// Open/total breaker counts per server, for escalation.
    pub fn open_ratio_by_server(&self) -> HashMap<String, (usize, usize)> {
        let inner = self.lock();
        let mut out: HashMap<String, (usize, usize)> = HashMap::new();
        for ((server, _), circuit) in inner.circuits.iter() {
            let entry = out.entry(server.clone()).or_insert((0, 0));
            entry.1 += 1;
            if circuit.state() == CircuitState::Open {
                entry.0 += 1;
            }
        }
        out
    }

    pub fn snapshot(&self, server_id: &str, model: &str) -> Option<BreakerSnapshot> {
        self.lock()
            .circuits
            .get(&(server_id.to_string(), model.to_string()))
            .map(|c| c.snapshot(server_id, model))
    }

    pub fn snapshot_all(&self) -> Vec<BreakerSnapshot> {
        self.lock()
            .circuits
            .iter()
            .map(|((server, model), c)| c.snapshot(server, model))
            .collect()
    }

    /// Copy of the bounded transition log.
    pub fn transitions(&self) -> Vec<TransitionRecord> {
        self.lock().transitions.clone()
    }

    /// Drops every breaker belonging to a removed server.
    pub fn prune_server(&self, server_id: &str) {
        self.lock().circuits.retain(|(sid, _), _| sid != server_id);
    }
}
