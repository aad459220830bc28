//! The single-pair state machine.

use crate::config::CircuitBreakerConfig;
use herd_core::{ErrorClass, ErrorKind, EpochMillis};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;

/// Breaker state for one (server, model) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Calls flow freely.
    Closed,
    /// Calls are rejected until the open timeout elapses.
    Open,
    /// A bounded number of probe calls is permitted.
    HalfOpen,
}

impl CircuitState {
    pub fn label(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

/// Point-in-time view of one breaker for controllers and persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub server_id: String,
    pub model: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub failure_threshold: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<EpochMillis>,
    pub half_open_in_flight: u32,
    pub error_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
}

/// Outcome of a circuit operation the map turns into events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

pub(crate) struct Circuit {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    failure_threshold: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<EpochMillis>,
    half_open_started: Option<Instant>,
    half_open_in_flight: u32,
    /// Probe calls completed during the current half-open phase.
    half_open_completed: u32,
    error_rate: f64,
    /// Calls recorded since the error-rate counters last reset.
    observed: u64,
    error_mix: VecDeque<ErrorClass>,
    last_error_kind: Option<ErrorKind>,
    last_failure_reason: Option<String>,
}

impl Circuit {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            failure_threshold: config.base_failure_threshold,
            opened_at: None,
            opened_at_wall: None,
            half_open_started: None,
            half_open_in_flight: 0,
            half_open_completed: 0,
            error_rate: 0.0,
            observed: 0,
            error_mix: VecDeque::new(),
            last_error_kind: None,
            last_failure_reason: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Gate for one call. A granted half-open slot must be paid back by
    /// exactly one `record_success`/`record_failure`.
    pub fn try_acquire(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> (bool, Option<Transition>) {
        match self.state {
            CircuitState::Closed => (true, None),
            CircuitState::Open => {
                let due = self
                    .opened_at
                    .map(|at| now.duration_since(at) >= config.open_timeout)
                    .unwrap_or(true);
                if due {
                    let transition = self.transition_to(CircuitState::HalfOpen, now);
                    self.half_open_in_flight = 1;
                    self.half_open_completed = 0;
                    (true, transition)
                } else {
                    (false, None)
                }
            }
            CircuitState::HalfOpen => {
                let expired = self
                    .half_open_started
                    .map(|at| now.duration_since(at) >= config.half_open_timeout)
                    .unwrap_or(false);
                if expired {
                    let transition = self.transition_to(CircuitState::Open, now);
                    return (false, transition);
                }
                if self.half_open_in_flight < config.half_open_max_requests {
                    self.half_open_in_flight += 1;
                    (true, None)
                } else {
                    (false, None)
                }
            }
        }
    }

    pub fn record_success(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> Option<Transition> {
        self.observed += 1;
        self.error_rate *= 1.0 - config.error_rate_smoothing;
        self.consecutive_failures = 0;
        self.consecutive_successes += 1;

        match self.state {
            CircuitState::HalfOpen => {
                self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
                self.half_open_completed += 1;
                if self.consecutive_successes >= config.recovery_success_threshold {
                    self.transition_to(CircuitState::Closed, now)
                } else if self.half_open_completed >= config.half_open_max_requests {
                    // The probe budget ran out before the success threshold
                    // was met.
                    self.transition_to(CircuitState::Open, now)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn record_failure(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
        kind: &ErrorKind,
        reason: &str,
    ) -> (Option<Transition>, Option<u32>) {
        let class = kind.class();
        self.observed += 1;
        self.error_rate =
            config.error_rate_smoothing + (1.0 - config.error_rate_smoothing) * self.error_rate;
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;
        self.error_mix.push_back(class);
        while self.error_mix.len() > config.error_mix_window {
            self.error_mix.pop_front();
        }
        self.last_error_kind = Some(kind.clone());
        self.last_failure_reason = Some(reason.to_string());

        let adjusted = self.adapt_threshold(config);

        let transition = match self.state {
            CircuitState::HalfOpen => {
                self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
                self.half_open_completed += 1;
                self.transition_to(CircuitState::Open, now)
            }
            CircuitState::Closed => {
                let non_retryable_trip = class == ErrorClass::NonRetryable
                    && self.non_retryable_ratio() > config.non_retryable_ratio_threshold;
                let consecutive_trip = self.consecutive_failures >= self.failure_threshold;
                let rate_trip = self.observed >= config.error_rate_window as u64
                    && self.error_rate >= config.error_rate_threshold;
                if non_retryable_trip || consecutive_trip || rate_trip {
                    self.transition_to(CircuitState::Open, now)
                } else {
                    None
                }
            }
            CircuitState::Open => None,
        };

        (transition, adjusted)
    }

    /// Lazy `open → half-open` edge for read paths: any eligibility check
    /// past the open timeout performs the transition, without consuming a
    /// probe slot.
    pub fn maybe_half_open(
        &mut self,
        config: &CircuitBreakerConfig,
        now: Instant,
    ) -> Option<Transition> {
        if self.state != CircuitState::Open {
            return None;
        }
        let due = self
            .opened_at
            .map(|at| now.duration_since(at) >= config.open_timeout)
            .unwrap_or(true);
        if due {
            self.transition_to(CircuitState::HalfOpen, now)
        } else {
            None
        }
    }

    /// Pays back an acquired half-open slot without recording an outcome
    /// (the call was cancelled before the backend answered).
    pub fn release(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.half_open_in_flight = self.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Administrative reset to closed with zeroed counters.
    pub fn force_close(&mut self, now: Instant) -> Option<Transition> {
        let transition = self.transition_to(CircuitState::Closed, now);
        self.error_mix.clear();
        self.last_error_kind = None;
        self.last_failure_reason = None;
        transition
    }

    fn non_retryable_ratio(&self) -> f64 {
        if self.error_mix.is_empty() {
            return 0.0;
        }
        let non_retryable = self
            .error_mix
            .iter()
            .filter(|c| **c == ErrorClass::NonRetryable)
            .count();
        non_retryable as f64 / self.error_mix.len() as f64
    }

    /// Nudges the trip threshold toward tolerance when the recent mix is
    /// dominated by transient noise, toward caution when non-retryable
    /// failures dominate. Always clamped to the configured range.
    fn adapt_threshold(&mut self, config: &CircuitBreakerConfig) -> Option<u32> {
        if !config.adaptive_thresholds || self.error_mix.len() < 3 {
            return None;
        }
        let ratio = self.non_retryable_ratio();
        let step = config.adaptive_threshold_adjustment;
        let current = self.failure_threshold;
        let next = if ratio >= 0.5 {
            current
                .saturating_sub(step)
                .max(config.min_failure_threshold)
        } else if ratio <= 0.1 {
            current
                .saturating_add(step)
                .min(config.max_failure_threshold)
        } else {
            current
        };
        if next != current {
            self.failure_threshold = next;
            Some(next)
        } else {
            None
        }
    }

    fn transition_to(&mut self, state: CircuitState, now: Instant) -> Option<Transition> {
        if self.state == state {
            return None;
        }
        let from = self.state;
        self.state = state;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        match state {
            CircuitState::Open => {
                self.opened_at = Some(now);
                self.opened_at_wall = Some(herd_core::now_millis());
                self.half_open_started = None;
                self.half_open_in_flight = 0;
                self.half_open_completed = 0;
            }
            CircuitState::HalfOpen => {
                self.half_open_started = Some(now);
                self.half_open_in_flight = 0;
                self.half_open_completed = 0;
            }
            CircuitState::Closed => {
                self.opened_at = None;
                self.opened_at_wall = None;
                self.half_open_started = None;
                self.half_open_in_flight = 0;
                self.half_open_completed = 0;
                self.error_rate = 0.0;
                self.observed = 0;
            }
        }
        Some(Transition { from, to: state })
    }

    pub fn snapshot(&self, server_id: &str, model: &str) -> BreakerSnapshot {
        BreakerSnapshot {
            server_id: server_id.to_string(),
            model: model.to_string(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            consecutive_successes: self.consecutive_successes,
            failure_threshold: self.failure_threshold,
            opened_at: self.opened_at_wall,
            half_open_in_flight: self.half_open_in_flight,
            error_rate: self.error_rate,
            last_error_kind: self.last_error_kind.clone(),
            last_failure_reason: self.last_failure_reason.clone(),
        }
    }
}
