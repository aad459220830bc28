//! Circuit breaker configuration.

use crate::events::CircuitBreakerEvent;
use crate::CircuitState;
use herd_core::{ErrorPatterns, EventListeners, FnListener};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CircuitBreakerConfigError {
    #[error("circuitBreaker.halfOpenMaxRequests must be >= 1")]
    HalfOpenMaxRequests,
    #[error("circuitBreaker.recoverySuccessThreshold must be >= 1")]
    RecoverySuccessThreshold,
    #[error("circuitBreaker.errorRateThreshold must be within [0, 1] (got {0})")]
    ErrorRateThreshold(f64),
    #[error("circuitBreaker.errorRateSmoothing must be within [0, 1] (got {0})")]
    ErrorRateSmoothing(f64),
    #[error("circuitBreaker failure thresholds must satisfy min <= base <= max ({min} <= {base} <= {max})")]
    ThresholdOrder { min: u32, base: u32, max: u32 },
    #[error("circuitBreaker.modelEscalation.ratioThreshold must be within [0, 1] (got {0})")]
    EscalationRatio(f64),
}

/// Escalation from many open model breakers to server-level unhealth.
#[derive(Debug, Clone, PartialEq)]
pub struct EscalationConfig {
    pub enabled: bool,
    /// Fraction of a server's breakers that must be open.
    pub ratio_threshold: f64,
    /// How long the ratio must hold before escalating.
    pub duration_threshold: Duration,
    /// Cadence of the escalation evaluation task.
    pub check_interval: Duration,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ratio_threshold: 0.5,
            duration_threshold: Duration::from_secs(60),
            check_interval: Duration::from_secs(30),
        }
    }
}

/// Configuration shared by every breaker in a [`crate::BreakerMap`].
#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub(crate) base_failure_threshold: u32,
    pub(crate) min_failure_threshold: u32,
    pub(crate) max_failure_threshold: u32,
    pub(crate) open_timeout: Duration,
    /// Maximum life of a half-open phase before falling back to open.
    pub(crate) half_open_timeout: Duration,
    pub(crate) half_open_max_requests: u32,
    pub(crate) recovery_success_threshold: u32,
    /// Minimum observed calls before the smoothed error rate can trip.
    pub(crate) error_rate_window: u32,
    pub(crate) error_rate_threshold: f64,
    pub(crate) error_rate_smoothing: f64,
    pub(crate) adaptive_thresholds: bool,
    pub(crate) adaptive_threshold_adjustment: u32,
    /// Non-retryable share of the recent error mix that trips immediately.
    pub(crate) non_retryable_ratio_threshold: f64,
    /// Recent error-mix sample size for ratio and adaptation decisions.
    pub(crate) error_mix_window: usize,
    pub(crate) error_patterns: ErrorPatterns,
    pub(crate) escalation: EscalationConfig,
    pub(crate) event_listeners: EventListeners<CircuitBreakerEvent>,
}

impl CircuitBreakerConfig {
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    pub fn open_timeout(&self) -> Duration {
        self.open_timeout
    }

    pub fn escalation(&self) -> &EscalationConfig {
        &self.escalation
    }

    pub fn error_patterns(&self) -> &ErrorPatterns {
        &self.error_patterns
    }
}

/// Builder for [`CircuitBreakerConfig`].
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            config: CircuitBreakerConfig {
                base_failure_threshold: 5,
                min_failure_threshold: 3,
                max_failure_threshold: 10,
                open_timeout: Duration::from_secs(30),
                half_open_timeout: Duration::from_secs(60),
                half_open_max_requests: 2,
                recovery_success_threshold: 2,
                error_rate_window: 20,
                error_rate_threshold: 0.5,
                error_rate_smoothing: 0.2,
                adaptive_thresholds: true,
                adaptive_threshold_adjustment: 1,
                non_retryable_ratio_threshold: 0.3,
                error_mix_window: 20,
                error_patterns: ErrorPatterns::default(),
                escalation: EscalationConfig::default(),
                event_listeners: EventListeners::new(),
            },
        }
    }

    /// Consecutive-failure trip point before adaptation. Default: 5
    pub fn base_failure_threshold(mut self, threshold: u32) -> Self {
        self.config.base_failure_threshold = threshold;
        self
    }

    /// Clamp range for the adaptive threshold. Defaults: 3..=10
    pub fn threshold_range(mut self, min: u32, max: u32) -> Self {
        self.config.min_failure_threshold = min;
        self.config.max_failure_threshold = max;
        self
    }

    /// Time spent open before a probe is permitted. Default: 30s
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.config.open_timeout = timeout;
        self
    }

    /// Maximum life of a half-open phase. Default: 60s
    pub fn half_open_timeout(mut self, timeout: Duration) -> Self {
        self.config.half_open_timeout = timeout;
        self
    }

    /// Concurrent probes permitted while half-open. Default: 2
    pub fn half_open_max_requests(mut self, max: u32) -> Self {
        self.config.half_open_max_requests = max;
        self
    }

    /// Successes required to close from half-open. Default: 2
    pub fn recovery_success_threshold(mut self, threshold: u32) -> Self {
        self.config.recovery_success_threshold = threshold;
        self
    }

    /// Minimum calls before the smoothed error rate may trip. Default: 20
    pub fn error_rate_window(mut self, window: u32) -> Self {
        self.config.error_rate_window = window;
        self
    }

    /// Smoothed error rate that opens the circuit. Default: 0.5
    pub fn error_rate_threshold(mut self, threshold: f64) -> Self {
        self.config.error_rate_threshold = threshold;
        self
    }

    /// EWMA factor for error-rate smoothing. Default: 0.2
    pub fn error_rate_smoothing(mut self, alpha: f64) -> Self {
        self.config.error_rate_smoothing = alpha;
        self
    }

    /// Enables or disables threshold adaptation. Default: enabled
    pub fn adaptive_thresholds(mut self, enabled: bool) -> Self {
        self.config.adaptive_thresholds = enabled;
        self
    }

    /// Step applied per adaptation. Default: 1
    pub fn adaptive_threshold_adjustment(mut self, step: u32) -> Self {
        self.config.adaptive_threshold_adjustment = step;
        self
    }

    /// Non-retryable share of the recent error mix that trips on a single
    /// non-retryable failure. Default: 0.3
    pub fn non_retryable_ratio_threshold(mut self, ratio: f64) -> Self {
        self.config.non_retryable_ratio_threshold = ratio;
        self
    }

    /// Fallback message-pattern lists for unclassified failures.
    pub fn error_patterns(mut self, patterns: ErrorPatterns) -> Self {
        self.config.error_patterns = patterns;
        self
    }

    pub fn escalation(mut self, escalation: EscalationConfig) -> Self {
        self.config.escalation = escalation;
        self
    }

    /// Registers a callback on every state transition.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.config
            .event_listeners
            .add(FnListener::new(move |event| {
                if let CircuitBreakerEvent::StateTransition {
                    key,
                    from_state,
                    to_state,
                    ..
                } = event
                {
                    f(key, *from_state, *to_state);
                }
            }));
        self
    }

    /// Registers a callback when a call is rejected by an open circuit.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.config
            .event_listeners
            .add(FnListener::new(move |event| {
                if let CircuitBreakerEvent::CallRejected { key, .. } = event {
                    f(key);
                }
            }));
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig, CircuitBreakerConfigError> {
        let c = &self.config;
        if c.half_open_max_requests < 1 {
            return Err(CircuitBreakerConfigError::HalfOpenMaxRequests);
        }
        if c.recovery_success_threshold < 1 {
            return Err(CircuitBreakerConfigError::RecoverySuccessThreshold);
        }
        if !(0.0..=1.0).contains(&c.error_rate_threshold) {
            return Err(CircuitBreakerConfigError::ErrorRateThreshold(
                c.error_rate_threshold,
            ));
        }
        if !(0.0..=1.0).contains(&c.error_rate_smoothing) {
            return Err(CircuitBreakerConfigError::ErrorRateSmoothing(
                c.error_rate_smoothing,
            ));
        }
        if !(c.min_failure_threshold <= c.base_failure_threshold
            && c.base_failure_threshold <= c.max_failure_threshold)
        {
            return Err(CircuitBreakerConfigError::ThresholdOrder {
                min: c.min_failure_threshold,
                base: c.base_failure_threshold,
                max: c.max_failure_threshold,
            });
        }
        if !(0.0..=1.0).contains(&c.escalation.ratio_threshold) {
            return Err(CircuitBreakerConfigError::EscalationRatio(
                c.escalation.ratio_threshold,
            ));
        }
        Ok(self.config)
    }
}
