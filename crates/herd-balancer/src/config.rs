//! Balancer configuration.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BalancerConfigError {
    #[error("loadBalancer.weights must be non-negative with a positive sum")]
    Weights,
    #[error("loadBalancer.thresholds.maxP95Latency must be >= 100ms (got {0:?})")]
    MaxP95Latency(Duration),
    #[error("loadBalancer.thresholds.{field} must be within [0, 1] (got {value})")]
    UnitRange { field: &'static str, value: f64 },
    #[error("loadBalancer.streaming.{field} weights must be non-negative and sum to 1")]
    StreamingBlend { field: &'static str },
    #[error("loadBalancer.streaming.durationEstimateMultiplier must be >= 1 (got {0})")]
    DurationMultiplier(f64),
    #[error("loadBalancer.leastConnections.failureRatePenalty must be >= 0 (got {0})")]
    FailureRatePenalty(f64),
}

/// Weights for the weighted algorithm's six sub-scores. The sum need not be
/// 1, only positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub latency: f64,
    pub success_rate: f64,
    pub load: f64,
    pub capacity: f64,
    pub circuit_breaker: f64,
    pub timeout: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            latency: 0.25,
            success_rate: 0.20,
            load: 0.20,
            capacity: 0.10,
            circuit_breaker: 0.20,
            timeout: 0.05,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.latency
            + self.success_rate
            + self.load
            + self.capacity
            + self.circuit_breaker
            + self.timeout
    }
}

/// Normalization anchors and penalty factors shared by the scoring
/// algorithms.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringThresholds {
    /// Latency treated as a zero score.
    pub max_p95_latency: Duration,
    /// Below this success rate, penalties kick in.
    pub min_success_rate: f64,
    /// Latency multiplier penalty factor for sub-threshold success rates.
    pub latency_penalty: f64,
    /// Score multiplier penalty factor for sub-threshold success rates.
    pub error_penalty: f64,
    /// Reserved score multiplier for degraded breaker states.
    pub circuit_breaker_penalty: f64,
}

impl Default for ScoringThresholds {
    fn default() -> Self {
        Self {
            max_p95_latency: Duration::from_secs(10),
            min_success_rate: 0.9,
            latency_penalty: 0.5,
            error_penalty: 0.3,
            circuit_breaker_penalty: 0.5,
        }
    }
}

/// Streaming-optimized algorithm tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingSelectConfig {
    pub ttft_weight: f64,
    pub duration_weight: f64,
    /// Blend of average vs P95 TTFT when both are known.
    pub ttft_blend_avg: f64,
    pub ttft_blend_p95: f64,
    pub duration_estimate_multiplier: f64,
}

impl Default for StreamingSelectConfig {
    fn default() -> Self {
        Self {
            ttft_weight: 0.6,
            duration_weight: 0.4,
            ttft_blend_avg: 0.5,
            ttft_blend_p95: 0.5,
            duration_estimate_multiplier: 1.2,
        }
    }
}

/// Round-robin algorithm tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundRobinConfig {
    /// Applied during candidate filtering by the orchestrator.
    pub skip_unhealthy: bool,
    /// Applied during candidate filtering by the orchestrator.
    pub check_capacity: bool,
    /// TTL for client-id sticky pins. Zero disables stickiness.
    pub sticky_sessions_ttl: Duration,
}

impl Default for RoundRobinConfig {
    fn default() -> Self {
        Self {
            skip_unhealthy: true,
            check_capacity: true,
            sticky_sessions_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Least-connections algorithm tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct LeastConnectionsConfig {
    pub skip_unhealthy: bool,
    pub consider_capacity: bool,
    pub consider_failure_rate: bool,
    pub failure_rate_penalty: f64,
}

impl Default for LeastConnectionsConfig {
    fn default() -> Self {
        Self {
            skip_unhealthy: true,
            consider_capacity: true,
            consider_failure_rate: true,
            failure_rate_penalty: 2.0,
        }
    }
}

/// Full balancer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BalancerConfig {
    pub weights: ScoreWeights,
    pub thresholds: ScoringThresholds,
    /// Multiplier on total load in the load sub-score denominator.
    pub load_factor_multiplier: f64,
    pub streaming: StreamingSelectConfig,
    pub round_robin: RoundRobinConfig,
    pub least_connections: LeastConnectionsConfig,
    /// Decision history retention.
    pub decision_retention: Duration,
    pub decision_max_events: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            thresholds: ScoringThresholds::default(),
            load_factor_multiplier: 2.0,
            streaming: StreamingSelectConfig::default(),
            round_robin: RoundRobinConfig::default(),
            least_connections: LeastConnectionsConfig::default(),
            decision_retention: Duration::from_secs(24 * 60 * 60),
            decision_max_events: 10_000,
        }
    }
}

impl BalancerConfig {
    pub fn builder() -> BalancerConfigBuilder {
        BalancerConfigBuilder::default()
    }
}

/// Builder with validation for [`BalancerConfig`].
#[derive(Debug, Default)]
pub struct BalancerConfigBuilder {
    config: BalancerConfig,
}

impl BalancerConfigBuilder {
    pub fn weights(mut self, weights: ScoreWeights) -> Self {
        self.config.weights = weights;
        self
    }

    pub fn thresholds(mut self, thresholds: ScoringThresholds) -> Self {
        self.config.thresholds = thresholds;
        self
    }

    pub fn streaming(mut self, streaming: StreamingSelectConfig) -> Self {
        self.config.streaming = streaming;
        self
    }

    pub fn round_robin(mut self, round_robin: RoundRobinConfig) -> Self {
        self.config.round_robin = round_robin;
        self
    }

    pub fn least_connections(mut self, least_connections: LeastConnectionsConfig) -> Self {
        self.config.least_connections = least_connections;
        self
    }

    pub fn load_factor_multiplier(mut self, multiplier: f64) -> Self {
        self.config.load_factor_multiplier = multiplier;
        self
    }

    pub fn decision_retention(mut self, retention: Duration, max_events: usize) -> Self {
        self.config.decision_retention = retention;
        self.config.decision_max_events = max_events;
        self
    }

    pub fn build(self) -> Result<BalancerConfig, BalancerConfigError> {
        let c = &self.config;
        let w = &c.weights;
        let all_weights = [
            w.latency,
            w.success_rate,
            w.load,
            w.capacity,
            w.circuit_breaker,
            w.timeout,
        ];
        if all_weights.iter().any(|v| *v < 0.0) || w.sum() <= 0.0 {
            return Err(BalancerConfigError::Weights);
        }
        if c.thresholds.max_p95_latency < Duration::from_millis(100) {
            return Err(BalancerConfigError::MaxP95Latency(
                c.thresholds.max_p95_latency,
            ));
        }
        for (field, value) in [
            ("minSuccessRate", c.thresholds.min_success_rate),
            ("latencyPenalty", c.thresholds.latency_penalty),
            ("errorPenalty", c.thresholds.error_penalty),
            ("circuitBreakerPenalty", c.thresholds.circuit_breaker_penalty),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(BalancerConfigError::UnitRange { field, value });
            }
        }
        let s = &c.streaming;
        if s.ttft_weight < 0.0
            || s.duration_weight < 0.0
            || (s.ttft_weight + s.duration_weight - 1.0).abs() > 1e-6
        {
            return Err(BalancerConfigError::StreamingBlend {
                field: "ttftWeight/durationWeight",
            });
        }
        if s.ttft_blend_avg < 0.0
            || s.ttft_blend_p95 < 0.0
            || (s.ttft_blend_avg + s.ttft_blend_p95 - 1.0).abs() > 1e-6
        {
            return Err(BalancerConfigError::StreamingBlend {
                field: "ttftBlendAvg/ttftBlendP95",
            });
        }
        if s.duration_estimate_multiplier < 1.0 {
            return Err(BalancerConfigError::DurationMultiplier(
                s.duration_estimate_multiplier,
            ));
        }
        if c.least_connections.failure_rate_penalty < 0.0 {
            return Err(BalancerConfigError::FailureRatePenalty(
                c.least_connections.failure_rate_penalty,
            ));
        }
        Ok(self.config)
    }
}
