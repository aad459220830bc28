//! Sub-score computation for the scoring algorithms.

use crate::candidate::Candidate;
use crate::config::{BalancerConfig, ScoringThresholds};
use crate::decision::ScoreBreakdown;
use herd_circuitbreaker::CircuitState;

/// Ceiling for the timeout sub-score normalization, per the scoring model.
const TIMEOUT_ANCHOR_MS: f64 = 300_000.0;

fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

/// Inverse-latency score against the `maxP95Latency` anchor.
pub(crate) fn latency_score(candidate: &Candidate, thresholds: &ScoringThresholds) -> f64 {
    let anchor = thresholds.max_p95_latency.as_millis() as f64;
    clamp_score((1.0 - candidate.latency_ms / anchor) * 100.0)
}

/// Linear success-rate score, penalized below the minimum.
pub(crate) fn success_rate_score(candidate: &Candidate, thresholds: &ScoringThresholds) -> f64 {
    let base = candidate.success_rate.clamp(0.0, 1.0) * 100.0;
    if candidate.success_rate < thresholds.min_success_rate {
        clamp_score(base * (1.0 - thresholds.error_penalty))
    } else {
        clamp_score(base)
    }
}

/// Inverse-load score over `totalLoad / (multiplier · maxConcurrency)`.
pub(crate) fn load_score(candidate: &Candidate, load_factor_multiplier: f64) -> f64 {
    let denominator = load_factor_multiplier * candidate.max_concurrency.max(1) as f64;
    clamp_score((1.0 - candidate.total_load() as f64 / denominator) * 100.0)
}

/// Free-slot share score.
pub(crate) fn capacity_score(candidate: &Candidate) -> f64 {
    let max = candidate.max_concurrency.max(1) as f64;
    clamp_score(candidate.available() as f64 / max * 100.0)
}

/// Breaker-state score, docked 5 points per recent consecutive failure.
pub(crate) fn circuit_breaker_score(candidate: &Candidate) -> f64 {
    let base = match candidate.circuit_state {
        CircuitState::Closed => 100.0,
        CircuitState::HalfOpen => 20.0,
        CircuitState::Open => 5.0,
    };
    clamp_score(base - 5.0 * candidate.consecutive_failures as f64)
}

/// Inverse adaptive-timeout score against a 300s anchor.
pub(crate) fn timeout_score(candidate: &Candidate) -> f64 {
    clamp_score((1.0 - candidate.adaptive_timeout_ms as f64 / TIMEOUT_ANCHOR_MS) * 100.0)
}

/// The full weighted breakdown for one candidate.
pub(crate) fn weighted_breakdown(candidate: &Candidate, config: &BalancerConfig) -> ScoreBreakdown {
    let latency = latency_score(candidate, &config.thresholds);
    let success_rate = success_rate_score(candidate, &config.thresholds);
    let load = load_score(candidate, config.load_factor_multiplier);
    let capacity = capacity_score(candidate);
    let circuit_breaker = circuit_breaker_score(candidate);
    let timeout = timeout_score(candidate);
    let w = &config.weights;
    let total = latency * w.latency
        + success_rate * w.success_rate
        + load * w.load
        + capacity * w.capacity
        + circuit_breaker * w.circuit_breaker
        + timeout * w.timeout;
    ScoreBreakdown {
        latency,
        success_rate,
        load,
        capacity,
        circuit_breaker,
        timeout,
        total,
    }
}

/// Effective cost for the fastest-response algorithm: blended latency with
/// hot-model boost, eviction, success-rate, and degradation penalties.
/// Lower is better.
pub(crate) fn fastest_response_cost(candidate: &Candidate, config: &BalancerConfig) -> f64 {
    let mut cost = candidate.latency_ms.max(1.0);

    if candidate.model_loaded {
        cost *= 0.5;
        match candidate.loaded_expires_in_ms {
            Some(remaining) if remaining < 30_000 => cost *= 2.0,
            Some(remaining) if remaining < 120_000 => cost *= 1.2,
            _ => {}
        }
    }

    if candidate.success_rate < config.thresholds.min_success_rate {
        cost *= 1.0 + config.thresholds.latency_penalty;
    }

    // Recent-window degradation: the last minute is markedly worse than the
    // overall record.
    if candidate.recent_error_rate > 0.0
        && candidate.recent_error_rate > candidate.overall_error_rate * 1.5
    {
        cost *= 1.3;
    }

    cost
}

/// Effective cost for the streaming-optimized algorithm. Lower is better.
pub(crate) fn streaming_cost(candidate: &Candidate, config: &BalancerConfig) -> f64 {
    let s = &config.streaming;
    let ttft = match (candidate.ttft_avg_ms, candidate.ttft_p95_ms) {
        (Some(avg), Some(p95)) => avg * s.ttft_blend_avg + p95 * s.ttft_blend_p95,
        (Some(avg), None) => avg,
        (None, Some(p95)) => p95,
        (None, None) => candidate.latency_ms,
    };
    let duration = candidate
        .streaming_duration_avg_ms
        .unwrap_or(candidate.latency_ms)
        * s.duration_estimate_multiplier;
    ttft * s.ttft_weight + duration * s.duration_weight
}
