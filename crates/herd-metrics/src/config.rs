//! Aggregator configuration.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricsConfigError {
    #[error("metrics.historyWindowMinutes must be >= 1 (got {0})")]
    HistoryWindow(u64),
    #[error("metrics.decay.minDecayFactor must be within [0, 1] (got {0})")]
    MinDecayFactor(f64),
    #[error("metrics.decay.halfLifeMs must be > 0")]
    HalfLife,
    #[error("metrics.latencyBlend weights must be non-negative and sum to 1 (got {recent} + {historical})")]
    Blend { recent: f64, historical: f64 },
}

/// Staleness decay applied to success rate and throughput.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayConfig {
    pub enabled: bool,
    pub half_life: Duration,
    pub min_decay_factor: f64,
    pub stale_threshold: Duration,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            half_life: Duration::from_secs(5 * 60),
            min_decay_factor: 0.1,
            stale_threshold: Duration::from_secs(2 * 60),
        }
    }
}

impl DecayConfig {
    /// Multiplier applied to a stale raw value at `elapsed` since the last
    /// update. 1.0 while fresh; floored at `min_decay_factor`.
    pub fn factor(&self, elapsed: Duration) -> f64 {
        if !self.enabled || elapsed <= self.stale_threshold {
            return 1.0;
        }
        let halves = elapsed.as_secs_f64() / self.half_life.as_secs_f64();
        0.5_f64.powf(halves).max(self.min_decay_factor)
    }
}

/// Aggregator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub history_window_minutes: u64,
    /// Capacity of the recent-latency ring per (server, model).
    pub ring_capacity: usize,
    /// Capacity of the recent-TTFT ring per (server, model).
    pub ttft_ring_capacity: usize,
    pub decay: DecayConfig,
    /// Weight of the most recent latency in the blended estimate.
    pub latency_blend_recent: f64,
    /// Weight of the historical P95 in the blended estimate.
    pub latency_blend_historical: f64,
    /// Latency assumed for keys with no samples yet, in ms.
    pub default_latency_ms: u64,
    /// EWMA smoothing factor for throughput.
    pub throughput_smoothing: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            history_window_minutes: 60,
            ring_capacity: 500,
            ttft_ring_capacity: 200,
            decay: DecayConfig::default(),
            latency_blend_recent: 0.6,
            latency_blend_historical: 0.4,
            default_latency_ms: 1_000,
            throughput_smoothing: 0.3,
        }
    }
}

impl MetricsConfig {
    pub fn builder() -> MetricsConfigBuilder {
        MetricsConfigBuilder::default()
    }
}

/// Builder with validation for [`MetricsConfig`].
#[derive(Debug, Default)]
pub struct MetricsConfigBuilder {
    config: MetricsConfig,
}

impl MetricsConfigBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn history_window_minutes(mut self, minutes: u64) -> Self {
        self.config.history_window_minutes = minutes;
        self
    }

    pub fn ring_capacity(mut self, capacity: usize) -> Self {
        self.config.ring_capacity = capacity;
        self
    }

    pub fn decay(mut self, decay: DecayConfig) -> Self {
        self.config.decay = decay;
        self
    }

    pub fn latency_blend(mut self, recent: f64, historical: f64) -> Self {
        self.config.latency_blend_recent = recent;
        self.config.latency_blend_historical = historical;
        self
    }

    pub fn default_latency_ms(mut self, ms: u64) -> Self {
        self.config.default_latency_ms = ms;
        self
    }

    pub fn build(self) -> Result<MetricsConfig, MetricsConfigError> {
        let c = &self.config;
        if c.history_window_minutes < 1 {
            return Err(MetricsConfigError::HistoryWindow(c.history_window_minutes));
        }
        if !(0.0..=1.0).contains(&c.decay.min_decay_factor) {
            return Err(MetricsConfigError::MinDecayFactor(c.decay.min_decay_factor));
        }
        if c.decay.half_life.is_zero() {
            return Err(MetricsConfigError::HalfLife);
        }
        let sum = c.latency_blend_recent + c.latency_blend_historical;
        if c.latency_blend_recent < 0.0
            || c.latency_blend_historical < 0.0
            || (sum - 1.0).abs() > 1e-6
        {
            return Err(MetricsConfigError::Blend {
                recent: c.latency_blend_recent,
                historical: c.latency_blend_historical,
            });
        }
        Ok(self.config)
    }
}
