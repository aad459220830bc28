//! Tumbling counter windows.

use crate::percentile::Percentiles;
use herd_core::EpochMillis;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The five window resolutions kept per (server, model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowResolution {
    Minute,
    FiveMinutes,
    FifteenMinutes,
    Hour,
    Day,
}

impl WindowResolution {
    pub const ALL: [WindowResolution; 5] = [
        WindowResolution::Minute,
        WindowResolution::FiveMinutes,
        WindowResolution::FifteenMinutes,
        WindowResolution::Hour,
        WindowResolution::Day,
    ];

    pub fn size(&self) -> Duration {
        match self {
            WindowResolution::Minute => Duration::from_secs(60),
            WindowResolution::FiveMinutes => Duration::from_secs(5 * 60),
            WindowResolution::FifteenMinutes => Duration::from_secs(15 * 60),
            WindowResolution::Hour => Duration::from_secs(60 * 60),
            WindowResolution::Day => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Stable key used in snapshots and persisted layouts.
    pub fn label(&self) -> &'static str {
        match self {
            WindowResolution::Minute => "1m",
            WindowResolution::FiveMinutes => "5m",
            WindowResolution::FifteenMinutes => "15m",
            WindowResolution::Hour => "1h",
            WindowResolution::Day => "24h",
        }
    }
}

/// One tumbling counter window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsWindow {
    pub start_time: EpochMillis,
    pub end_time: EpochMillis,
    pub count: u64,
    pub errors: u64,
    pub latency_sum: u64,
    pub latency_squared_sum: u128,
    /// `u64::MAX` while empty; reported as 0 in snapshots.
    pub min_latency: u64,
    pub max_latency: u64,
    pub tokens_generated: u64,
    pub tokens_prompt: u64,
}

impl MetricsWindow {
    pub fn new(start: EpochMillis, size: Duration) -> Self {
        Self {
            start_time: start,
            end_time: start + size.as_millis() as u64,
            count: 0,
            errors: 0,
            latency_sum: 0,
            latency_squared_sum: 0,
            min_latency: u64::MAX,
            max_latency: 0,
            tokens_generated: 0,
            tokens_prompt: 0,
        }
    }

    /// Rolls the window forward when `now` has passed its end.
    ///
    /// The successor starts where the predecessor ended; when several whole
    /// periods elapsed idle, the start jumps directly to the period
    /// containing `now`, preserving phase.
    pub fn advance_if_due(&mut self, now: EpochMillis, size: Duration) -> Option<MetricsWindow> {
        let size_ms = size.as_millis() as u64;
        if size_ms == 0 || now < self.start_time || now - self.start_time < size_ms {
            return None;
        }
        let closed = self.clone();
        let periods = (now - self.start_time) / size_ms;
        let start = self.start_time + periods * size_ms;
        *self = MetricsWindow::new(start, size);
        Some(closed)
    }

    pub fn record(&mut self, latency_ms: u64, success: bool, tokens_prompt: u64, tokens_generated: u64) {
        self.count += 1;
        if !success {
            self.errors += 1;
        }
        self.latency_sum += latency_ms;
        self.latency_squared_sum += (latency_ms as u128) * (latency_ms as u128);
        self.min_latency = self.min_latency.min(latency_ms);
        self.max_latency = self.max_latency.max(latency_ms);
        self.tokens_prompt += tokens_prompt;
        self.tokens_generated += tokens_generated;
    }

    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.errors as f64 / self.count as f64
        }
    }

    pub fn mean_latency(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.latency_sum as f64 / self.count as f64
        }
    }
}

/// Streaming counters layered over the base window at the same resolution.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingWindow {
    pub count: u64,
    pub ttft_sum: u64,
    pub streaming_duration_sum: u64,
}

impl StreamingWindow {
    pub fn record(&mut self, ttft_ms: u64, streaming_duration_ms: u64) {
        self.count += 1;
        self.ttft_sum += ttft_ms;
        self.streaming_duration_sum += streaming_duration_ms;
    }

    pub fn mean_ttft(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.ttft_sum as f64 / self.count as f64
        }
    }

    pub fn mean_streaming_duration(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.streaming_duration_sum as f64 / self.count as f64
        }
    }
}

/// Read-side copy of one window, with the empty-min cleaned up and the
/// streaming analog attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSnapshot {
    pub start_time: EpochMillis,
    pub end_time: EpochMillis,
    pub count: u64,
    pub errors: u64,
    pub latency_sum: u64,
    pub min_latency: u64,
    pub max_latency: u64,
    pub tokens_generated: u64,
    pub tokens_prompt: u64,
    pub streaming_count: u64,
    pub ttft_sum: u64,
    pub streaming_duration_sum: u64,
    pub ttft_percentiles: Percentiles,
}

impl WindowSnapshot {
    pub fn from_parts(
        window: &MetricsWindow,
        streaming: &StreamingWindow,
        ttft_percentiles: Percentiles,
    ) -> Self {
        Self {
            start_time: window.start_time,
            end_time: window.end_time,
            count: window.count,
            errors: window.errors,
            latency_sum: window.latency_sum,
            min_latency: if window.min_latency == u64::MAX {
                0
            } else {
                window.min_latency
            },
            max_latency: window.max_latency,
            tokens_generated: window.tokens_generated,
            tokens_prompt: window.tokens_prompt,
            streaming_count: streaming.count,
            ttft_sum: streaming.ttft_sum,
            streaming_duration_sum: streaming.streaming_duration_sum,
            ttft_percentiles,
        }
    }
}
