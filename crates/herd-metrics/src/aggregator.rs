//! The single-writer metrics aggregator.

use crate::config::MetricsConfig;
use crate::percentile::Percentiles;
use crate::ring::SampleRing;
use crate::window::{MetricsWindow, StreamingWindow, WindowResolution, WindowSnapshot};
use herd_core::{now_millis, EpochMillis, RequestOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Telemetry for one (server, model) pair.
struct KeyState {
    windows: [MetricsWindow; 5],
    streaming: [StreamingWindow; 5],
    latencies: SampleRing,
    ttfts: SampleRing,
    in_flight: u32,
    successes: u64,
    failures: u64,
    tokens_prompt_total: u64,
    tokens_generated_total: u64,
    token_samples: u64,
    /// Smoothed requests per minute.
    throughput: f64,
    last_update: EpochMillis,
    last_latency: u64,
}

impl KeyState {
    fn new(config: &MetricsConfig, now: EpochMillis) -> Self {
        Self {
            windows: WindowResolution::ALL.map(|r| MetricsWindow::new(now, r.size())),
            streaming: WindowResolution::ALL.map(|_| StreamingWindow::default()),
            latencies: SampleRing::new(config.ring_capacity),
            ttfts: SampleRing::new(config.ttft_ring_capacity),
            in_flight: 0,
            successes: 0,
            failures: 0,
            tokens_prompt_total: 0,
            tokens_generated_total: 0,
            token_samples: 0,
            throughput: 0.0,
            last_update: now,
            last_latency: 0,
        }
    }

    /// Rolls every due window forward; the closing 1m window feeds the
    /// throughput EWMA, with skipped idle periods decaying it further.
    fn roll(&mut self, now: EpochMillis, smoothing: f64) {
        for (i, resolution) in WindowResolution::ALL.iter().enumerate() {
            let size = resolution.size();
            let size_ms = size.as_millis() as u64;
            let start = self.windows[i].start_time;
            if now < start || now - start < size_ms {
                continue;
            }
            let periods = (now - start) / size_ms;
            if let Some(closed) = self.windows[i].advance_if_due(now, size) {
                self.streaming[i] = StreamingWindow::default();
                if *resolution == WindowResolution::Minute {
                    let fresh = smoothing * closed.count as f64 + (1.0 - smoothing) * self.throughput;
                    let idle = (periods.saturating_sub(1)).min(1_000) as i32;
                    self.throughput = fresh * (1.0 - smoothing).powi(idle);
                }
            }
        }
    }

    fn raw_success_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            1.0
        } else {
            (self.successes as f64 / total as f64).clamp(0.0, 1.0)
        }
    }
}

/// Read-side copy for one (server, model) pair. Doubles as the persisted
/// per-key layout inside `metrics.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerModelSnapshot {
    pub server_id: String,
    pub model: String,
    pub windows: HashMap<String, WindowSnapshot>,
    pub in_flight: u32,
    pub queued: u32,
    pub percentiles: Percentiles,
    pub ttft_percentiles: Percentiles,
    pub success_rate: f64,
    pub throughput: f64,
    pub avg_tokens_per_request: f64,
    pub successes: u64,
    pub failures: u64,
    pub last_response_time: u64,
    pub last_update: EpochMillis,
}

/// Streaming telemetry summary for latency-sensitive selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamingStats {
    pub ttft_avg_ms: f64,
    pub ttft_p95_ms: f64,
    pub streaming_duration_avg_ms: Option<f64>,
}

/// The persisted layout of `metrics.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsPersistedState {
    pub timestamp: EpochMillis,
    pub servers: HashMap<String, ServerModelSnapshot>,
}

struct Inner {
    keys: HashMap<(String, String), KeyState>,
    queued_by_model: HashMap<String, u32>,
}

/// Ingests one event per completed attempt; answers balancer read queries.
pub struct MetricsAggregator {
    config: MetricsConfig,
    inner: Mutex<Inner>,
}

impl MetricsAggregator {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                keys: HashMap::new(),
                queued_by_model: HashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records one attempt outcome at the current wall-clock time.
    pub fn record(&self, server_id: &str, model: &str, outcome: &RequestOutcome) {
        self.record_at(server_id, model, outcome, now_millis());
    }

    /// Records one attempt outcome at an explicit timestamp (tests drive
    /// window advancement through this).
    pub fn record_at(
        &self,
        server_id: &str,
        model: &str,
        outcome: &RequestOutcome,
        now: EpochMillis,
    ) {
        if !self.config.enabled {
            return;
        }
        let latency_ms = outcome.latency().as_millis() as u64;
        let success = outcome.is_success();
        let tokens_prompt = outcome.tokens_prompt().unwrap_or(0);
        let tokens_generated = outcome.tokens_generated().unwrap_or(0);

        {
            let mut inner = self.lock();
            let state = inner
                .keys
                .entry((server_id.to_string(), model.to_string()))
                .or_insert_with(|| KeyState::new(&self.config, now));

            state.roll(now, self.config.throughput_smoothing);
            for window in &mut state.windows {
                window.record(latency_ms, success, tokens_prompt, tokens_generated);
            }
            if success {
                state.successes += 1;
            } else {
                state.failures += 1;
            }
            state.latencies.push(latency_ms);
            state.last_latency = latency_ms;
            state.last_update = now;
            if outcome.tokens_generated().is_some() {
                state.tokens_prompt_total += tokens_prompt;
                state.tokens_generated_total += tokens_generated;
                state.token_samples += 1;
            }
            if let RequestOutcome::StreamingSuccess {
                ttft,
                streaming_duration,
                ..
            } = outcome
            {
                let ttft_ms = ttft.as_millis() as u64;
                state.ttfts.push(ttft_ms);
                for streaming in &mut state.streaming {
                    streaming.record(ttft_ms, streaming_duration.as_millis() as u64);
                }
            }
        }

        #[cfg(feature = "metrics")]
        {
            metrics::counter!(
                "herd_requests_total",
                "server" => server_id.to_string(),
                "model" => model.to_string(),
                "outcome" => if success { "success" } else { "failure" }
            )
            .increment(1);
            metrics::histogram!(
                "herd_request_latency_ms",
                "server" => server_id.to_string(),
                "model" => model.to_string()
            )
            .record(latency_ms as f64);
        }
    }

    /// Marks one request in flight; the returned guard decrements on every
    /// exit path.
    pub fn begin(self: &Arc<Self>, server_id: &str, model: &str) -> InFlightGuard {
        {
            let mut inner = self.lock();
            let now = now_millis();
            let state = inner
                .keys
                .entry((server_id.to_string(), model.to_string()))
                .or_insert_with(|| KeyState::new(&self.config, now));
            state.in_flight += 1;

            #[cfg(feature = "metrics")]
            metrics::gauge!(
                "herd_in_flight",
                "server" => server_id.to_string(),
                "model" => model.to_string()
            )
            .set(state.in_flight as f64);
        }
        InFlightGuard {
            aggregator: Arc::clone(self),
            server_id: server_id.to_string(),
            model: model.to_string(),
        }
    }

    fn release(&self, server_id: &str, model: &str) {
        let mut inner = self.lock();
        if let Some(state) = inner
            .keys
            .get_mut(&(server_id.to_string(), model.to_string()))
        {
            state.in_flight = state.in_flight.saturating_sub(1);

            #[cfg(feature = "metrics")]
            metrics::gauge!(
                "herd_in_flight",
                "server" => server_id.to_string(),
                "model" => model.to_string()
            )
            .set(state.in_flight as f64);
        }
    }

    pub fn in_flight(&self, server_id: &str, model: &str) -> u32 {
        self.lock()
            .keys
            .get(&(server_id.to_string(), model.to_string()))
            .map(|s| s.in_flight)
            .unwrap_or(0)
    }

    /// Adjusts the queued-depth gauge for a model.
    pub fn note_queued(&self, model: &str, delta: i64) {
        let mut inner = self.lock();
        let entry = inner.queued_by_model.entry(model.to_string()).or_insert(0);
        *entry = (*entry as i64 + delta).max(0) as u32;

        #[cfg(feature = "metrics")]
        metrics::gauge!("herd_queued", "model" => model.to_string()).set(*entry as f64);
    }

    pub fn queued(&self, model: &str) -> u32 {
        self.lock()
            .queued_by_model
            .get(model)
            .copied()
            .unwrap_or(0)
    }

    /// Latency blend used by latency-sensitive algorithms:
    /// `recent·wR + historicalP95·wH`, falling back to the configured
    /// default when the key has no samples.
    pub fn effective_latency(&self, server_id: &str, model: &str) -> f64 {
        let inner = self.lock();
        let Some(state) = inner.keys.get(&(server_id.to_string(), model.to_string())) else {
            return self.config.default_latency_ms as f64;
        };
        if state.latencies.is_empty() {
            return self.config.default_latency_ms as f64;
        }
        let historical = Percentiles::from_samples(state.latencies.samples()).p95 as f64;
        let recent = if state.last_latency > 0 {
            state.last_latency as f64
        } else {
            historical
        };
        recent * self.config.latency_blend_recent
            + historical * self.config.latency_blend_historical
    }

    /// Success rate with staleness decay applied.
    pub fn success_rate(&self, server_id: &str, model: &str) -> f64 {
        self.success_rate_at(server_id, model, now_millis())
    }

    pub fn success_rate_at(&self, server_id: &str, model: &str, now: EpochMillis) -> f64 {
        let inner = self.lock();
        let Some(state) = inner.keys.get(&(server_id.to_string(), model.to_string())) else {
            return 1.0;
        };
        let elapsed = Duration::from_millis(now.saturating_sub(state.last_update));
        state.raw_success_rate() * self.config.decay.factor(elapsed)
    }

    /// Error rate inside the given window resolution, 0.0 when idle.
    pub fn window_error_rate(
        &self,
        server_id: &str,
        model: &str,
        resolution: WindowResolution,
    ) -> f64 {
        let inner = self.lock();
        inner
            .keys
            .get(&(server_id.to_string(), model.to_string()))
            .map(|state| {
                let idx = WindowResolution::ALL
                    .iter()
                    .position(|r| *r == resolution)
                    .unwrap_or(0);
                state.windows[idx].error_rate()
            })
            .unwrap_or(0.0)
    }

    /// Streaming telemetry for one key, when any streaming samples exist.
    pub fn streaming_stats(&self, server_id: &str, model: &str) -> Option<StreamingStats> {
        let inner = self.lock();
        let state = inner.keys.get(&(server_id.to_string(), model.to_string()))?;
        if state.ttfts.is_empty() {
            return None;
        }
        let samples = state.ttfts.samples();
        let ttft_avg_ms = samples.iter().sum::<u64>() as f64 / samples.len() as f64;
        let ttft_p95_ms = Percentiles::from_samples(samples).p95 as f64;
        // The day window covers the whole tracked horizon of stream
        // durations.
        let day = &state.streaming[4];
        let streaming_duration_avg_ms = if day.count > 0 {
            Some(day.mean_streaming_duration())
        } else {
            None
        };
        Some(StreamingStats {
            ttft_avg_ms,
            ttft_p95_ms,
            streaming_duration_avg_ms,
        })
    }

    /// Point-in-time copy of one key.
    pub fn snapshot(&self, server_id: &str, model: &str) -> Option<ServerModelSnapshot> {
        self.snapshot_at(server_id, model, now_millis())
    }

    pub fn snapshot_at(
        &self,
        server_id: &str,
        model: &str,
        now: EpochMillis,
    ) -> Option<ServerModelSnapshot> {
        let mut inner = self.lock();
        let queued = inner
            .queued_by_model
            .get(model)
            .copied()
            .unwrap_or(0);
        let smoothing = self.config.throughput_smoothing;
        let decay = self.config.decay.clone();
        let state = inner
            .keys
            .get_mut(&(server_id.to_string(), model.to_string()))?;
        state.roll(now, smoothing);

        let ttft_percentiles = Percentiles::from_samples(state.ttfts.samples());
        let windows = WindowResolution::ALL
            .iter()
            .enumerate()
            .map(|(i, r)| {
                (
                    r.label().to_string(),
                    WindowSnapshot::from_parts(&state.windows[i], &state.streaming[i], ttft_percentiles),
                )
            })
            .collect();

        let elapsed = Duration::from_millis(now.saturating_sub(state.last_update));
        let factor = decay.factor(elapsed);

        Some(ServerModelSnapshot {
            server_id: server_id.to_string(),
            model: model.to_string(),
            windows,
            in_flight: state.in_flight,
            queued,
            percentiles: Percentiles::from_samples(state.latencies.samples()),
            ttft_percentiles,
            success_rate: state.raw_success_rate() * factor,
            throughput: state.throughput * factor,
            avg_tokens_per_request: if state.token_samples == 0 {
                0.0
            } else {
                state.tokens_generated_total as f64 / state.token_samples as f64
            },
            successes: state.successes,
            failures: state.failures,
            last_response_time: state.last_latency,
            last_update: state.last_update,
        })
    }

    /// Snapshots every key, keyed `"<serverId>:<model>"`.
    pub fn snapshot_all(&self) -> HashMap<String, ServerModelSnapshot> {
        let keys: Vec<(String, String)> = {
            let inner = self.lock();
            inner.keys.keys().cloned().collect()
        };
        let now = now_millis();
        keys.into_iter()
            .filter_map(|(server, model)| {
                self.snapshot_at(&server, &model, now)
                    .map(|snap| (format!("{server}:{model}"), snap))
            })
            .collect()
    }

    /// The persisted `metrics.json` layout.
    pub fn export(&self) -> MetricsPersistedState {
        MetricsPersistedState {
            timestamp: now_millis(),
            servers: self.snapshot_all(),
        }
    }

    /// Drops every key belonging to a removed server.
    pub fn prune_server(&self, server_id: &str) {
        self.lock().keys.retain(|(sid, _), _| sid != server_id);
    }

    /// All (server, model) keys currently tracked.
    pub fn keys(&self) -> Vec<(String, String)> {
        self.lock().keys.keys().cloned().collect()
    }
}

/// Scope guard pairing every in-flight increment with exactly one decrement.
pub struct InFlightGuard {
    aggregator: Arc<MetricsAggregator>,
    server_id: String,
    model: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.aggregator.release(&self.server_id, &self.model);
    }
}
