//! The request pipeline: admit → filter → select → execute → retry →
//! fail over → record.

use crate::history::RequestRecord;
use crate::orchestrator::Orchestrator;
use bytes::Bytes;
use herd_balancer::{Algorithm, Candidate};
use herd_core::{
    now_millis, Attempt, Endpoint, ErrorKind, HerdError, RequestContext, RequestOutcome,
};
use herd_metrics::InFlightGuard;
use herd_proxy::{BackendEndpoint, ProxyError, StreamChunkMeta, StreamHandle, StreamOutcome};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;

/// Re-queue ceiling: a request dequeued into a still-saturated fleet goes
/// back to the queue at most this many times.
const MAX_QUEUE_PASSES: u32 = 5;
/// Floor for the adaptive per-call deadline.
const MIN_ADAPTIVE_TIMEOUT: Duration = Duration::from_secs(5);
/// Headroom multiplier over the blended latency estimate.
const ADAPTIVE_TIMEOUT_FACTOR: f64 = 6.0;

impl Orchestrator {
    /// Dispatches one unary request. The payload passes to the selected
    /// backend verbatim; transient failures retry in place and terminal
    /// ones fail over, invisibly to the caller.
    pub async fn dispatch(
        &self,
        mut ctx: RequestContext,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, HerdError> {
        let mut excluded: HashSet<String> = HashSet::new();
        let mut attempted: Vec<Attempt> = Vec::new();
        let mut attempts: u32 = 0;
        let mut queue_passes: u32 = 0;

        loop {
            let candidates = self.candidates_for(&ctx, &excluded, false);
            if candidates.is_empty() {
                match self
                    .admission(&mut ctx, &excluded, &attempted, &mut queue_passes)
                    .await?
                {
                    Admission::Requeued => continue,
                    Admission::Reject(err) => return Err(err),
                }
            }

            let Some(selection) =
                self.balancer
                    .select(&ctx.model, ctx.streaming, ctx.client_id.as_deref(), &candidates)
            else {
                return Err(HerdError::NoCandidate {
                    model: ctx.model.clone(),
                });
            };
            let server_id = selection.server_id;

            if self.config.enable_circuit_breaker
                && !self.breakers.can_execute(&server_id, &ctx.model)
            {
                excluded.insert(server_id);
                continue;
            }

            let guard = self.metrics.begin(&server_id, &ctx.model);
            self.queue.task_started();
            let started = TokioInstant::now();
            let result = self.execute_with_retries(&server_id, &ctx, &payload).await;
            let latency = started.elapsed();
            self.queue.task_finished();
            drop(guard);
            self.pump_queue();
            attempts += 1;

            match result {
                Ok(value) => {
                    let meta: StreamChunkMeta =
                        serde_json::from_value(value.clone()).unwrap_or_default();
                    let outcome = RequestOutcome::Success {
                        latency,
                        tokens_prompt: meta.prompt_eval_count,
                        tokens_generated: meta.eval_count,
                    };
                    self.record_outcome(&server_id, &ctx, &outcome, attempts);
                    return Ok(value);
                }
                Err(e) => {
                    let outcome = RequestOutcome::Failure {
                        latency,
                        kind: e.kind.clone(),
                        message: e.message.clone(),
                    };
                    self.record_outcome(&server_id, &ctx, &outcome, attempts);
                    attempted.push(Attempt {
                        server_id: server_id.clone(),
                        kind: e.kind.clone(),
                    });

                    if !e.kind.failover_eligible() {
                        return Err(HerdError::Backend {
                            kind: e.kind,
                            server_id,
                            model: ctx.model.clone(),
                            message: e.message,
                        });
                    }

                    #[cfg(feature = "tracing")]
                    tracing::info!(
                        request = %ctx.id,
                        server = %server_id,
                        error = %e.message,
                        "failing over to next candidate"
                    );

                    excluded.insert(server_id);
                }
            }
        }
    }

    /// Dispatches one streaming request. Returns a handle forwarding the
    /// raw chunk stream; the bookkeeping (TTFT, duration, token counts,
    /// breaker and metric recording) settles when the caller finishes or
    /// drops it.
    pub async fn dispatch_streaming(
        self: &Arc<Self>,
        mut ctx: RequestContext,
        payload: serde_json::Value,
    ) -> Result<DispatchedStream, HerdError> {
        if !self.config.enable_streaming || !self.config.proxy.streaming.enabled {
            return Err(HerdError::InternalState(
                "streaming is disabled by configuration".to_string(),
            ));
        }
        ctx.streaming = true;

        let mut excluded: HashSet<String> = HashSet::new();
        let mut attempted: Vec<Attempt> = Vec::new();
        let mut attempts: u32 = 0;
        let mut queue_passes: u32 = 0;

        loop {
            let candidates = self.candidates_for(&ctx, &excluded, false);
            if candidates.is_empty() {
                match self
                    .admission(&mut ctx, &excluded, &attempted, &mut queue_passes)
                    .await?
                {
                    Admission::Requeued => continue,
                    Admission::Reject(err) => return Err(err),
                }
            }

            let Some(selection) =
                self.balancer
                    .select(&ctx.model, true, ctx.client_id.as_deref(), &candidates)
            else {
                return Err(HerdError::NoCandidate {
                    model: ctx.model.clone(),
                });
            };
            let server_id = selection.server_id;

            let endpoint = match self.endpoint_for(&server_id) {
                Some(endpoint) => endpoint,
                None => {
                    excluded.insert(server_id);
                    continue;
                }
            };

            if self.config.enable_circuit_breaker
                && !self.breakers.can_execute(&server_id, &ctx.model)
            {
                excluded.insert(server_id);
                continue;
            }

            let guard = self.metrics.begin(&server_id, &ctx.model);
            self.queue.task_started();
            let started = TokioInstant::now();
            attempts += 1;
            let cancel = CancellationToken::new();
            match self
                .proxy
                .execute_streaming(&endpoint, ctx.endpoint, &payload, cancel)
                .await
            {
                Ok(handle) => {
                    return Ok(DispatchedStream {
                        inner: Some(handle),
                        recorder: Some(StreamRecorder {
                            orchestrator: Arc::clone(self),
                            ctx,
                            server_id,
                            started,
                            attempts,
                            _guard: guard,
                        }),
                    });
                }
                // Connect-phase failure: settle this attempt and fail over
                // like a unary call.
                Err(e) => {
                    let latency = started.elapsed();
                    self.queue.task_finished();
                    drop(guard);
                    self.pump_queue();

                    let outcome = RequestOutcome::Failure {
                        latency,
                        kind: e.kind.clone(),
                        message: e.message.clone(),
                    };
                    self.record_outcome(&server_id, &ctx, &outcome, attempts);
                    attempted.push(Attempt {
                        server_id: server_id.clone(),
                        kind: e.kind.clone(),
                    });
                    if !e.kind.failover_eligible() {
                        return Err(HerdError::Backend {
                            kind: e.kind,
                            server_id,
                            model: ctx.model.clone(),
                            message: e.message,
                        });
                    }
                    excluded.insert(server_id);
                }
            }
        }
    }

    /// Queue gating for an empty eligible set: when capacity (not
    /// placement) is the blocker, wait in the queue; otherwise reject with
    /// `NoCandidate` or the failover trail.
    async fn admission(
        &self,
        ctx: &mut RequestContext,
        excluded: &HashSet<String>,
        attempted: &[Attempt],
        queue_passes: &mut u32,
    ) -> Result<Admission, HerdError> {
        if !attempted.is_empty() {
            let last = &attempted[attempted.len() - 1];
            return Ok(Admission::Reject(HerdError::Exhausted {
                model: ctx.model.clone(),
                last_kind: last.kind.clone(),
                last_message: format!("all candidates failed; last server {}", last.server_id),
                attempted: attempted.to_vec(),
            }));
        }

        let saturated_only = !self
            .candidates_for(ctx, excluded, true)
            .is_empty();
        if saturated_only && self.config.enable_queue && *queue_passes < MAX_QUEUE_PASSES {
            *queue_passes += 1;
            let ticket = self.queue.enqueue(ctx.clone())?;
            self.metrics.note_queued(&ctx.model, 1);
            let waited = ticket.wait().await;
            self.metrics.note_queued(&ctx.model, -1);
            *ctx = waited?;
            return Ok(Admission::Requeued);
        }

        Ok(Admission::Reject(HerdError::NoCandidate {
            model: ctx.model.clone(),
        }))
    }

    /// The prefiltered candidate set for one request.
    pub(crate) fn candidates_for(
        &self,
        ctx: &RequestContext,
        excluded: &HashSet<String>,
        ignore_capacity: bool,
    ) -> Vec<Candidate> {
        let now_ms = now_millis();
        let (skip_unhealthy, check_capacity) = match self.balancer.algorithm() {
            Algorithm::RoundRobin => {
                let rr = &self.balancer.config().round_robin;
                (rr.skip_unhealthy, rr.check_capacity)
            }
            Algorithm::LeastConnections => {
                let lc = &self.balancer.config().least_connections;
                (lc.skip_unhealthy, lc.consider_capacity)
            }
            _ => (true, true),
        };

        self.registry
            .list()
            .into_iter()
            .filter_map(|server| {
                if excluded.contains(&server.id) {
                    return None;
                }
                if skip_unhealthy && !server.healthy {
                    return None;
                }
                if ctx.endpoint != Endpoint::ListModels && !server.has_model(&ctx.model) {
                    return None;
                }
                if server.in_maintenance() {
                    return None;
                }
                let circuit_state = if self.config.enable_circuit_breaker {
                    self.breakers.state(&server.id, &ctx.model)
                } else {
                    herd_circuitbreaker::CircuitState::Closed
                };
                if circuit_state == herd_circuitbreaker::CircuitState::Open {
                    return None;
                }
                if self.registry.is_banned(&server.id, &ctx.model, now_ms) {
                    return None;
                }
                if self.in_cooldown(&server.id, &ctx.model) {
                    return None;
                }

                let max_concurrency = self.registry.max_concurrency_for(&server);
                let in_flight = self.metrics.in_flight(&server.id, &ctx.model);
                if check_capacity && !ignore_capacity && in_flight >= max_concurrency {
                    return None;
                }

                let success_rate = self.metrics.success_rate(&server.id, &ctx.model);
                let latency_ms = self.latency_estimate(&server, &ctx.model);
                let consecutive_failures = self
                    .breakers
                    .snapshot(&server.id, &ctx.model)
                    .map(|snap| snap.consecutive_failures)
                    .unwrap_or(0);
                let loaded = server.loaded(&ctx.model);
                let streaming_stats = self.metrics.streaming_stats(&server.id, &ctx.model);

                Some(Candidate {
                    server_id: server.id.clone(),
                    max_concurrency,
                    in_flight,
                    queued: self.metrics.queued(&ctx.model),
                    latency_ms,
                    success_rate,
                    recent_error_rate: self.metrics.window_error_rate(
                        &server.id,
                        &ctx.model,
                        herd_metrics::WindowResolution::Minute,
                    ),
                    overall_error_rate: (1.0 - success_rate).clamp(0.0, 1.0),
                    consecutive_failures,
                    circuit_state,
                    adaptive_timeout_ms: self
                        .adaptive_timeout(&server, &ctx.model)
                        .as_millis() as u64,
                    model_loaded: loaded.is_some(),
                    loaded_expires_in_ms: loaded
                        .and_then(|l| l.expires_at)
                        .map(|at| at as i64 - now_ms as i64),
                    ttft_avg_ms: streaming_stats.map(|s| s.ttft_avg_ms),
                    ttft_p95_ms: streaming_stats.map(|s| s.ttft_p95_ms),
                    streaming_duration_avg_ms: streaming_stats
                        .and_then(|s| s.streaming_duration_avg_ms),
                })
            })
            .collect()
    }

    /// Blended latency estimate, falling back to the probe's response time
    /// before any request samples exist.
    fn latency_estimate(&self, server: &herd_registry::Server, model: &str) -> f64 {
        let blended = self.metrics.effective_latency(&server.id, model);
        let default = self.metrics.config().default_latency_ms as f64;
        if (blended - default).abs() < f64::EPSILON && server.last_response_time > 0 {
            server.last_response_time as f64
        } else {
            blended
        }
    }

    /// Per-call deadline: headroom over the blended latency estimate,
    /// clamped between the floor and the configured request timeout.
    pub(crate) fn adaptive_timeout(
        &self,
        server: &herd_registry::Server,
        model: &str,
    ) -> Duration {
        let estimate_ms = self.latency_estimate(server, model) * ADAPTIVE_TIMEOUT_FACTOR;
        Duration::from_millis(estimate_ms as u64)
            .clamp(MIN_ADAPTIVE_TIMEOUT, self.config.proxy.request_timeout)
    }

    fn endpoint_for(&self, server_id: &str) -> Option<BackendEndpoint> {
        let server = self.registry.get(server_id)?;
        let mut endpoint = BackendEndpoint::new(server_id, server.url);
        endpoint.api_key = server.api_key;
        Some(endpoint)
    }

    /// One server's worth of attempts: the initial call plus same-server
    /// retries on transient failures with a retryable status.
    async fn execute_with_retries(
        &self,
        server_id: &str,
        ctx: &RequestContext,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ProxyError> {
        let endpoint = self.endpoint_for(server_id).ok_or_else(|| {
            ProxyError::new(ErrorKind::InternalState, "server vanished mid-dispatch")
        })?;
        let server = self.registry.get(server_id);
        let timeout = server
            .as_ref()
            .map(|s| self.adaptive_timeout(s, &ctx.model))
            .unwrap_or(MIN_ADAPTIVE_TIMEOUT);

        let mut attempt: u32 = 0;
        loop {
            match self
                .proxy
                .execute_unary(&endpoint, ctx.endpoint, payload, timeout)
                .await
            {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.config.retry.max_retries_per_server
                        || !self.retryable_in_place(&e)
                    {
                        return Err(e);
                    }
                    let delay = self
                        .config
                        .retry
                        .retry_delay
                        .mul_f64(self.config.retry.backoff_multiplier.powi(attempt as i32))
                        .min(self.config.retry.max_retry_delay);

                    #[cfg(feature = "tracing")]
                    tracing::debug!(
                        request = %ctx.id,
                        server = %server_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "retrying on the same server"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Transient kinds retry in place; HTTP failures additionally need a
    /// status from the configured retryable set.
    fn retryable_in_place(&self, error: &ProxyError) -> bool {
        if !error.kind.retryable_in_place() {
            return false;
        }
        match error.status {
            Some(status) => self
                .config
                .retry
                .retryable_status_codes
                .contains(&status),
            None => true,
        }
    }

    /// Records one settled attempt everywhere it is observed: breaker,
    /// aggregator, request history.
    pub(crate) fn record_outcome(
        &self,
        server_id: &str,
        ctx: &RequestContext,
        outcome: &RequestOutcome,
        attempts: u32,
    ) {
        // Orchestrator-originated kinds (cancellation, queue rejections)
        // say nothing about the backend: no breaker count, no cooldown.
        let backend_fault = outcome.error_kind().map(|kind| {
            matches!(
                kind.class(),
                herd_core::ErrorClass::Transient | herd_core::ErrorClass::NonRetryable
            )
        });
        if self.config.enable_circuit_breaker {
            match (outcome, backend_fault) {
                (RequestOutcome::Failure { kind, message, .. }, Some(true)) => {
                    self.breakers
                        .record_failure(server_id, &ctx.model, kind, message);
                }
                // The acquired slot still has to be paid back.
                (RequestOutcome::Failure { .. }, _) => {
                    self.breakers.release(server_id, &ctx.model);
                }
                _ => self.breakers.record_success(server_id, &ctx.model),
            }
        }
        if backend_fault == Some(true) {
            self.set_cooldown(server_id, &ctx.model);
        }
        self.metrics.record(server_id, &ctx.model, outcome);

        let (ttft_ms, streaming_duration_ms) = match outcome {
            RequestOutcome::StreamingSuccess {
                ttft,
                streaming_duration,
                ..
            } => (
                Some(ttft.as_millis() as u64),
                Some(streaming_duration.as_millis() as u64),
            ),
            _ => (None, None),
        };
        let (error_kind, error_message) = match outcome {
            RequestOutcome::Failure { kind, message, .. } => {
                (Some(kind.clone()), Some(message.clone()))
            }
            _ => (None, None),
        };
        self.history.record(RequestRecord {
            id: ctx.id.clone(),
            timestamp: now_millis(),
            model: ctx.model.clone(),
            endpoint: ctx.endpoint.label().to_string(),
            server_id: server_id.to_string(),
            streaming: ctx.streaming,
            duration_ms: outcome.latency().as_millis() as u64,
            success: outcome.is_success(),
            error_kind,
            error_message,
            tokens_prompt: outcome.tokens_prompt(),
            tokens_generated: outcome.tokens_generated(),
            ttft_ms,
            streaming_duration_ms,
            queue_wait_ms: ctx.queue_wait.map(|d| d.as_millis() as u64),
            attempts,
        });
    }
}

enum Admission {
    Requeued,
    Reject(HerdError),
}

/// Summary handed back after a finished stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamStats {
    pub ttft_ms: Option<u64>,
    pub streaming_duration_ms: Option<u64>,
    pub tokens_prompt: Option<u64>,
    pub tokens_generated: Option<u64>,
    pub chunks: u64,
}

struct StreamRecorder {
    orchestrator: Arc<Orchestrator>,
    ctx: RequestContext,
    server_id: String,
    started: TokioInstant,
    attempts: u32,
    _guard: InFlightGuard,
}

impl StreamRecorder {
    fn settle(self, outcome: &StreamOutcome) -> Result<StreamStats, HerdError> {
        let latency = self.started.elapsed();
        self.orchestrator.queue.task_finished();
        self.orchestrator.pump_queue();

        match &outcome.error {
            None => {
                let recorded = RequestOutcome::StreamingSuccess {
                    latency,
                    ttft: outcome.ttft.unwrap_or_default(),
                    streaming_duration: outcome.streaming_duration.unwrap_or_default(),
                    tokens_prompt: outcome.tokens_prompt,
                    tokens_generated: outcome.tokens_generated,
                };
                self.orchestrator
                    .record_outcome(&self.server_id, &self.ctx, &recorded, self.attempts);
                Ok(StreamStats {
                    ttft_ms: outcome.ttft.map(|d| d.as_millis() as u64),
                    streaming_duration_ms: outcome
                        .streaming_duration
                        .map(|d| d.as_millis() as u64),
                    tokens_prompt: outcome.tokens_prompt,
                    tokens_generated: outcome.tokens_generated,
                    chunks: outcome.chunks,
                })
            }
            Some(error) => {
                let recorded = RequestOutcome::Failure {
                    latency,
                    kind: error.kind.clone(),
                    message: error.message.clone(),
                };
                self.orchestrator
                    .record_outcome(&self.server_id, &self.ctx, &recorded, self.attempts);
                Err(HerdError::Backend {
                    kind: error.kind.clone(),
                    server_id: self.server_id.clone(),
                    model: self.ctx.model.clone(),
                    message: error.message.clone(),
                })
            }
        }
    }
}

/// A live dispatched stream. Read chunks until `None`, then [`finish`] to
/// settle the bookkeeping; dropping the handle mid-stream records a
/// cancellation instead.
///
/// [`finish`]: DispatchedStream::finish
pub struct DispatchedStream {
    inner: Option<StreamHandle>,
    recorder: Option<StreamRecorder>,
}

impl DispatchedStream {
    /// The next raw chunk from the backend (one NDJSON line).
    pub async fn next_chunk(&mut self) -> Option<Bytes> {
        match self.inner.as_mut() {
            Some(handle) => handle.next_chunk().await,
            None => None,
        }
    }

    /// Waits for the producer's accounting and records the outcome.
    pub async fn finish(mut self) -> Result<StreamStats, HerdError> {
        let handle = self.inner.take().ok_or_else(|| {
            HerdError::InternalState("stream already finished".to_string())
        })?;
        let outcome = handle.finish().await;
        let recorder = self.recorder.take().ok_or_else(|| {
            HerdError::InternalState("stream recorder already consumed".to_string())
        })?;
        recorder.settle(&outcome)
    }
}

impl Drop for DispatchedStream {
    fn drop(&mut self) {
        if let Some(recorder) = self.recorder.take() {
            // Abandoned mid-stream: the producer is cancelled via the
            // handle's drop guard; record the cancellation here.
            let outcome = StreamOutcome {
                error: Some(ProxyError::new(
                    ErrorKind::Cancelled,
                    "stream dropped by caller",
                )),
                ..StreamOutcome::default()
            };
            let _ = recorder.settle(&outcome);
        }
    }
}
