//! The two-loop scheduler.

use crate::backend::{HealthBackend, ProbeReport, ProbeTarget};
use crate::config::HealthCheckConfig;
use crate::events::HealthEvent;
use crate::recovery::{next_test_delay, RecoveryFailureRecord, RecoveryTestSnapshot};
use herd_core::{now_millis, ErrorKind, EventListeners};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;

const MAX_FAILURE_RECORDS: usize = 500;
/// Grace added to the backend's own probe deadline before the scheduler
/// gives up on a hung probe future.
const PROBE_GUARD_GRACE: Duration = Duration::from_secs(1);

#[derive(Default)]
struct ServerCheckState {
    consecutive_failures: u32,
    consecutive_successes: u32,
}

struct TestState {
    last_test: Option<TokioInstant>,
    last_test_wall: Option<u64>,
    test_count: u32,
    consecutive_failures: u32,
    failure_reason: Option<String>,
    error_kind: Option<ErrorKind>,
    non_retryable: bool,
}

impl TestState {
    fn new() -> Self {
        Self {
            last_test: None,
            last_test_wall: None,
            test_count: 0,
            consecutive_failures: 0,
            failure_reason: None,
            error_kind: None,
            non_retryable: false,
        }
    }
}

/// Scheduler counters exposed to controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerMetrics {
    pub main_cycles: u64,
    pub recovery_cycles: u64,
    pub probes: u64,
    pub probe_failures: u64,
    pub servers_recovered: u64,
    pub servers_lost: u64,
    pub active_tests: u64,
    pub active_test_failures: u64,
}

struct State {
    per_server: HashMap<String, ServerCheckState>,
    tests: HashMap<(String, String), TestState>,
    failures: VecDeque<RecoveryFailureRecord>,
    metrics: SchedulerMetrics,
}

/// The health-check scheduler. Generic over the [`HealthBackend`] the
/// orchestrator provides.
pub struct HealthScheduler<B> {
    backend: Arc<B>,
    config: HealthCheckConfig,
    listeners: EventListeners<HealthEvent>,
    state: Mutex<State>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<B: HealthBackend> HealthScheduler<B> {
    pub fn new(backend: Arc<B>, config: HealthCheckConfig) -> Self {
        Self::with_listeners(backend, config, EventListeners::new())
    }

    pub fn with_listeners(
        backend: Arc<B>,
        config: HealthCheckConfig,
        listeners: EventListeners<HealthEvent>,
    ) -> Self {
        Self {
            backend,
            config,
            listeners,
            state: Mutex::new(State {
                per_server: HashMap::new(),
                tests: HashMap::new(),
                failures: VecDeque::new(),
                metrics: SchedulerMetrics::default(),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Spawns the main and recovery loops. No-op when disabled or already
    /// started.
    pub fn start(self: &Arc<Self>) {
        if !self.config.enabled {
            return;
        }
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            return;
        }

        let scheduler = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                scheduler.run_main_cycle().await;
            }
        }));

        let scheduler = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.config.recovery_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                scheduler.run_recovery_cycle().await;
            }
        }));
    }

    pub fn stop(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    /// One pass of the main loop: every server, bounded concurrency, then
    /// active recovery tests for half-open pairs on responsive servers.
    pub async fn run_main_cycle(&self) {
        let started = Instant::now();
        let targets = self.backend.probe_targets();
        let healthy_probed = self
            .probe_all(&targets, self.config.max_concurrent_checks, self.config.main_batch_delay, "main-probe")
            .await;
        self.run_active_tests(&healthy_probed).await;

        {
            let mut state = self.lock();
            state.metrics.main_cycles += 1;
        }
        self.listeners.emit(&HealthEvent::CycleCompleted {
            recovery: false,
            probed: targets.len(),
            duration: started.elapsed(),
            timestamp: Instant::now(),
        });

        #[cfg(feature = "metrics")]
        metrics::counter!("herd_health_cycles_total", "loop" => "main").increment(1);
    }

    /// One pass of the recovery loop: unhealthy servers only, lower
    /// concurrency, longer inter-batch delay.
    pub async fn run_recovery_cycle(&self) {
        let started = Instant::now();
        let targets: Vec<ProbeTarget> = self
            .backend
            .probe_targets()
            .into_iter()
            .filter(|t| !t.healthy)
            .collect();
        if targets.is_empty() {
            return;
        }
        self.probe_all(
            &targets,
            self.config.recovery_concurrency(),
            self.config.recovery_batch_delay,
            "recovery-probe",
        )
        .await;

        {
            let mut state = self.lock();
            state.metrics.recovery_cycles += 1;
        }
        self.listeners.emit(&HealthEvent::CycleCompleted {
            recovery: true,
            probed: targets.len(),
            duration: started.elapsed(),
            timestamp: Instant::now(),
        });

        #[cfg(feature = "metrics")]
        metrics::counter!("herd_health_cycles_total", "loop" => "recovery").increment(1);
    }

    /// Probes targets in bounded batches. Returns ids whose probe ended
    /// healthy.
    async fn probe_all(
        &self,
        targets: &[ProbeTarget],
        concurrency: usize,
        batch_delay: Duration,
        source: &str,
    ) -> Vec<String> {
        let mut healthy_probed = Vec::new();
        let mut first = true;
        for batch in targets.chunks(concurrency.max(1)) {
            if !first {
                tokio::time::sleep(batch_delay).await;
            }
            first = false;

            let reports = futures::future::join_all(
                batch.iter().map(|t| self.probe_with_retry(&t.server_id)),
            )
            .await;
            for (target, report) in batch.iter().zip(reports) {
                if report.healthy {
                    healthy_probed.push(target.server_id.clone());
                }
                self.apply_probe(target, &report, source);
            }
        }
        healthy_probed
    }

    /// One probe with in-cycle retries on retryable failures.
    async fn probe_with_retry(&self, server_id: &str) -> ProbeReport {
        let guard = self.config.timeout + PROBE_GUARD_GRACE;
        let mut attempt: u32 = 0;
        loop {
            {
                let mut state = self.lock();
                state.metrics.probes += 1;
            }
            let report = match tokio::time::timeout(guard, self.backend.probe(server_id)).await {
                Ok(report) => report,
                Err(_) => ProbeReport::failed(ErrorKind::Timeout, "probe deadline exceeded"),
            };
            if report.healthy || !report.retryable || attempt >= self.config.retry_attempts {
                return report;
            }

            if let Some((kind, _)) = &report.error {
                self.listeners.emit(&HealthEvent::ProbeFailed {
                    server_id: server_id.to_string(),
                    kind: kind.clone(),
                    attempt,
                    timestamp: Instant::now(),
                });
            }

            let delay = self
                .config
                .retry_delay
                .mul_f64(self.config.backoff_multiplier.powi(attempt as i32));
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn apply_probe(&self, target: &ProbeTarget, report: &ProbeReport, source: &str) {
        if report.healthy {
            let recovered = {
                let mut state = self.lock();
                let st = state
                    .per_server
                    .entry(target.server_id.clone())
                    .or_default();
                st.consecutive_failures = 0;
                st.consecutive_successes += 1;
                let recovered =
                    !target.healthy && st.consecutive_successes >= self.config.success_threshold;
                if recovered {
                    state.metrics.servers_recovered += 1;
                }
                recovered
            };

            self.listeners.emit(&HealthEvent::ProbeSucceeded {
                server_id: target.server_id.clone(),
                response_time_ms: report.response_time_ms.unwrap_or(0),
                timestamp: Instant::now(),
            });
            if recovered {
                #[cfg(feature = "tracing")]
                tracing::info!(server = %target.server_id, "server recovered");

                self.backend.set_server_health(&target.server_id, true);
                self.listeners.emit(&HealthEvent::ServerRecovered {
                    server_id: target.server_id.clone(),
                    timestamp: Instant::now(),
                });
            }
            return;
        }

        let (kind, message) = report
            .error
            .clone()
            .unwrap_or((ErrorKind::InternalState, "probe failed without error".into()));
        let (lost, consecutive) = {
            let mut state = self.lock();
            let st = state
                .per_server
                .entry(target.server_id.clone())
                .or_default();
            st.consecutive_successes = 0;
            st.consecutive_failures += 1;
            let consecutive = st.consecutive_failures;
            let lost = target.healthy && consecutive >= self.config.failure_threshold;
            state.metrics.probe_failures += 1;
            if lost {
                state.metrics.servers_lost += 1;
            }
            Self::push_failure(
                &mut state.failures,
                RecoveryFailureRecord {
                    timestamp: now_millis(),
                    server_id: target.server_id.clone(),
                    model: None,
                    error_kind: kind.clone(),
                    response_time_ms: report.response_time_ms,
                    consecutive_failures: consecutive,
                    source: source.to_string(),
                    circuit_breaker_state: None,
                },
            );
            (lost, consecutive)
        };

        #[cfg(feature = "tracing")]
        tracing::warn!(
            server = %target.server_id,
            error = %message,
            consecutive,
            "health probe failed"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = (message, consecutive);

        self.listeners.emit(&HealthEvent::ProbeFailed {
            server_id: target.server_id.clone(),
            kind,
            attempt: self.config.retry_attempts,
            timestamp: Instant::now(),
        });
        if lost {
            #[cfg(feature = "tracing")]
            tracing::warn!(server = %target.server_id, "server marked unhealthy");

            self.backend.set_server_health(&target.server_id, false);
            self.listeners.emit(&HealthEvent::ServerLost {
                server_id: target.server_id.clone(),
                timestamp: Instant::now(),
            });
        }
    }

    fn push_failure(failures: &mut VecDeque<RecoveryFailureRecord>, record: RecoveryFailureRecord) {
        failures.push_back(record);
        while failures.len() > MAX_FAILURE_RECORDS {
            failures.pop_front();
        }
    }

    /// Runs at most one active recovery test per responsive server, gated
    /// by the progressive schedule.
    async fn run_active_tests(&self, healthy_probed: &[String]) {
        let pairs = self.backend.half_open_pairs();
        if pairs.is_empty() {
            // Nothing half-open: drop stale pacing state.
            self.lock().tests.clear();
            return;
        }

        // Pacing state for pairs that left half-open is obsolete.
        {
            let keep: HashSet<&(String, String)> = pairs.iter().collect();
            self.lock().tests.retain(|k, _| keep.contains(k));
        }

        let now = TokioInstant::now();
        for server_id in healthy_probed {
            let due_pair = {
                let mut state = self.lock();
                pairs
                    .iter()
                    .filter(|(sid, _)| sid == server_id)
                    .find(|(sid, model)| {
                        let st = state
                            .tests
                            .entry((sid.clone(), model.clone()))
                            .or_insert_with(TestState::new);
                        match next_test_delay(st.test_count, st.non_retryable) {
                            Some(delay) => st
                                .last_test
                                .map(|at| now.duration_since(at) >= delay)
                                .unwrap_or(true),
                            None => false,
                        }
                    })
                    .cloned()
            };

            let Some((sid, model)) = due_pair else {
                continue;
            };
            let timeout = self.test_timeout_for(&sid, &model);

            {
                let mut state = self.lock();
                state.metrics.active_tests += 1;
            }
            let outcome = self.backend.run_recovery_test(&sid, &model, timeout).await;

            let mut state = self.lock();
            let st = state
                .tests
                .entry((sid.clone(), model.clone()))
                .or_insert_with(TestState::new);
            st.last_test = Some(TokioInstant::now());
            st.last_test_wall = Some(now_millis());
            match outcome {
                Ok(_response_ms) => {
                    // A pass restarts the schedule so the next probe toward
                    // the recovery threshold is not gated.
                    st.test_count = 0;
                    st.consecutive_failures = 0;
                    st.failure_reason = None;
                    st.error_kind = None;
                    st.non_retryable = false;
                    drop(state);

                    #[cfg(feature = "tracing")]
                    tracing::info!(server = %sid, model = %model, "recovery test passed");

                    self.listeners.emit(&HealthEvent::RecoveryTestPassed {
                        server_id: sid,
                        model,
                        timestamp: Instant::now(),
                    });
                }
                Err((kind, reason)) => {
                    st.test_count += 1;
                    st.consecutive_failures += 1;
                    st.failure_reason = Some(reason);
                    st.error_kind = Some(kind.clone());
                    st.non_retryable =
                        kind.class() == herd_core::ErrorClass::NonRetryable;
                    let consecutive = st.consecutive_failures;
                    state.metrics.active_test_failures += 1;
                    Self::push_failure(
                        &mut state.failures,
                        RecoveryFailureRecord {
                            timestamp: now_millis(),
                            server_id: sid.clone(),
                            model: Some(model.clone()),
                            error_kind: kind.clone(),
                            response_time_ms: None,
                            consecutive_failures: consecutive,
                            source: "active-test".to_string(),
                            circuit_breaker_state: Some("half-open".to_string()),
                        },
                    );
                    drop(state);

                    self.listeners.emit(&HealthEvent::RecoveryTestFailed {
                        server_id: sid,
                        model,
                        kind,
                        timestamp: Instant::now(),
                    });
                }
            }
        }
    }

    /// Deadline for the next test of a pair: the base timeout doubled per
    /// completed test, capped at the configured ceiling.
    fn test_timeout_for(&self, server_id: &str, model: &str) -> Duration {
        let count = self
            .lock()
            .tests
            .get(&(server_id.to_string(), model.to_string()))
            .map(|st| st.test_count)
            .unwrap_or(0);
        let factor = 2u32.saturating_pow(count.min(16));
        (self.config.test_timeout * factor).min(self.config.test_timeout_ceiling)
    }

    /// Copy of the bounded failure-record log.
    pub fn failure_records(&self) -> Vec<RecoveryFailureRecord> {
        self.lock().failures.iter().cloned().collect()
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        self.lock().metrics
    }

    /// Pacing state for every tracked half-open pair.
    pub fn test_snapshots(&self) -> Vec<RecoveryTestSnapshot> {
        self.lock()
            .tests
            .iter()
            .map(|((server_id, model), st)| RecoveryTestSnapshot {
                server_id: server_id.clone(),
                model: model.clone(),
                test_count: st.test_count,
                consecutive_failures: st.consecutive_failures,
                failure_reason: st.failure_reason.clone(),
                error_kind: st.error_kind.clone(),
                non_retryable: st.non_retryable,
                last_test_at: st.last_test_wall,
            })
            .collect()
    }
}
