//! The balancer proper: algorithm dispatch, sticky sessions, decisions.

use crate::candidate::Candidate;
use crate::config::BalancerConfig;
use crate::decision::{CandidateScore, DecisionEvent, DecisionHistory, ScoreBreakdown};
use crate::score;
use herd_core::now_millis;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::Instant;

/// The available selection algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    Weighted,
    FastestResponse,
    StreamingOptimized,
    RoundRobin,
    LeastConnections,
    Random,
}

impl Algorithm {
    pub fn label(&self) -> &'static str {
        match self {
            Algorithm::Weighted => "weighted",
            Algorithm::FastestResponse => "fastest-response",
            Algorithm::StreamingOptimized => "streaming-optimized",
            Algorithm::RoundRobin => "round-robin",
            Algorithm::LeastConnections => "least-connections",
            Algorithm::Random => "random",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "weighted" => Some(Algorithm::Weighted),
            "fastest-response" => Some(Algorithm::FastestResponse),
            "streaming-optimized" => Some(Algorithm::StreamingOptimized),
            "round-robin" => Some(Algorithm::RoundRobin),
            "least-connections" => Some(Algorithm::LeastConnections),
            "random" => Some(Algorithm::Random),
            _ => None,
        }
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::FastestResponse
    }
}

struct StickyPin {
    server_id: String,
    pinned_at: Instant,
}

/// One selection result. The decision event has already been recorded in
/// the history by the time this is returned.
#[derive(Debug, Clone)]
pub struct Selection {
    pub server_id: String,
    pub decision: DecisionEvent,
}

/// The load balancer. See the crate docs for algorithm semantics.
pub struct LoadBalancer {
    config: BalancerConfig,
    algorithm: Mutex<Algorithm>,
    rr_counter: AtomicUsize,
    sticky: Mutex<HashMap<String, StickyPin>>,
    history: DecisionHistory,
}

impl LoadBalancer {
    pub fn new(config: BalancerConfig, algorithm: Algorithm) -> Self {
        let history = DecisionHistory::new(config.decision_retention, config.decision_max_events);
        Self {
            config,
            algorithm: Mutex::new(algorithm),
            rr_counter: AtomicUsize::new(0),
            sticky: Mutex::new(HashMap::new()),
            history,
        }
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    pub fn algorithm(&self) -> Algorithm {
        *self.algorithm.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Switches the active algorithm at runtime.
    pub fn set_algorithm(&self, algorithm: Algorithm) {
        *self.algorithm.lock().unwrap_or_else(|e| e.into_inner()) = algorithm;

        #[cfg(feature = "tracing")]
        tracing::info!(algorithm = algorithm.label(), "selection algorithm changed");
    }

    pub fn history(&self) -> &DecisionHistory {
        &self.history
    }

    /// Picks one server from a prefiltered candidate set. Returns `None`
    /// only when the set is empty.
    pub fn select(
        &self,
        model: &str,
        streaming: bool,
        client_id: Option<&str>,
        candidates: &[Candidate],
    ) -> Option<Selection> {
        if candidates.is_empty() {
            return None;
        }
        let algorithm = self.algorithm();
        let (index, scored, reason) = match algorithm {
            Algorithm::Weighted => self.select_weighted(candidates),
            Algorithm::FastestResponse => self.select_fastest(candidates),
            Algorithm::StreamingOptimized => {
                if streaming {
                    self.select_streaming(candidates)
                } else {
                    self.select_fastest(candidates)
                }
            }
            Algorithm::RoundRobin => self.select_round_robin(candidates, client_id),
            Algorithm::LeastConnections => self.select_least_connections(candidates),
            Algorithm::Random => self.select_random(candidates),
        };

        let selected = &candidates[index];
        let decision = DecisionEvent {
            timestamp: now_millis(),
            model: model.to_string(),
            selected_server_id: selected.server_id.clone(),
            algorithm: algorithm.label().to_string(),
            candidates: scored,
            selection_reason: reason,
        };
        self.history.record(decision.clone());

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "herd_selections_total",
            "algorithm" => algorithm.label(),
            "server" => selected.server_id.clone()
        )
        .increment(1);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            model,
            server = %selected.server_id,
            algorithm = algorithm.label(),
            "server selected"
        );

        Some(Selection {
            server_id: selected.server_id.clone(),
            decision,
        })
    }

    fn select_weighted(&self, candidates: &[Candidate]) -> (usize, Vec<CandidateScore>, String) {
        let scored: Vec<CandidateScore> = candidates
            .iter()
            .map(|c| {
                let breakdown = score::weighted_breakdown(c, &self.config);
                CandidateScore {
                    server_id: c.server_id.clone(),
                    total_score: breakdown.total,
                    breakdown,
                    snapshot: c.clone(),
                }
            })
            .collect();
        // Strictly-greater keeps the first of equals: stable by insertion
        // order.
        let mut best = 0;
        for (i, s) in scored.iter().enumerate().skip(1) {
            if s.total_score > scored[best].total_score {
                best = i;
            }
        }
        let reason = format!("highest weighted score {:.1}", scored[best].total_score);
        (best, scored, reason)
    }

    fn cost_scored(candidates: &[Candidate], costs: &[f64]) -> (usize, Vec<CandidateScore>) {
        let scored: Vec<CandidateScore> = candidates
            .iter()
            .zip(costs)
            .map(|(c, cost)| CandidateScore {
                server_id: c.server_id.clone(),
                total_score: *cost,
                breakdown: ScoreBreakdown {
                    total: *cost,
                    ..ScoreBreakdown::default()
                },
                snapshot: c.clone(),
            })
            .collect();
        let mut best = 0;
        for (i, cost) in costs.iter().enumerate().skip(1) {
            if *cost < costs[best] {
                best = i;
            }
        }
        (best, scored)
    }

    fn select_fastest(&self, candidates: &[Candidate]) -> (usize, Vec<CandidateScore>, String) {
        let costs: Vec<f64> = candidates
            .iter()
            .map(|c| score::fastest_response_cost(c, &self.config))
            .collect();
        let (best, scored) = Self::cost_scored(candidates, &costs);
        let reason = format!("lowest effective latency {:.0}ms", costs[best]);
        (best, scored, reason)
    }

    fn select_streaming(&self, candidates: &[Candidate]) -> (usize, Vec<CandidateScore>, String) {
        let costs: Vec<f64> = candidates
            .iter()
            .map(|c| score::streaming_cost(c, &self.config))
            .collect();
        let (best, scored) = Self::cost_scored(candidates, &costs);
        let reason = format!("lowest ttft/duration cost {:.0}", costs[best]);
        (best, scored, reason)
    }

    fn select_round_robin(
        &self,
        candidates: &[Candidate],
        client_id: Option<&str>,
    ) -> (usize, Vec<CandidateScore>, String) {
        let scored: Vec<CandidateScore> = candidates
            .iter()
            .map(|c| CandidateScore {
                server_id: c.server_id.clone(),
                total_score: 0.0,
                breakdown: ScoreBreakdown::default(),
                snapshot: c.clone(),
            })
            .collect();

        let ttl = self.config.round_robin.sticky_sessions_ttl;
        if let Some(client) = client_id {
            if !ttl.is_zero() {
                let now = Instant::now();
                let mut sticky = self.sticky.lock().unwrap_or_else(|e| e.into_inner());

                // A live pin to a still-eligible server wins. The TTL runs
                // from the original pin, not the last hit.
                if let Some(pin) = sticky.get(client) {
                    if now.duration_since(pin.pinned_at) < ttl {
                        if let Some(i) =
                            candidates.iter().position(|c| c.server_id == pin.server_id)
                        {
                            return (i, scored, format!("sticky session for {client}"));
                        }
                    }
                }

                // Expired or retargeted: rotate and re-pin.
                let index = self.rr_counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
                sticky.insert(
                    client.to_string(),
                    StickyPin {
                        server_id: candidates[index].server_id.clone(),
                        pinned_at: now,
                    },
                );
                return (index, scored, "round-robin rotation (pinned)".to_string());
            }
        }

        let index = self.rr_counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        (index, scored, "round-robin rotation".to_string())
    }

    fn select_least_connections(
        &self,
        candidates: &[Candidate],
    ) -> (usize, Vec<CandidateScore>, String) {
        let lc = &self.config.least_connections;
        let costs: Vec<f64> = candidates
            .iter()
            .map(|c| {
                let mut cost = c.total_load() as f64 / c.max_concurrency.max(1) as f64;
                if lc.consider_failure_rate && c.success_rate < 1.0 {
                    let failure_rate = 1.0 - c.success_rate.clamp(0.0, 1.0);
                    cost *= 1.0 + failure_rate * lc.failure_rate_penalty;
                }
                cost
            })
            .collect();
        let (best, scored) = Self::cost_scored(candidates, &costs);
        let reason = format!("lowest load share {:.2}", costs[best]);
        (best, scored, reason)
    }

    fn select_random(&self, candidates: &[Candidate]) -> (usize, Vec<CandidateScore>, String) {
        use rand::Rng;
        let scored: Vec<CandidateScore> = candidates
            .iter()
            .map(|c| CandidateScore {
                server_id: c.server_id.clone(),
                total_score: 0.0,
                breakdown: ScoreBreakdown::default(),
                snapshot: c.clone(),
            })
            .collect();
        let index = rand::rng().random_range(0..candidates.len());
        (index, scored, "random choice".to_string())
    }

    /// Drops sticky pins targeting a removed server.
    pub fn forget_server(&self, server_id: &str) {
        self.sticky
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, pin| pin.server_id != server_id);
    }
}
