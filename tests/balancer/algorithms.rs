//! Algorithm behavior over contrasting candidate sets.

use herd_balancer::{Algorithm, BalancerConfig, Candidate, LoadBalancer};
use herd_circuitbreaker::CircuitState;

fn balancer(algorithm: Algorithm) -> LoadBalancer {
    LoadBalancer::new(BalancerConfig::default(), algorithm)
}

#[test]
fn weighted_prefers_the_all_around_better_server() {
    let lb = balancer(Algorithm::Weighted);
    let mut weak = Candidate::new("weak");
    weak.latency_ms = 4_000.0;
    weak.success_rate = 0.7;
    weak.in_flight = 3;
    weak.consecutive_failures = 2;
    let mut strong = Candidate::new("strong");
    strong.latency_ms = 300.0;

    let selection = lb.select("m", false, None, &[weak, strong]).unwrap();
    assert_eq!(selection.server_id, "strong");

    // The decision carries the full breakdown for both candidates.
    let decision = selection.decision;
    assert_eq!(decision.candidates.len(), 2);
    let weak_score = &decision.candidates[0];
    let strong_score = &decision.candidates[1];
    assert!(strong_score.total_score > weak_score.total_score);
    assert!(weak_score.breakdown.success_rate < strong_score.breakdown.success_rate);
}

#[test]
fn weighted_half_open_candidate_is_heavily_discounted() {
    let lb = balancer(Algorithm::Weighted);
    let mut probing = Candidate::new("probing");
    probing.circuit_state = CircuitState::HalfOpen;
    let healthy = Candidate::new("healthy");
    let selection = lb.select("m", false, None, &[probing, healthy]).unwrap();
    assert_eq!(selection.server_id, "healthy");
}

#[test]
fn fastest_response_prefers_a_hot_model_despite_higher_base_latency() {
    let lb = balancer(Algorithm::FastestResponse);
    let mut cold_fast = Candidate::new("cold-fast");
    cold_fast.latency_ms = 300.0;
    let mut hot_slower = Candidate::new("hot-slower");
    hot_slower.latency_ms = 500.0;
    hot_slower.model_loaded = true;
    hot_slower.loaded_expires_in_ms = Some(10 * 60_000);

    // 500 × 0.5 = 250 beats 300.
    let selection = lb.select("m", false, None, &[cold_fast, hot_slower]).unwrap();
    assert_eq!(selection.server_id, "hot-slower");
}

#[test]
fn fastest_response_drops_the_boost_near_eviction() {
    let lb = balancer(Algorithm::FastestResponse);
    let mut cold_fast = Candidate::new("cold-fast");
    cold_fast.latency_ms = 300.0;
    let mut hot_evicting = Candidate::new("hot-evicting");
    hot_evicting.latency_ms = 500.0;
    hot_evicting.model_loaded = true;
    hot_evicting.loaded_expires_in_ms = Some(10_000);

    // 500 × 0.5 × 2 = 500 loses to 300.
    let selection = lb
        .select("m", false, None, &[cold_fast, hot_evicting])
        .unwrap();
    assert_eq!(selection.server_id, "cold-fast");
}

#[test]
fn least_connections_balances_by_load_share() {
    let lb = balancer(Algorithm::LeastConnections);
    let mut big_busy = Candidate::new("big-busy");
    big_busy.max_concurrency = 16;
    big_busy.in_flight = 8; // 50% full
    let mut small_idle = Candidate::new("small-idle");
    small_idle.max_concurrency = 2;
    small_idle.in_flight = 0;

    let selection = lb.select("m", false, None, &[big_busy, small_idle]).unwrap();
    assert_eq!(selection.server_id, "small-idle");
}

#[test]
fn round_robin_visits_every_candidate_within_n_selections() {
    let lb = balancer(Algorithm::RoundRobin);
    let candidates: Vec<Candidate> = ["a", "b", "c", "d"].into_iter().map(Candidate::new).collect();
    let mut seen = std::collections::HashSet::new();
    for _ in 0..candidates.len() {
        seen.insert(lb.select("m", false, None, &candidates).unwrap().server_id);
    }
    assert_eq!(seen.len(), candidates.len());
}

#[test]
fn streaming_optimized_only_diverges_for_streaming_requests() {
    let lb = balancer(Algorithm::StreamingOptimized);
    let mut slow_start_fast_stream = Candidate::new("fast-stream");
    slow_start_fast_stream.latency_ms = 2_000.0;
    slow_start_fast_stream.ttft_avg_ms = Some(80.0);
    slow_start_fast_stream.ttft_p95_ms = Some(120.0);
    slow_start_fast_stream.streaming_duration_avg_ms = Some(300.0);
    let mut quick_unary = Candidate::new("quick-unary");
    quick_unary.latency_ms = 400.0;

    let candidates = vec![slow_start_fast_stream, quick_unary];
    assert_eq!(
        lb.select("m", true, None, &candidates).unwrap().server_id,
        "fast-stream"
    );
    assert_eq!(
        lb.select("m", false, None, &candidates).unwrap().server_id,
        "quick-unary"
    );
}
