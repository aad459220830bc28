//! Property tests for selection.
//!
//! Invariants tested:
//! - round-robin visits every eligible candidate within N selections
//! - every algorithm picks from within the candidate set
//! - weighted sub-scores stay within [0, 100]

use herd_balancer::{Algorithm, BalancerConfig, Candidate, LoadBalancer};
use proptest::prelude::*;
use std::collections::HashSet;

fn candidate_set(n: usize) -> impl Strategy<Value = Vec<Candidate>> {
    prop::collection::vec(
        (
            0f64..20_000.0,
            0f64..=1.0,
            0u32..10,
            1u32..16,
            any::<bool>(),
        ),
        n,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .enumerate()
            .map(|(index, (latency, success_rate, in_flight, max_concurrency, loaded))| {
                let mut candidate = Candidate::new(format!("server-{index}"));
                candidate.latency_ms = latency;
                candidate.success_rate = success_rate;
                candidate.in_flight = in_flight.min(max_concurrency);
                candidate.max_concurrency = max_concurrency;
                candidate.model_loaded = loaded;
                candidate
            })
            .collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn round_robin_covers_all_candidates(n in 1usize..8) {
        let lb = LoadBalancer::new(BalancerConfig::default(), Algorithm::RoundRobin);
        let candidates: Vec<Candidate> = (0..n)
            .map(|i| Candidate::new(format!("server-{i}")))
            .collect();
        let mut seen = HashSet::new();
        for _ in 0..n {
            seen.insert(lb.select("m", false, None, &candidates).unwrap().server_id);
        }
        prop_assert_eq!(seen.len(), n);
    }

    #[test]
    fn every_algorithm_selects_within_the_set(
        candidates in candidate_set(5),
        streaming in any::<bool>(),
    ) {
        for algorithm in [
            Algorithm::Weighted,
            Algorithm::FastestResponse,
            Algorithm::StreamingOptimized,
            Algorithm::RoundRobin,
            Algorithm::LeastConnections,
            Algorithm::Random,
        ] {
            let lb = LoadBalancer::new(BalancerConfig::default(), algorithm);
            let selection = lb.select("m", streaming, None, &candidates).unwrap();
            prop_assert!(
                candidates.iter().any(|c| c.server_id == selection.server_id),
                "{:?} selected an unknown server",
                algorithm
            );
        }
    }

    #[test]
    fn weighted_breakdown_stays_in_score_range(candidates in candidate_set(4)) {
        let lb = LoadBalancer::new(BalancerConfig::default(), Algorithm::Weighted);
        let selection = lb.select("m", false, None, &candidates).unwrap();
        for scored in &selection.decision.candidates {
            for component in [
                scored.breakdown.latency,
                scored.breakdown.success_rate,
                scored.breakdown.load,
                scored.breakdown.capacity,
                scored.breakdown.circuit_breaker,
                scored.breakdown.timeout,
            ] {
                prop_assert!((0.0..=100.0).contains(&component));
            }
        }
    }
}
