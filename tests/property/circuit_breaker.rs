//! Property tests for the breaker state machine.
//!
//! Invariants tested:
//! - enough consecutive failures always open the circuit
//! - an open circuit rejects until its timeout
//! - the adaptive threshold never leaves its clamp range

use herd_circuitbreaker::{BreakerMap, CircuitBreakerConfig, CircuitState};
use herd_core::ErrorKind;
use proptest::prelude::*;
use std::time::{Duration, Instant};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn consecutive_failures_always_open(
        threshold in 1u32..10,
        extra in 0u32..5,
    ) {
        let map = BreakerMap::new(
            CircuitBreakerConfig::builder()
                .base_failure_threshold(threshold)
                .threshold_range(threshold, threshold)
                .open_timeout(Duration::from_secs(3_600))
                .adaptive_thresholds(false)
                .build()
                .unwrap(),
        );
        let now = Instant::now();
        for _ in 0..(threshold + extra) {
            map.record_failure_at("s", "m", &ErrorKind::Timeout, "t", now);
        }
        prop_assert_eq!(map.state("s", "m"), CircuitState::Open);
        prop_assert!(!map.can_execute_at("s", "m", now + Duration::from_secs(1)));
    }

    #[test]
    fn adaptive_threshold_stays_clamped(
        min in 1u32..5,
        spread in 0u32..5,
        kinds in prop::collection::vec(any::<bool>(), 1..100),
    ) {
        let max = min + spread;
        let base = min + spread / 2;
        let map = BreakerMap::new(
            CircuitBreakerConfig::builder()
                .base_failure_threshold(base)
                .threshold_range(min, max)
                .open_timeout(Duration::from_secs(3_600))
                .adaptive_thresholds(true)
                .build()
                .unwrap(),
        );
        let now = Instant::now();
        for transient in &kinds {
            let kind = if *transient {
                ErrorKind::Timeout
            } else {
                ErrorKind::OutOfMemory
            };
            map.record_failure_at("s", "m", &kind, "x", now);
        }
        let snapshot = map.snapshot("s", "m").unwrap();
        prop_assert!(snapshot.failure_threshold >= min);
        prop_assert!(snapshot.failure_threshold <= max);
    }

    #[test]
    fn half_open_grants_never_exceed_the_budget(
        budget in 1u32..6,
    ) {
        let map = BreakerMap::new(
            CircuitBreakerConfig::builder()
                .base_failure_threshold(1)
                .threshold_range(1, 2)
                .open_timeout(Duration::from_secs(1))
                .half_open_max_requests(budget)
                .recovery_success_threshold(budget + 1)
                .adaptive_thresholds(false)
                .build()
                .unwrap(),
        );
        let now = Instant::now();
        map.record_failure_at("s", "m", &ErrorKind::Timeout, "t", now);
        let later = now + Duration::from_secs(2);

        let mut granted = 0u32;
        for _ in 0..(budget * 3) {
            if map.can_execute_at("s", "m", later) {
                granted += 1;
            }
        }
        prop_assert_eq!(granted, budget);
        prop_assert_eq!(
            map.snapshot("s", "m").unwrap().half_open_in_flight,
            budget
        );
    }
}
