//! Half-open admission accounting.

use herd_circuitbreaker::{BreakerMap, CircuitBreakerConfig, CircuitState};
use herd_core::ErrorKind;
use std::time::{Duration, Instant};

fn tripped_map(half_open_max: u32, recovery_threshold: u32) -> (BreakerMap, Instant) {
    let map = BreakerMap::new(
        CircuitBreakerConfig::builder()
            .base_failure_threshold(1)
            .threshold_range(1, 2)
            .open_timeout(Duration::from_secs(1))
            .half_open_max_requests(half_open_max)
            .recovery_success_threshold(recovery_threshold)
            .adaptive_thresholds(false)
            .build()
            .unwrap(),
    );
    let t0 = Instant::now();
    map.record_failure_at("s", "m", &ErrorKind::Timeout, "t", t0);
    (map, t0)
}

#[test]
fn every_granted_slot_is_paid_back_exactly_once() {
    let (map, t0) = tripped_map(2, 5);
    let after = t0 + Duration::from_secs(2);

    // Two grants fill the budget.
    assert!(map.can_execute_at("s", "m", after));
    assert!(map.can_execute_at("s", "m", after));
    assert!(!map.can_execute_at("s", "m", after));
    assert_eq!(map.snapshot("s", "m").unwrap().half_open_in_flight, 2);

    // Paying one back frees exactly one slot.
    map.record_success_at("s", "m", after);
    assert_eq!(map.snapshot("s", "m").unwrap().half_open_in_flight, 1);
    assert!(map.can_execute_at("s", "m", after));
    assert!(!map.can_execute_at("s", "m", after));
}

#[test]
fn release_pays_back_without_counting() {
    let (map, t0) = tripped_map(1, 2);
    let after = t0 + Duration::from_secs(2);
    assert!(map.can_execute_at("s", "m", after));

    // A cancelled call releases its slot; no success, no failure, no
    // transition.
    map.release("s", "m");
    let snapshot = map.snapshot("s", "m").unwrap();
    assert_eq!(snapshot.state, CircuitState::HalfOpen);
    assert_eq!(snapshot.half_open_in_flight, 0);
    assert_eq!(snapshot.consecutive_successes, 0);
    assert!(map.can_execute_at("s", "m", after));
}

#[test]
fn reads_perform_the_lazy_half_open_transition() {
    let (map, t0) = tripped_map(2, 2);
    // Immediately after the trip, reads leave it open.
    assert_eq!(map.state("s", "m"), CircuitState::Open);
    assert!(map.half_open_models().is_empty());

    // `record_failure_at` used a synthetic clock, so wall-clock reads can
    // only transition once real time passes the timeout. Drive the check
    // through the explicit-time entry point instead.
    let after = t0 + Duration::from_secs(2);
    assert!(map.can_execute_at("s", "m", after));
    assert_eq!(map.half_open_models(), vec![("s".to_string(), "m".to_string())]);
}
