//! Trip conditions and adaptive threshold clamping.

use herd_circuitbreaker::{BreakerMap, CircuitBreakerConfig, CircuitState};
use herd_core::ErrorKind;
use std::time::Duration;

fn map_with(base: u32, min: u32, max: u32, adaptive: bool) -> BreakerMap {
    BreakerMap::new(
        CircuitBreakerConfig::builder()
            .base_failure_threshold(base)
            .threshold_range(min, max)
            .open_timeout(Duration::from_secs(3_600))
            .adaptive_thresholds(adaptive)
            .build()
            .unwrap(),
    )
}

#[test]
fn consecutive_failures_trip_exactly_at_threshold() {
    let map = map_with(4, 4, 4, false);
    for i in 0..3 {
        map.record_failure("s", "m", &ErrorKind::Timeout, "t");
        assert_eq!(map.state("s", "m"), CircuitState::Closed, "tripped at {i}");
    }
    map.record_failure("s", "m", &ErrorKind::Timeout, "t");
    assert_eq!(map.state("s", "m"), CircuitState::Open);
}

#[test]
fn minority_failures_hold_the_circuit_closed() {
    let map = map_with(3, 3, 3, false);
    // One failure in three keeps both the consecutive count and the
    // smoothed error rate below their trip points.
    for _ in 0..20 {
        map.record_failure("s", "m", &ErrorKind::Timeout, "t");
        map.record_success("s", "m");
        map.record_success("s", "m");
    }
    assert_eq!(map.state("s", "m"), CircuitState::Closed);
}

#[test]
fn adaptive_threshold_never_leaves_the_range() {
    let map = map_with(5, 3, 7, true);
    // A long run of purely transient noise pushes the threshold up, but
    // only to the ceiling.
    for _ in 0..30 {
        map.record_failure("s", "m", &ErrorKind::HttpGateway(503), "gw");
        map.record_success("s", "m");
    }
    let snapshot = map.snapshot("s", "m").unwrap();
    assert!(snapshot.failure_threshold <= 7);
    assert!(snapshot.failure_threshold >= 3);
    assert_eq!(snapshot.failure_threshold, 7);
}

#[test]
fn unauthorized_trips_immediately() {
    let map = map_with(10, 5, 15, false);
    map.record_failure("s", "m", &ErrorKind::Unauthorized, "credential rejected");
    assert_eq!(map.state("s", "m"), CircuitState::Open);
}

#[test]
fn force_close_reopens_traffic() {
    let map = map_with(1, 1, 2, false);
    map.record_failure("s", "m", &ErrorKind::Timeout, "t");
    assert_eq!(map.state("s", "m"), CircuitState::Open);
    assert!(!map.can_execute("s", "m"));
    map.force_close("s", "m");
    assert_eq!(map.state("s", "m"), CircuitState::Closed);
    assert!(map.can_execute("s", "m"));
}
