//! Model-to-server escalation.

use herd_circuitbreaker::{BreakerMap, CircuitBreakerConfig, EscalationConfig, ModelEscalation};
use herd_core::ErrorKind;
use std::time::{Duration, Instant};

fn escalation(ratio: f64, hold: Duration) -> ModelEscalation {
    ModelEscalation::new(EscalationConfig {
        enabled: true,
        ratio_threshold: ratio,
        duration_threshold: hold,
        check_interval: Duration::from_secs(1),
    })
}

#[test]
fn one_bad_model_never_marks_the_server() {
    let map = BreakerMap::new(
        CircuitBreakerConfig::builder()
            .base_failure_threshold(1)
            .threshold_range(1, 2)
            .adaptive_thresholds(false)
            .open_timeout(Duration::from_secs(3_600))
            .build()
            .unwrap(),
    );
    // Four models, one melts down.
    for model in ["a", "b", "c"] {
        map.record_success("s1", model);
    }
    map.record_failure("s1", "d", &ErrorKind::OutOfMemory, "no ram");

    let esc = escalation(0.5, Duration::from_secs(0));
    let (open, total) = map.open_ratio_by_server()["s1"];
    assert_eq!((open, total), (1, 4));
    assert!(!esc.evaluate("s1", open, total, Instant::now()));
}

#[test]
fn majority_open_escalates_after_the_hold() {
    let map = BreakerMap::new(
        CircuitBreakerConfig::builder()
            .base_failure_threshold(1)
            .threshold_range(1, 2)
            .adaptive_thresholds(false)
            .open_timeout(Duration::from_secs(3_600))
            .build()
            .unwrap(),
    );
    for model in ["a", "b", "c"] {
        map.record_failure("s1", model, &ErrorKind::Timeout, "t");
    }
    map.record_success("s1", "d");

    let esc = escalation(0.5, Duration::from_millis(100));
    let now = Instant::now();
    let (open, total) = map.open_ratio_by_server()["s1"];
    assert_eq!((open, total), (3, 4));
    assert!(!esc.evaluate("s1", open, total, now));
    assert!(esc.evaluate("s1", open, total, now + Duration::from_millis(150)));
}
