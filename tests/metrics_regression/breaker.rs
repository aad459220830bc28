//! Circuit breaker metric names and labels.

use super::helpers::*;
use herd_circuitbreaker::{BreakerMap, CircuitBreakerConfig};
use herd_core::ErrorKind;
use serial_test::serial;
use std::time::Duration;

#[test]
#[serial]
fn breaker_transition_metrics_exist() {
    init_recorder();

    let map = BreakerMap::new(
        CircuitBreakerConfig::builder()
            .base_failure_threshold(2)
            .threshold_range(1, 4)
            .open_timeout(Duration::from_secs(60))
            .adaptive_thresholds(false)
            .build()
            .unwrap(),
    );
    map.record_failure("metrics-server", "metrics-model", &ErrorKind::Timeout, "t");
    map.record_failure("metrics-server", "metrics-model", &ErrorKind::Timeout, "t");

    assert_counter_exists("herd_circuit_transitions_total");
    assert_metric_has_label("herd_circuit_transitions_total", "server", "metrics-server");
    assert_metric_has_label("herd_circuit_transitions_total", "from", "closed");
    assert_metric_has_label("herd_circuit_transitions_total", "to", "open");

    assert_gauge_exists("herd_circuit_state");
    assert_metric_has_label("herd_circuit_state", "model", "metrics-model");
}
