//! Window advancement across resolutions.

use herd_core::{ErrorKind, RequestOutcome};
use herd_metrics::{MetricsAggregator, MetricsConfig};
use std::time::Duration;

fn success(ms: u64) -> RequestOutcome {
    RequestOutcome::Success {
        latency: Duration::from_millis(ms),
        tokens_prompt: None,
        tokens_generated: None,
    }
}

fn failure() -> RequestOutcome {
    RequestOutcome::Failure {
        latency: Duration::from_millis(20),
        kind: ErrorKind::HttpGateway(503),
        message: "bad gateway".into(),
    }
}

#[test]
fn each_resolution_tumbles_at_its_own_boundary() {
    let agg = MetricsAggregator::new(MetricsConfig::default());
    // One event per minute for six minutes.
    for minute in 0..6u64 {
        agg.record_at("s1", "m", &success(100), minute * 60_000 + 1);
    }
    let snap = agg.snapshot_at("s1", "m", 6 * 60_000).unwrap();
    // The 1m window only ever holds the newest event.
    assert_eq!(snap.windows["1m"].count, 0);
    // The 5m window rolled once and holds the sixth event.
    assert_eq!(snap.windows["5m"].count, 1);
    assert_eq!(snap.windows["15m"].count, 6);
    assert_eq!(snap.windows["1h"].count, 6);
    assert_eq!(snap.windows["24h"].count, 6);
}

#[test]
fn window_boundary_is_inclusive_at_size() {
    let agg = MetricsAggregator::new(MetricsConfig::default());
    agg.record_at("s1", "m", &success(10), 0);
    // One ms before the boundary the window still holds the event.
    let snap = agg.snapshot_at("s1", "m", 59_999).unwrap();
    assert_eq!(snap.windows["1m"].count, 1);
    // At exactly the window size it has advanced.
    let snap = agg.snapshot_at("s1", "m", 60_000).unwrap();
    assert_eq!(snap.windows["1m"].count, 0);
    assert_eq!(snap.windows["1m"].start_time, 60_000);
}

#[test]
fn errors_and_counts_stay_consistent_across_mixed_traffic() {
    let agg = MetricsAggregator::new(MetricsConfig::default());
    for i in 0..50u64 {
        let outcome = if i % 5 == 0 { failure() } else { success(80 + i) };
        agg.record_at("s1", "m", &outcome, 1_000 + i * 10);
    }
    let snap = agg.snapshot_at("s1", "m", 2_000).unwrap();
    for (label, window) in &snap.windows {
        assert!(
            window.count >= window.errors,
            "window {label}: count {} < errors {}",
            window.count,
            window.errors
        );
    }
    assert_eq!(snap.windows["1m"].count, 50);
    assert_eq!(snap.windows["1m"].errors, 10);
    assert!((snap.success_rate - 0.8).abs() < 1e-9);
}
