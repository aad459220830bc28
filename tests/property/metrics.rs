//! Property tests for the metrics aggregator.
//!
//! Invariants tested:
//! - success rate stays within [0, 1]
//! - window count >= errors, latency sum within min/max bounds
//! - percentile triple is ordered

use herd_core::{ErrorKind, RequestOutcome};
use herd_metrics::{percentile, MetricsAggregator, MetricsConfig, Percentiles};
use proptest::prelude::*;
use std::time::Duration;

fn outcome(latency_ms: u64, success: bool) -> RequestOutcome {
    if success {
        RequestOutcome::Success {
            latency: Duration::from_millis(latency_ms),
            tokens_prompt: None,
            tokens_generated: None,
        }
    } else {
        RequestOutcome::Failure {
            latency: Duration::from_millis(latency_ms),
            kind: ErrorKind::Timeout,
            message: "t".into(),
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn aggregate_invariants_hold_for_any_event_sequence(
        events in prop::collection::vec((0u64..5_000, any::<bool>()), 1..200),
        gap_ms in 0u64..120_000,
    ) {
        let agg = MetricsAggregator::new(MetricsConfig::default());
        let mut now = 1_000u64;
        for (latency, success) in &events {
            agg.record_at("s", "m", &outcome(*latency, *success), now);
            now += gap_ms / events.len().max(1) as u64;
        }
        let snap = agg.snapshot_at("s", "m", now).unwrap();

        prop_assert!((0.0..=1.0).contains(&snap.success_rate));
        for (label, window) in &snap.windows {
            prop_assert!(window.count >= window.errors, "{label}");
            if window.count > 0 {
                prop_assert!(window.latency_sum >= window.count * window.min_latency, "{label}");
                prop_assert!(window.latency_sum <= window.count * window.max_latency, "{label}");
            }
        }
        prop_assert!(snap.percentiles.p50 <= snap.percentiles.p95);
        prop_assert!(snap.percentiles.p95 <= snap.percentiles.p99);
    }

    #[test]
    fn percentile_triple_is_ordered_for_any_sample(
        samples in prop::collection::vec(0u64..1_000_000, 0..300),
    ) {
        let p = Percentiles::from_samples(&samples);
        prop_assert!(p.p50 <= p.p95);
        prop_assert!(p.p95 <= p.p99);
        if samples.is_empty() {
            prop_assert_eq!(p, Percentiles::default());
        } else {
            prop_assert!(samples.contains(&p.p50));
            prop_assert!(samples.contains(&p.p99));
        }
    }

    #[test]
    fn percentile_matches_the_ceil_contract(
        mut samples in prop::collection::vec(0u64..10_000, 1..100),
        p in 0.01f64..1.0,
    ) {
        let result = percentile(&samples, p);
        samples.sort_unstable();
        let n = samples.len();
        let idx = ((n as f64 * p).ceil() as usize).saturating_sub(1).min(n - 1);
        prop_assert_eq!(result, samples[idx]);
    }
}
