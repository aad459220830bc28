//! Latency blending and staleness decay as selection inputs.

use herd_core::RequestOutcome;
use herd_metrics::{DecayConfig, MetricsAggregator, MetricsConfig};
use std::time::Duration;

fn success(ms: u64) -> RequestOutcome {
    RequestOutcome::Success {
        latency: Duration::from_millis(ms),
        tokens_prompt: None,
        tokens_generated: None,
    }
}

#[test]
fn blend_tracks_the_most_recent_sample() {
    let agg = MetricsAggregator::new(MetricsConfig::default());
    for _ in 0..50 {
        agg.record_at("s1", "m", &success(100), 0);
    }
    let steady = agg.effective_latency("s1", "m");

    // One slow response drags the blend up immediately through the recent
    // component.
    agg.record_at("s1", "m", &success(2_000), 1);
    let spiked = agg.effective_latency("s1", "m");
    assert!(spiked > steady + 1_000.0, "steady {steady}, spiked {spiked}");
}

#[test]
fn custom_blend_weights_change_the_mix() {
    let config = MetricsConfig::builder()
        .latency_blend(1.0, 0.0)
        .build()
        .unwrap();
    let agg = MetricsAggregator::new(config);
    for _ in 0..20 {
        agg.record_at("s1", "m", &success(500), 0);
    }
    agg.record_at("s1", "m", &success(100), 1);
    // Pure-recent blend ignores the historical P95 entirely.
    assert!((agg.effective_latency("s1", "m") - 100.0).abs() < 1e-9);
}

#[test]
fn throughput_decays_when_a_pair_goes_quiet() {
    let mut config = MetricsConfig::default();
    config.decay = DecayConfig {
        enabled: true,
        half_life: Duration::from_secs(60),
        min_decay_factor: 0.05,
        stale_threshold: Duration::from_secs(30),
    };
    let agg = MetricsAggregator::new(config);
    // A burst of traffic, then silence.
    for i in 0..30u64 {
        agg.record_at("s1", "m", &success(50), i * 1_000);
    }
    // Roll the minute window so throughput smooths in the burst.
    agg.record_at("s1", "m", &success(50), 61_000);

    let fresh = agg.snapshot_at("s1", "m", 62_000).unwrap();
    let stale = agg.snapshot_at("s1", "m", 62_000 + 600_000).unwrap();
    assert!(stale.throughput < fresh.throughput);
    assert!(stale.success_rate < fresh.success_rate);
    // Floored, never zero.
    assert!(stale.success_rate >= 0.05 - 1e-9);
}
