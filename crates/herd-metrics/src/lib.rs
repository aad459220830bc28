//! Request telemetry, aggregated per (server, model).
//!
//! The aggregator ingests one event per completed (or failed) attempt and
//! answers the read queries the load balancer and health surface depend on:
//! tumbling counters at five resolutions, lazy percentiles over a bounded
//! ring of recent latencies, smoothed throughput, success rate with
//! staleness decay, and the recent/historical latency blend used by
//! latency-sensitive selection.
//!
//! The aggregator is the single writer; readers receive cloned
//! [`ServerModelSnapshot`]s and can never observe a half-updated key.

mod aggregator;
mod config;
mod percentile;
mod ring;
mod window;

pub use aggregator::{
    InFlightGuard, MetricsAggregator, MetricsPersistedState, ServerModelSnapshot, StreamingStats,
};
pub use config::{DecayConfig, MetricsConfig, MetricsConfigBuilder, MetricsConfigError};
pub use percentile::{percentile, Percentiles};
pub use ring::SampleRing;
pub use window::{MetricsWindow, StreamingWindow, WindowResolution, WindowSnapshot};
