//! Health-check scheduling.
//!
//! Two independent loops keep the fleet picture fresh:
//!
//! - the **main** loop probes every server on a fixed cadence;
//! - the **recovery** loop re-probes unhealthy servers on its own (usually
//!   longer) cadence with tighter concurrency, so a down fleet segment
//!   cannot monopolize the checker.
//!
//! After a successful main probe the scheduler also runs **active recovery
//! tests**: minimal model-level requests against (server, model) pairs whose
//! circuit is half-open, gated by a progressive backoff schedule so a
//! struggling model is not hammered back into the ground.
//!
//! The scheduler never touches the registry, breakers, or HTTP client
//! directly; everything goes through the [`HealthBackend`] trait, which the
//! orchestrator implements.

mod backend;
mod config;
mod events;
mod recovery;
mod scheduler;

pub use backend::{HealthBackend, ProbeReport, ProbeTarget};
pub use config::{HealthCheckConfig, HealthCheckConfigBuilder, HealthCheckConfigError};
pub use events::HealthEvent;
pub use recovery::{next_test_delay, RecoveryFailureRecord, RecoveryTestSnapshot};
pub use scheduler::{HealthScheduler, SchedulerMetrics};
