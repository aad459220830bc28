//! Core types shared across the herd orchestrator.
//!
//! This crate holds the pieces every subsystem speaks in:
//!
//! - [`ErrorKind`] / [`ErrorClass`]: the typed failure taxonomy. Errors are
//!   classified once, at the backend adapter boundary; everything downstream
//!   (circuit breakers, retry loops, failover) branches on the typed kind,
//!   never on message strings.
//! - [`HerdError`]: the error surfaced to callers of the dispatch pipeline.
//! - [`RequestContext`] / [`RequestOutcome`]: the request model flowing
//!   through admission, selection, execution, and recording.
//! - [`events`]: panic-isolated event listener fan-out used by every
//!   subsystem for observability callbacks.
//! - [`backoff`]: interval strategies shared by the in-request retry loop,
//!   the health-check prober, and the recovery-test schedules.

pub mod backoff;
pub mod error;
pub mod events;
pub mod request;

pub use backoff::{ExponentialBackoff, FixedInterval, IntervalFunction};
pub use error::{
    classify_message, Attempt, ErrorClass, ErrorKind, ErrorPatterns, HerdError, MessageClass,
};
pub use events::{EventListener, EventListeners, FnListener, HerdEvent};
pub use request::{Endpoint, RequestContext, RequestOutcome};

/// Milliseconds since the Unix epoch.
///
/// Wall-clock timestamps persisted to disk and exposed in snapshots use this
/// representation; in-process latency math uses `std::time::Instant`.
pub type EpochMillis = u64;

/// Current wall-clock time as [`EpochMillis`].
pub fn now_millis() -> EpochMillis {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
