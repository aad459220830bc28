//! Bounded priority queue gating admission into the dispatch pipeline.
//!
//! Requests wait here when every eligible backend is saturated. Higher
//! priority dequeues first, FIFO within a priority, and a periodic aging
//! pass boosts long-waiting items so nothing starves. Admission past
//! capacity fails fast with `QueueFull`; each waiter carries its own
//! deadline and resolves `QueueTimeout` when it ages out.

mod config;
mod events;
mod queue;

pub use config::{QueueConfig, QueueConfigBuilder, QueueConfigError};
pub use events::QueueEvent;
pub use queue::{QueueItemSnapshot, QueueStats, QueueTicket, RequestQueue};
