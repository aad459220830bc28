//! The orchestrator core.
//!
//! [`Orchestrator`] owns every subsystem (registry, metrics aggregator,
//! breaker map, balancer, queue, health scheduler, proxy, persistence)
//! and runs the request pipeline over them:
//!
//! ```text
//! admit → (enqueue) → filter candidates → select → execute
//!       → retry in place → fail over → record
//! ```
//!
//! Controllers (HTTP surface, admin API) hold an `Arc<Orchestrator>` and
//! consume snapshots; nothing outside this crate mutates subsystem state
//! directly.

mod config;
mod health_backend;
mod history;
mod orchestrator;
mod pipeline;

pub use config::{ConfigError, CooldownConfig, LogLevel, OrchestratorConfig, RetryConfig};
pub use history::{RequestHistory, RequestHistoryPersisted, RequestRecord};
pub use orchestrator::{Orchestrator, RecoveryFailuresPersisted, ServerRecoveryStats};
pub use pipeline::{DispatchedStream, StreamStats};
