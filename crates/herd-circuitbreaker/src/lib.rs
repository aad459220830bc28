//! Per-(server, model) circuit breaking.
//!
//! Every (server, model) pair gets its own breaker: a model can melt down on
//! one backend (out of memory, runner crash) while the same model keeps
//! serving elsewhere and other models keep serving on the same backend.
//! Server-level health is the health checker's job; the only coupling is
//! [`ModelEscalation`], which flags a server when *most* of its breakers are
//! open at once.
//!
//! State machine per pair:
//!
//! ```text
//!            failures ≥ threshold │ error rate │ non-retryable mix
//!   closed ──────────────────────────────────────────────────────▶ open
//!     ▲                                                             │
//!     │ successes ≥ recovery threshold              openTimeout elapsed
//!     │                                                             ▼
//!     └───────────────────────── half-open ◀────────────────────────┘
//!                 first failure / attempts exhausted back to open
//! ```
//!
//! The `open → half-open` edge is lazy: it happens on the first
//! [`BreakerMap::can_execute`] after the timeout, not on a timer tick.

mod circuit;
mod config;
mod escalation;
mod events;
mod map;

pub use circuit::{BreakerSnapshot, CircuitState};
pub use config::{
    CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerConfigError, EscalationConfig,
};
pub use escalation::ModelEscalation;
pub use events::CircuitBreakerEvent;
pub use map::{BreakerMap, TransitionRecord};
