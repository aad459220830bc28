//! The typed failure taxonomy and the caller-facing error type.
//!
//! Backends fail in many shapes: transport errors, HTTP statuses, and
//! human-readable bodies. The proxy adapter folds all of them into
//! [`ErrorKind`] exactly once; the rest of the engine only ever matches on
//! the kind. Message-pattern classification ([`classify_message`]) exists
//! for the one ambiguous case: a 5xx whose body names a non-retryable
//! condition such as an out-of-memory model load.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every failure the engine can observe or originate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// A deadline elapsed: connect, response, or streaming inactivity.
    Timeout,
    /// TCP connection refused by the backend.
    ConnectionRefused,
    /// Connection reset mid-exchange.
    ConnectionReset,
    /// Hostname resolution failed.
    DnsFailure,
    /// Gateway-class HTTP failure (502/503/504 and friends).
    HttpGateway(u16),
    /// Backend could not load the model into memory.
    OutOfMemory,
    /// The model is not installed on the backend.
    ModelNotFound,
    /// Credential rejected (401/403).
    Unauthorized,
    /// The request itself was malformed (400).
    BadRequest,
    /// The backend's model runner process died.
    RunnerTerminated,
    /// The backend reported an unrecoverable internal fault.
    FatalModelServer,
    /// Rejected locally: the circuit for (server, model) is open.
    CircuitOpen,
    /// Backend shed load (429).
    RateLimit,
    /// Admission rejected: the queue is at capacity.
    QueueFull,
    /// A queued request waited past its deadline.
    QueueTimeout,
    /// The caller cancelled the request.
    Cancelled,
    /// No eligible server remained for the requested model.
    NoCandidate,
    /// An internal invariant was violated. Always a bug.
    InternalState,
}

/// Coarse grouping of [`ErrorKind`] driving retry and breaker policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    /// Worth retrying on the same server, counts toward normal trip logic.
    Transient,
    /// Trips the breaker immediately, never retried on the same server.
    NonRetryable,
    /// Induced by the engine's own protection (circuit, rate limit).
    Advisory,
    /// Originated by the orchestrator itself, not a backend.
    Orchestrator,
}

impl ErrorKind {
    /// Total classification; every kind belongs to exactly one class.
    pub fn class(&self) -> ErrorClass {
        match self {
            ErrorKind::Timeout
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::DnsFailure
            | ErrorKind::HttpGateway(_) => ErrorClass::Transient,
            ErrorKind::OutOfMemory
            | ErrorKind::ModelNotFound
            | ErrorKind::Unauthorized
            | ErrorKind::BadRequest
            | ErrorKind::RunnerTerminated
            | ErrorKind::FatalModelServer => ErrorClass::NonRetryable,
            ErrorKind::CircuitOpen | ErrorKind::RateLimit => ErrorClass::Advisory,
            ErrorKind::QueueFull
            | ErrorKind::QueueTimeout
            | ErrorKind::Cancelled
            | ErrorKind::NoCandidate
            | ErrorKind::InternalState => ErrorClass::Orchestrator,
        }
    }

    /// True when an in-request retry on the *same* server is permitted.
    pub fn retryable_in_place(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    /// True when failover to another candidate is worth attempting.
    ///
    /// Non-retryable kinds still fail over; they poison only the
    /// (server, model) pair that produced them. Orchestrator-originated
    /// kinds terminate the request.
    pub fn failover_eligible(&self) -> bool {
        !matches!(self.class(), ErrorClass::Orchestrator)
    }

    /// Stable label used in metrics and persisted records.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionRefused => "connection-refused",
            ErrorKind::ConnectionReset => "connection-reset",
            ErrorKind::DnsFailure => "dns-failure",
            ErrorKind::HttpGateway(_) => "http-gateway",
            ErrorKind::OutOfMemory => "out-of-memory",
            ErrorKind::ModelNotFound => "model-not-found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::RunnerTerminated => "runner-terminated",
            ErrorKind::FatalModelServer => "fatal-model-server",
            ErrorKind::CircuitOpen => "circuit-open",
            ErrorKind::RateLimit => "rate-limit",
            ErrorKind::QueueFull => "queue-full",
            ErrorKind::QueueTimeout => "queue-timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NoCandidate => "no-candidate",
            ErrorKind::InternalState => "internal-state",
        }
    }
}

/// One failed attempt within a single dispatched request, kept for the
/// diagnostics attached to an exhausted failover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub server_id: String,
    pub kind: ErrorKind,
}

/// The error surfaced to callers of the dispatch pipeline.
#[derive(Debug, Clone, Error)]
pub enum HerdError {
    /// A backend call failed terminally on one server.
    #[error("backend {server_id} failed for model {model}: {message}")]
    Backend {
        kind: ErrorKind,
        server_id: String,
        model: String,
        message: String,
    },

    /// No server was eligible for the model at selection time.
    #[error("no candidate server for model {model}")]
    NoCandidate { model: String },

    /// Every candidate was tried and failed; carries the full attempt trail.
    #[error("all {} candidates failed for model {model}; last: {last_message}", attempted.len())]
    Exhausted {
        model: String,
        last_kind: ErrorKind,
        last_message: String,
        attempted: Vec<Attempt>,
    },

    /// Admission control rejected the request outright.
    #[error("request queue full ({size}/{max_size})")]
    QueueFull { size: usize, max_size: usize },

    /// The request aged out of the queue before a slot opened.
    #[error("queued request timed out after {waited_ms}ms")]
    QueueTimeout { waited_ms: u64 },

    /// The caller cancelled while queued or in flight.
    #[error("request cancelled")]
    Cancelled,

    /// An invariant violation. Logged with full context where raised.
    #[error("internal state violation: {0}")]
    InternalState(String),
}

impl HerdError {
    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HerdError::Backend { kind, .. } => kind.clone(),
            HerdError::NoCandidate { .. } => ErrorKind::NoCandidate,
            HerdError::Exhausted { last_kind, .. } => last_kind.clone(),
            HerdError::QueueFull { .. } => ErrorKind::QueueFull,
            HerdError::QueueTimeout { .. } => ErrorKind::QueueTimeout,
            HerdError::Cancelled => ErrorKind::Cancelled,
            HerdError::InternalState(_) => ErrorKind::InternalState,
        }
    }

    /// The attempt trail for exhausted failovers, empty otherwise.
    pub fn attempts(&self) -> &[Attempt] {
        match self {
            HerdError::Exhausted { attempted, .. } => attempted,
            _ => &[],
        }
    }
}

/// Result of matching a backend message against the configured patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Matched a non-retryable pattern.
    NonRetryable,
    /// Matched a transient pattern.
    Transient,
    /// Matched nothing. Counted as transient for trip purposes but never
    /// retried on the same server.
    Unknown,
}

/// Configurable substring patterns for the fallback message classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPatterns {
    pub non_retryable: Vec<String>,
    pub transient: Vec<String>,
}

impl Default for ErrorPatterns {
    fn default() -> Self {
        Self {
            non_retryable: [
                "not found",
                "invalid",
                "unauthorized",
                "forbidden",
                "bad request",
                "not enough ram",
                "out of memory",
                "runner terminated",
                "fatal model server error",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            transient: [
                "timeout",
                "temporarily unavailable",
                "rate limit",
                "too many requests",
                "service unavailable",
                "gateway timeout",
                "connection reset",
                "connection refused",
                "timed out",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Case-insensitive substring classification of a backend message.
///
/// Non-retryable patterns win over transient ones: "invalid gateway timeout
/// configuration" is a client bug, not a flaky gateway.
pub fn classify_message(message: &str, patterns: &ErrorPatterns) -> MessageClass {
    let lower = message.to_lowercase();
    if patterns.non_retryable.iter().any(|p| lower.contains(p.as_str())) {
        return MessageClass::NonRetryable;
    }
    if patterns.transient.iter().any(|p| lower.contains(p.as_str())) {
        return MessageClass::Transient;
    }
    MessageClass::Unknown
}
