//! The request model flowing through the dispatch pipeline.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// The backend operation a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Endpoint {
    ListModels,
    Generate,
    Chat,
    Embed,
}

impl Endpoint {
    /// Stable label used in metrics and persisted records.
    pub fn label(&self) -> &'static str {
        match self {
            Endpoint::ListModels => "list-models",
            Endpoint::Generate => "generate",
            Endpoint::Chat => "chat",
            Endpoint::Embed => "embed",
        }
    }
}

/// Per-request context created at admission and threaded through selection,
/// execution, and recording.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request id.
    pub id: String,
    /// Target model name.
    pub model: String,
    /// Target operation.
    pub endpoint: Endpoint,
    /// Whether the caller asked for a chunked streaming response.
    pub streaming: bool,
    /// Sticky-session key, when the caller supplied one.
    pub client_id: Option<String>,
    /// Initial queue priority; `None` uses the queue default.
    pub priority: Option<u32>,
    /// When the request entered the pipeline.
    pub accepted_at: Instant,
    /// Time spent waiting in the queue, set on dequeue.
    pub queue_wait: Option<Duration>,
}

impl RequestContext {
    pub fn new(id: impl Into<String>, model: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            endpoint,
            streaming: false,
            client_id: None,
            priority: None,
            accepted_at: Instant::now(),
            queue_wait: None,
        }
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// What happened to one attempt against one backend.
///
/// The aggregator and the request recorder match on this exhaustively; a new
/// variant cannot be added without both picking it up.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// Unary call completed.
    Success {
        latency: Duration,
        tokens_prompt: Option<u64>,
        tokens_generated: Option<u64>,
    },
    /// Streaming call completed through the final chunk.
    StreamingSuccess {
        latency: Duration,
        ttft: Duration,
        streaming_duration: Duration,
        tokens_prompt: Option<u64>,
        tokens_generated: Option<u64>,
    },
    /// The attempt failed with a classified kind.
    Failure {
        latency: Duration,
        kind: ErrorKind,
        message: String,
    },
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, RequestOutcome::Failure { .. })
    }

    pub fn latency(&self) -> Duration {
        match self {
            RequestOutcome::Success { latency, .. }
            | RequestOutcome::StreamingSuccess { latency, .. }
            | RequestOutcome::Failure { latency, .. } => *latency,
        }
    }

    /// The failure kind, when this outcome is a failure.
    pub fn error_kind(&self) -> Option<&ErrorKind> {
        match self {
            RequestOutcome::Failure { kind, .. } => Some(kind),
            _ => None,
        }
    }

    pub fn tokens_generated(&self) -> Option<u64> {
        match self {
            RequestOutcome::Success {
                tokens_generated, ..
            }
            | RequestOutcome::StreamingSuccess {
                tokens_generated, ..
            } => *tokens_generated,
            RequestOutcome::Failure { .. } => None,
        }
    }

    pub fn tokens_prompt(&self) -> Option<u64> {
        match self {
            RequestOutcome::Success { tokens_prompt, .. }
            | RequestOutcome::StreamingSuccess { tokens_prompt, .. } => *tokens_prompt,
            RequestOutcome::Failure { .. } => None,
        }
    }
}
