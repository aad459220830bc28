//! Typed error mapping at the adapter boundary.

use herd_core::{classify_message, ErrorKind, ErrorPatterns, MessageClass};
use thiserror::Error;

/// A failed backend exchange, already classified.
#[derive(Debug, Clone, Error)]
#[error("backend error ({}): {message}", kind.label())]
pub struct ProxyError {
    pub kind: ErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl ProxyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamingConfigError {
    #[error("streaming.maxConcurrentStreams must be >= 1")]
    MaxConcurrentStreams,
    #[error("streaming.timeoutMs must be >= 1s")]
    Timeout,
    #[error("streaming.bufferSize must be >= 1")]
    BufferSize,
    #[error("streaming.activityTimeoutMs must be >= 1s")]
    ActivityTimeout,
}

/// Maps a transport-level failure to a kind. String inspection here is
/// unavoidable (reqwest does not expose the io error kind uniformly), but
/// it happens exactly once, behind this function.
pub fn map_transport_error(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        return ErrorKind::Timeout;
    }
    let chain = format!("{err:?}").to_lowercase();
    if chain.contains("dns") || chain.contains("resolve") {
        ErrorKind::DnsFailure
    } else if chain.contains("refused") {
        ErrorKind::ConnectionRefused
    } else if chain.contains("reset") || chain.contains("broken pipe") || chain.contains("closed")
    {
        ErrorKind::ConnectionReset
    } else if err.is_connect() {
        ErrorKind::ConnectionRefused
    } else {
        ErrorKind::ConnectionReset
    }
}

/// Maps an HTTP status plus (possibly truncated) body to a kind.
///
/// Statuses carry most of the signal; the body patterns only disambiguate
/// generic 5xx responses whose text names a non-retryable condition.
pub fn classify_status(status: u16, body: &str, patterns: &ErrorPatterns) -> ErrorKind {
    match status {
        400 => ErrorKind::BadRequest,
        401 | 403 => ErrorKind::Unauthorized,
        404 => ErrorKind::ModelNotFound,
        429 => ErrorKind::RateLimit,
        s if s >= 500 => {
            let lower = body.to_lowercase();
            match classify_message(body, patterns) {
                MessageClass::NonRetryable => {
                    if lower.contains("memory") || lower.contains("ram") {
                        ErrorKind::OutOfMemory
                    } else if lower.contains("runner") {
                        ErrorKind::RunnerTerminated
                    } else if lower.contains("not found") {
                        ErrorKind::ModelNotFound
                    } else if lower.contains("unauthorized") || lower.contains("forbidden") {
                        ErrorKind::Unauthorized
                    } else {
                        ErrorKind::FatalModelServer
                    }
                }
                _ => ErrorKind::HttpGateway(s),
            }
        }
        s => {
            // Leftover 4xx without a specific mapping: the request itself
            // is at fault.
            let _ = s;
            ErrorKind::BadRequest
        }
    }
}
