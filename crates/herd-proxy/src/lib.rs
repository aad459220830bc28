//! Backend HTTP adapter.
//!
//! Every byte between the orchestrator and a model-serving backend passes
//! through this crate: model enumeration probes, unary generate/chat/embed
//! calls, and chunked streaming with per-chunk bookkeeping (TTFT, activity
//! timeout, trailing token counts).
//!
//! This is also where failures become typed. HTTP statuses and transport
//! errors map to [`herd_core::ErrorKind`] directly; response-body pattern
//! matching is a fallback for the one genuinely ambiguous case (a 5xx whose
//! body names an out-of-memory or runner crash). Nothing outside this crate
//! ever inspects an error message.

mod client;
mod error;
mod streaming;
mod types;

pub use client::{BackendEndpoint, HttpBackend, ProbeSummary, ProxyConfig, StreamingConfig};
pub use error::{classify_status, map_transport_error, ProxyError, StreamingConfigError};
pub use streaming::{StreamHandle, StreamOutcome};
pub use types::{
    ChatMessage, EmbedResponse, LoadedModelInfo, ModelDetails, ModelInfo, StreamChunkMeta,
};
