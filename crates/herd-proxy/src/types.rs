//! Wire types for the backend protocol.

use herd_core::EpochMillis;
use serde::{Deserialize, Serialize};

/// One installed model, from the enumeration endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<ModelDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization_level: Option<String>,
}

/// One model resident in backend memory, from the loaded-models endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedModelInfo {
    pub name: String,
    #[serde(default, alias = "sizeVram")]
    pub size_vram: u64,
    /// RFC 3339 eviction time as the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl LoadedModelInfo {
    /// Eviction time in epoch ms, when the backend sent a parseable stamp.
    pub fn expires_at_millis(&self) -> Option<EpochMillis> {
        let raw = self.expires_at.as_deref()?;
        chrono::DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.timestamp_millis().max(0) as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedResponse {
    pub embedding: Vec<f64>,
}

/// The bookkeeping slice of one streaming chunk. Everything else in the
/// chunk is opaque to the orchestrator and forwarded verbatim.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct StreamChunkMeta {
    #[serde(default)]
    pub done: bool,
    #[serde(default, alias = "evalCount")]
    pub eval_count: Option<u64>,
    #[serde(default, alias = "promptEvalCount")]
    pub prompt_eval_count: Option<u64>,
}

impl StreamChunkMeta {
    /// Best-effort parse; malformed chunks are forwarded but contribute no
    /// bookkeeping.
    pub fn parse(line: &str) -> Self {
        serde_json::from_str(line).unwrap_or_default()
    }
}

/// Response envelope of the enumeration endpoints.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ModelsEnvelope<T> {
    #[serde(default = "Vec::new")]
    pub models: Vec<T>,
}
