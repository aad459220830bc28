//! The per-backend record.

use herd_core::EpochMillis;
use serde::{Deserialize, Serialize};

/// Kind of serving backend. A single variant today; the enum keeps the
/// persisted layout stable for future heterogeneous fleets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServerType {
    #[default]
    Standard,
}

/// A model currently resident in backend memory, as reported by the
/// loaded-models probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadedModel {
    pub name: String,
    #[serde(default)]
    pub vram_bytes: u64,
    /// When the backend will evict this model, if it reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<EpochMillis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// One registered backend. This struct doubles as the persisted layout of
/// `servers.json`; runtime-only fields default on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    pub id: String,
    /// Canonical URL (see [`crate::normalize_url`]).
    pub url: String,
    #[serde(default, rename = "type")]
    pub server_type: ServerType,
    #[serde(default = "default_true")]
    pub healthy: bool,
    #[serde(default)]
    pub models: Vec<String>,
    /// Latency of the most recent successful probe or request, in ms.
    #[serde(default)]
    pub last_response_time: u64,
    /// Per-server concurrency ceiling. `None` uses the config default;
    /// `Some(0)` means maintenance (never selected).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,
    /// Whether the primary enumeration API responded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_primary: Option<bool>,
    /// Whether the OpenAI-compatible discovery endpoint responded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_compat: Option<bool>,
    /// Per-server bearer credential handle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Loaded-model snapshot from the most recent probe.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loaded_models: Vec<LoadedModel>,
}

fn default_true() -> bool {
    true
}

impl Server {
    /// True when this server knows `model` (installed, not necessarily
    /// loaded).
    pub fn has_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }

    /// The loaded-model entry for `model`, if resident.
    pub fn loaded(&self, model: &str) -> Option<&LoadedModel> {
        self.loaded_models.iter().find(|m| m.name == model)
    }

    /// True when the server is administratively out of rotation.
    pub fn in_maintenance(&self) -> bool {
        self.max_concurrency == Some(0)
    }
}
