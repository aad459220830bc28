//! Administrative (server, model) bans with lazy expiry.

use herd_core::EpochMillis;
use serde::{Deserialize, Serialize};

/// Key identifying a banned (server, model) pair.
pub type BanKey = (String, String);

/// One ban entry. Doubles as the persisted layout of `bans.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ban {
    pub server_id: String,
    pub model: String,
    pub reason: String,
    pub created_at: EpochMillis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<EpochMillis>,
}

impl Ban {
    pub fn expired(&self, now: EpochMillis) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    pub fn key(&self) -> BanKey {
        (self.server_id.clone(), self.model.clone())
    }
}
