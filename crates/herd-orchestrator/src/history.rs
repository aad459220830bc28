//! Per-server request history.

use herd_core::{now_millis, EpochMillis, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// One completed (or failed) request, as kept for the history views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub id: String,
    pub timestamp: EpochMillis,
    pub model: String,
    pub endpoint: String,
    pub server_id: String,
    pub streaming: bool,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_prompt: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_generated: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttft_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming_duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_wait_ms: Option<u64>,
    /// Attempts across retries and failover for the whole request.
    pub attempts: u32,
}

/// Persisted layout of `request-history.json`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHistoryPersisted {
    pub timestamp: EpochMillis,
    pub requests: HashMap<String, Vec<RequestRecord>>,
}

/// Bounded per-server request log; single-writer, copy-on-read.
pub struct RequestHistory {
    per_server: Mutex<HashMap<String, VecDeque<RequestRecord>>>,
    max_per_server: usize,
}

impl RequestHistory {
    pub fn new(max_per_server: usize) -> Self {
        Self {
            per_server: Mutex::new(HashMap::new()),
            max_per_server: max_per_server.max(1),
        }
    }

    pub fn record(&self, record: RequestRecord) {
        let mut per_server = self.per_server.lock().unwrap_or_else(|e| e.into_inner());
        let entry = per_server
            .entry(record.server_id.clone())
            .or_insert_with(VecDeque::new);
        entry.push_back(record);
        while entry.len() > self.max_per_server {
            entry.pop_front();
        }
    }

    pub fn for_server(&self, server_id: &str) -> Vec<RequestRecord> {
        self.per_server
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(server_id)
            .map(|records| records.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all(&self) -> HashMap<String, Vec<RequestRecord>> {
        self.per_server
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(server, records)| (server.clone(), records.iter().cloned().collect()))
            .collect()
    }

    pub fn prune_server(&self, server_id: &str) {
        self.per_server
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(server_id);
    }

    pub fn export(&self) -> RequestHistoryPersisted {
        RequestHistoryPersisted {
            timestamp: now_millis(),
            requests: self.all(),
        }
    }
}
