//! Escalation from model-level breakers to server-level health.
//!
//! A single open breaker says "this model on this server is struggling" and
//! must never take the whole server out of rotation. When most of a
//! server's breakers are open at once and stay that way, the problem is the
//! server; escalation hands it to the health checker's recovery loop.

use crate::config::EscalationConfig;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Tracks how long each server's open-breaker ratio has exceeded the
/// configured threshold.
pub struct ModelEscalation {
    config: EscalationConfig,
    exceeded_since: Mutex<HashMap<String, Instant>>,
}

impl ModelEscalation {
    pub fn new(config: EscalationConfig) -> Self {
        Self {
            config,
            exceeded_since: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EscalationConfig {
        &self.config
    }

    /// Feeds one evaluation round with a server's (open, total) breaker
    /// counts. Returns `true` when the server should be marked unhealthy.
    pub fn evaluate(&self, server_id: &str, open: usize, total: usize, now: Instant) -> bool {
        if !self.config.enabled || total == 0 {
            return false;
        }
        let ratio = open as f64 / total as f64;
        let mut exceeded = self
            .exceeded_since
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if ratio <= self.config.ratio_threshold {
            exceeded.remove(server_id);
            return false;
        }
        let since = *exceeded
            .entry(server_id.to_string())
            .or_insert(now);
        now.duration_since(since) >= self.config.duration_threshold
    }

    /// Clears tracked state for a removed or recovered server.
    pub fn reset(&self, server_id: &str) {
        self.exceeded_since
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(server_id);
    }
}
