//! The registry proper: id-keyed servers with a normalized-URL uniqueness
//! index and the ban set.

use crate::bans::{Ban, BanKey};
use crate::events::RegistryEvent;
use crate::normalize::{normalize_url, NormalizeError};
use crate::server::{LoadedModel, Server, ServerType};
use herd_core::{now_millis, EpochMillis, EventListeners};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The normalized URL already belongs to another server.
    #[error("duplicate server url {url} (registered as {existing_id})")]
    DuplicateUrl { url: String, existing_id: String },

    #[error("unknown server {id}")]
    UnknownServer { id: String },

    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

/// Input to [`Registry::add`].
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub url: String,
    /// Explicit id; a v4 UUID is assigned when absent.
    pub id: Option<String>,
    pub server_type: ServerType,
    pub max_concurrency: Option<u32>,
    pub api_key: Option<String>,
}

impl ServerSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            id: None,
            server_type: ServerType::default(),
            max_concurrency: None,
            api_key: None,
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn max_concurrency(mut self, max: u32) -> Self {
        self.max_concurrency = Some(max);
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Administrative patch applied by [`Registry::update`]. `None` leaves a
/// field untouched; the nested `Option`s clear when `Some(None)`.
#[derive(Debug, Clone, Default)]
pub struct ServerUpdate {
    pub url: Option<String>,
    pub healthy: Option<bool>,
    pub max_concurrency: Option<Option<u32>>,
    pub api_key: Option<Option<String>>,
}

/// State observed by one health probe, reconciled into the server record.
#[derive(Debug, Clone, Default)]
pub struct ProbeUpdate {
    pub healthy: Option<bool>,
    pub response_time: Option<u64>,
    pub models: Option<Vec<String>>,
    pub loaded_models: Option<Vec<LoadedModel>>,
    pub supports_primary: Option<bool>,
    pub supports_compat: Option<bool>,
}

struct Inner {
    servers: HashMap<String, Server>,
    /// Insertion order; `list()` and round-robin stability depend on it.
    order: Vec<String>,
    by_url: HashMap<String, String>,
    bans: HashMap<BanKey, Ban>,
}

/// The server registry. One mutex guards all indices so readers always see
/// a coherent mapping.
pub struct Registry {
    inner: Mutex<Inner>,
    listeners: EventListeners<RegistryEvent>,
    default_max_concurrency: u32,
}

impl Registry {
    pub fn new(default_max_concurrency: u32) -> Self {
        Self::with_listeners(default_max_concurrency, EventListeners::new())
    }

    pub fn with_listeners(
        default_max_concurrency: u32,
        listeners: EventListeners<RegistryEvent>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                servers: HashMap::new(),
                order: Vec::new(),
                by_url: HashMap::new(),
                bans: HashMap::new(),
            }),
            listeners,
            default_max_concurrency,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a backend. Fails with [`RegistryError::DuplicateUrl`] when
    /// the normalized URL already maps to a different server.
    pub fn add(&self, spec: ServerSpec) -> Result<Server, RegistryError> {
        let url = normalize_url(&spec.url)?;
        let server = {
            let mut inner = self.lock();
            if let Some(existing) = inner.by_url.get(&url) {
                return Err(RegistryError::DuplicateUrl {
                    url,
                    existing_id: existing.clone(),
                });
            }
            let id = spec
                .id
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let server = Server {
                id: id.clone(),
                url: url.clone(),
                server_type: spec.server_type,
                healthy: true,
                models: Vec::new(),
                last_response_time: 0,
                max_concurrency: spec.max_concurrency,
                supports_primary: None,
                supports_compat: None,
                api_key: spec.api_key,
                loaded_models: Vec::new(),
            };
            inner.by_url.insert(url.clone(), id.clone());
            inner.order.push(id.clone());
            inner.servers.insert(id, server.clone());

            #[cfg(feature = "metrics")]
            metrics::gauge!("herd_registry_servers").set(inner.servers.len() as f64);

            server
        };

        #[cfg(feature = "tracing")]
        tracing::info!(server = %server.id, url = %server.url, "server registered");

        self.listeners.emit(&RegistryEvent::ServerAdded {
            server_id: server.id.clone(),
            url: server.url.clone(),
            timestamp: Instant::now(),
        });
        Ok(server)
    }

    /// Deregisters a backend, dropping its bans with it.
    pub fn remove(&self, id: &str) -> Result<Server, RegistryError> {
        let server = {
            let mut inner = self.lock();
            let server = inner
                .servers
                .remove(id)
                .ok_or_else(|| RegistryError::UnknownServer { id: id.to_string() })?;
            inner.by_url.remove(&server.url);
            inner.order.retain(|s| s != id);
            inner.bans.retain(|(sid, _), _| sid != id);

            #[cfg(feature = "metrics")]
            metrics::gauge!("herd_registry_servers").set(inner.servers.len() as f64);

            server
        };

        #[cfg(feature = "tracing")]
        tracing::info!(server = %id, "server removed");

        self.listeners.emit(&RegistryEvent::ServerRemoved {
            server_id: id.to_string(),
            timestamp: Instant::now(),
        });
        Ok(server)
    }

    /// Applies an administrative patch.
    pub fn update(&self, id: &str, patch: ServerUpdate) -> Result<Server, RegistryError> {
        let server = {
            let mut inner = self.lock();

            // Validate the new URL against the index before mutating.
            let new_url = match &patch.url {
                Some(raw) => {
                    let url = normalize_url(raw)?;
                    if let Some(existing) = inner.by_url.get(&url) {
                        if existing != id {
                            return Err(RegistryError::DuplicateUrl {
                                url,
                                existing_id: existing.clone(),
                            });
                        }
                    }
                    Some(url)
                }
                None => None,
            };

            let old_url = inner
                .servers
                .get(id)
                .map(|s| s.url.clone())
                .ok_or_else(|| RegistryError::UnknownServer { id: id.to_string() })?;

            if let Some(url) = &new_url {
                inner.by_url.remove(&old_url);
                inner.by_url.insert(url.clone(), id.to_string());
            }

            let server = inner
                .servers
                .get_mut(id)
                .ok_or_else(|| RegistryError::UnknownServer { id: id.to_string() })?;
            if let Some(url) = new_url {
                server.url = url;
            }
            if let Some(healthy) = patch.healthy {
                server.healthy = healthy;
            }
            if let Some(max) = patch.max_concurrency {
                server.max_concurrency = max;
            }
            if let Some(key) = patch.api_key {
                server.api_key = key;
            }
            server.clone()
        };

        self.listeners.emit(&RegistryEvent::ServerUpdated {
            server_id: id.to_string(),
            timestamp: Instant::now(),
        });
        Ok(server)
    }

    pub fn get(&self, id: &str) -> Option<Server> {
        self.lock().servers.get(id).cloned()
    }

    /// All servers in insertion order.
    pub fn list(&self) -> Vec<Server> {
        let inner = self.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.servers.get(id).cloned())
            .collect()
    }

    /// Point-in-time copy for persistence and controller views.
    pub fn snapshot(&self) -> Vec<Server> {
        self.list()
    }

    pub fn len(&self) -> usize {
        self.lock().servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().servers.is_empty()
    }

    /// Flips the health flag, emitting only on change. Returns whether the
    /// flag changed.
    pub fn set_healthy(&self, id: &str, healthy: bool) -> Result<bool, RegistryError> {
        let changed = {
            let mut inner = self.lock();
            let server = inner
                .servers
                .get_mut(id)
                .ok_or_else(|| RegistryError::UnknownServer { id: id.to_string() })?;
            let changed = server.healthy != healthy;
            server.healthy = healthy;
            changed
        };
        if changed {
            #[cfg(feature = "tracing")]
            tracing::info!(server = %id, healthy, "server health changed");

            self.listeners.emit(&RegistryEvent::HealthChanged {
                server_id: id.to_string(),
                healthy,
                timestamp: Instant::now(),
            });
        }
        Ok(changed)
    }

    /// Reconciles one probe result into the server record. Model churn never
    /// touches metric state; only the registry's view of placement changes.
    pub fn record_probe(&self, id: &str, update: ProbeUpdate) -> Result<Server, RegistryError> {
        let (server, health_flipped) = {
            let mut inner = self.lock();
            let server = inner
                .servers
                .get_mut(id)
                .ok_or_else(|| RegistryError::UnknownServer { id: id.to_string() })?;
            let mut flipped = None;
            if let Some(healthy) = update.healthy {
                if server.healthy != healthy {
                    flipped = Some(healthy);
                }
                server.healthy = healthy;
            }
            if let Some(rt) = update.response_time {
                server.last_response_time = rt;
            }
            if let Some(models) = update.models {
                server.models = models;
            }
            if let Some(loaded) = update.loaded_models {
                server.loaded_models = loaded;
            }
            if let Some(v) = update.supports_primary {
                server.supports_primary = Some(v);
            }
            if let Some(v) = update.supports_compat {
                server.supports_compat = Some(v);
            }
            (server.clone(), flipped)
        };

        if let Some(healthy) = health_flipped {
            self.listeners.emit(&RegistryEvent::HealthChanged {
                server_id: id.to_string(),
                healthy,
                timestamp: Instant::now(),
            });
        }
        Ok(server)
    }

    /// Effective concurrency ceiling for a server.
    pub fn max_concurrency_for(&self, server: &Server) -> u32 {
        server.max_concurrency.unwrap_or(self.default_max_concurrency)
    }

    /// Bans a (server, model) pair, optionally expiring after `ttl`.
    pub fn ban(&self, server_id: &str, model: &str, reason: &str, ttl: Option<Duration>) {
        let now = now_millis();
        let ban = Ban {
            server_id: server_id.to_string(),
            model: model.to_string(),
            reason: reason.to_string(),
            created_at: now,
            expires_at: ttl.map(|d| now + d.as_millis() as u64),
        };
        self.lock().bans.insert(ban.key(), ban);

        #[cfg(feature = "tracing")]
        tracing::warn!(server = %server_id, model, reason, "model banned");

        self.listeners.emit(&RegistryEvent::ModelBanned {
            server_id: server_id.to_string(),
            model: model.to_string(),
            reason: reason.to_string(),
            timestamp: Instant::now(),
        });
    }

    /// Checks the ban set, lazily dropping an expired entry on first read.
    pub fn is_banned(&self, server_id: &str, model: &str, now: EpochMillis) -> bool {
        let expired = {
            let mut inner = self.lock();
            let key = (server_id.to_string(), model.to_string());
            match inner.bans.get(&key) {
                Some(ban) if ban.expired(now) => {
                    inner.bans.remove(&key);
                    true
                }
                Some(_) => return true,
                None => return false,
            }
        };
        if expired {
            self.listeners.emit(&RegistryEvent::BanLifted {
                server_id: server_id.to_string(),
                model: model.to_string(),
                timestamp: Instant::now(),
            });
        }
        false
    }

    pub fn unban(&self, server_id: &str, model: &str) -> bool {
        let removed = self
            .lock()
            .bans
            .remove(&(server_id.to_string(), model.to_string()))
            .is_some();
        if removed {
            self.listeners.emit(&RegistryEvent::BanLifted {
                server_id: server_id.to_string(),
                model: model.to_string(),
                timestamp: Instant::now(),
            });
        }
        removed
    }

    pub fn bans(&self) -> Vec<Ban> {
        self.lock().bans.values().cloned().collect()
    }

    /// Rebuilds registry state from persisted records, deduplicating by
    /// normalized URL (first occurrence wins, insertion order preserved).
    /// Returns the deduplicated list so the caller can write it back.
    pub fn load_persisted(&self, records: Vec<Server>) -> Vec<Server> {
        let mut inner = self.lock();
        inner.servers.clear();
        inner.order.clear();
        inner.by_url.clear();

        let mut kept = Vec::new();
        for mut record in records {
            let url = match normalize_url(&record.url) {
                Ok(url) => url,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(server = %record.id, url = %record.url, error = %_e, "skipping persisted server with invalid url");
                    continue;
                }
            };
            if inner.by_url.contains_key(&url) {
                #[cfg(feature = "tracing")]
                tracing::warn!(server = %record.id, url = %url, "dropping persisted duplicate url");
                continue;
            }
            record.url = url.clone();
            inner.by_url.insert(url, record.id.clone());
            inner.order.push(record.id.clone());
            inner.servers.insert(record.id.clone(), record.clone());
            kept.push(record);
        }

        #[cfg(feature = "metrics")]
        metrics::gauge!("herd_registry_servers").set(inner.servers.len() as f64);

        kept
    }

    /// Restores the ban set from persisted records, dropping already-expired
    /// entries.
    pub fn load_bans(&self, records: Vec<Ban>) {
        let now = now_millis();
        let mut inner = self.lock();
        inner.bans.clear();
        for ban in records {
            if !ban.expired(now) {
                inner.bans.insert(ban.key(), ban);
            }
        }
    }
}
