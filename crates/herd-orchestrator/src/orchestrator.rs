//! Construction, lifecycle, snapshots, and persistence wiring.

use crate::config::{ConfigError, OrchestratorConfig};
use crate::health_backend::SchedulerBackend;
use crate::history::{RequestHistory, RequestHistoryPersisted};
use herd_balancer::{Algorithm, DecisionEvent, DecisionHistoryPersisted, LoadBalancer};
use herd_circuitbreaker::{BreakerMap, BreakerSnapshot, ModelEscalation, TransitionRecord};
use herd_core::{now_millis, EpochMillis};
use herd_healthcheck::{HealthScheduler, RecoveryFailureRecord, SchedulerMetrics};
use herd_metrics::{MetricsAggregator, MetricsPersistedState, ServerModelSnapshot};
use herd_proxy::HttpBackend;
use herd_queue::{QueueStats, RequestQueue};
use herd_registry::{Ban, Registry, RegistryError, Server, ServerSpec, ServerUpdate};
use herd_store::JsonStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;

const SERVERS_FILE: &str = "servers.json";
const BANS_FILE: &str = "bans.json";
const METRICS_FILE: &str = "metrics.json";
const DECISIONS_FILE: &str = "decision-history.json";
const REQUESTS_FILE: &str = "request-history.json";
const RECOVERY_FILE: &str = "recovery-failures.json";
const REQUEST_HISTORY_PER_SERVER: usize = 200;

/// Aggregate failure stats for one server inside the recovery file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecoveryStats {
    pub failures: u64,
    pub last_failure: EpochMillis,
}

/// Persisted layout of `recovery-failures.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryFailuresPersisted {
    pub version: u32,
    pub timestamp: EpochMillis,
    pub records: Vec<RecoveryFailureRecord>,
    pub server_stats: HashMap<String, ServerRecoveryStats>,
    pub circuit_breaker_transitions: Vec<TransitionRecord>,
}

/// The engine. One instance owns the whole fleet's routing state.
pub struct Orchestrator {
    pub(crate) config: OrchestratorConfig,
    pub(crate) registry: Arc<Registry>,
    pub(crate) metrics: Arc<MetricsAggregator>,
    pub(crate) breakers: Arc<BreakerMap>,
    pub(crate) balancer: Arc<LoadBalancer>,
    pub(crate) queue: Arc<RequestQueue>,
    pub(crate) proxy: Arc<HttpBackend>,
    pub(crate) escalation: Arc<ModelEscalation>,
    pub(crate) scheduler: Arc<HealthScheduler<SchedulerBackend>>,
    pub(crate) history: Arc<RequestHistory>,
    pub(crate) store: Option<JsonStore>,
    pub(crate) cooldowns: Mutex<HashMap<(String, String), TokioInstant>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;

        let registry = Arc::new(Registry::new(config.cooldown.default_max_concurrency));
        let mut metrics_config = config.metrics.clone();
        metrics_config.enabled = metrics_config.enabled && config.enable_metrics;
        let metrics = Arc::new(MetricsAggregator::new(metrics_config));
        let breakers = Arc::new(BreakerMap::new(config.circuit_breaker.clone()));
        let balancer = Arc::new(LoadBalancer::new(config.balancer.clone(), config.algorithm));
        let queue = Arc::new(RequestQueue::new(config.queue.clone()));
        let proxy = Arc::new(
            HttpBackend::new(config.proxy.clone())
                .map_err(|e| ConfigError::HttpClient(e.to_string()))?,
        );
        let escalation = Arc::new(ModelEscalation::new(
            config.circuit_breaker.escalation().clone(),
        ));
        let backend = SchedulerBackend {
            registry: Arc::clone(&registry),
            breakers: Arc::clone(&breakers),
            proxy: Arc::clone(&proxy),
            probe_timeout: config.health.timeout,
            circuit_breaker_enabled: config.enable_circuit_breaker,
        };
        let scheduler = Arc::new(HealthScheduler::new(Arc::new(backend), config.health.clone()));
        let store = config
            .store
            .as_ref()
            .filter(|_| config.enable_persistence)
            .map(|store_config| JsonStore::new(store_config.clone()));

        Ok(Arc::new(Self {
            registry,
            metrics,
            breakers,
            balancer,
            queue,
            proxy,
            escalation,
            scheduler,
            history: Arc::new(RequestHistory::new(REQUEST_HISTORY_PER_SERVER)),
            store,
            cooldowns: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            config,
        }))
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// A fresh request context with a generated id.
    pub fn new_request(
        &self,
        model: impl Into<String>,
        endpoint: herd_core::Endpoint,
    ) -> herd_core::RequestContext {
        herd_core::RequestContext::new(uuid::Uuid::new_v4().to_string(), model, endpoint)
    }

    /// Loads persisted state and spawns the background tasks: health loops,
    /// queue aging, escalation evaluation, queue pump, persistence flush.
    pub async fn start(self: &Arc<Self>) {
        self.load_persisted().await;

        if self.config.enable_queue {
            self.queue.start_aging();
        }
        self.scheduler.start();

        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());

        if self.config.enable_circuit_breaker {
            let orchestrator = Arc::clone(self);
            let interval = self
                .config
                .circuit_breaker
                .escalation()
                .check_interval;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    orchestrator.evaluate_escalation();
                }
            }));
        }

        if self.config.enable_queue {
            let orchestrator = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(100));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    orchestrator.pump_queue();
                }
            }));
        }

        if self.store.is_some() {
            let orchestrator = Arc::clone(self);
            let interval = self.config.persistence_flush_interval;
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    orchestrator.flush().await;
                }
            }));
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            algorithm = self.balancer.algorithm().label(),
            "orchestrator started"
        );
    }

    /// Stops background work and writes a final persistence snapshot.
    pub async fn stop(&self) {
        self.scheduler.stop();
        self.queue.stop_aging();
        {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        self.flush().await;
    }

    // ------------------------------------------------------------------
    // Registry administration
    // ------------------------------------------------------------------

    pub fn add_server(&self, spec: ServerSpec) -> Result<Server, RegistryError> {
        let server = self.registry.add(spec)?;
        Ok(server)
    }

    /// Removes a server and every per-server trace of it.
    pub fn remove_server(&self, server_id: &str) -> Result<Server, RegistryError> {
        let server = self.registry.remove(server_id)?;
        self.metrics.prune_server(server_id);
        self.breakers.prune_server(server_id);
        self.balancer.forget_server(server_id);
        self.history.prune_server(server_id);
        self.escalation.reset(server_id);
        self.cooldowns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(sid, _), _| sid != server_id);
        Ok(server)
    }

    pub fn update_server(
        &self,
        server_id: &str,
        patch: ServerUpdate,
    ) -> Result<Server, RegistryError> {
        self.registry.update(server_id, patch)
    }

    pub fn ban_model(&self, server_id: &str, model: &str, reason: &str, ttl: Option<Duration>) {
        self.registry.ban(server_id, model, reason, ttl);
    }

    pub fn unban_model(&self, server_id: &str, model: &str) -> bool {
        self.registry.unban(server_id, model)
    }

    /// Administrative reset of one (server, model) breaker.
    pub fn force_close_breaker(&self, server_id: &str, model: &str) {
        self.breakers.force_close(server_id, model);
    }

    /// Administrative passthrough: pull a model onto a backend.
    pub async fn pull_model(
        &self,
        server_id: &str,
        model: &str,
    ) -> Result<serde_json::Value, herd_core::HerdError> {
        let endpoint = self.admin_endpoint(server_id)?;
        self.proxy
            .pull_model(&endpoint, model, self.config.proxy.request_timeout)
            .await
            .map_err(|e| herd_core::HerdError::Backend {
                kind: e.kind,
                server_id: server_id.to_string(),
                model: model.to_string(),
                message: e.message,
            })
    }

    /// Administrative passthrough: delete a model from a backend.
    pub async fn delete_model(
        &self,
        server_id: &str,
        model: &str,
    ) -> Result<(), herd_core::HerdError> {
        let endpoint = self.admin_endpoint(server_id)?;
        self.proxy
            .delete_model(&endpoint, model, self.config.proxy.request_timeout)
            .await
            .map_err(|e| herd_core::HerdError::Backend {
                kind: e.kind,
                server_id: server_id.to_string(),
                model: model.to_string(),
                message: e.message,
            })
    }

    fn admin_endpoint(
        &self,
        server_id: &str,
    ) -> Result<herd_proxy::BackendEndpoint, herd_core::HerdError> {
        let server = self.registry.get(server_id).ok_or_else(|| {
            herd_core::HerdError::InternalState(format!("unknown server {server_id}"))
        })?;
        let mut endpoint = herd_proxy::BackendEndpoint::new(server_id, server.url);
        endpoint.api_key = server.api_key;
        Ok(endpoint)
    }

    // ------------------------------------------------------------------
    // Queue control
    // ------------------------------------------------------------------

    pub fn pause(&self) {
        self.queue.pause();
    }

    pub fn resume(&self) {
        self.queue.resume();
        self.pump_queue();
    }

    /// Waits for queued and in-flight work to finish, up to `timeout`.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.queue.drain(timeout).await
    }

    pub(crate) fn pump_queue(&self) {
        if self.config.enable_queue {
            let empty = std::collections::HashSet::new();
            self.queue
                .dequeue_matching(|ctx| !self.candidates_for(ctx, &empty, false).is_empty());
        }
    }

    // ------------------------------------------------------------------
    // Health-check control
    // ------------------------------------------------------------------

    /// Triggers one immediate main health-check cycle (admin surface).
    pub async fn run_health_check(&self) {
        self.scheduler.run_main_cycle().await;
    }

    /// Triggers one immediate recovery cycle over unhealthy servers.
    pub async fn run_recovery_check(&self) {
        self.scheduler.run_recovery_cycle().await;
    }

    // ------------------------------------------------------------------
    // Algorithm control
    // ------------------------------------------------------------------

    pub fn algorithm(&self) -> Algorithm {
        self.balancer.algorithm()
    }

    pub fn set_algorithm(&self, algorithm: Algorithm) {
        self.balancer.set_algorithm(algorithm);
    }

    // ------------------------------------------------------------------
    // Cooldowns
    // ------------------------------------------------------------------

    pub(crate) fn set_cooldown(&self, server_id: &str, model: &str) {
        let until = TokioInstant::now() + self.config.cooldown.failure_cooldown;
        self.cooldowns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((server_id.to_string(), model.to_string()), until);
    }

    pub(crate) fn in_cooldown(&self, server_id: &str, model: &str) -> bool {
        let key = (server_id.to_string(), model.to_string());
        let mut cooldowns = self.cooldowns.lock().unwrap_or_else(|e| e.into_inner());
        match cooldowns.get(&key) {
            Some(until) if TokioInstant::now() < *until => true,
            Some(_) => {
                cooldowns.remove(&key);
                false
            }
            None => false,
        }
    }

    // ------------------------------------------------------------------
    // Escalation
    // ------------------------------------------------------------------

    /// One evaluation round: servers whose open-breaker ratio has held past
    /// the configured duration are handed to health-check recovery.
    pub(crate) fn evaluate_escalation(&self) {
        let now = TokioInstant::now();
        for (server_id, (open, total)) in self.breakers.open_ratio_by_server() {
            if self
                .escalation
                .evaluate(&server_id, open, total, now.into_std())
            {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    server = %server_id,
                    open,
                    total,
                    "open-breaker ratio sustained, marking server unhealthy"
                );

                let _ = self.registry.set_healthy(&server_id, false);
                self.escalation.reset(&server_id);
            }
        }
    }

    // ------------------------------------------------------------------
    // Snapshot views for controllers
    // ------------------------------------------------------------------

    pub fn servers(&self) -> Vec<Server> {
        self.registry.snapshot()
    }

    pub fn server(&self, server_id: &str) -> Option<Server> {
        self.registry.get(server_id)
    }

    pub fn bans(&self) -> Vec<Ban> {
        self.registry.bans()
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshot_all()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn queue_items(&self) -> Vec<herd_queue::QueueItemSnapshot> {
        self.queue.items()
    }

    pub fn metrics_snapshot(&self, server_id: &str, model: &str) -> Option<ServerModelSnapshot> {
        self.metrics.snapshot(server_id, model)
    }

    pub fn metrics_snapshots(&self) -> HashMap<String, ServerModelSnapshot> {
        self.metrics.snapshot_all()
    }

    pub fn decisions(&self) -> Vec<DecisionEvent> {
        self.balancer.history().events()
    }

    pub fn requests(&self) -> HashMap<String, Vec<crate::history::RequestRecord>> {
        self.history.all()
    }

    pub fn scheduler_metrics(&self) -> SchedulerMetrics {
        self.scheduler.metrics()
    }

    pub fn recovery_failures(&self) -> Vec<RecoveryFailureRecord> {
        self.scheduler.failure_records()
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Restores registry and ban state; damaged or missing files start
    /// empty. The deduplicated server list is written straight back.
    pub(crate) async fn load_persisted(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let servers: Vec<Server> = store.load(SERVERS_FILE).await;
        if !servers.is_empty() {
            let kept = self.registry.load_persisted(servers);
            let _ = store.save(SERVERS_FILE, &kept).await;
        }
        let bans: Vec<Ban> = store.load(BANS_FILE).await;
        if !bans.is_empty() {
            self.registry.load_bans(bans);
        }
    }

    /// Writes every persisted set. Failures are logged per file and never
    /// propagate.
    pub async fn flush(&self) {
        let Some(store) = &self.store else {
            return;
        };

        let results = [
            store.save(SERVERS_FILE, &self.registry.snapshot()).await,
            store.save(BANS_FILE, &self.registry.bans()).await,
            store
                .save::<MetricsPersistedState>(METRICS_FILE, &self.metrics.export())
                .await,
            store
                .save::<DecisionHistoryPersisted>(DECISIONS_FILE, &self.balancer.history().export())
                .await,
            store
                .save::<RequestHistoryPersisted>(REQUESTS_FILE, &self.history.export())
                .await,
            store
                .save(RECOVERY_FILE, &self.export_recovery_failures())
                .await,
        ];
        for _result in results {
            #[cfg(feature = "tracing")]
            if let Err(e) = _result {
                tracing::warn!(error = %e, "persistence flush failed");
            }
        }
    }

    pub fn export_recovery_failures(&self) -> RecoveryFailuresPersisted {
        let records = self.scheduler.failure_records();
        let mut server_stats: HashMap<String, ServerRecoveryStats> = HashMap::new();
        for record in &records {
            let entry = server_stats.entry(record.server_id.clone()).or_default();
            entry.failures += 1;
            entry.last_failure = entry.last_failure.max(record.timestamp);
        }
        RecoveryFailuresPersisted {
            version: 1,
            timestamp: now_millis(),
            records,
            server_stats,
            circuit_breaker_transitions: self.breakers.transitions(),
        }
    }
}
