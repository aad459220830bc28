//! The composed configuration the engine is constructed from.

use herd_balancer::{Algorithm, BalancerConfig, BalancerConfigError};
use herd_circuitbreaker::{CircuitBreakerConfig, CircuitBreakerConfigError};
use herd_healthcheck::{HealthCheckConfig, HealthCheckConfigError};
use herd_metrics::{MetricsConfig, MetricsConfigError};
use herd_proxy::{ProxyConfig, StreamingConfigError};
use herd_queue::{QueueConfig, QueueConfigError};
use herd_store::StoreConfig;
use std::time::Duration;
use thiserror::Error;

/// Any subsystem config rejection, surfaced as a startup error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Queue(#[from] QueueConfigError),
    #[error(transparent)]
    CircuitBreaker(#[from] CircuitBreakerConfigError),
    #[error(transparent)]
    Metrics(#[from] MetricsConfigError),
    #[error(transparent)]
    Balancer(#[from] BalancerConfigError),
    #[error(transparent)]
    HealthCheck(#[from] HealthCheckConfigError),
    #[error(transparent)]
    Streaming(#[from] StreamingConfigError),
    #[error("http client initialization failed: {0}")]
    HttpClient(String),
    #[error("retry.backoffMultiplier must be >= 1 (got {0})")]
    RetryBackoffMultiplier(f64),
    #[error("cooldown.defaultMaxConcurrency must be >= 1")]
    DefaultMaxConcurrency,
    #[error("unknown logLevel {0:?}")]
    LogLevel(String),
}

/// Process-wide log level, as delivered by the configuration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(ConfigError::LogLevel(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// In-request retry policy (same-server retries on transient failures).
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries_per_server: u32,
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_retry_delay: Duration,
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries_per_server: 2,
            retry_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_retry_delay: Duration::from_secs(10),
            retryable_status_codes: vec![502, 503, 504],
        }
    }
}

/// Post-failure cooldown and the fleet-wide concurrency default.
#[derive(Debug, Clone, PartialEq)]
pub struct CooldownConfig {
    /// How long a failed (server, model) pair stays out of selection.
    pub failure_cooldown: Duration,
    /// Concurrency ceiling for servers that configure none.
    pub default_max_concurrency: u32,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            failure_cooldown: Duration::from_secs(30),
            default_max_concurrency: 4,
        }
    }
}

/// Everything the engine needs, validated before construction.
pub struct OrchestratorConfig {
    pub host: String,
    pub port: u16,
    pub log_level: LogLevel,

    pub enable_queue: bool,
    pub enable_circuit_breaker: bool,
    pub enable_metrics: bool,
    pub enable_streaming: bool,
    pub enable_persistence: bool,

    pub algorithm: Algorithm,
    pub queue: QueueConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub metrics: MetricsConfig,
    pub balancer: BalancerConfig,
    pub health: HealthCheckConfig,
    pub proxy: ProxyConfig,
    pub retry: RetryConfig,
    pub cooldown: CooldownConfig,
    /// Present only when persistence is enabled.
    pub store: Option<StoreConfig>,
    /// Cadence of the periodic persistence flush.
    pub persistence_flush_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3_000,
            log_level: LogLevel::default(),
            enable_queue: true,
            enable_circuit_breaker: true,
            enable_metrics: true,
            enable_streaming: true,
            enable_persistence: false,
            algorithm: Algorithm::default(),
            queue: QueueConfig::builder()
                .build()
                .unwrap_or_else(|_| unreachable!("default queue config validates")),
            circuit_breaker: CircuitBreakerConfig::builder()
                .build()
                .unwrap_or_else(|_| unreachable!("default breaker config validates")),
            metrics: MetricsConfig::default(),
            balancer: BalancerConfig::default(),
            health: HealthCheckConfig::default(),
            proxy: ProxyConfig::default(),
            retry: RetryConfig::default(),
            cooldown: CooldownConfig::default(),
            store: None,
            persistence_flush_interval: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    /// Cross-field validation on top of what the subsystem builders already
    /// enforced.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::RetryBackoffMultiplier(
                self.retry.backoff_multiplier,
            ));
        }
        if self.cooldown.default_max_concurrency < 1 {
            return Err(ConfigError::DefaultMaxConcurrency);
        }
        self.proxy.streaming.validate()?;
        Ok(())
    }
}
