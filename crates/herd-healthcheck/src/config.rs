//! Health-check configuration.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HealthCheckConfigError {
    #[error("healthCheck.intervalMs must be >= 1s (got {0:?})")]
    Interval(Duration),
    #[error("healthCheck.timeoutMs must be >= 500ms (got {0:?})")]
    Timeout(Duration),
    #[error("healthCheck.maxConcurrentChecks must be >= 1")]
    MaxConcurrentChecks,
    #[error("healthCheck.retryDelayMs must be >= 1ms")]
    RetryDelay,
    #[error("healthCheck.recoveryIntervalMs must be >= 1s (got {0:?})")]
    RecoveryInterval(Duration),
    #[error("healthCheck.failureThreshold must be >= 1")]
    FailureThreshold,
    #[error("healthCheck.successThreshold must be >= 1")]
    SuccessThreshold,
    #[error("healthCheck.backoffMultiplier must be >= 1 (got {0})")]
    BackoffMultiplier(f64),
}

/// Configuration for [`crate::HealthScheduler`].
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    /// Main-loop cadence over all servers.
    pub interval: Duration,
    /// Per-probe deadline.
    pub timeout: Duration,
    pub max_concurrent_checks: usize,
    /// In-cycle retries for retryable probe failures.
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
    /// Recovery-loop cadence over unhealthy servers.
    pub recovery_interval: Duration,
    /// Consecutive probe failures before a server is marked unhealthy.
    pub failure_threshold: u32,
    /// Consecutive probe successes before an unhealthy server recovers.
    pub success_threshold: u32,
    /// Base deadline for the first active recovery test of a pair; doubles
    /// per test.
    pub test_timeout: Duration,
    /// Ceiling on the doubled recovery-test deadline.
    pub test_timeout_ceiling: Duration,
    /// Pause between main-loop probe batches.
    pub main_batch_delay: Duration,
    /// Pause between recovery-loop probe batches.
    pub recovery_batch_delay: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            max_concurrent_checks: 5,
            retry_attempts: 2,
            retry_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            recovery_interval: Duration::from_secs(60),
            failure_threshold: 3,
            success_threshold: 1,
            test_timeout: Duration::from_secs(120),
            test_timeout_ceiling: Duration::from_secs(15 * 60),
            main_batch_delay: Duration::from_millis(100),
            recovery_batch_delay: Duration::from_millis(500),
        }
    }
}

impl HealthCheckConfig {
    pub fn builder() -> HealthCheckConfigBuilder {
        HealthCheckConfigBuilder::default()
    }

    /// Concurrency for the recovery loop: bounded low so a large unhealthy
    /// segment cannot monopolize the checker.
    pub fn recovery_concurrency(&self) -> usize {
        self.max_concurrent_checks.min(2)
    }
}

/// Builder with validation for [`HealthCheckConfig`].
#[derive(Debug, Default)]
pub struct HealthCheckConfigBuilder {
    config: HealthCheckConfig,
}

impl HealthCheckConfigBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.config.enabled = enabled;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_concurrent_checks(mut self, max: usize) -> Self {
        self.config.max_concurrent_checks = max;
        self
    }

    pub fn retries(mut self, attempts: u32, delay: Duration, multiplier: f64) -> Self {
        self.config.retry_attempts = attempts;
        self.config.retry_delay = delay;
        self.config.backoff_multiplier = multiplier;
        self
    }

    pub fn recovery_interval(mut self, interval: Duration) -> Self {
        self.config.recovery_interval = interval;
        self
    }

    pub fn thresholds(mut self, failure: u32, success: u32) -> Self {
        self.config.failure_threshold = failure;
        self.config.success_threshold = success;
        self
    }

    pub fn test_timeout(mut self, base: Duration, ceiling: Duration) -> Self {
        self.config.test_timeout = base;
        self.config.test_timeout_ceiling = ceiling;
        self
    }

    pub fn build(self) -> Result<HealthCheckConfig, HealthCheckConfigError> {
        let c = &self.config;
        if c.interval < Duration::from_secs(1) {
            return Err(HealthCheckConfigError::Interval(c.interval));
        }
        if c.timeout < Duration::from_millis(500) {
            return Err(HealthCheckConfigError::Timeout(c.timeout));
        }
        if c.max_concurrent_checks < 1 {
            return Err(HealthCheckConfigError::MaxConcurrentChecks);
        }
        if c.retry_delay < Duration::from_millis(1) {
            return Err(HealthCheckConfigError::RetryDelay);
        }
        if c.recovery_interval < Duration::from_secs(1) {
            return Err(HealthCheckConfigError::RecoveryInterval(c.recovery_interval));
        }
        if c.failure_threshold < 1 {
            return Err(HealthCheckConfigError::FailureThreshold);
        }
        if c.success_threshold < 1 {
            return Err(HealthCheckConfigError::SuccessThreshold);
        }
        if c.backoff_multiplier < 1.0 {
            return Err(HealthCheckConfigError::BackoffMultiplier(c.backoff_multiplier));
        }
        Ok(self.config)
    }
}
