//! Queue configuration.

use crate::events::QueueEvent;
use herd_core::{EventListeners, FnListener};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueueConfigError {
    #[error("queue.maxSize must be >= 1 (got {0})")]
    MaxSize(usize),
    #[error("queue.timeout must be >= 1s (got {0:?})")]
    Timeout(Duration),
    #[error("queue.priorityBoostInterval must be >= 1s (got {0:?})")]
    BoostInterval(Duration),
    #[error("queue.priorityBoostAmount must be >= 1")]
    BoostAmount,
    #[error("queue.maxPriority must be >= 1")]
    MaxPriority,
}

/// Configuration for [`crate::RequestQueue`].
#[derive(Clone)]
pub struct QueueConfig {
    pub(crate) max_size: usize,
    /// Default wait deadline for items that carry none of their own.
    pub(crate) timeout: Duration,
    pub(crate) priority_boost_interval: Duration,
    pub(crate) priority_boost_amount: u32,
    pub(crate) max_priority: u32,
    /// Priority assigned to items that carry none of their own.
    pub(crate) default_priority: u32,
    pub(crate) event_listeners: EventListeners<QueueEvent>,
}

impl QueueConfig {
    pub fn builder() -> QueueConfigBuilder {
        QueueConfigBuilder::new()
    }

    pub fn max_priority(&self) -> u32 {
        self.max_priority
    }

    pub fn boost_interval(&self) -> Duration {
        self.priority_boost_interval
    }
}

/// Builder for [`QueueConfig`].
pub struct QueueConfigBuilder {
    config: QueueConfig,
}

impl Default for QueueConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: QueueConfig {
                max_size: 100,
                timeout: Duration::from_secs(60),
                priority_boost_interval: Duration::from_secs(10),
                priority_boost_amount: 5,
                max_priority: 100,
                default_priority: 0,
                event_listeners: EventListeners::new(),
            },
        }
    }

    /// Maximum queued items before admission rejects. Default: 100
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.max_size = max_size;
        self
    }

    /// Default wait deadline per item. Default: 60s
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Aging cadence. Default: 10s
    pub fn priority_boost_interval(mut self, interval: Duration) -> Self {
        self.config.priority_boost_interval = interval;
        self
    }

    /// Priority added per aging pass. Default: 5
    pub fn priority_boost_amount(mut self, amount: u32) -> Self {
        self.config.priority_boost_amount = amount;
        self
    }

    /// Priority ceiling. Default: 100
    pub fn max_priority(mut self, max: u32) -> Self {
        self.config.max_priority = max;
        self
    }

    /// Priority for items that specify none. Default: 0
    pub fn default_priority(mut self, priority: u32) -> Self {
        self.config.default_priority = priority;
        self
    }

    /// Registers a callback when admission rejects an item.
    pub fn on_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.config
            .event_listeners
            .add(FnListener::new(move |event| {
                if let QueueEvent::Rejected { depth, .. } = event {
                    f(*depth);
                }
            }));
        self
    }

    /// Registers a callback when a queued item times out.
    pub fn on_timed_out<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, Duration) + Send + Sync + 'static,
    {
        self.config
            .event_listeners
            .add(FnListener::new(move |event| {
                if let QueueEvent::TimedOut { id, waited, .. } = event {
                    f(id, *waited);
                }
            }));
        self
    }

    pub fn build(self) -> Result<QueueConfig, QueueConfigError> {
        let c = &self.config;
        if c.max_size < 1 {
            return Err(QueueConfigError::MaxSize(c.max_size));
        }
        if c.timeout < Duration::from_secs(1) {
            return Err(QueueConfigError::Timeout(c.timeout));
        }
        if c.priority_boost_interval < Duration::from_secs(1) {
            return Err(QueueConfigError::BoostInterval(c.priority_boost_interval));
        }
        if c.priority_boost_amount < 1 {
            return Err(QueueConfigError::BoostAmount);
        }
        if c.max_priority < 1 {
            return Err(QueueConfigError::MaxPriority);
        }
        Ok(self.config)
    }
}
