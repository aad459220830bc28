//! The queue proper.

use crate::config::QueueConfig;
use crate::events::QueueEvent;
use herd_core::{HerdError, RequestContext};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::Instant as TokioInstant;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

struct Waiting {
    context: RequestContext,
    priority: u32,
    enqueued_at: TokioInstant,
    last_boost: TokioInstant,
    timeout: Duration,
    /// FIFO tiebreaker within a priority.
    seq: u64,
    tx: oneshot::Sender<RequestContext>,
}

struct Inner {
    items: Vec<Waiting>,
    paused: bool,
    in_flight: usize,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub size: usize,
    pub max_size: usize,
    pub in_flight: usize,
    pub paused: bool,
    pub highest_priority: Option<u32>,
    pub oldest_wait_ms: Option<u64>,
}

/// Read view of one queued item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItemSnapshot {
    pub id: String,
    pub model: String,
    pub priority: u32,
    pub waited_ms: u64,
}

/// Bounded priority queue with aging. See the crate docs for semantics.
pub struct RequestQueue {
    config: QueueConfig,
    inner: Mutex<Inner>,
    seq: AtomicU64,
    /// Signalled on every depth/in-flight change; `drain` waits on it.
    changed: Notify,
    aging_task: Mutex<Option<JoinHandle<()>>>,
}

impl RequestQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                items: Vec::new(),
                paused: false,
                in_flight: 0,
            }),
            seq: AtomicU64::new(0),
            changed: Notify::new(),
            aging_task: Mutex::new(None),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admits a request, returning a ticket that resolves when the item is
    /// dequeued for execution. Fails fast with `QueueFull` at capacity.
    pub fn enqueue(self: &Arc<Self>, context: RequestContext) -> Result<QueueTicket, HerdError> {
        let now = TokioInstant::now();
        let priority = context
            .priority
            .unwrap_or(self.config.default_priority)
            .min(self.config.max_priority);
        let id = context.id.clone();
        let timeout = self.config.timeout;
        let (tx, rx) = oneshot::channel();

        let depth = {
            let mut inner = self.lock();
            if inner.items.len() >= self.config.max_size {
                let depth = inner.items.len();
                drop(inner);
                self.config.event_listeners.emit(&QueueEvent::Rejected {
                    depth,
                    timestamp: Instant::now(),
                });

                #[cfg(feature = "metrics")]
                metrics::counter!("herd_queue_rejections_total").increment(1);

                return Err(HerdError::QueueFull {
                    size: depth,
                    max_size: self.config.max_size,
                });
            }
            inner.items.push(Waiting {
                context,
                priority,
                enqueued_at: now,
                last_boost: now,
                timeout,
                seq: self.seq.fetch_add(1, Ordering::Relaxed),
                tx,
            });
            inner.items.len()
        };

        #[cfg(feature = "metrics")]
        metrics::gauge!("herd_queue_depth").set(depth as f64);

        #[cfg(feature = "tracing")]
        tracing::debug!(request = %id, priority, depth, "request queued");

        self.config.event_listeners.emit(&QueueEvent::Enqueued {
            id: id.clone(),
            priority,
            depth,
            timestamp: Instant::now(),
        });
        self.changed.notify_waiters();

        Ok(QueueTicket {
            queue: Arc::clone(self),
            id,
            enqueued_at: now,
            timeout,
            rx,
        })
    }

    /// Hands the best waiting item to its ticket. Returns the dequeued
    /// request id, or `None` when paused or empty.
    ///
    /// Highest priority wins; FIFO within a priority; items whose ticket
    /// vanished (caller cancelled) are discarded on the way.
    pub fn dequeue(&self) -> Option<String> {
        self.dequeue_matching(|_| true)
    }

    /// Like [`dequeue`], but only considers items the predicate accepts;
    /// the pump uses it to wake only waiters that can actually be served.
    ///
    /// [`dequeue`]: RequestQueue::dequeue
    pub fn dequeue_matching<F>(&self, eligible: F) -> Option<String>
    where
        F: Fn(&RequestContext) -> bool,
    {
        loop {
            let (mut waiting, depth) = {
                let mut inner = self.lock();
                if inner.paused || inner.items.is_empty() {
                    return None;
                }
                let best = inner
                    .items
                    .iter()
                    .enumerate()
                    .filter(|(_, w)| eligible(&w.context))
                    .max_by(|(_, a), (_, b)| {
                        a.priority
                            .cmp(&b.priority)
                            .then(b.seq.cmp(&a.seq))
                    })
                    .map(|(i, _)| i)?;
                let waiting = inner.items.remove(best);
                (waiting, inner.items.len())
            };

            #[cfg(feature = "metrics")]
            metrics::gauge!("herd_queue_depth").set(depth as f64);

            let waited = waiting.enqueued_at.elapsed();
            let id = waiting.context.id.clone();
            waiting.context.queue_wait = Some(waited);
            // Aging boosts travel with the context so a re-enqueued item
            // keeps its earned priority.
            waiting.context.priority = Some(waiting.priority);
            match waiting.tx.send(waiting.context) {
                Ok(()) => {
                    self.config.event_listeners.emit(&QueueEvent::Dequeued {
                        id: id.clone(),
                        waited,
                        depth,
                        timestamp: Instant::now(),
                    });
                    self.changed.notify_waiters();
                    return Some(id);
                }
                // Receiver gone: the waiter timed out or was cancelled
                // between our scan and the send. Try the next item.
                Err(_) => {
                    self.changed.notify_waiters();
                    continue;
                }
            }
        }
    }

    /// Removes a waiting item by id (ticket timeout or cancellation).
    fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut inner = self.lock();
            let before = inner.items.len();
            inner.items.retain(|w| w.context.id != id);
            before != inner.items.len()
        };
        if removed {
            self.changed.notify_waiters();
        }
        removed
    }

    /// One aging pass: boosts every item whose boost interval elapsed.
    /// Priorities only ever rise, saturating at the configured maximum.
    pub fn boost_pass(&self) {
        let now = TokioInstant::now();
        let boosted: Vec<(String, u32)> = {
            let mut inner = self.lock();
            let interval = self.config.priority_boost_interval;
            let amount = self.config.priority_boost_amount;
            let max = self.config.max_priority;
            inner
                .items
                .iter_mut()
                .filter(|w| now.duration_since(w.last_boost) >= interval)
                .map(|w| {
                    w.priority = (w.priority + amount).min(max);
                    w.last_boost = now;
                    (w.context.id.clone(), w.priority)
                })
                .collect()
        };
        for (id, priority) in boosted {
            self.config.event_listeners.emit(&QueueEvent::Boosted {
                id,
                priority,
                timestamp: Instant::now(),
            });
        }
    }

    /// Spawns the periodic aging task. Idempotent; `stop_aging` aborts it.
    pub fn start_aging(self: &Arc<Self>) {
        let mut slot = self
            .aging_task
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return;
        }
        let queue = Arc::clone(self);
        let interval = self.config.priority_boost_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                queue.boost_pass();
            }
        }));
    }

    pub fn stop_aging(&self) {
        if let Some(task) = self
            .aging_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }

    pub fn pause(&self) {
        self.lock().paused = true;
        self.config.event_listeners.emit(&QueueEvent::Paused {
            timestamp: Instant::now(),
        });
    }

    pub fn resume(&self) {
        self.lock().paused = false;
        self.config.event_listeners.emit(&QueueEvent::Resumed {
            timestamp: Instant::now(),
        });
        self.changed.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Marks one request as executing; paired with [`task_finished`].
    ///
    /// [`task_finished`]: RequestQueue::task_finished
    pub fn task_started(&self) {
        self.lock().in_flight += 1;
    }

    pub fn task_finished(&self) {
        let mut inner = self.lock();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        drop(inner);
        self.changed.notify_waiters();
    }

    /// Waits until the queue and in-flight set are both empty, or `timeout`
    /// elapses. Returns whether the drain completed.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Arm the notification before checking, so a change between the
            // check and the wait is not lost.
            let notified = self.changed.notified();
            {
                let inner = self.lock();
                if inner.items.is_empty() && inner.in_flight == 0 {
                    return true;
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let inner = self.lock();
                return inner.items.is_empty() && inner.in_flight == 0;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        QueueStats {
            size: inner.items.len(),
            max_size: self.config.max_size,
            in_flight: inner.in_flight,
            paused: inner.paused,
            highest_priority: inner.items.iter().map(|w| w.priority).max(),
            oldest_wait_ms: inner
                .items
                .iter()
                .map(|w| w.enqueued_at.elapsed().as_millis() as u64)
                .max(),
        }
    }

    pub fn items(&self) -> Vec<QueueItemSnapshot> {
        let inner = self.lock();
        let mut items: Vec<_> = inner
            .items
            .iter()
            .map(|w| QueueItemSnapshot {
                id: w.context.id.clone(),
                model: w.context.model.clone(),
                priority: w.priority,
                waited_ms: w.enqueued_at.elapsed().as_millis() as u64,
            })
            .collect();
        items.sort_by(|a, b| b.priority.cmp(&a.priority));
        items
    }
}

/// The waiter half of an enqueued request.
pub struct QueueTicket {
    queue: Arc<RequestQueue>,
    id: String,
    enqueued_at: TokioInstant,
    timeout: Duration,
    rx: oneshot::Receiver<RequestContext>,
}

impl std::fmt::Debug for QueueTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueTicket").field("id", &self.id).finish()
    }
}

impl QueueTicket {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolves when the item is dequeued for execution, or fails with
    /// `QueueTimeout` after the item's deadline.
    pub async fn wait(self) -> Result<RequestContext, HerdError> {
        match tokio::time::timeout(self.timeout, self.rx).await {
            Ok(Ok(context)) => Ok(context),
            // Sender dropped without a send: the queue vanished.
            Ok(Err(_)) => Err(HerdError::Cancelled),
            Err(_) => {
                let waited = self.enqueued_at.elapsed();
                self.queue.remove(&self.id);
                self.queue
                    .config
                    .event_listeners
                    .emit(&QueueEvent::TimedOut {
                        id: self.id.clone(),
                        waited,
                        timestamp: Instant::now(),
                    });

                #[cfg(feature = "metrics")]
                metrics::counter!("herd_queue_timeouts_total").increment(1);

                Err(HerdError::QueueTimeout {
                    waited_ms: waited.as_millis() as u64,
                })
            }
        }
    }
}
