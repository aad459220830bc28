//! Admission control and drain semantics.

use herd_core::{Endpoint, HerdError, RequestContext};
use herd_queue::{QueueConfig, RequestQueue};
use std::sync::Arc;
use std::time::Duration;

fn queue(max_size: usize) -> Arc<RequestQueue> {
    Arc::new(RequestQueue::new(
        QueueConfig::builder()
            .max_size(max_size)
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap(),
    ))
}

fn ctx(id: &str) -> RequestContext {
    RequestContext::new(id, "m", Endpoint::Generate)
}

#[tokio::test]
async fn admission_rejects_only_past_capacity() {
    let queue = queue(2);
    let _a = queue.enqueue(ctx("a")).unwrap();
    let _b = queue.enqueue(ctx("b")).unwrap();
    assert!(matches!(
        queue.enqueue(ctx("c")),
        Err(HerdError::QueueFull { size: 2, max_size: 2 })
    ));

    // Freeing a slot re-opens admission.
    queue.dequeue();
    assert!(queue.enqueue(ctx("d")).is_ok());
}

#[tokio::test(start_paused = true)]
async fn waiters_reject_with_queue_timeout() {
    let queue = queue(5);
    let ticket = queue.enqueue(ctx("t")).unwrap();
    match ticket.wait().await {
        Err(HerdError::QueueTimeout { waited_ms }) => assert!(waited_ms >= 2_000),
        other => panic!("expected queue timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn drain_times_out_while_work_remains_then_succeeds() {
    let queue = queue(5);
    let ticket = queue.enqueue(ctx("t")).unwrap();
    assert!(!queue.drain(Duration::from_millis(20)).await);

    // Dequeue hands the item to its waiter; the queue itself is empty.
    queue.dequeue();
    let _ctx = ticket.wait().await.unwrap();
    assert!(queue.drain(Duration::from_millis(20)).await);
}

#[tokio::test]
async fn pause_blocks_dequeue_but_not_enqueue() {
    let queue = queue(5);
    queue.pause();
    let _ticket = queue.enqueue(ctx("p")).unwrap();
    assert!(queue.dequeue().is_none());
    assert_eq!(queue.stats().size, 1);

    queue.resume();
    assert_eq!(queue.dequeue().as_deref(), Some("p"));
}
