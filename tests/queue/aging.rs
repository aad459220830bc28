//! Aging keeps long waiters from starving.

use herd_core::{Endpoint, RequestContext};
use herd_queue::{QueueConfig, RequestQueue};
use std::sync::Arc;
use std::time::Duration;

fn ctx(id: &str, priority: u32) -> RequestContext {
    RequestContext::new(id, "m", Endpoint::Generate).priority(priority)
}

#[tokio::test(start_paused = true)]
async fn aged_low_priority_item_overtakes_fresh_high_priority() {
    let queue = Arc::new(RequestQueue::new(
        QueueConfig::builder()
            .max_size(10)
            .timeout(Duration::from_secs(600))
            .priority_boost_interval(Duration::from_secs(1))
            .priority_boost_amount(10)
            .max_priority(100)
            .build()
            .unwrap(),
    ));

    let _old = queue.enqueue(ctx("old", 0)).unwrap();
    // Six aging passes: old reaches priority 60.
    for _ in 0..6 {
        tokio::time::advance(Duration::from_millis(1_050)).await;
        queue.boost_pass();
    }
    let _fresh = queue.enqueue(ctx("fresh", 50)).unwrap();

    assert_eq!(queue.dequeue().as_deref(), Some("old"));
}

#[tokio::test(start_paused = true)]
async fn saturation_bound_holds() {
    let queue = Arc::new(RequestQueue::new(
        QueueConfig::builder()
            .max_size(10)
            .timeout(Duration::from_secs(600))
            .priority_boost_interval(Duration::from_secs(1))
            .priority_boost_amount(7)
            .max_priority(20)
            .build()
            .unwrap(),
    ));
    let _item = queue.enqueue(ctx("i", 0)).unwrap();

    // ceil(20 / 7) = 3 passes suffice to reach the ceiling.
    for _ in 0..3 {
        tokio::time::advance(Duration::from_millis(1_050)).await;
        queue.boost_pass();
    }
    assert_eq!(queue.items()[0].priority, 20);

    // Further passes never exceed it.
    tokio::time::advance(Duration::from_millis(1_050)).await;
    queue.boost_pass();
    assert_eq!(queue.items()[0].priority, 20);
}

#[tokio::test(start_paused = true)]
async fn aging_task_runs_on_its_own() {
    let queue = Arc::new(RequestQueue::new(
        QueueConfig::builder()
            .max_size(10)
            .timeout(Duration::from_secs(600))
            .priority_boost_interval(Duration::from_secs(1))
            .priority_boost_amount(5)
            .max_priority(100)
            .build()
            .unwrap(),
    ));
    queue.start_aging();
    let _item = queue.enqueue(ctx("bg", 0)).unwrap();

    // Three intervals of virtual time; the spawned task boosts on each.
    tokio::time::sleep(Duration::from_millis(3_200)).await;
    assert!(queue.items()[0].priority >= 10);
    queue.stop_aging();
}
