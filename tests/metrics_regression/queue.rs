//! Queue metric names.

use super::helpers::*;
use herd_core::{Endpoint, RequestContext};
use herd_queue::{QueueConfig, RequestQueue};
use serial_test::serial;
use std::sync::Arc;

#[tokio::test]
#[serial]
async fn queue_depth_and_rejection_metrics_exist() {
    init_recorder();

    let queue = Arc::new(RequestQueue::new(
        QueueConfig::builder().max_size(1).build().unwrap(),
    ));
    let _held = queue
        .enqueue(RequestContext::new("a", "m", Endpoint::Generate))
        .unwrap();
    let _ = queue.enqueue(RequestContext::new("b", "m", Endpoint::Generate));

    assert_gauge_exists("herd_queue_depth");
    assert_counter_exists("herd_queue_rejections_total");
}
