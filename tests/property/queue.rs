//! Property tests for queue aging.
//!
//! Invariant: no item needs more than ceil(maxPriority / boostAmount)
//! aging passes to reach the priority ceiling, and priorities never
//! decrease while queued.

use herd_core::{Endpoint, RequestContext};
use herd_queue::{QueueConfig, RequestQueue};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Builder;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn aging_reaches_the_ceiling_within_the_bound(
        boost_amount in 1u32..50,
        max_priority in 1u32..200,
        start_priority in 0u32..50,
    ) {
        let rt = Builder::new_current_thread().enable_time().build().unwrap();
        rt.block_on(async {
            tokio::time::pause();
            let queue = Arc::new(RequestQueue::new(
                QueueConfig::builder()
                    .max_size(4)
                    .timeout(Duration::from_secs(3_600))
                    .priority_boost_interval(Duration::from_secs(1))
                    .priority_boost_amount(boost_amount)
                    .max_priority(max_priority)
                    .build()
                    .unwrap(),
            ));
            let ctx = RequestContext::new("i", "m", Endpoint::Generate).priority(start_priority);
            let _ticket = queue.enqueue(ctx).unwrap();

            let bound = max_priority.div_ceil(boost_amount);
            let mut previous = queue.items()[0].priority;
            for _ in 0..bound {
                tokio::time::advance(Duration::from_millis(1_050)).await;
                queue.boost_pass();
                let current = queue.items()[0].priority;
                prop_assert!(current >= previous, "priority decreased");
                previous = current;
            }
            prop_assert_eq!(queue.items()[0].priority, max_priority);
            Ok(())
        })?;
    }
}
