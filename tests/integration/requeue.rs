//! Requeue cycles: delete, reset, republish with a fresh start date.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capstan::{Arguments, Queue, Task, TaskResult};

use crate::common::{wait_until, Op, RecordingStorage};

#[tokio::test]
async fn test_requeue_cycles_then_success() {
    crate::common::init_logging();
    let storage = RecordingStorage::new();
    let invocations = Arc::new(AtomicUsize::new(0));

    let probe = Arc::clone(&invocations);
    let queue = Queue::builder()
        .storage(Arc::clone(&storage))
        .poll_interval(Duration::from_millis(10))
        .worker_count(1)
        .consumer(move |_: &str, _: &Arguments| {
            if probe.fetch_add(1, Ordering::SeqCst) < 3 {
                TaskResult::requeue(Duration::from_secs(5))
            } else {
                TaskResult::Success
            }
        })
        .build();

    let published_at = chrono::Utc::now().timestamp();
    queue.publish(Task::new("tick", Arguments::new())).await.unwrap();

    let probe = Arc::clone(&invocations);
    assert!(
        wait_until(Duration::from_secs(5), move || {
            probe.load(Ordering::SeqCst) == 4
        })
        .await,
        "expected 4 invocations, saw {}; journal: {:?}",
        invocations.load(Ordering::SeqCst),
        storage.journal()
    );

    let probe = Arc::clone(&storage);
    assert!(wait_until(Duration::from_secs(1), move || probe.row_count() == 0).await);

    // The first dispatch came straight off the fast path (no initial save).
    // Each requeue is a delete followed by a fresh save; the final success
    // is one more delete.
    assert_eq!(
        storage.journal(),
        vec![
            Op::Delete,
            Op::Save,
            Op::Delete,
            Op::Save,
            Op::Delete,
            Op::Save,
            Op::Delete,
        ]
    );

    // Every requeued copy starts over: no id yet, clean retry state, and a
    // start date pushed out by the requested delay.
    for row in storage.saved() {
        assert!(row.task_id.is_empty());
        assert!(row.lock_id.is_empty());
        assert!(row.error.is_empty());
        assert_eq!(row.retry_count, 0);
        assert_eq!(row.timeout_date, 0);
        assert!(row.start_date >= published_at + 4);
        assert!(row.start_date <= chrono::Utc::now().timestamp() + 6);
    }

    queue.stop_and_join().await;
}
