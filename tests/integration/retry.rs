//! A task that always errors retries with backoff, then fails permanently.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capstan::{Arguments, Queue, Task, TaskResult};

use crate::common::{counting_consumer, wait_until, Op, RecordingStorage};

#[tokio::test]
async fn test_retries_back_off_then_give_up() {
    crate::common::init_logging();
    let storage = RecordingStorage::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let queue = Queue::builder()
        .storage(Arc::clone(&storage))
        .poll_interval(Duration::from_millis(10))
        .worker_count(1)
        .consumer(counting_consumer(
            Arc::clone(&counter),
            TaskResult::error("boom"),
        ))
        .build();

    let published_at = chrono::Utc::now().timestamp();

    // Priority above the fast-path ceiling forces the durable path, so the
    // initial save is visible too.
    queue
        .publish(
            Task::new("flaky", Arguments::new())
                .with_priority(32)
                .with_retry_max(2),
        )
        .await
        .unwrap();

    let probe = Arc::clone(&storage);
    assert!(
        wait_until(Duration::from_secs(5), move || {
            probe.journal().contains(&Op::LogFailure)
        })
        .await,
        "task never reached permanent failure; journal: {:?}",
        storage.journal()
    );

    let probe = Arc::clone(&storage);
    assert!(
        wait_until(Duration::from_secs(1), move || probe.row_count() == 0).await
    );

    // Initial save, one save per retry, then the failure log and the delete.
    assert_eq!(
        storage.journal(),
        vec![Op::Save, Op::Save, Op::Save, Op::LogFailure, Op::Delete]
    );
    assert_eq!(counter.load(Ordering::SeqCst), 3);

    let saved = storage.saved();

    assert_eq!(saved[0].retry_count, 0);
    assert!(saved[0].error.is_empty());

    // First retry: counter incremented, error recorded, one minute backoff.
    assert_eq!(saved[1].retry_count, 1);
    assert_eq!(saved[1].error, "boom");
    assert!(saved[1].lock_id.is_empty());
    assert_eq!(saved[1].timeout_date, 0);
    assert!(saved[1].start_date >= published_at + 60);
    assert!(saved[1].start_date <= published_at + 75);

    // Second retry: two minute backoff.
    assert_eq!(saved[2].retry_count, 2);
    assert_eq!(saved[2].error, "boom");
    assert!(saved[2].start_date >= published_at + 120);
    assert!(saved[2].start_date <= published_at + 135);

    // The failure log carries the final error.
    let failures = storage.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].name, "flaky");
    assert_eq!(failures[0].error, "boom");

    queue.stop_and_join().await;
}
