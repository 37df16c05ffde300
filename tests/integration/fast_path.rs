//! Memory-only dispatch and fast-path eligibility.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capstan::{Arguments, Queue, Task, TaskResult};

use crate::common::{counting_consumer, wait_until, RecordingStorage};

#[tokio::test]
async fn test_memory_only_queue_runs_every_task() {
    crate::common::init_logging();
    let counter = Arc::new(AtomicUsize::new(0));
    let queue = Queue::builder()
        .consumer(counting_consumer(Arc::clone(&counter), TaskResult::Success))
        .build();

    for _ in 0..1000 {
        queue
            .publish(Task::new("", Arguments::new()))
            .await
            .expect("memory-only publish never fails");
    }

    let probe = Arc::clone(&counter);
    assert!(
        wait_until(Duration::from_secs(10), move || {
            probe.load(Ordering::SeqCst) == 1000
        })
        .await,
        "expected 1000 invocations, saw {}",
        counter.load(Ordering::SeqCst)
    );

    queue.stop_and_join().await;
}

#[tokio::test]
async fn test_single_worker_single_slot_buffer_drains() {
    crate::common::init_logging();
    let counter = Arc::new(AtomicUsize::new(0));
    let queue = Queue::builder()
        .worker_count(1)
        .buffer_size(1)
        .consumer(counting_consumer(Arc::clone(&counter), TaskResult::Success))
        .build();

    // Publishing blocks whenever the one-slot buffer is full, so this loop
    // doubles as a backpressure test.
    for i in 0..1000 {
        queue
            .publish(Task::new(format!("task-{i}"), Arguments::new()))
            .await
            .unwrap();
    }

    let probe = Arc::clone(&counter);
    assert!(
        wait_until(Duration::from_secs(10), move || {
            probe.load(Ordering::SeqCst) == 1000
        })
        .await
    );
    assert_eq!(counter.load(Ordering::SeqCst), 1000);

    queue.stop_and_join().await;
}

#[tokio::test]
async fn test_eligible_task_is_never_saved_while_buffer_has_room() {
    crate::common::init_logging();
    let storage = RecordingStorage::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let queue = Queue::builder()
        .storage(Arc::clone(&storage))
        .poll_storage(false)
        .consumer(counting_consumer(Arc::clone(&counter), TaskResult::Success))
        .build();

    for _ in 0..10 {
        queue.publish(Task::new("quick", Arguments::new())).await.unwrap();
    }

    let probe = Arc::clone(&counter);
    assert!(
        wait_until(Duration::from_secs(5), move || {
            probe.load(Ordering::SeqCst) == 10
        })
        .await
    );

    // Every task fit in the buffer, so nothing was ever written durably.
    let saves = storage
        .journal()
        .into_iter()
        .filter(|op| *op == crate::common::Op::Save)
        .count();
    assert_eq!(saves, 0);

    queue.stop_and_join().await;
}

/// Holds every dispatch until the gate opens, without blocking the runtime.
struct GatedConsumer {
    gate: Arc<tokio::sync::Semaphore>,
}

#[async_trait::async_trait]
impl capstan::Consumer for GatedConsumer {
    async fn consume(&self, _name: &str, _arguments: &Arguments) -> TaskResult {
        let _permit = self.gate.acquire().await;
        TaskResult::Success
    }
}

#[tokio::test]
async fn test_full_buffer_overflows_to_storage() {
    crate::common::init_logging();
    let storage = RecordingStorage::new();
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let queue = Queue::builder()
        .storage(Arc::clone(&storage))
        .poll_storage(false)
        .worker_count(1)
        .buffer_size(1)
        .consumer(GatedConsumer {
            gate: Arc::clone(&gate),
        })
        .build();

    // One worker is parked on the gate and the single buffer slot fills, so
    // publishing enough eligible tasks must spill some of them to storage.
    for _ in 0..4 {
        queue.publish(Task::new("spill", Arguments::new())).await.unwrap();
    }

    assert!(storage.row_count() >= 1);

    gate.add_permits(8);
    queue.stop_and_join().await;
}
