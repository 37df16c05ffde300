//! Worker loop, consumer dispatch, and result handling.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::{mpsc, watch};

use super::{Queue, QueueError};
use crate::models::{epoch_now, retry_backoff, Task, TaskResult};

/// One worker: receives tasks from the shared buffer and dispatches them
/// synchronously, one at a time. Exits when the buffer closes or the
/// shutdown signal is observed; an in-flight consumer is always allowed to
/// finish.
pub(super) async fn worker_loop(
    worker_id: usize,
    queue: Queue,
    buffer: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let received = {
            let mut buffer = buffer.lock().await;
            tokio::select! {
                _ = shutdown.changed() => continue,
                task = buffer.recv() => task,
            }
        };

        let Some(task) = received else {
            break;
        };

        let name = task.name.clone();
        if let Err(error) = queue.dispatch(task).await {
            tracing::error!(task = %name, %error, "task dispatch failed");
        }

        if *shutdown.borrow() {
            break;
        }
    }

    tracing::trace!(worker_id, "worker stopped");
}

impl Queue {
    /// Walks the consumer chain for one task and applies the outcome.
    ///
    /// Consumers run in registration order; `Ignored` moves on to the next
    /// one, anything else settles the task. When every consumer ignores the
    /// task this returns [`QueueError::NoConsumer`] and leaves the lease in
    /// place, so the row resurfaces after the lease expires (presumably in a
    /// process that does have a consumer for it).
    pub(super) async fn dispatch(&self, task: Task) -> Result<(), QueueError> {
        for consumer in &self.inner.consumers {
            let result = consumer.consume(&task.name, &task.arguments).await;
            tracing::trace!(task = %task.name, ?result, "task executed");

            match result {
                TaskResult::Ignored => {}
                TaskResult::Success => return self.on_task_success(task).await,
                TaskResult::Requeue(delay) => return self.on_task_requeue(task, delay).await,
                TaskResult::Error(message) => return self.on_task_error(task, message).await,
                TaskResult::Failure(message) => return self.on_task_failure(task, message).await,
            }
        }

        counter!("capstan.tasks.unroutable", "task" => task.name.clone()).increment(1);
        Err(QueueError::NoConsumer { name: task.name })
    }

    /// Success: clear the durable row. A memory-only task has no row, so its
    /// empty id makes the delete a no-op.
    async fn on_task_success(&self, task: Task) -> Result<(), QueueError> {
        tracing::debug!(task = %task.name, "task succeeded");
        counter!("capstan.tasks.completed", "task" => task.name.clone()).increment(1);

        if let Some(storage) = &self.inner.storage {
            if let Err(error) = storage.delete_task(&task.task_id).await {
                // The row outlives its lease and the task may run again;
                // consumers are required to tolerate at-least-once anyway.
                tracing::error!(task_id = %task.task_id, %error, "failed to delete completed task");
            }
        }

        Ok(())
    }

    /// Requeue: clear the durable row, then publish a fresh copy scheduled
    /// `delay` into the future. The copy starts over completely: new row,
    /// no lease, no error, zeroed retry count.
    async fn on_task_requeue(
        &self,
        mut task: Task,
        delay: std::time::Duration,
    ) -> Result<(), QueueError> {
        tracing::debug!(task = %task.name, delay_secs = delay.as_secs(), "task requeued");
        counter!("capstan.tasks.requeued", "task" => task.name.clone()).increment(1);

        if let Some(storage) = &self.inner.storage {
            if let Err(error) = storage.delete_task(&task.task_id).await {
                tracing::error!(task_id = %task.task_id, %error, "failed to delete requeued task");
            }
        }

        task.task_id.clear();
        task.lock_id.clear();
        task.error.clear();
        task.retry_count = 0;
        task.timeout_date = 0;
        task.delay(delay);

        self.publish(task).await
    }

    /// Retryable error: bump the retry counter and persist the row with a
    /// backed-off start date, or promote to permanent failure once the
    /// retry limit is exhausted.
    async fn on_task_error(&self, mut task: Task, message: String) -> Result<(), QueueError> {
        if task.retry_count + 1 > task.retry_max {
            return self.on_task_failure(task, message).await;
        }

        let Some(storage) = &self.inner.storage else {
            tracing::warn!(task = %task.name, error = %message, "cannot retry without storage; dropping task");
            return Ok(());
        };

        // The delay doubles with each attempt, starting at one minute.
        let backoff = retry_backoff(task.retry_count);
        task.retry_count += 1;
        task.error = message;
        #[allow(clippy::cast_possible_wrap)]
        let backoff_secs = backoff.as_secs() as i64;
        task.start_date = epoch_now() + backoff_secs;
        task.lock_id.clear();
        task.timeout_date = 0;

        tracing::debug!(
            task = %task.name,
            retry_count = task.retry_count,
            retry_max = task.retry_max,
            backoff_secs,
            "task failed; retry scheduled"
        );
        counter!("capstan.tasks.retried", "task" => task.name.clone()).increment(1);

        if let Err(error) = storage.save_task(task).await {
            tracing::error!(%error, "failed to persist retry state");
        }

        Ok(())
    }

    /// Permanent failure: append the task to the failure log, then clear the
    /// durable row.
    async fn on_task_failure(&self, mut task: Task, message: String) -> Result<(), QueueError> {
        tracing::warn!(task = %task.name, error = %message, "task failed permanently");
        counter!("capstan.tasks.failed", "task" => task.name.clone()).increment(1);

        let Some(storage) = &self.inner.storage else {
            return Ok(());
        };

        task.error = message;

        if let Err(error) = storage.log_failure(task.clone()).await {
            tracing::error!(task = %task.name, %error, "failed to write failure log");
        }
        if let Err(error) = storage.delete_task(&task.task_id).await {
            tracing::error!(task_id = %task.task_id, %error, "failed to delete failed task");
        }

        Ok(())
    }
}
