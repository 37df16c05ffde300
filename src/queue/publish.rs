//! The publish path: routing tasks into the buffer or durable storage.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;

use super::{Queue, QueueError};
use crate::models::{epoch_now, Task};

/// Boxes a recursive `publish` call so the compiler can resolve the
/// `Send`-ness of the returned future without cycling through the opaque
/// `async fn` type of `publish` itself.
fn publish_boxed(
    queue: Queue,
    task: Task,
) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send>> {
    Box::pin(async move { queue.publish(task).await })
}

impl Queue {
    /// Publishes a task.
    ///
    /// On success the task is in exactly one of three places: the in-memory
    /// buffer (fast path), durable storage, or a background task waiting out
    /// its [`async_delay`](Task::async_delay).
    ///
    /// The steps, in order:
    ///
    /// 1. The preprocessor runs, if configured; an error rejects the task.
    /// 2. A non-zero `async_delay` detaches the rest of the publish into a
    ///    background task and returns immediately. Errors after that point
    ///    are logged, not returned; there is intentionally no channel back
    ///    to the publisher.
    /// 3. The `-1` sentinels are replaced with the queue defaults.
    /// 4. With no storage configured, the task is sent to the buffer. This
    ///    blocks while the buffer is full; that is the backpressure point of
    ///    the memory-only configuration. Start-date delays are not honored
    ///    on this path.
    /// 5. A task eligible to run immediately (no signature, not scheduled in
    ///    the future, priority within the fast-path ceiling) is offered to
    ///    the buffer without blocking; if the buffer is full, it falls
    ///    through to storage.
    /// 6. Everything else is saved to storage.
    ///
    /// # Errors
    ///
    /// [`QueueError::Rejected`] from the preprocessor, or any error from the
    /// storage save.
    pub async fn publish(&self, mut task: Task) -> Result<(), QueueError> {
        if let Some(pre_processor) = &self.inner.pre_processor {
            pre_processor(&mut task).map_err(|source| QueueError::Rejected { source })?;
        }

        if task.async_delay > 0 {
            let delay = Duration::from_millis(task.async_delay);
            task.async_delay = 0;
            let queue = self.clone();

            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                // Boxing through this helper breaks the publish -> spawn -> publish type cycle.
                if let Err(error) = publish_boxed(queue, task).await {
                    tracing::error!(%error, "background publish failed");
                }
            });

            return Ok(());
        }

        if task.priority == -1 {
            task.priority = self.inner.default_priority;
        }
        if task.retry_max == -1 {
            task.retry_max = self.inner.default_retry_max;
        }

        let Some(storage) = &self.inner.storage else {
            tracing::trace!(task = %task.name, "no storage configured; queueing task in memory");
            return self
                .inner
                .buffer_tx
                .send(task)
                .await
                .map_err(|_| QueueError::BufferClosed);
        };

        if self.allow_immediate(&task) {
            match self.inner.buffer_tx.try_send(task) {
                Ok(()) => {
                    tracing::trace!("buffer available; task queued in memory");
                    return Ok(());
                }
                Err(TrySendError::Full(rejected)) => {
                    tracing::trace!(task = %rejected.name, "buffer full; writing task to storage");
                    task = rejected;
                }
                Err(TrySendError::Closed(_)) => return Err(QueueError::BufferClosed),
            }
        }

        storage.save_task(task).await?;
        Ok(())
    }

    /// Publishes a task that runs `delay` from now.
    ///
    /// Unlike a plain publish of a delayed task, this never touches the
    /// buffer and never falls back to it: the row goes straight to storage.
    ///
    /// # Errors
    ///
    /// [`QueueError::StorageRequired`] when no backend is configured, or any
    /// error from the storage save.
    pub async fn schedule(&self, mut task: Task, delay: Duration) -> Result<(), QueueError> {
        let Some(storage) = &self.inner.storage else {
            return Err(QueueError::StorageRequired);
        };

        task.delay(delay);
        storage.save_task(task).await?;
        Ok(())
    }

    /// Cancels pending tasks by signature.
    ///
    /// # Errors
    ///
    /// [`QueueError::StorageRequired`] when no backend is configured;
    /// [`StorageError::NotImplemented`](crate::StorageError::NotImplemented)
    /// when the backend does not index by signature.
    pub async fn delete(&self, signature: &str) -> Result<(), QueueError> {
        let Some(storage) = &self.inner.storage else {
            return Err(QueueError::StorageRequired);
        };

        storage.delete_task_by_signature(signature).await?;
        Ok(())
    }

    /// True when the task may skip storage and go straight to the buffer: no
    /// dedup signature (dedup requires a durable row), not scheduled in the
    /// future, and priority within the configured ceiling.
    fn allow_immediate(&self, task: &Task) -> bool {
        if !task.signature.is_empty() {
            return false;
        }
        if task.start_date > epoch_now() {
            return false;
        }
        task.priority <= self.inner.run_immediate_priority
    }
}
