//! Durable storage contract and the embedded backends.
//!
//! The queue core depends on nothing but the [`Storage`] trait; any backend
//! that can upsert, delete, and lease task rows can sit behind it. Two
//! embedded backends ship with the crate:
//!
//! - [`MemoryStorage`] - process-local rows, full contract including
//!   signature dedup; the natural choice for tests and embedded use
//! - [`FilesystemStorage`] - one JSON file per task under a directory
//!
//! # Leases
//!
//! Multi-process safety rests entirely on the `(lock_id, timeout_date)` pair.
//! [`Storage::get_tasks`] atomically claims the next batch of due rows for
//! the caller by stamping a fresh `lock_id` and pushing `timeout_date` into
//! the future. A row is *due* when `start_date <= now` and its previous lease
//! has expired (`timeout_date < now`), so a crashed worker's tasks resurface
//! once their lease runs out. This yields at-least-once delivery; consumers
//! must be idempotent or use signatures.
//!
//! # Persisted layout
//!
//! Rows are the serde encoding of [`Task`](crate::Task): snake_case field
//! names, empty lease/error/signature fields omitted, and the publish-side
//! `async_delay` never written.

mod error;
mod filesystem;
mod memory;

use async_trait::async_trait;

use crate::models::Task;

pub use error::StorageError;
pub use filesystem::FilesystemStorage;
pub use memory::MemoryStorage;

/// A durable backend for queued tasks.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Upserts a task row, keyed by `task_id`; assigns a new id when the
    /// task does not have one yet.
    ///
    /// When the task carries a non-empty signature and a *different* row with
    /// the same signature already exists, the save must silently succeed
    /// without writing anything. Re-saving the same row (same `task_id`) is a
    /// normal upsert regardless of signature, so retry accounting stays
    /// durable.
    async fn save_task(&self, task: Task) -> Result<(), StorageError>;

    /// Removes a task row. Deleting an empty or unknown `task_id` is a no-op:
    /// an empty id means the task only ever lived in memory.
    async fn delete_task(&self, task_id: &str) -> Result<(), StorageError>;

    /// Removes every row carrying `signature`.
    ///
    /// Optional; backends that do not index by signature return
    /// [`StorageError::NotImplemented`].
    async fn delete_task_by_signature(&self, signature: &str) -> Result<(), StorageError>;

    /// Appends a permanently failed task to the failure log, which is kept
    /// separate from the queue rows.
    async fn log_failure(&self, task: Task) -> Result<(), StorageError>;

    /// Atomically leases the next batch of due tasks to the caller.
    ///
    /// Selection is ordered by priority (lower value first), then
    /// `start_date` ascending, limited to a backend-configured batch size.
    /// Returned rows have a fresh `lock_id`, `start_date` reset to now,
    /// `timeout_date` extended by the backend's lease duration, and the
    /// error text cleared.
    async fn get_tasks(&self) -> Result<Vec<Task>, StorageError>;
}

#[async_trait]
impl<S: Storage + ?Sized> Storage for std::sync::Arc<S> {
    async fn save_task(&self, task: Task) -> Result<(), StorageError> {
        (**self).save_task(task).await
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), StorageError> {
        (**self).delete_task(task_id).await
    }

    async fn delete_task_by_signature(&self, signature: &str) -> Result<(), StorageError> {
        (**self).delete_task_by_signature(signature).await
    }

    async fn log_failure(&self, task: Task) -> Result<(), StorageError> {
        (**self).log_failure(task).await
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, StorageError> {
        (**self).get_tasks().await
    }
}

/// Orders a candidate batch the way [`Storage::get_tasks`] must return it:
/// most urgent priority first, earliest `start_date` second.
pub(crate) fn sort_for_lease(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.start_date.cmp(&b.start_date))
    });
}

/// True when a row may be leased right now: it has reached its start date and
/// any previous lease has expired.
pub(crate) fn is_due(task: &Task, now: i64) -> bool {
    task.start_date <= now && task.timeout_date < now
}
