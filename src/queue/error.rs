//! Error types for queue operations.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors surfaced by publishing, scheduling, and dispatch.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The configured preprocessor rejected the task; it was neither
    /// buffered nor stored, and will not be retried.
    #[error("task rejected by preprocessor")]
    Rejected {
        /// The preprocessor's reason for rejecting the task.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The operation needs a durable backend and none is configured.
    #[error("a storage backend is required for this operation")]
    StorageRequired,

    /// Every registered consumer ignored the task. The lease is deliberately
    /// left in place so another process can pick the task up after it
    /// expires; fixing this requires deploying a consumer for the name.
    #[error("no consumer recognized task {name:?}")]
    NoConsumer {
        /// Name of the unroutable task.
        name: String,
    },

    /// The storage backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The in-memory buffer is gone; the queue has shut down.
    #[error("queue buffer is closed")]
    BufferClosed,
}
