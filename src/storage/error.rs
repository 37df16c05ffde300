//! Error type shared by storage backends.

use thiserror::Error;

/// Errors surfaced by a storage backend.
///
/// The queue treats storage errors as recoverable: they are logged at the
/// call site and never take down a worker or the poller. Only the publish
/// path propagates them to the caller.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An underlying I/O operation failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A task row could not be encoded or decoded.
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend does not support this optional operation.
    #[error("{operation} is not implemented by this storage backend")]
    NotImplemented {
        /// Name of the unsupported operation.
        operation: &'static str,
    },

    /// A backend-specific failure.
    #[error("{0}")]
    Backend(String),
}

impl StorageError {
    /// Shorthand for [`StorageError::NotImplemented`].
    #[must_use]
    pub const fn not_implemented(operation: &'static str) -> Self {
        Self::NotImplemented { operation }
    }
}
