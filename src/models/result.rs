//! Consumer outcomes and the consumer contract.

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;

use super::Arguments;

/// The outcome a consumer reports for one task dispatch.
///
/// `Ignored` means the consumer did not recognize the task and the next
/// registered consumer should be tried. The remaining variants stop the
/// dispatch chain and determine what happens to the task:
///
/// - `Success` removes the task from durable storage.
/// - `Requeue` removes the task, then publishes a fresh copy scheduled
///   `delay` into the future.
/// - `Error` schedules a retry with exponential backoff, until the task's
///   retry limit is exhausted.
/// - `Failure` writes the task to the failure log and removes it; no retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskResult {
    /// The consumer does not handle tasks with this name.
    Ignored,
    /// The task completed and should be removed.
    Success,
    /// The task completed and a fresh copy should run again after `delay`.
    Requeue(Duration),
    /// The task failed but can be retried.
    Error(String),
    /// The task failed and must not be retried.
    Failure(String),
}

impl TaskResult {
    /// Builds a retryable [`TaskResult::Error`] from any displayable cause.
    pub fn error(cause: impl Display) -> Self {
        Self::Error(cause.to_string())
    }

    /// Builds a permanent [`TaskResult::Failure`] from any displayable cause.
    pub fn failure(cause: impl Display) -> Self {
        Self::Failure(cause.to_string())
    }

    /// Builds a [`TaskResult::Requeue`] that reruns the task after `delay`.
    #[must_use]
    pub const fn requeue(delay: Duration) -> Self {
        Self::Requeue(delay)
    }

    /// True for the outcomes that release the task's lease: `Success` and
    /// `Requeue`.
    #[must_use]
    pub const fn is_successful(&self) -> bool {
        matches!(self, Self::Success | Self::Requeue(_))
    }
}

/// A function registered with the queue that may handle tasks by name.
///
/// Consumers are tried in registration order; returning
/// [`TaskResult::Ignored`] passes the task to the next one. A consumer may
/// block as long as it needs to, but every blocked consumer occupies one
/// worker slot.
///
/// Plain closures of the shape `Fn(&str, &Arguments) -> TaskResult` implement
/// this trait automatically:
///
/// ```
/// use capstan::{Arguments, TaskResult};
///
/// let consumer = |name: &str, _args: &Arguments| match name {
///     "send_email" => TaskResult::Success,
///     _ => TaskResult::Ignored,
/// };
/// # let _ = consumer;
/// ```
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Attempts to handle one task.
    async fn consume(&self, name: &str, arguments: &Arguments) -> TaskResult;
}

#[async_trait]
impl<F> Consumer for F
where
    F: Fn(&str, &Arguments) -> TaskResult + Send + Sync,
{
    async fn consume(&self, name: &str, arguments: &Arguments) -> TaskResult {
        self(name, arguments)
    }
}
