//! The queue runtime: publish path, storage poller, and worker pool.
//!
//! A [`Queue`] owns three kinds of concurrent activity, all communicating
//! through one bounded buffer channel:
//!
//! - publishers route tasks into the buffer (fast path) or to storage
//! - the poller leases due tasks out of storage and feeds the buffer
//! - workers drain the buffer and run consumers
//!
//! The buffer is the only shared mutable structure between them; because it
//! is bounded, consumer speed backpressures the poll rate end to end.

mod builder;
mod error;
mod poller;
mod publish;
mod worker;

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::models::{Consumer, Task};
use crate::storage::Storage;

pub use builder::QueueBuilder;
pub use error::QueueError;

/// Error type returned by a [`PreProcessor`] to reject a task.
pub type PreProcessorError = Box<dyn std::error::Error + Send + Sync>;

/// A global validator/mutator run on every task at publish time, before any
/// routing decision. Returning an error rejects the task outright; it is not
/// retried. Useful for centralized rules such as forcing priorities or
/// stamping common arguments.
pub type PreProcessor = Arc<dyn Fn(&mut Task) -> Result<(), PreProcessorError> + Send + Sync>;

/// A durable, priority-aware task queue with an in-memory fast path.
///
/// Create one with [`Queue::builder`]; clones share the same underlying
/// queue (workers hold clones of the handle). See the [crate docs](crate)
/// for an end-to-end example.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueCore>,
}

struct QueueCore {
    storage: Option<Arc<dyn Storage>>,
    consumers: Vec<Arc<dyn Consumer>>,
    pre_processor: Option<PreProcessor>,

    default_priority: i32,
    run_immediate_priority: i32,
    default_retry_max: i32,
    poll_storage: bool,
    poll_interval: std::time::Duration,

    /// Send side of the bounded buffer feeding the workers.
    buffer_tx: mpsc::Sender<Task>,

    /// One-shot shutdown signal; flipping it to `true` stops every loop at
    /// its next check. The receiver kept here is the prototype that loop
    /// tasks clone from.
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    /// Join handles for the spawned workers and poller, consumed by
    /// [`Queue::stop_and_join`].
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Queue {
    /// Starts building a queue. See [`QueueBuilder`] for the options and
    /// their defaults.
    #[must_use]
    pub fn builder() -> QueueBuilder {
        QueueBuilder::new()
    }

    /// Signals every worker and the poller to stop.
    ///
    /// Safe to call more than once. Workers finish their in-flight task
    /// first; nothing is interrupted mid-consumer. The buffer is *not*
    /// drained: memory-only tasks still queued are lost, which is the price
    /// of the storage-less fast path. Durable tasks are unaffected; their
    /// leases expire and another process (or the next run) picks them up.
    pub fn stop(&self) {
        self.inner.shutdown_tx.send_replace(true);
    }

    /// [`stop`](Self::stop), then waits for the workers and the poller to
    /// finish.
    pub async fn stop_and_join(&self) {
        self.stop();

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self
                .inner
                .handles
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard.drain(..).collect()
        };

        for handle in handles {
            let _ = handle.await;
        }
    }

    fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.inner.shutdown_rx.clone()
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("storage", &self.inner.storage.is_some())
            .field("consumers", &self.inner.consumers.len())
            .field("default_priority", &self.inner.default_priority)
            .field("run_immediate_priority", &self.inner.run_immediate_priority)
            .field("default_retry_max", &self.inner.default_retry_max)
            .field("poll_storage", &self.inner.poll_storage)
            .finish_non_exhaustive()
    }
}
