//! Queue construction.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use super::{poller, worker, PreProcessor, PreProcessorError, Queue, QueueCore};
use crate::models::{Consumer, Task};
use crate::storage::Storage;

const DEFAULT_WORKER_COUNT: usize = 16;
const DEFAULT_BUFFER_SIZE: usize = 32;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_PRIORITY: i32 = 16;
const DEFAULT_RUN_IMMEDIATE_PRIORITY: i32 = 16;

// Eight doublings of the one-minute base delay: the last retry waits 256
// minutes, and a task burns roughly eight and a half hours before failing
// permanently.
const DEFAULT_RETRY_MAX: i32 = 8;

/// Configures and starts a [`Queue`].
///
/// All options have working defaults; `Queue::builder().build()` yields a
/// memory-only queue with sixteen workers. With no storage configured, the
/// queue cannot persist, dedup, or retry tasks, but publish and dispatch
/// work the same way.
///
/// ```no_run
/// use capstan::{Arguments, Queue, TaskResult};
///
/// # async fn example() {
/// let queue = Queue::builder()
///     .consumer(|name: &str, _args: &Arguments| match name {
///         "send_email" => TaskResult::Success,
///         _ => TaskResult::Ignored,
///     })
///     .worker_count(4)
///     .build();
/// # let _ = queue;
/// # }
/// ```
#[must_use]
pub struct QueueBuilder {
    storage: Option<Arc<dyn Storage>>,
    consumers: Vec<Arc<dyn Consumer>>,
    pre_processor: Option<PreProcessor>,
    worker_count: usize,
    buffer_size: usize,
    poll_storage: bool,
    poll_interval: Duration,
    default_priority: i32,
    run_immediate_priority: i32,
    default_retry_max: i32,
}

impl QueueBuilder {
    pub(super) fn new() -> Self {
        Self {
            storage: None,
            consumers: Vec::new(),
            pre_processor: None,
            worker_count: DEFAULT_WORKER_COUNT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            poll_storage: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            default_priority: DEFAULT_PRIORITY,
            run_immediate_priority: DEFAULT_RUN_IMMEDIATE_PRIORITY,
            default_retry_max: DEFAULT_RETRY_MAX,
        }
    }

    /// Sets the durable backend. Without one the queue runs memory-only:
    /// every published task goes straight to the buffer and nothing survives
    /// a restart.
    pub fn storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Registers a consumer. Consumers are tried in registration order until
    /// one returns something other than [`TaskResult::Ignored`](crate::TaskResult::Ignored).
    pub fn consumer(mut self, consumer: impl Consumer + 'static) -> Self {
        self.consumers.push(Arc::new(consumer));
        self
    }

    /// Sets the preprocessor run on every task at publish time.
    pub fn pre_processor(
        mut self,
        pre_processor: impl Fn(&mut Task) -> Result<(), PreProcessorError> + Send + Sync + 'static,
    ) -> Self {
        self.pre_processor = Some(Arc::new(pre_processor));
        self
    }

    /// Number of concurrent workers. Defaults to 16.
    pub fn worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    /// Capacity of the in-memory buffer between publishers/poller and the
    /// workers. Defaults to 32.
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Enables or disables the storage poller. Defaults to enabled. Disable
    /// it for publish-only processes that leave dispatch to other instances.
    pub fn poll_storage(mut self, poll_storage: bool) -> Self {
        self.poll_storage = poll_storage;
        self
    }

    /// How long the poller sleeps after an empty batch. Defaults to one
    /// minute.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Priority substituted for the `-1` sentinel at publish time. Defaults
    /// to 16.
    pub fn default_priority(mut self, default_priority: i32) -> Self {
        self.default_priority = default_priority;
        self
    }

    /// Inclusive priority ceiling for the in-memory fast path. A task whose
    /// priority value is at most this (and that has no signature and no
    /// future start date) skips storage when the buffer has room. Defaults
    /// to 16.
    pub fn run_immediate_priority(mut self, run_immediate_priority: i32) -> Self {
        self.run_immediate_priority = run_immediate_priority;
        self
    }

    /// Retry limit substituted for the `-1` sentinel at publish time.
    /// Defaults to 8.
    pub fn default_retry_max(mut self, default_retry_max: i32) -> Self {
        self.default_retry_max = default_retry_max;
        self
    }

    /// Allocates the buffer, spawns the workers and the poller, and returns
    /// the queue handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Queue {
        let (buffer_tx, buffer_rx) = mpsc::channel(self.buffer_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let queue = Queue {
            inner: Arc::new(QueueCore {
                storage: self.storage,
                consumers: self.consumers,
                pre_processor: self.pre_processor,
                default_priority: self.default_priority,
                run_immediate_priority: self.run_immediate_priority,
                default_retry_max: self.default_retry_max,
                poll_storage: self.poll_storage,
                poll_interval: self.poll_interval,
                buffer_tx,
                shutdown_tx,
                shutdown_rx,
                handles: std::sync::Mutex::new(Vec::new()),
            }),
        };

        let buffer_rx = Arc::new(tokio::sync::Mutex::new(buffer_rx));
        let mut handles = Vec::with_capacity(self.worker_count + 1);

        for worker_id in 0..self.worker_count {
            handles.push(tokio::spawn(worker::worker_loop(
                worker_id,
                queue.clone(),
                Arc::clone(&buffer_rx),
                queue.shutdown_rx(),
            )));
        }

        handles.push(tokio::spawn(poller::poll_loop(
            queue.clone(),
            queue.shutdown_rx(),
        )));

        *queue
            .inner
            .handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = handles;

        queue
    }
}
