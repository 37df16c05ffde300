//! capstan - a durable, priority-aware task queue with an in-memory fast
//! path, pluggable storage, and a concurrent worker pool.
//!
//! Producers publish named tasks carrying opaque argument maps; the queue
//! schedules them and dispatches to registered consumer functions. Tasks can
//! be delayed, retried with exponential backoff, deduplicated by signature,
//! and requeued. Durability is pluggable: anything implementing the
//! [`Storage`] contract can back the queue, and with no backend at all the
//! queue still dispatches straight from memory.
//!
//! # Delivery semantics
//!
//! At-least-once. A leased task whose worker dies resurfaces once the lease
//! expires, so consumers must be idempotent or use signatures. There is no
//! global ordering guarantee; priority and start dates govern selection into
//! the buffer, not completion order.
//!
//! # Example
//!
//! ```no_run
//! use capstan::{Arguments, MemoryStorage, Queue, Task, TaskResult};
//!
//! # async fn example() -> Result<(), capstan::QueueError> {
//! let queue = Queue::builder()
//!     .storage(MemoryStorage::new())
//!     .consumer(|name: &str, _args: &Arguments| match name {
//!         "send_email" => TaskResult::Success,
//!         _ => TaskResult::Ignored,
//!     })
//!     .build();
//!
//! queue.publish(Task::new("send_email", Arguments::new())).await?;
//! # Ok(())
//! # }
//! ```

pub mod models;
pub mod queue;
pub mod storage;

pub use models::{retry_backoff, Arguments, Consumer, Task, TaskResult};
pub use queue::{PreProcessor, PreProcessorError, Queue, QueueBuilder, QueueError};
pub use storage::{FilesystemStorage, MemoryStorage, Storage, StorageError};
