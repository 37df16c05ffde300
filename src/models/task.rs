use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque argument map carried by every task.
///
/// The queue never inspects argument values; they are handed to consumers
/// exactly as published.
pub type Arguments = HashMap<String, Value>;

/// Current wall-clock time as Unix epoch seconds.
pub(crate) fn epoch_now() -> i64 {
    Utc::now().timestamp()
}

/// A unit of deferred work, identified by a name and an argument map.
///
/// Tasks are created with [`Task::new`], optionally tuned with the chainable
/// `with_*` methods, and handed to the queue for dispatch. Scheduling and
/// retry bookkeeping lives on the task itself so that a storage backend can
/// persist the whole record as one row.
///
/// Two fields use `-1` as an "inherit the queue default" sentinel:
/// [`priority`](Self::priority) and [`retry_max`](Self::retry_max). The
/// publish path replaces them before the task is buffered or saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Stable identifier, assigned by the storage backend on first durable
    /// save. Empty while the task only exists in memory.
    #[serde(default)]
    pub task_id: String,

    /// Identifier of the worker batch currently holding the lease on this
    /// task. Empty when the task is not leased.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub lock_id: String,

    /// Routing key matched against registered consumers.
    pub name: String,

    /// Data required to execute the task.
    #[serde(default)]
    pub arguments: Arguments,

    /// Unix epoch seconds when the task was created.
    pub create_date: i64,

    /// Unix epoch seconds of the earliest moment the task is eligible to run.
    pub start_date: i64,

    /// Unix epoch seconds when the current lease expires and the task can be
    /// reclaimed by another process. Zero when not leased.
    #[serde(default)]
    pub timeout_date: i64,

    /// Dispatch priority; lower values are more urgent. `-1` inherits the
    /// queue default.
    pub priority: i32,

    /// Optional dedup key. While any task with this signature is present in
    /// durable storage, later publishes carrying the same signature are
    /// silently dropped.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature: String,

    /// Number of times this task has already been retried.
    #[serde(default)]
    pub retry_count: i32,

    /// Maximum number of retries before the task fails permanently. `-1`
    /// inherits the queue default.
    pub retry_max: i32,

    /// Error text from the last execution, cleared on success or requeue.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,

    /// Publish-side delay in milliseconds. When non-zero, publishing returns
    /// immediately and the real publish happens in a background task after
    /// the delay. Never persisted.
    #[serde(skip)]
    pub async_delay: u64,
}

impl Task {
    /// Creates a task named `name` carrying `arguments`, eligible to run
    /// immediately, with priority and retry limit inherited from the queue.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: Arguments) -> Self {
        let now = epoch_now();

        Self {
            task_id: String::new(),
            lock_id: String::new(),
            name: name.into(),
            arguments,
            create_date: now,
            start_date: now,
            timeout_date: 0,
            priority: -1,
            signature: String::new(),
            retry_count: 0,
            retry_max: -1,
            error: String::new(),
            async_delay: 0,
        }
    }

    /// Pushes the start date `delay` into the future, relative to now.
    pub fn delay(&mut self, delay: Duration) {
        #[allow(clippy::cast_possible_wrap)]
        let secs = delay.as_secs() as i64;
        self.start_date = epoch_now() + secs;
    }

    /// Sets the dispatch priority. Lower values are more urgent.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Delays execution by `seconds`, relative to the current clock.
    #[must_use]
    pub fn with_delay_seconds(mut self, seconds: u64) -> Self {
        self.delay(Duration::from_secs(seconds));
        self
    }

    /// Delays execution by `minutes`, relative to the current clock.
    #[must_use]
    pub fn with_delay_minutes(mut self, minutes: u64) -> Self {
        self.delay(Duration::from_secs(minutes * 60));
        self
    }

    /// Delays execution by `hours`, relative to the current clock.
    #[must_use]
    pub fn with_delay_hours(mut self, hours: u64) -> Self {
        self.delay(Duration::from_secs(hours * 3600));
        self
    }

    /// Sets an absolute start time. This differs from the `with_delay_*`
    /// methods, which schedule relative to the current clock.
    #[must_use]
    pub fn with_start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_date = start.timestamp();
        self
    }

    /// Sets the maximum number of retries before the task fails permanently.
    #[must_use]
    pub fn with_retry_max(mut self, retry_max: i32) -> Self {
        self.retry_max = retry_max;
        self
    }

    /// Sets the dedup signature. Only one task with a given signature can be
    /// present in durable storage at a time; duplicates are dropped silently.
    #[must_use]
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = signature.into();
        self
    }

    /// Makes the publish call return immediately and perform the real publish
    /// in the background after `millis` milliseconds.
    #[must_use]
    pub fn with_async_delay_ms(mut self, millis: u64) -> Self {
        self.async_delay = millis;
        self
    }
}
