//! Process-local storage backend.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::{is_due, sort_for_lease, Storage, StorageError};
use crate::models::{epoch_now, Task};

const DEFAULT_BATCH_SIZE: usize = 32;
const DEFAULT_LEASE: Duration = Duration::from_secs(5 * 60);

/// In-memory implementation of the [`Storage`] contract.
///
/// Rows live in a mutex-guarded map, so this backend only coordinates
/// workers within a single process. It implements the full contract,
/// including signature dedup and lease expiry, which makes it the reference
/// backend for tests and for embedded deployments that want durable-queue
/// semantics without a database.
#[derive(Debug)]
pub struct MemoryStorage {
    state: Mutex<State>,
    batch_size: usize,
    lease: Duration,
}

#[derive(Debug, Default)]
struct State {
    tasks: HashMap<String, Task>,
    failures: Vec<Task>,
}

impl MemoryStorage {
    /// Creates an empty backend with a batch size of 32 and a five minute
    /// lease.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            batch_size: DEFAULT_BATCH_SIZE,
            lease: DEFAULT_LEASE,
        }
    }

    /// Sets how many tasks one [`get_tasks`](Storage::get_tasks) call leases.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets how long a leased task stays locked before it can be reclaimed.
    #[must_use]
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Number of task rows currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    /// True when no task rows are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a copy of the row with `task_id`, if present.
    #[must_use]
    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.lock().tasks.get(task_id).cloned()
    }

    /// Returns a copy of the first row carrying `signature`, if any.
    #[must_use]
    pub fn find_by_signature(&self, signature: &str) -> Option<Task> {
        self.lock()
            .tasks
            .values()
            .find(|task| task.signature == signature)
            .cloned()
    }

    /// Returns a copy of the failure log.
    #[must_use]
    pub fn failures(&self) -> Vec<Task> {
        self.lock().failures.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save_task(&self, mut task: Task) -> Result<(), StorageError> {
        let mut state = self.lock();

        // Signature dedup: a different row with the same signature wins and
        // the incoming save is silently dropped. Upserting the same row is
        // allowed so retry counters can be persisted.
        if !task.signature.is_empty() {
            let duplicate = state
                .tasks
                .values()
                .any(|existing| existing.signature == task.signature && existing.task_id != task.task_id);
            if duplicate {
                tracing::trace!(task = %task.name, signature = %task.signature, "duplicate signature; task dropped");
                return Ok(());
            }
        }

        if task.task_id.is_empty() {
            task.task_id = Uuid::new_v4().to_string();
        }

        state.tasks.insert(task.task_id.clone(), task);
        Ok(())
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), StorageError> {
        if task_id.is_empty() {
            return Ok(());
        }

        self.lock().tasks.remove(task_id);
        Ok(())
    }

    async fn delete_task_by_signature(&self, signature: &str) -> Result<(), StorageError> {
        if signature.is_empty() {
            return Ok(());
        }

        self.lock()
            .tasks
            .retain(|_, task| task.signature != signature);
        Ok(())
    }

    async fn log_failure(&self, task: Task) -> Result<(), StorageError> {
        self.lock().failures.push(task);
        Ok(())
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, StorageError> {
        let now = epoch_now();
        let lock_id = Uuid::new_v4().to_string();
        #[allow(clippy::cast_possible_wrap)]
        let lease_secs = self.lease.as_secs() as i64;

        let mut state = self.lock();

        let mut due: Vec<Task> = state
            .tasks
            .values()
            .filter(|task| is_due(task, now))
            .cloned()
            .collect();
        sort_for_lease(&mut due);
        due.truncate(self.batch_size);

        for task in &mut due {
            task.lock_id = lock_id.clone();
            task.start_date = now;
            task.timeout_date = now + lease_secs;
            task.error.clear();
            state.tasks.insert(task.task_id.clone(), task.clone());
        }

        Ok(due)
    }
}
