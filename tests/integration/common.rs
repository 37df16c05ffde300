//! Shared test harness: a recording storage fake and polling helpers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use capstan::{Arguments, Storage, StorageError, Task, TaskResult};
use uuid::Uuid;

/// One durable side effect, in the order the queue issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Save,
    Delete,
    DeleteBySignature,
    LogFailure,
}

#[derive(Default)]
struct State {
    tasks: HashMap<String, Task>,
    failures: Vec<Task>,
    journal: Vec<Op>,
    saved: Vec<Task>,
}

/// Storage fake that implements the full contract and records every mutating
/// call.
///
/// Leasing intentionally ignores `start_date` (any row whose lease has
/// expired is handed out immediately), so retry scenarios do not wait
/// wall-clock minutes; the backed-off `start_date` is still persisted and
/// asserted on through the journal.
pub struct RecordingStorage {
    state: Mutex<State>,
    lease: Duration,
}

impl RecordingStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            lease: Duration::from_secs(60),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// The journal of mutating operations, in call order.
    pub fn journal(&self) -> Vec<Op> {
        self.lock().journal.clone()
    }

    /// Every task passed to `save_task`, in call order, as the caller sent
    /// it (before id assignment).
    pub fn saved(&self) -> Vec<Task> {
        self.lock().saved.clone()
    }

    /// Rows currently in the queue collection.
    pub fn row_count(&self) -> usize {
        self.lock().tasks.len()
    }

    /// The failure log.
    pub fn failures(&self) -> Vec<Task> {
        self.lock().failures.clone()
    }
}

#[async_trait]
impl Storage for RecordingStorage {
    async fn save_task(&self, mut task: Task) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.journal.push(Op::Save);
        state.saved.push(task.clone());

        if !task.signature.is_empty() {
            let duplicate = state
                .tasks
                .values()
                .any(|t| t.signature == task.signature && t.task_id != task.task_id);
            if duplicate {
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
        let mut state = self.lock();
        state.journal.push(Op::Delete);
        if !task_id.is_empty() {
            state.tasks.remove(task_id);
        }
        Ok(())
    }

    async fn delete_task_by_signature(&self, signature: &str) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.journal.push(Op::DeleteBySignature);
        state.tasks.retain(|_, t| t.signature != signature);
        Ok(())
    }

    async fn log_failure(&self, task: Task) -> Result<(), StorageError> {
        let mut state = self.lock();
        state.journal.push(Op::LogFailure);
        state.failures.push(task);
        Ok(())
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, StorageError> {
        let now = capstan_now();
        #[allow(clippy::cast_possible_wrap)]
        let lease_secs = self.lease.as_secs() as i64;
        let lock_id = Uuid::new_v4().to_string();

        let mut state = self.lock();
        let mut due: Vec<Task> = state
            .tasks
            .values()
            .filter(|t| t.timeout_date < now)
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.start_date.cmp(&b.start_date))
        });

        for task in &mut due {
            task.lock_id = lock_id.clone();
            task.timeout_date = now + lease_secs;
            state.tasks.insert(task.task_id.clone(), task.clone());
        }

        Ok(due)
    }
}

fn capstan_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A consumer that counts invocations and answers with a fixed result.
pub fn counting_consumer(
    counter: Arc<AtomicUsize>,
    result: TaskResult,
) -> impl Fn(&str, &Arguments) -> TaskResult {
    move |_: &str, _: &Arguments| {
        counter.fetch_add(1, Ordering::SeqCst);
        result.clone()
    }
}

/// Installs a fmt subscriber once, honoring `RUST_LOG`, so failing tests can
/// be rerun with queue tracing visible.
pub fn init_logging() {
    use std::sync::Once;

    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Polls `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
