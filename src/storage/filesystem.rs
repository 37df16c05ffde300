//! Directory-backed storage backend.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::{is_due, sort_for_lease, Storage, StorageError};
use crate::models::{epoch_now, Task};

const FAILED_SUBDIR: &str = "failed";
const DEFAULT_BATCH_SIZE: usize = 32;
const DEFAULT_LEASE: Duration = Duration::from_secs(5 * 60);

/// Filesystem implementation of the [`Storage`] contract.
///
/// Each task row is one JSON file named `<task_id>.json` inside the backend
/// directory; permanently failed tasks are written under a `failed/`
/// subdirectory. Every path is resolved against the backend directory, never
/// taken from the row itself.
///
/// Files are not locked, so this backend is only safe for a single process.
/// Leasing still works the same way as everywhere else: claiming a batch
/// rewrites each file with a fresh `lock_id` and extended `timeout_date`, so
/// a crashed run's tasks resurface after the lease expires.
#[derive(Debug)]
pub struct FilesystemStorage {
    directory: PathBuf,
    batch_size: usize,
    lease: Duration,
}

impl FilesystemStorage {
    /// Opens (and creates, if needed) the backend directory and its
    /// `failed/` subdirectory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] when the directories cannot be created.
    pub async fn open(directory: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let directory = directory.into();
        tokio::fs::create_dir_all(directory.join(FAILED_SUBDIR)).await?;

        Ok(Self {
            directory,
            batch_size: DEFAULT_BATCH_SIZE,
            lease: DEFAULT_LEASE,
        })
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

    /// Path of the queue row for `task_id`, always inside the backend
    /// directory.
    fn task_path(&self, task_id: &str) -> PathBuf {
        self.directory.join(format!("{task_id}.json"))
    }

    fn failure_path(&self, task_id: &str) -> PathBuf {
        self.directory
            .join(FAILED_SUBDIR)
            .join(format!("{task_id}.json"))
    }

    async fn write_row(&self, path: &Path, task: &Task) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(task)?;
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    /// Reads every queue row in the backend directory. Files that cannot be
    /// parsed are skipped with a warning rather than poisoning the poll.
    async fn read_rows(&self) -> Result<Vec<Task>, StorageError> {
        let mut rows = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.directory).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if !entry.file_type().await?.is_file() {
                continue;
            }

            let data = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Task>(&data) {
                Ok(task) => rows.push(task),
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipping unreadable task file");
                }
            }
        }

        Ok(rows)
    }
}

#[async_trait]
impl Storage for FilesystemStorage {
    async fn save_task(&self, mut task: Task) -> Result<(), StorageError> {
        if !task.signature.is_empty() {
            let duplicate = self.read_rows().await?.into_iter().any(|existing| {
                existing.signature == task.signature && existing.task_id != task.task_id
            });
            if duplicate {
                tracing::trace!(task = %task.name, signature = %task.signature, "duplicate signature; task dropped");
                return Ok(());
            }
        }

        if task.task_id.is_empty() {
            task.task_id = Uuid::new_v4().to_string();
        }

        self.write_row(&self.task_path(&task.task_id), &task).await
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), StorageError> {
        if task_id.is_empty() {
            return Ok(());
        }

        match tokio::fs::remove_file(self.task_path(task_id)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn delete_task_by_signature(&self, _signature: &str) -> Result<(), StorageError> {
        Err(StorageError::not_implemented("delete_task_by_signature"))
    }

    async fn log_failure(&self, mut task: Task) -> Result<(), StorageError> {
        if task.task_id.is_empty() {
            task.task_id = Uuid::new_v4().to_string();
        }

        self.write_row(&self.failure_path(&task.task_id), &task).await
    }

    async fn get_tasks(&self) -> Result<Vec<Task>, StorageError> {
        let now = epoch_now();
        let lock_id = Uuid::new_v4().to_string();
        #[allow(clippy::cast_possible_wrap)]
        let lease_secs = self.lease.as_secs() as i64;

        let mut due: Vec<Task> = self
            .read_rows()
            .await?
            .into_iter()
            .filter(|task| is_due(task, now))
            .collect();
        sort_for_lease(&mut due);
        due.truncate(self.batch_size);

        for task in &mut due {
            task.lock_id = lock_id.clone();
            task.start_date = now;
            task.timeout_date = now + lease_secs;
            task.error.clear();
            self.write_row(&self.task_path(&task.task_id), task).await?;
        }

        Ok(due)
    }
}
