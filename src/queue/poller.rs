//! The storage polling loop.

use tokio::sync::watch;

use super::Queue;

/// Leases due tasks out of storage and feeds them into the buffer, forever.
///
/// One of these runs per queue instance. It exits immediately when the queue
/// has no storage or polling is disabled, and exits on the shutdown signal
/// otherwise. The send into the buffer blocks when the workers are behind;
/// that is deliberate, and is what couples the poll rate to the drain rate.
pub(super) async fn poll_loop(queue: Queue, mut shutdown: watch::Receiver<bool>) {
    let Some(storage) = queue.inner.storage.clone() else {
        return;
    };
    if !queue.inner.poll_storage {
        return;
    }

    tracing::trace!("polling storage for due tasks");

    loop {
        if *shutdown.borrow() {
            tracing::trace!("poller stopped");
            return;
        }

        let tasks = match storage.get_tasks().await {
            Ok(tasks) => tasks,
            Err(error) => {
                // Storage applies its own timeouts, so there is no extra
                // backoff here.
                tracing::error!(%error, "failed to lease tasks from storage");
                continue;
            }
        };

        if tasks.is_empty() {
            tracing::trace!("no due tasks; sleeping before the next poll");
            tokio::select! {
                _ = shutdown.changed() => {}
                () = tokio::time::sleep(queue.inner.poll_interval) => {}
            }
            continue;
        }

        for task in tasks {
            if *shutdown.borrow() {
                return;
            }

            // A task dropped here keeps its lease and resurfaces after the
            // lease expires.
            tokio::select! {
                _ = shutdown.changed() => return,
                sent = queue.inner.buffer_tx.send(task) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
