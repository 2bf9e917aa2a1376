//! The dispatcher loop: periodically asks the queue for the next runnable
//! task. The actual worker is spawned by `Queue::pop_next` itself, under the
//! lock, before it returns — this loop only drives the polling cadence and
//! the error backoff.

use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::logging::LogRegistry;
use crate::queue::Queue;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// On a persistence error, back off well past the poll interval rather than
/// hot-looping over a broken disk.
const ERROR_BACKOFF: Duration = Duration::from_secs(300);

/// Runs forever. Intended to be spawned as its own `tokio` task.
pub async fn run(queue: Arc<Queue>, logs: Arc<LogRegistry>) {
    loop {
        tokio::time::sleep(POLL_INTERVAL).await;

        let queue = queue.clone();
        let logs = logs.clone();
        let result = tokio::task::spawn_blocking(move || queue.pop_next(&logs))
            .await
            .expect("pop_next task panicked");

        if let Err(e) = result {
            error!(error = %e, "pop_next failed, backing off");
            tokio::time::sleep(ERROR_BACKOFF).await;
        }
    }
}
