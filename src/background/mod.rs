//! Background tasks: fire-and-forget work that outlives the request that started it.
//!
//! [`TaskQueue`] spawns futures onto the Tokio runtime and keeps their handles
//! so they can be counted and drained. The spawner gets a
//! [`oneshot::Receiver`] for the task's output; dropping it detaches the task,
//! which keeps running to completion regardless.

use std::future::Future;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::warn;

/// Tracks spawned background tasks.
///
/// # Examples
///
/// ```
/// use swcache::background::TaskQueue;
///
/// # #[tokio::main] async fn main() {
/// let queue = TaskQueue::new();
/// let answer = queue.spawn(async { 40 + 2 });
/// assert_eq!(answer.await.unwrap(), 42);
///
/// drop(queue.spawn(async { /* nobody waits for this */ }));
/// queue.drain().await;
/// assert_eq!(queue.pending(), 0);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Mutex<JoinSet<()>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` in the background and returns a receiver for its output.
    ///
    /// The result is delivered only if the receiver is still alive; otherwise it
    /// is discarded. A panicking task is logged and never reaches the spawner.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<F, T>(&self, task: F) -> oneshot::Receiver<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        // Reap whatever already finished so the set does not grow without bound.
        while let Some(done) = tasks.try_join_next() {
            log_panic(done);
        }
        tasks.spawn(async move {
            let _ = tx.send(task.await);
        });
        rx
    }

    /// Number of tasks spawned and not yet reaped.
    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Waits for every task spawned so far. Tasks spawned while draining are
    /// picked up as well.
    pub async fn drain(&self) {
        loop {
            let mut batch = {
                let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
                std::mem::take(&mut *tasks)
            };
            if batch.is_empty() {
                return;
            }
            while let Some(done) = batch.join_next().await {
                log_panic(done);
            }
        }
    }
}

fn log_panic(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        warn!(error = %e, "background task failed");
    }
}
