use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("task queue is closed")]
    Closed,

    #[error("queued task aborted: {0}")]
    Aborted(String),
}

/// Bounded-concurrency task runner.
///
/// At most `concurrency` tasks run at once; the rest wait for a permit in
/// arrival order. Admitted tasks run on their own tokio task, so a caller
/// that stops waiting does not cut a task short.
pub struct TaskQueue {
    permits:     Arc<Semaphore>,
    concurrency: usize,
}

impl TaskQueue {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    /// Run `task` once a slot frees up and wait for its output.
    pub async fn run<F, T>(&self, task: F) -> Result<T, QueueError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| QueueError::Closed)?;

        tokio::spawn(async move {
            let _permit = permit;
            task.await
        })
        .await
        .map_err(|e| QueueError::Aborted(e.to_string()))
    }

    /// Tasks currently holding a slot.
    pub fn active(&self) -> usize {
        self.concurrency - self.permits.available_permits()
    }

    /// Refuse new tasks. Tasks already admitted finish normally.
    pub fn close(&self) {
        self.permits.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_concurrency() {
        let queue = Arc::new(TaskQueue::new(2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks = (0..6).map(|i| {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                queue
                    .run(async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        i
                    })
                    .await
            }
        });

        let results = futures::future::join_all(tasks).await;
        let values: Vec<i32> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(queue.active(), 0);
    }

    #[tokio::test]
    async fn closed_queue_rejects_work() {
        let queue = TaskQueue::new(8);
        queue.close();
        assert_eq!(queue.run(async { 1 }).await, Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn panicking_task_is_reported() {
        let queue = TaskQueue::new(1);
        let err = queue.run(async { panic!("tick exploded") }).await.unwrap_err();
        assert!(matches!(err, QueueError::Aborted(_)));
        // The slot is returned.
        assert_eq!(queue.run(async { 7 }).await, Ok(7));
    }
}
