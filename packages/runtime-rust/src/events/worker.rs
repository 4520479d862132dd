//! Background worker for queued tasks.
//!
//! Provides a generic `BackgroundWorker<T>` that processes tasks from a
//! bounded mpsc channel via a `BackgroundRunnable` implementation. Stopping
//! the worker closes the channel and waits until every queued task ran.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Trait for task handlers executed by `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called once after the last queued task. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Bounded background queue drained by a single tokio task.
///
/// Submission takes `&self`, so the worker can be shared behind an `Arc`.
pub struct BackgroundWorker<T> {
    tx: Mutex<Option<mpsc::Sender<T>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> BackgroundWorker<T> {
    /// Starts the worker. Must be called within a tokio runtime.
    ///
    /// A `capacity` of zero is raised to one.
    pub fn start<R>(mut runnable: R, capacity: usize) -> Self
    where
        R: BackgroundRunnable<Task = T>,
    {
        let (tx, mut rx) = mpsc::channel::<T>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                runnable.run(task).await;
            }
            runnable.shutdown().await;
        });

        Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queues `task` without waiting.
    ///
    /// # Errors
    ///
    /// Hands the task back when the queue is full or the worker stopped.
    pub fn try_submit(&self, task: T) -> Result<(), T> {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(task);
        };
        tx.try_send(task).map_err(|err| match err {
            TrySendError::Full(task) | TrySendError::Closed(task) => task,
        })
    }

    /// Stops accepting tasks and waits for the queued ones to finish.
    pub async fn stop(&self) {
        drop(self.tx.lock().take());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "background worker panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    struct CountingRunnable {
        run_count: Arc<AtomicU32>,
        shutdown_called: Arc<AtomicU32>,
        delay_ms: u64,
    }

    #[async_trait]
    impl BackgroundRunnable for CountingRunnable {
        type Task = String;

        async fn run(&mut self, _task: String) {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.run_count.fetch_add(1, Ordering::SeqCst);
        }

        async fn shutdown(&mut self) {
            self.shutdown_called.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting(delay_ms: u64) -> (CountingRunnable, Arc<AtomicU32>, Arc<AtomicU32>) {
        let run_count = Arc::new(AtomicU32::new(0));
        let shutdown_called = Arc::new(AtomicU32::new(0));
        (
            CountingRunnable {
                run_count: run_count.clone(),
                shutdown_called: shutdown_called.clone(),
                delay_ms,
            },
            run_count,
            shutdown_called,
        )
    }

    #[tokio::test]
    async fn stop_drains_queued_tasks() {
        let (runnable, run_count, shutdown_called) = counting(5);
        let worker = BackgroundWorker::start(runnable, 16);

        for task in ["task-1", "task-2", "task-3"] {
            assert!(worker.try_submit(task.to_string()).is_ok());
        }

        worker.stop().await;

        assert_eq!(run_count.load(Ordering::SeqCst), 3);
        assert_eq!(shutdown_called.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn try_submit_hands_back_task_when_full() {
        let (runnable, _, _) = counting(200);
        let worker = BackgroundWorker::start(runnable, 1);

        // The first task is picked up by the worker, the second fills the queue.
        assert!(worker.try_submit("a".to_string()).is_ok());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(worker.try_submit("b".to_string()).is_ok());

        assert_eq!(worker.try_submit("c".to_string()), Err("c".to_string()));
        worker.stop().await;
    }

    #[tokio::test]
    async fn submissions_after_stop_are_refused() {
        let (runnable, run_count, _) = counting(0);
        let worker = BackgroundWorker::start(runnable, 4);
        worker.stop().await;

        assert_eq!(worker.try_submit("late".to_string()), Err("late".to_string()));
        assert_eq!(run_count.load(Ordering::SeqCst), 0);
    }
}
