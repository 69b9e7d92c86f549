//! Bounded worker pool.
//!
//! Fan-out/fan-in executor for the batch jobs: tasks are submitted as
//! futures, at most `concurrency` run at once, and `join` returns every
//! outcome tagged with its submission index. Tasks that fail return their
//! error as a value; the pool records it and keeps going. Dropping the
//! pool aborts whatever is still running.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// A bounded-concurrency fan-out/fan-in executor.
///
/// # Examples
///
/// ```
/// use metrics_core::pool::WorkerPool;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut pool = WorkerPool::new(4);
/// for n in 0..8u64 {
///     pool.submit(async move { n * 2 });
/// }
/// let results = pool.join().await;
/// assert_eq!(results.len(), 8);
/// assert_eq!(results[3], 6);
/// # }
/// ```
pub struct WorkerPool<T> {
    semaphore: Arc<Semaphore>,
    join_set: JoinSet<(usize, T)>,
    submitted: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Create a pool running at most `concurrency` tasks at once.
    pub fn new(concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            join_set: JoinSet::new(),
            submitted: 0,
        }
    }

    /// Create a pool sized to the host's available parallelism.
    pub fn with_default_concurrency() -> Self {
        Self::new(default_concurrency())
    }

    /// Submit a task.
    ///
    /// The task starts as soon as a slot frees up. Submission order is
    /// remembered: `join` returns outcomes in this order regardless of
    /// completion order.
    pub fn submit<F>(&mut self, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let index = self.submitted;
        self.submitted += 1;

        self.join_set.spawn(async move {
            // The semaphore is never closed, so acquisition only fails if
            // the pool is dropped, at which point the task is aborted
            // anyway.
            let _permit = semaphore.acquire_owned().await;
            (index, task.await)
        });
    }

    /// Number of tasks submitted so far.
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Wait for every task and return outcomes in submission order.
    ///
    /// A panicking task is logged and omitted from the results; tasks that
    /// merely return errors are the caller's `T` and are always present.
    pub async fn join(mut self) -> Vec<T> {
        let mut slots: Vec<Option<T>> = Vec::new();
        slots.resize_with(self.submitted, || None);

        while let Some(joined) = self.join_set.join_next().await {
            match joined {
                Ok((index, value)) => slots[index] = Some(value),
                Err(join_error) => {
                    error!(error = %join_error, "Worker task panicked");
                }
            }
        }

        slots.into_iter().flatten().collect()
    }
}

impl<T> std::fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("submitted", &self.submitted)
            .field("available_permits", &self.semaphore.available_permits())
            .finish()
    }
}

/// The host's available parallelism, with a conservative floor.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
