//! Generic bounded-concurrency worker pool.
//!
//! Bounds the number of LLM-issuing tasks running at once. The pool is
//! generic over the result type so callers keep compile-time typing of work
//! results; items complete in arbitrary order, paired with their item ids,
//! and callers that need ordered output encode an index in the id.

use crate::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};

/// A cooperative cancellation token.
///
/// Cancellation is observed at the next suspension point: workers check
/// the token before starting an item, and running items receive it so they
/// can return promptly.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Shorthand for failing out of a task when cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] when the token is cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::operation("worker_pool", "cancelled"));
        }
        Ok(())
    }
}

/// A unit of work with a stable id.
pub struct WorkItem<T> {
    /// Item id; callers encode ordering information here.
    pub id: String,
    /// The work. Receives the pool's cancel token.
    pub run: Box<dyn FnOnce(&CancelToken) -> Result<T> + Send>,
}

impl<T> WorkItem<T> {
    /// Creates a work item.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        run: impl FnOnce(&CancelToken) -> Result<T> + Send + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            run: Box::new(run),
        }
    }
}

/// Bounded-concurrency executor.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    max_concurrent: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self { max_concurrent: 8 }
    }
}

impl WorkerPool {
    /// Creates a pool with the given number of worker slots.
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Executes every item, at most `max_concurrent` at a time.
    ///
    /// Returns `(id, result)` pairs in completion order. `on_progress` is
    /// invoked on the calling thread as each item finishes, with the
    /// completed count, the total, and the finished item's id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] when `cancel` fires before all
    /// items are handled; items already begun return promptly via the
    /// token. Per-item failures do not fail the batch; they are returned
    /// in the pairs.
    pub fn process<T, F>(
        &self,
        cancel: &CancelToken,
        items: Vec<WorkItem<T>>,
        mut on_progress: F,
    ) -> Result<Vec<(String, Result<T>)>>
    where
        T: Send,
        F: FnMut(usize, usize, &str),
    {
        let total = items.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        let workers = self.max_concurrent.min(total);
        metrics::gauge!("worker_pool_size").set(workers as f64);

        let queue: Mutex<VecDeque<WorkItem<T>>> = Mutex::new(items.into());
        let (tx, rx) = mpsc::channel::<(String, Result<T>)>();

        let results = std::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                scope.spawn(move || loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let item = {
                        let mut q = queue
                            .lock()
                            .unwrap_or_else(std::sync::PoisonError::into_inner);
                        q.pop_front()
                    };
                    let Some(item) = item else { break };
                    let result = (item.run)(cancel);
                    if tx.send((item.id, result)).is_err() {
                        break;
                    }
                });
            }
            drop(tx);

            let mut results = Vec::with_capacity(total);
            for (id, result) in rx {
                results.push((id, result));
                let done = results.len();
                if let Some((id, _)) = results.last() {
                    on_progress(done, total, id);
                }
            }
            results
        });

        if cancel.is_cancelled() {
            return Err(Error::operation("worker_pool", "cancelled"));
        }
        Ok(results)
    }
}
