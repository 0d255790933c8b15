//! Fixed-capacity task pool with non-blocking submission.
//!
//! Each submission runs as its own tokio task holding one semaphore permit.
//! When every permit is taken, [`TaskPool::try_submit`] fails at once with
//! [`EasycallError::PoolSaturated`] instead of queueing, so a read loop feeding
//! the pool is never blocked by slow handlers.
//!
//! Every pooled task runs inside [`isolate`]: a panic is caught at the task
//! boundary and turned into [`EasycallError::Panicked`]. Failed tasks are
//! logged once, here.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::{EasycallError, Result};

/// Bounded pool of concurrently running tasks.
#[derive(Clone)]
pub struct TaskPool {
    name: Arc<str>,
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl TaskPool {
    /// Create a pool running at most `capacity` tasks at once (minimum 1).
    pub fn new(name: impl Into<Arc<str>>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Submit a task without waiting.
    ///
    /// Returns `Err(PoolSaturated)` immediately when no slot is free; the task
    /// is dropped without running.
    pub fn try_submit<F>(&self, task: F) -> Result<JoinHandle<Result<()>>>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| EasycallError::PoolSaturated {
                capacity: self.capacity,
            })?;

        let name = self.name.clone();
        let pooled = async move {
            let _permit = permit;
            let result = isolate(task).await.and_then(|r| r);
            if let Err(e) = &result {
                tracing::error!(pool = %name, "Task failed: {}", e);
            }
            result
        };
        Ok(tokio::spawn(pooled.in_current_span()))
    }

    /// Pool name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum concurrent tasks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Tasks currently running.
    pub fn running(&self) -> usize {
        self.capacity - self.available()
    }
}

impl fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPool")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("running", &self.running())
            .finish()
    }
}

/// Run a future, converting a panic into [`EasycallError::Panicked`].
pub async fn isolate<F, T>(fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|panic| EasycallError::Panicked(panic_message(&*panic)))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
