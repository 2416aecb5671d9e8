//! Delayed-task scheduling seam.
//!
//! Reconciliation tasks are scheduled through this trait so the engine
//! can cancel them by handle (host-cleanup cancellation when the host
//! returns) and so tests can drive task bodies directly without timers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Opaque handle to a scheduled task; persisted in the session runtime
/// when the task must be cancellable later.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub String);

impl TaskHandle {
    fn new() -> Self {
        Self(format!("task_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait Scheduler: Send + Sync {
    /// Run `task` after `delay`. The returned handle stays valid until
    /// the task completes or is cancelled.
    fn schedule(&self, name: &str, delay: Duration, task: TaskFuture) -> TaskHandle;

    /// Cancel a pending task. Returns false when the task already ran,
    /// was cancelled, or the handle is unknown.
    fn cancel(&self, handle: &TaskHandle) -> bool;
}

/// Scheduler on tokio tasks with an abort registry.
pub struct TokioScheduler {
    tasks: Arc<DashMap<TaskHandle, JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
        }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, name: &str, delay: Duration, task: TaskFuture) -> TaskHandle {
        let handle = TaskHandle::new();
        let tasks = Arc::clone(&self.tasks);
        let id = handle.clone();
        let task_name = name.to_string();

        debug!(task = %task_name, handle = %handle, delay_secs = delay.as_secs(), "task scheduled");
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
            tasks.remove(&id);
        });
        self.tasks.insert(handle.clone(), join);
        handle
    }

    fn cancel(&self, handle: &TaskHandle) -> bool {
        match self.tasks.remove(handle) {
            Some((_, join)) => {
                join.abort();
                debug!(handle = %handle, "task cancelled");
                true
            }
            None => false,
        }
    }
}
