//! Task model: identifiers, priority, lifecycle state, and result futures.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use super::error::PoolError;
use super::worker::WorkerId;

/// Unique task identifier, drawn from a pool-lifetime counter.
pub type TaskId = u64;

/// Outcome delivered through a task's result future.
pub type TaskResult = Result<Value, PoolError>;

/// Priority used for queue ordering. Dequeue order is highest priority
/// first, insertion order within a priority class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work that can wait behind everything else.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Jumps ahead of normal traffic.
    High,
    /// Reserved for work that must not sit behind a backlog.
    Critical,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting in the queue for a worker.
    Queued,
    /// Owned by exactly one worker and executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Handler returned an error.
    Failed,
    /// The timeout guard fired before the handler finished.
    TimedOut,
}

/// Per-submission overrides accepted by `submit_with`.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Queue priority; defaults to [`Priority::Normal`].
    pub priority: Priority,
    /// Per-task timeout; falls back to the pool's `task_timeout` when unset.
    pub timeout: Option<Duration>,
}

impl SubmitOptions {
    /// Set the queue priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set a per-task timeout overriding the pool default.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Metadata carried with a task from submission through completion.
#[derive(Debug, Clone)]
pub(crate) struct TaskMeta {
    pub id: TaskId,
    pub task_type: Arc<str>,
    pub priority: Priority,
    pub submitted_at: Instant,
    pub timeout: Duration,
}

/// A task sitting in the queue: metadata, payload, and the sender half of
/// the caller's result future.
pub(crate) struct QueuedTask {
    pub meta: TaskMeta,
    pub payload: Value,
    pub reply: oneshot::Sender<TaskResult>,
}

/// Future resolved with the task's outcome.
///
/// Returned by `submit`/`submit_with`; awaiting it yields the handler's
/// return value or the error that terminated the task. If the pool is torn
/// down without resolving the task, awaiting yields
/// [`PoolError::PoolStopped`].
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    rx: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, rx: oneshot::Receiver<TaskResult>) -> Self {
        Self { id, rx }
    }

    /// The unique id assigned to this task.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }
}

impl Future for TaskHandle {
    type Output = TaskResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without resolving: the pool went away.
            Poll::Ready(Err(_)) => Poll::Ready(Err(PoolError::PoolStopped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Entry for a task currently owned by a worker.
pub(crate) struct InFlightEntry {
    pub reply: oneshot::Sender<TaskResult>,
    pub worker_id: WorkerId,
    pub task_type: Arc<str>,
    pub started_at: Instant,
}

/// Table of running tasks, shared between workers and the health monitor.
///
/// Whoever takes an entry resolves its future; take-once semantics give
/// exactly-one-resolution even when a worker and the health monitor race.
#[derive(Default)]
pub(crate) struct InFlightTable {
    entries: Mutex<HashMap<TaskId, InFlightEntry>>,
}

impl InFlightTable {
    pub fn insert(&self, id: TaskId, entry: InFlightEntry) {
        self.entries.lock().insert(id, entry);
    }

    pub fn take(&self, id: TaskId) -> Option<InFlightEntry> {
        self.entries.lock().remove(&id)
    }

    /// Remove and return every entry. Used by the force-stop path.
    pub fn take_all(&self) -> Vec<(TaskId, InFlightEntry)> {
        self.entries.lock().drain().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handle_resolves_value() {
        let (tx, rx) = oneshot::channel();
        let handle = TaskHandle::new(7, rx);
        assert_eq!(handle.id(), 7);
        tx.send(Ok(serde_json::json!(42))).unwrap();
        assert_eq!(handle.await.unwrap(), serde_json::json!(42));
    }

    #[tokio::test]
    async fn test_handle_maps_dropped_sender_to_pool_stopped() {
        let (tx, rx) = oneshot::channel::<TaskResult>();
        let handle = TaskHandle::new(1, rx);
        drop(tx);
        assert!(matches!(handle.await, Err(PoolError::PoolStopped)));
    }

    #[test]
    fn test_in_flight_take_once() {
        let table = InFlightTable::default();
        let (tx, _rx) = oneshot::channel();
        table.insert(
            3,
            InFlightEntry {
                reply: tx,
                worker_id: WorkerId::new(),
                task_type: Arc::from("email"),
                started_at: Instant::now(),
            },
        );
        assert_eq!(table.len(), 1);
        assert!(table.take(3).is_some());
        assert!(table.take(3).is_none());
    }

    #[test]
    fn test_priority_default_is_normal() {
        assert_eq!(Priority::default(), Priority::Normal);
    }
}
