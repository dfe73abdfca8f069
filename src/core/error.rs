//! Error types for pool operations.

use thiserror::Error;

use super::worker::WorkerId;

/// Errors produced by the pool and surfaced through task futures.
///
/// Every per-task failure resolves only that task's future; none of these
/// variants (except [`PoolError::PoolNotReady`] at startup) are fatal to the
/// pool as a whole.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A task was submitted for a type with no registered handler.
    #[error("no handler registered for task type `{0}`")]
    UnknownTaskType(String),

    /// The queue has reached its configured maximum depth.
    /// Callers should back off and retry later.
    #[error("task queue is full (depth {depth}, max {max_depth})")]
    QueueFull {
        /// Queue depth observed at rejection time.
        depth: usize,
        /// Configured maximum depth.
        max_depth: usize,
    },

    /// The handler exceeded the task's timeout. The handler future was
    /// dropped; side effects up to its last suspension point stand.
    #[error("task timed out after {elapsed_ms}ms")]
    Timeout {
        /// Time the handler ran before the guard fired.
        elapsed_ms: u64,
    },

    /// The worker running the task stopped making progress and was
    /// reclaimed by the health monitor, or was force-stopped during drain.
    #[error("worker {worker_id} died while running task")]
    WorkerDied {
        /// The worker that was declared dead.
        worker_id: WorkerId,
    },

    /// The handler returned an error; the original cause is attached.
    #[error("handler failed: {source}")]
    HandlerExecution {
        /// The error returned by the handler.
        #[source]
        source: anyhow::Error,
    },

    /// The pool is not running: submitted before `start()`, after `stop()`,
    /// or the task was still queued when the pool drained.
    #[error("pool is stopped")]
    PoolStopped,

    /// The pool could not provision its minimum worker set at `start()`.
    #[error("pool failed to start: {0}")]
    PoolNotReady(String),

    /// Configuration validation failed at construction.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PoolError::UnknownTaskType("thumbnail".into());
        assert_eq!(
            format!("{err}"),
            "no handler registered for task type `thumbnail`"
        );

        let err = PoolError::QueueFull {
            depth: 100,
            max_depth: 100,
        };
        assert_eq!(format!("{err}"), "task queue is full (depth 100, max 100)");

        let err = PoolError::Timeout { elapsed_ms: 250 };
        assert_eq!(format!("{err}"), "task timed out after 250ms");

        let err = PoolError::PoolStopped;
        assert_eq!(format!("{err}"), "pool is stopped");
    }

    #[test]
    fn test_handler_execution_preserves_cause() {
        let cause = anyhow::anyhow!("smtp connection refused");
        let err = PoolError::HandlerExecution { source: cause };
        assert!(format!("{err}").contains("smtp connection refused"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
