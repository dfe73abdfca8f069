//! The pool facade: lifecycle, submission, batching, and stats.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::autoscaler::Autoscaler;
use super::batch::{run_batch, BatchOptions};
use super::error::PoolError;
use super::health::HealthMonitor;
use super::metrics::{MetricsCollector, MetricsSnapshot};
use super::queue::TaskQueue;
use super::registry::{HandlerRegistry, TaskHandler};
use super::supervisor::WorkerSupervisor;
use super::task::{
    InFlightTable, QueuedTask, SubmitOptions, TaskHandle, TaskMeta, TaskResult, TaskState,
};
use super::worker::{duration_ms, WorkerContext, WorkerSnapshot};
use crate::config::PoolConfig;

const STATE_CREATED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// How often `stop()` re-checks worker business while draining.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Per-worker join timeout after the drain grace period.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Read-only snapshot returned by [`TaskPool::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    /// One entry per live worker.
    pub workers: Vec<WorkerSnapshot>,
    /// Aggregated throughput counters.
    pub metrics: MetricsSnapshot,
}

struct Monitors {
    autoscaler: Autoscaler,
    health: HealthMonitor,
}

/// Elastic worker pool executing registered task types off the request path.
///
/// The pool is an explicitly constructed, owned object — build one, share it
/// by reference (or `Arc`) with whatever needs it, and drive its lifecycle
/// through [`start`](Self::start) and [`stop`](Self::stop). It knows nothing
/// about task semantics; handlers registered per type supply all behavior.
///
/// ```rust,no_run
/// use pressgang::config::PoolConfig;
/// use pressgang::core::TaskPool;
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "multi_thread")]
/// # async fn main() -> Result<(), pressgang::core::PoolError> {
/// let pool = TaskPool::new(PoolConfig::new().with_min_workers(2))?;
/// pool.register_handler_fn("send-digest", |payload| async move {
///     // deliver the newsletter issue named in `payload`
///     Ok(payload)
/// });
/// pool.start()?;
///
/// let result = pool.submit("send-digest", json!({"issue": 42}))?.await?;
/// assert_eq!(result, json!({"issue": 42}));
///
/// pool.stop();
/// # Ok(())
/// # }
/// ```
///
/// # Timeouts
///
/// A handler that overruns its timeout has its future dropped: cooperative
/// handlers are cancelled at their next suspension point, and side effects
/// up to that point stand. A handler that blocks its worker thread cannot
/// be cancelled; it keeps running detached while the health monitor
/// reclaims the worker and fails the task with `WorkerDied`.
pub struct TaskPool {
    config: PoolConfig,
    registry: Arc<HandlerRegistry>,
    queue: Arc<TaskQueue>,
    in_flight: Arc<InFlightTable>,
    metrics: Arc<MetricsCollector>,
    supervisor: Arc<WorkerSupervisor>,
    state: AtomicU8,
    next_task_id: AtomicU64,
    monitors: Mutex<Option<Monitors>>,
}

impl TaskPool {
    /// Create a pool from configuration. No threads are spawned until
    /// [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if validation fails.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let registry = Arc::new(HandlerRegistry::new());
        let queue = Arc::new(TaskQueue::new(config.max_queue_depth));
        let in_flight = Arc::new(InFlightTable::default());
        let metrics = Arc::new(MetricsCollector::default());
        let ctx = WorkerContext {
            queue: Arc::clone(&queue),
            registry: Arc::clone(&registry),
            in_flight: Arc::clone(&in_flight),
            metrics: Arc::clone(&metrics),
        };
        let supervisor = Arc::new(WorkerSupervisor::new(
            config.min_workers,
            config.max_workers,
            ctx,
        ));

        Ok(Self {
            config,
            registry,
            queue,
            in_flight,
            metrics,
            supervisor,
            state: AtomicU8::new(STATE_CREATED),
            next_task_id: AtomicU64::new(0),
            monitors: Mutex::new(None),
        })
    }

    /// Bind a task type to a handler; last registration wins. Normally done
    /// before `start()`, but safe at any time.
    pub fn register_handler(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.registry.register(task_type, handler);
    }

    /// Bind a task type to an async closure.
    pub fn register_handler_fn<F, Fut>(&self, task_type: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.registry.register_fn(task_type, f);
    }

    /// Provision the minimum worker set and start the scaling and health
    /// loops. Calling `start` on a running pool is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::PoolNotReady`] if workers or monitor threads
    /// cannot be provisioned (anything already spawned is rolled back), and
    /// [`PoolError::PoolStopped`] if the pool was already stopped.
    pub fn start(&self) -> Result<(), PoolError> {
        match self.state.compare_exchange(
            STATE_CREATED,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(STATE_RUNNING) => {
                debug!("start called on a running pool; ignoring");
                return Ok(());
            }
            Err(_) => return Err(PoolError::PoolStopped),
        }

        self.supervisor
            .provision(self.config.min_workers)
            .inspect_err(|_| self.state.store(STATE_STOPPED, Ordering::Release))?;

        let autoscaler = Autoscaler::spawn(
            self.config.health_check_interval(),
            self.config.scale_up_threshold,
            self.config.scale_down_cooldown(),
            Arc::clone(&self.queue),
            Arc::clone(&self.supervisor),
        )
        .map_err(|e| self.abort_start(None, &format!("failed to start autoscaler: {e}")))?;

        let health = match HealthMonitor::spawn(
            self.config.health_check_interval(),
            self.config.stalled_checks,
            Arc::clone(&self.supervisor),
            Arc::clone(&self.in_flight),
            Arc::clone(&self.metrics),
        ) {
            Ok(health) => health,
            Err(e) => {
                return Err(self.abort_start(
                    Some(autoscaler),
                    &format!("failed to start health monitor: {e}"),
                ));
            }
        };

        *self.monitors.lock() = Some(Monitors { autoscaler, health });
        info!(
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            "task pool started"
        );
        Ok(())
    }

    fn abort_start(&self, autoscaler: Option<Autoscaler>, reason: &str) -> PoolError {
        if let Some(autoscaler) = autoscaler {
            autoscaler.stop();
        }
        self.supervisor.drain_all();
        self.supervisor.join_all(JOIN_TIMEOUT);
        self.state.store(STATE_STOPPED, Ordering::Release);
        PoolError::PoolNotReady(reason.to_string())
    }

    /// Submit a task with default options (normal priority, pool-default
    /// timeout). Returns a future resolving to the handler's result.
    ///
    /// # Errors
    ///
    /// Fails fast — without enqueuing — with [`PoolError::UnknownTaskType`]
    /// when no handler is bound, [`PoolError::QueueFull`] under
    /// backpressure, or [`PoolError::PoolStopped`] outside the running
    /// state.
    pub fn submit(&self, task_type: &str, payload: Value) -> Result<TaskHandle, PoolError> {
        self.submit_with(task_type, payload, SubmitOptions::default())
    }

    /// Submit a task with explicit priority and/or timeout.
    ///
    /// # Errors
    ///
    /// Same contract as [`submit`](Self::submit).
    pub fn submit_with(
        &self,
        task_type: &str,
        payload: Value,
        options: SubmitOptions,
    ) -> Result<TaskHandle, PoolError> {
        if self.state.load(Ordering::Acquire) != STATE_RUNNING {
            return Err(PoolError::PoolStopped);
        }
        if !self.registry.contains(task_type) {
            return Err(PoolError::UnknownTaskType(task_type.to_string()));
        }

        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let meta = TaskMeta {
            id,
            task_type: Arc::from(task_type),
            priority: options.priority,
            submitted_at: Instant::now(),
            timeout: options.timeout.unwrap_or_else(|| self.config.task_timeout()),
        };
        debug!(
            task_id = id,
            task_type,
            priority = ?options.priority,
            state = ?TaskState::Queued,
            "task submitted"
        );
        self.queue.push(QueuedTask {
            meta,
            payload,
            reply: tx,
        })?;
        Ok(TaskHandle::new(id, rx))
    }

    /// Submit a homogeneous batch with bounded concurrency. Results come
    /// back in input order regardless of completion order. Fail-fast: the
    /// first failed item aborts the batch and propagates its error;
    /// still-running items are detached.
    ///
    /// # Errors
    ///
    /// The first per-item error, or any of the `submit` fast-fail errors.
    pub async fn submit_batch(
        &self,
        task_type: &str,
        items: Vec<Value>,
        options: BatchOptions,
    ) -> Result<Vec<Value>, PoolError> {
        if !self.registry.contains(task_type) {
            return Err(PoolError::UnknownTaskType(task_type.to_string()));
        }
        let submit_options = SubmitOptions {
            priority: options.priority,
            timeout: options.timeout,
        };
        let outcomes = run_batch(items, options.concurrency, true, |item| {
            self.submit_with(task_type, item, submit_options.clone())
        })
        .await?;
        outcomes.into_iter().collect()
    }

    /// Like [`submit_batch`](Self::submit_batch) but never aborts: every
    /// item settles and the per-item outcomes are returned in input order.
    ///
    /// # Errors
    ///
    /// Only the up-front [`PoolError::UnknownTaskType`] check; item
    /// failures are reported in the outcome vector.
    pub async fn submit_batch_outcomes(
        &self,
        task_type: &str,
        items: Vec<Value>,
        options: BatchOptions,
    ) -> Result<Vec<TaskResult>, PoolError> {
        if !self.registry.contains(task_type) {
            return Err(PoolError::UnknownTaskType(task_type.to_string()));
        }
        let submit_options = SubmitOptions {
            priority: options.priority,
            timeout: options.timeout,
        };
        run_batch(items, options.concurrency, false, |item| {
            self.submit_with(task_type, item, submit_options.clone())
        })
        .await
    }

    /// Snapshot current workers and throughput counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.supervisor.snapshots(),
            metrics: self.metrics.snapshot(self.queue.depth()),
        }
    }

    /// Stop the pool: reject everything still queued with `PoolStopped`,
    /// wait up to the drain grace period for running tasks, then force-stop
    /// the remainder and release all workers. Idempotent; after it returns,
    /// [`stats`](Self::stats) reports no workers.
    pub fn stop(&self) {
        if self.state.swap(STATE_STOPPED, Ordering::AcqRel) != STATE_RUNNING {
            debug!("stop called on a non-running pool; ignoring");
            return;
        }
        info!("stopping task pool");

        if let Some(monitors) = self.monitors.lock().take() {
            monitors.autoscaler.stop();
            monitors.health.stop();
        }

        let rejected = self.queue.close_and_drain();
        let rejected_queued = rejected.len();
        for task in rejected {
            debug!(
                task_id = task.meta.id,
                task_type = %task.meta.task_type,
                "rejecting queued task during drain"
            );
            let _ = task.reply.send(Err(PoolError::PoolStopped));
        }

        let deadline = Instant::now() + self.config.drain_grace();
        debug!(
            in_flight = self.in_flight.len(),
            grace_ms = duration_ms(self.config.drain_grace()),
            "waiting for running tasks to drain"
        );
        while self.supervisor.any_busy() && Instant::now() < deadline {
            thread::sleep(DRAIN_POLL);
        }

        self.supervisor.drain_all();
        self.supervisor.join_all(JOIN_TIMEOUT);

        let orphaned = self.in_flight.take_all();
        let force_stopped = orphaned.len();
        for (task_id, entry) in orphaned {
            warn!(
                task_id,
                task_type = %entry.task_type,
                worker_id = %entry.worker_id,
                elapsed_ms = duration_ms(entry.started_at.elapsed()),
                "force-stopping task still running at shutdown"
            );
            let worker_id = entry.worker_id;
            let _ = entry.reply.send(Err(PoolError::WorkerDied { worker_id }));
        }

        info!(rejected_queued, force_stopped, "task pool stopped");
    }

    /// The configuration this pool was built with.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        // Signal everything but join nothing; an explicit stop() is the
        // graceful path. Worker threads exit on their next queue poll.
        if self.state.swap(STATE_STOPPED, Ordering::AcqRel) == STATE_RUNNING {
            if let Some(monitors) = self.monitors.lock().take() {
                monitors.autoscaler.signal();
                monitors.health.signal();
            }
            for task in self.queue.close_and_drain() {
                let _ = task.reply.send(Err(PoolError::PoolStopped));
            }
            self.supervisor.drain_all();
            debug!("task pool dropped without explicit stop; workers will be detached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use serde_json::json;

    #[test]
    fn test_invalid_config_rejected() {
        let cfg = PoolConfig::new().with_min_workers(4).with_max_workers(2);
        assert!(matches!(
            TaskPool::new(cfg),
            Err(PoolError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_submit_before_start_rejected() {
        let pool = TaskPool::new(PoolConfig::new()).unwrap();
        pool.register_handler_fn("noop", |p| async move { Ok(p) });
        assert!(matches!(
            pool.submit("noop", json!(null)),
            Err(PoolError::PoolStopped)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_submit_unknown_type_fails_fast() {
        let pool = TaskPool::new(PoolConfig::new().with_min_workers(1)).unwrap();
        pool.start().unwrap();
        let err = pool.submit("unregistered", json!(null)).unwrap_err();
        assert!(matches!(err, PoolError::UnknownTaskType(_)));
        assert_eq!(pool.stats().metrics.queue_depth, 0);
        pool.stop();
    }
}
