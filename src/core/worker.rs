//! Worker execution units.
//!
//! Each worker is a dedicated OS thread hosting its own single-threaded
//! tokio runtime, so handler work never blocks the host application's async
//! runtime and a misbehaving handler can only wedge its own thread. Inside
//! the runtime the handler future runs under a timeout guard while a
//! cooperative heartbeat task ticks alongside it: a well-behaved async
//! handler lets the heartbeat advance, a handler that blocks the thread
//! freezes it — which is exactly the signature the health monitor sweeps
//! for.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::error::PoolError;
use super::metrics::MetricsCollector;
use super::queue::TaskQueue;
use super::registry::HandlerRegistry;
use super::task::{InFlightEntry, InFlightTable, QueuedTask, TaskId, TaskState};
use crate::util::clock::now_ms;

/// How long a worker blocks on the queue before re-checking its retire flag.
const DEQUEUE_POLL: Duration = Duration::from_millis(100);

/// Cadence of the cooperative heartbeat while a handler runs.
const HEARTBEAT_PERIOD: Duration = Duration::from_millis(50);

/// Unique worker identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorkerId(Uuid);

impl WorkerId {
    /// Generate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short prefix used in thread names and log fields.
    #[must_use]
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Waiting on the queue.
    Idle = 0,
    /// Running a task.
    Busy = 1,
    /// Asked to retire; finishes its current task then exits.
    Draining = 2,
    /// Declared dead by the health monitor; thread detached.
    Dead = 3,
}

impl WorkerStatus {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Busy,
            2 => Self::Draining,
            3 => Self::Dead,
            _ => Self::Idle,
        }
    }
}

/// State shared between a worker thread, the supervisor, and the monitors.
pub(crate) struct WorkerState {
    id: WorkerId,
    status: AtomicU8,
    heartbeat_ms: AtomicU64,
    retire: AtomicBool,
    current_task: Mutex<Option<TaskId>>,
}

impl WorkerState {
    pub fn new() -> Self {
        Self {
            id: WorkerId::new(),
            status: AtomicU8::new(WorkerStatus::Idle as u8),
            heartbeat_ms: AtomicU64::new(now_ms()),
            retire: AtomicBool::new(false),
            current_task: Mutex::new(None),
        }
    }

    pub const fn id(&self) -> WorkerId {
        self.id
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: WorkerStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Advance the liveness heartbeat.
    pub fn beat(&self) {
        self.heartbeat_ms.store(now_ms(), Ordering::Release);
    }

    pub fn last_heartbeat_ms(&self) -> u64 {
        self.heartbeat_ms.load(Ordering::Acquire)
    }

    /// Ask the worker to exit after its current task.
    pub fn request_retire(&self) {
        self.retire.store(true, Ordering::Release);
        self.set_status(WorkerStatus::Draining);
    }

    pub fn is_retiring(&self) -> bool {
        self.retire.load(Ordering::Acquire)
    }

    pub fn begin_task(&self, task_id: TaskId) {
        *self.current_task.lock() = Some(task_id);
        if !self.is_retiring() {
            self.set_status(WorkerStatus::Busy);
        }
    }

    pub fn finish_task(&self) {
        *self.current_task.lock() = None;
        if self.is_retiring() {
            self.set_status(WorkerStatus::Draining);
        } else {
            self.set_status(WorkerStatus::Idle);
        }
    }

    pub fn current_task(&self) -> Option<TaskId> {
        *self.current_task.lock()
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            status: self.status(),
            current_task: self.current_task(),
            last_heartbeat_ms: self.last_heartbeat_ms(),
        }
    }
}

/// Read-only view of one worker, exposed through `stats()`.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    /// Worker identifier.
    pub id: WorkerId,
    /// Status at snapshot time.
    pub status: WorkerStatus,
    /// Task the worker currently owns, if any.
    pub current_task: Option<TaskId>,
    /// Last heartbeat, milliseconds since the Unix epoch.
    pub last_heartbeat_ms: u64,
}

/// Shared structures every worker thread needs.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub queue: Arc<TaskQueue>,
    pub registry: Arc<HandlerRegistry>,
    pub in_flight: Arc<InFlightTable>,
    pub metrics: Arc<MetricsCollector>,
}

/// Spawn a worker thread running the dequeue-execute loop.
pub(crate) fn spawn_worker(
    state: Arc<WorkerState>,
    ctx: WorkerContext,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("pressgang-worker-{}", state.id().short()))
        .spawn(move || worker_loop(&state, &ctx))
}

fn worker_loop(state: &Arc<WorkerState>, ctx: &WorkerContext) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(worker_id = %state.id(), error = %e, "failed to create worker runtime");
            state.set_status(WorkerStatus::Dead);
            return;
        }
    };

    debug!(worker_id = %state.id(), "worker thread started");

    loop {
        if state.is_retiring() {
            break;
        }
        state.beat();

        let Some(task) = ctx.queue.dequeue_timeout(DEQUEUE_POLL) else {
            if ctx.queue.is_closed() {
                break;
            }
            continue;
        };

        run_task(&rt, state, ctx, task);
    }

    state.set_status(WorkerStatus::Draining);
    debug!(worker_id = %state.id(), "worker thread exiting");
}

fn run_task(
    rt: &tokio::runtime::Runtime,
    state: &Arc<WorkerState>,
    ctx: &WorkerContext,
    task: QueuedTask,
) {
    let QueuedTask {
        meta,
        payload,
        reply,
    } = task;

    // Registration is validated at submit time; a failed resolve here means
    // the binding changed underneath us, so reject rather than panic.
    let handler = match ctx.registry.resolve(&meta.task_type) {
        Ok(handler) => handler,
        Err(err) => {
            ctx.metrics.record_failure(Duration::ZERO);
            let _ = reply.send(Err(err));
            return;
        }
    };

    state.begin_task(meta.id);
    ctx.in_flight.insert(
        meta.id,
        InFlightEntry {
            reply,
            worker_id: state.id(),
            task_type: Arc::clone(&meta.task_type),
            started_at: Instant::now(),
        },
    );
    debug!(
        task_id = meta.id,
        task_type = %meta.task_type,
        worker_id = %state.id(),
        queued_ms = duration_ms(meta.submitted_at.elapsed()),
        state = ?TaskState::Running,
        "executing task"
    );

    let timeout = meta.timeout;
    let heartbeat = Arc::clone(state);
    let started = Instant::now();
    let outcome = rt.block_on(async move {
        let beat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_PERIOD);
            loop {
                ticker.tick().await;
                heartbeat.beat();
            }
        });
        let result = tokio::time::timeout(timeout, handler.run(payload)).await;
        beat.abort();
        result
    });
    let elapsed = started.elapsed();

    state.beat();
    state.finish_task();

    // The health monitor or the force-stop path may have reclaimed the task
    // while we ran; whoever takes the entry resolves the future.
    let Some(entry) = ctx.in_flight.take(meta.id) else {
        warn!(
            task_id = meta.id,
            task_type = %meta.task_type,
            worker_id = %state.id(),
            "task was reclaimed while running; discarding result"
        );
        return;
    };

    let elapsed_ms = duration_ms(elapsed);
    match outcome {
        Ok(Ok(value)) => {
            ctx.metrics.record_completion(elapsed);
            debug!(
                task_id = meta.id,
                task_type = %meta.task_type,
                elapsed_ms,
                state = ?TaskState::Completed,
                "task completed"
            );
            let _ = entry.reply.send(Ok(value));
        }
        Ok(Err(cause)) => {
            ctx.metrics.record_failure(elapsed);
            warn!(
                task_id = meta.id,
                task_type = %meta.task_type,
                elapsed_ms,
                error = %cause,
                state = ?TaskState::Failed,
                "handler failed"
            );
            let _ = entry
                .reply
                .send(Err(PoolError::HandlerExecution { source: cause }));
        }
        Err(_) => {
            ctx.metrics.record_failure(elapsed);
            warn!(
                task_id = meta.id,
                task_type = %meta.task_type,
                elapsed_ms,
                timeout_ms = duration_ms(timeout),
                state = ?TaskState::TimedOut,
                "task timed out; handler future dropped"
            );
            let _ = entry.reply.send(Err(PoolError::Timeout { elapsed_ms }));
        }
    }
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        let state = WorkerState::new();
        assert_eq!(state.status(), WorkerStatus::Idle);

        state.begin_task(9);
        assert_eq!(state.status(), WorkerStatus::Busy);
        assert_eq!(state.current_task(), Some(9));

        state.finish_task();
        assert_eq!(state.status(), WorkerStatus::Idle);
        assert_eq!(state.current_task(), None);
    }

    #[test]
    fn test_retire_keeps_draining_status() {
        let state = WorkerState::new();
        state.begin_task(1);
        state.request_retire();
        assert!(state.is_retiring());

        state.finish_task();
        assert_eq!(state.status(), WorkerStatus::Draining);
    }

    #[test]
    fn test_heartbeat_advances() {
        let state = WorkerState::new();
        let before = state.last_heartbeat_ms();
        std::thread::sleep(Duration::from_millis(5));
        state.beat();
        assert!(state.last_heartbeat_ms() >= before + 5);
    }

    #[test]
    fn test_worker_id_short() {
        let id = WorkerId::new();
        assert_eq!(id.short().len(), 8);
    }
}
