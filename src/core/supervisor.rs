//! Worker set ownership: creation, retirement, reaping, and replacement.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::error::PoolError;
use super::worker::{spawn_worker, WorkerContext, WorkerId, WorkerSnapshot, WorkerState, WorkerStatus};

/// A live worker: its shared state plus the thread handle used for joining.
struct WorkerHandle {
    state: Arc<WorkerState>,
    join: Option<thread::JoinHandle<()>>,
}

/// Owns the set of live workers and keeps it within `[min_workers, max_workers]`.
///
/// All mutations of the worker registry go through the single mutex here;
/// the autoscaler, the health monitor, and `stop()` never touch worker
/// threads directly.
pub(crate) struct WorkerSupervisor {
    min_workers: usize,
    max_workers: usize,
    ctx: WorkerContext,
    workers: Mutex<HashMap<WorkerId, WorkerHandle>>,
}

impl WorkerSupervisor {
    pub fn new(min_workers: usize, max_workers: usize, ctx: WorkerContext) -> Self {
        Self {
            min_workers,
            max_workers,
            ctx,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn a single worker thread and register it.
    fn spawn_one(&self) -> std::io::Result<WorkerId> {
        let state = Arc::new(WorkerState::new());
        let id = state.id();
        let join = spawn_worker(Arc::clone(&state), self.ctx.clone())?;

        let count = {
            let mut workers = self.workers.lock();
            workers.insert(
                id,
                WorkerHandle {
                    state,
                    join: Some(join),
                },
            );
            workers.len()
        };
        self.ctx.metrics.record_worker_count(count);
        debug!(worker_id = %id, workers = count, "worker spawned");
        Ok(id)
    }

    /// Provision the initial worker set at `start()`.
    ///
    /// # Errors
    ///
    /// Rolls back any workers already spawned and returns
    /// [`PoolError::PoolNotReady`] if a thread cannot be created.
    pub fn provision(&self, count: usize) -> Result<(), PoolError> {
        for n in 0..count {
            if let Err(e) = self.spawn_one() {
                error!(error = %e, provisioned = n, wanted = count, "worker provisioning failed");
                for (_, handle) in self.workers.lock().drain() {
                    handle.state.request_retire();
                }
                return Err(PoolError::PoolNotReady(format!(
                    "provisioned {n} of {count} workers: {e}"
                )));
            }
        }
        Ok(())
    }

    /// Configured upper bound on the worker set.
    pub const fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Workers currently registered, including ones still draining out.
    pub fn live_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Workers that have not been asked to retire.
    pub fn active_count(&self) -> usize {
        self.workers
            .lock()
            .values()
            .filter(|h| !h.state.is_retiring())
            .count()
    }

    /// Grow or shrink toward `target`, clamped to the configured bounds.
    /// Shrinking retires workers gracefully (drain, then reap).
    pub fn scale_to(&self, target: usize) {
        let target = target.clamp(self.min_workers, self.max_workers);

        while self.active_count() < target && self.live_count() < self.max_workers {
            if let Err(e) = self.spawn_one() {
                error!(error = %e, "scale-up spawn failed");
                break;
            }
        }
        while self.active_count() > target {
            if !self.retire_one_unchecked() {
                break;
            }
        }
    }

    /// Retire one worker if that keeps the active set at or above
    /// `min_workers`. Idle workers are preferred. Returns whether a worker
    /// was retired.
    pub fn retire_one(&self) -> bool {
        if self.active_count() <= self.min_workers {
            return false;
        }
        self.retire_one_unchecked()
    }

    fn retire_one_unchecked(&self) -> bool {
        let workers = self.workers.lock();
        let candidate = workers
            .values()
            .filter(|h| !h.state.is_retiring())
            .min_by_key(|h| match h.state.status() {
                WorkerStatus::Idle => 0_u8,
                _ => 1,
            });
        candidate.map_or(false, |handle| {
            handle.state.request_retire();
            debug!(worker_id = %handle.state.id(), "worker retiring");
            true
        })
    }

    /// Join and remove workers whose threads have exited.
    pub fn reap(&self) {
        let mut workers = self.workers.lock();
        let finished: Vec<WorkerId> = workers
            .iter()
            .filter(|(_, h)| h.join.as_ref().is_none_or(thread::JoinHandle::is_finished))
            .map(|(id, _)| *id)
            .collect();
        for id in finished {
            if let Some(mut handle) = workers.remove(&id) {
                if let Some(join) = handle.join.take() {
                    if join.join().is_err() {
                        warn!(worker_id = %id, "worker thread panicked");
                    }
                }
                debug!(worker_id = %id, workers = workers.len(), "worker reaped");
            }
        }
    }

    /// Remove a worker the health monitor declared dead. The thread handle
    /// is dropped (detached); if the thread ever unsticks, its retire flag
    /// makes it exit without touching the pool again.
    pub fn remove_dead(&self, id: WorkerId) -> Option<Arc<WorkerState>> {
        let handle = self.workers.lock().remove(&id)?;
        handle.state.request_retire();
        handle.state.set_status(WorkerStatus::Dead);
        Some(handle.state)
    }

    /// Spawn replacements until the active set is back at `min_workers`.
    /// Used by the health monitor; bypasses the autoscaler's cooldown.
    pub fn ensure_min(&self) {
        while self.active_count() < self.min_workers && self.live_count() < self.max_workers {
            match self.spawn_one() {
                Ok(id) => info!(worker_id = %id, "replacement worker spawned"),
                Err(e) => {
                    error!(error = %e, "failed to spawn replacement worker");
                    break;
                }
            }
        }
    }

    /// Whether any worker currently owns a task.
    pub fn any_busy(&self) -> bool {
        self.workers
            .lock()
            .values()
            .any(|h| h.state.current_task().is_some())
    }

    /// Shared states of all live workers, for the health sweep.
    pub fn states(&self) -> Vec<Arc<WorkerState>> {
        self.workers
            .lock()
            .values()
            .map(|h| Arc::clone(&h.state))
            .collect()
    }

    /// Snapshots for `stats()`.
    pub fn snapshots(&self) -> Vec<WorkerSnapshot> {
        self.workers
            .lock()
            .values()
            .map(|h| h.state.snapshot())
            .collect()
    }

    /// Ask every worker to exit after its current task.
    pub fn drain_all(&self) {
        for handle in self.workers.lock().values() {
            handle.state.request_retire();
        }
    }

    /// Join every worker with a per-worker timeout, detaching stragglers.
    /// The registry is emptied up front so `stats()` reports no workers
    /// while joins are in progress.
    pub fn join_all(&self, timeout: Duration) {
        let handles: Vec<(WorkerId, WorkerHandle)> = self.workers.lock().drain().collect();
        for (id, mut handle) in handles {
            let Some(join) = handle.join.take() else {
                continue;
            };
            let (tx, rx) = std::sync::mpsc::channel();
            let join_thread = thread::spawn(move || {
                let _ = tx.send(join.join().is_ok());
            });
            match rx.recv_timeout(timeout) {
                Ok(true) => {
                    debug!(worker_id = %id, "worker joined");
                    let _ = join_thread.join();
                }
                Ok(false) => {
                    warn!(worker_id = %id, "worker panicked during shutdown");
                    let _ = join_thread.join();
                }
                Err(_) => {
                    // Stuck in a blocking handler; leave the helper thread
                    // parked on the join and let the OS clean both up.
                    warn!(worker_id = %id, "worker did not exit within grace period; detaching");
                    handle.state.set_status(WorkerStatus::Dead);
                }
            }
        }
    }
}
