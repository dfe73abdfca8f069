//! Liveness supervision: detect stuck workers and replace them.
//!
//! A worker's heartbeat advances while its thread makes progress — between
//! dequeues when idle, and from a cooperative ticker while an async handler
//! runs. A handler that blocks its thread freezes the heartbeat; once it
//! has not advanced for more than `stalled_checks` consecutive intervals
//! the worker is declared dead. Its in-flight task rejects with
//! `WorkerDied`, the thread is detached, and a replacement is spawned
//! immediately if the pool fell below its minimum — the autoscaler's
//! cooldown does not apply here.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::{debug, error, warn};

use super::error::PoolError;
use super::metrics::MetricsCollector;
use super::supervisor::WorkerSupervisor;
use super::task::InFlightTable;
use super::worker::duration_ms;
use crate::util::clock::now_ms;

/// Handle to the liveness sweep thread.
pub(crate) struct HealthMonitor {
    shutdown_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Start the sweep loop.
    pub fn spawn(
        interval: Duration,
        stalled_checks: u32,
        supervisor: Arc<WorkerSupervisor>,
        in_flight: Arc<InFlightTable>,
        metrics: Arc<MetricsCollector>,
    ) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let stall_limit_ms =
            duration_ms(interval).saturating_mul(u64::from(stalled_checks));

        let join = thread::Builder::new()
            .name("pressgang-health".into())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            sweep(&supervisor, &in_flight, &metrics, stall_limit_ms);
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                debug!("health monitor stopped");
            })?;

        Ok(Self {
            shutdown_tx,
            join: Some(join),
        })
    }

    /// Signal shutdown without waiting for the thread.
    pub fn signal(&self) {
        let _ = self.shutdown_tx.try_send(());
    }

    /// Signal shutdown and join the thread.
    pub fn stop(mut self) {
        self.signal();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// One liveness pass over the worker set.
fn sweep(
    supervisor: &WorkerSupervisor,
    in_flight: &InFlightTable,
    metrics: &MetricsCollector,
    stall_limit_ms: u64,
) {
    supervisor.reap();

    let now = now_ms();
    for state in supervisor.states() {
        // Only a worker that owns a task can be stuck; idle workers beat
        // on every dequeue poll.
        let Some(task_id) = state.current_task() else {
            continue;
        };
        let stalled_ms = now.saturating_sub(state.last_heartbeat_ms());
        if stalled_ms <= stall_limit_ms {
            continue;
        }

        let worker_id = state.id();
        warn!(
            worker_id = %worker_id,
            task_id,
            stalled_ms,
            "worker heartbeat stalled; declaring dead"
        );
        supervisor.remove_dead(worker_id);

        if let Some(entry) = in_flight.take(task_id) {
            let elapsed = entry.started_at.elapsed();
            metrics.record_failure(elapsed);
            error!(
                task_id,
                task_type = %entry.task_type,
                worker_id = %worker_id,
                elapsed_ms = duration_ms(elapsed),
                "rejecting task owned by dead worker"
            );
            let _ = entry.reply.send(Err(PoolError::WorkerDied { worker_id }));
        }

        supervisor.ensure_min();
    }
}
