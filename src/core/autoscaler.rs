//! Load-driven scaling control loop.
//!
//! Runs on its own thread, ticking at the health-check interval. Each tick
//! compares queue pressure (`depth / workers`) against the scale-up
//! threshold and commands the supervisor to grow, or — after the pool has
//! sat idle through the cooldown window — retires one worker per tick back
//! toward the minimum. One-at-a-time shrink plus the cooldown gives the
//! loop its hysteresis; scaling never leaves the configured bounds.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::{debug, info};

use super::queue::TaskQueue;
use super::supervisor::WorkerSupervisor;

/// Handle to the scaling thread.
pub(crate) struct Autoscaler {
    shutdown_tx: Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl Autoscaler {
    /// Start the control loop.
    pub fn spawn(
        interval: Duration,
        scale_up_threshold: f64,
        cooldown: Duration,
        queue: Arc<TaskQueue>,
        supervisor: Arc<WorkerSupervisor>,
    ) -> std::io::Result<Self> {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let cooldown_ticks = cooldown
            .as_millis()
            .div_ceil(interval.as_millis().max(1))
            .max(1);

        let join = thread::Builder::new()
            .name("pressgang-autoscaler".into())
            .spawn(move || {
                let ticker = tick(interval);
                let mut idle_ticks: u128 = 0;
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            idle_ticks = run_tick(
                                &queue,
                                &supervisor,
                                scale_up_threshold,
                                cooldown_ticks,
                                idle_ticks,
                            );
                        }
                        recv(shutdown_rx) -> _ => break,
                    }
                }
                debug!("autoscaler stopped");
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

/// One scaling decision. Returns the updated idle-tick count.
fn run_tick(
    queue: &TaskQueue,
    supervisor: &WorkerSupervisor,
    scale_up_threshold: f64,
    cooldown_ticks: u128,
    idle_ticks: u128,
) -> u128 {
    supervisor.reap();

    let depth = queue.depth();
    let workers = supervisor.active_count();
    #[allow(clippy::cast_precision_loss)]
    let pressure = depth as f64 / workers.max(1) as f64;

    if pressure >= scale_up_threshold && workers < supervisor.max_workers() {
        // Double up to the shortfall, capped at max by the supervisor.
        let grow = depth.min(workers).max(1);
        let target = workers + grow;
        info!(
            depth,
            workers, pressure, target, "queue pressure high; scaling up"
        );
        supervisor.scale_to(target);
        return 0;
    }

    if depth == 0 && !supervisor.any_busy() {
        let idle_ticks = idle_ticks.saturating_add(1);
        if idle_ticks > cooldown_ticks && supervisor.retire_one() {
            debug!(workers = supervisor.active_count(), "idle cooldown elapsed; retired one worker");
        }
        return idle_ticks;
    }

    0
}
