//! Throughput metrics aggregated across workers.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Lock-free counters updated by every worker on task completion.
#[derive(Debug, Default)]
pub(crate) struct MetricsCollector {
    completed: AtomicU64,
    failed: AtomicU64,
    /// Cumulative handler execution time across finished tasks.
    busy_nanos: AtomicU64,
    peak_workers: AtomicUsize,
}

impl MetricsCollector {
    pub fn record_completion(&self, elapsed: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.add_busy(elapsed);
    }

    pub fn record_failure(&self, elapsed: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.add_busy(elapsed);
    }

    fn add_busy(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.busy_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Record the current worker count; the peak is monotone within a run.
    pub fn record_worker_count(&self, count: usize) {
        self.peak_workers.fetch_max(count, Ordering::Relaxed);
    }

    /// Snapshot the counters. `queue_depth` is sampled by the caller since
    /// the collector does not own the queue.
    pub fn snapshot(&self, queue_depth: usize) -> MetricsSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let finished = completed + failed;
        let avg_processing_time = if finished == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.busy_nanos.load(Ordering::Relaxed) / finished)
        };
        MetricsSnapshot {
            total_tasks_completed: completed,
            total_tasks_failed: failed,
            avg_processing_time,
            peak_worker_count: self.peak_workers.load(Ordering::Relaxed),
            queue_depth,
        }
    }
}

/// Point-in-time view of pool throughput, recomputed on demand.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    /// Tasks whose handler returned successfully.
    pub total_tasks_completed: u64,
    /// Tasks that failed, timed out, or lost their worker.
    pub total_tasks_failed: u64,
    /// Mean handler execution time across finished tasks.
    pub avg_processing_time: Duration,
    /// Highest concurrent worker count observed this run.
    pub peak_worker_count: usize,
    /// Queued tasks at snapshot time.
    pub queue_depth: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts_and_average() {
        let metrics = MetricsCollector::default();
        metrics.record_completion(Duration::from_millis(10));
        metrics.record_completion(Duration::from_millis(30));
        metrics.record_failure(Duration::from_millis(20));

        let snap = metrics.snapshot(4);
        assert_eq!(snap.total_tasks_completed, 2);
        assert_eq!(snap.total_tasks_failed, 1);
        assert_eq!(snap.avg_processing_time, Duration::from_millis(20));
        assert_eq!(snap.queue_depth, 4);
    }

    #[test]
    fn test_peak_is_monotone() {
        let metrics = MetricsCollector::default();
        metrics.record_worker_count(2);
        metrics.record_worker_count(8);
        metrics.record_worker_count(3);
        assert_eq!(metrics.snapshot(0).peak_worker_count, 8);
    }

    #[test]
    fn test_empty_snapshot() {
        let metrics = MetricsCollector::default();
        let snap = metrics.snapshot(0);
        assert_eq!(snap.total_tasks_completed, 0);
        assert_eq!(snap.avg_processing_time, Duration::ZERO);
    }
}
