//! Shared task queue with priority classes and blocking dequeue.
//!
//! The queue is the single structure shared between producers (callers
//! submitting tasks) and consumers (workers). All access goes through one
//! mutex, so a dequeue is atomic and never hands the same task to two
//! workers. Ordering is highest priority first, insertion order within a
//! priority class, enforced with a binary heap over (priority, sequence).

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::error::PoolError;
use super::task::{Priority, QueuedTask};

/// Heap wrapper ordering tasks by priority, then FIFO within a class.
struct QueueEntry {
    priority: Priority,
    seq: u64,
    task: QueuedTask,
}

impl QueueEntry {
    const fn priority_value(p: Priority) -> u8 {
        match p {
            Priority::Low => 0,
            Priority::Normal => 1,
            Priority::High => 2,
            Priority::Critical => 3,
        }
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        let self_priority = Self::priority_value(self.priority);
        let other_priority = Self::priority_value(other.priority);

        // Higher priority first; earlier insertion wins within a class
        // (reversed for the max-heap).
        match self_priority.cmp(&other_priority) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ordering => ordering,
        }
    }
}

struct QueueInner {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
    closed: bool,
}

/// Thread-safe FIFO-within-priority queue feeding the worker set.
pub(crate) struct TaskQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    max_depth: Option<usize>,
}

impl TaskQueue {
    /// Create a queue; `max_depth = None` leaves it unbounded.
    pub fn new(max_depth: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            available: Condvar::new(),
            max_depth,
        }
    }

    /// Enqueue a task and wake one waiting worker.
    ///
    /// Fails with `QueueFull` once the configured max depth is reached and
    /// with `PoolStopped` after the queue is closed.
    pub fn push(&self, task: QueuedTask) -> Result<(), PoolError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(PoolError::PoolStopped);
        }
        if let Some(max_depth) = self.max_depth {
            if inner.heap.len() >= max_depth {
                return Err(PoolError::QueueFull {
                    depth: inner.heap.len(),
                    max_depth,
                });
            }
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(QueueEntry {
            priority: task.meta.priority,
            seq,
            task,
        });
        drop(inner);
        self.available.notify_one();
        Ok(())
    }

    /// Block until a task is available or `timeout` elapses.
    ///
    /// Returns `None` on timeout and immediately once the queue is closed
    /// and empty, so workers can re-check their retire flags and exit.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<QueuedTask> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(entry) = inner.heap.pop() {
                return Some(entry.task);
            }
            if inner.closed {
                return None;
            }
            if self.available.wait_for(&mut inner, timeout).timed_out() {
                return inner.heap.pop().map(|entry| entry.task);
            }
        }
    }

    /// Close the queue and return every still-queued task so the caller can
    /// reject them. Wakes all blocked workers.
    pub fn close_and_drain(&self) -> Vec<QueuedTask> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let drained = inner.heap.drain().map(|entry| entry.task).collect();
        drop(inner);
        self.available.notify_all();
        drained
    }

    /// Number of queued tasks.
    pub fn depth(&self) -> usize {
        self.inner.lock().heap.len()
    }

    /// Whether `close_and_drain` has run.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
