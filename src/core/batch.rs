//! Batch submission: bounded concurrency, input-ordered results.
//!
//! A batch fans its items into individual submissions through a sliding
//! window: at most `concurrency` tasks are unresolved at any moment, and
//! results are collected strictly in input order regardless of completion
//! order. Fail-fast is the default policy — the first failure aborts the
//! batch and propagates; still-running items are detached, not cancelled.

use std::collections::VecDeque;
use std::time::Duration;

use serde_json::Value;

use super::error::PoolError;
use super::task::{Priority, TaskHandle, TaskResult};

/// Options accepted by `submit_batch` and `submit_batch_outcomes`.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Maximum simultaneously in-flight submissions.
    pub concurrency: usize,
    /// Priority applied to every item.
    pub priority: Priority,
    /// Per-item timeout; falls back to the pool default when unset.
    pub timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 16,
            priority: Priority::default(),
            timeout: None,
        }
    }
}

impl BatchOptions {
    /// Set the in-flight window size.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the priority applied to every item.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set a per-item timeout overriding the pool default.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Drive a batch through the sliding window.
///
/// `submit` is called once per item in input order. With `fail_fast` the
/// first error (at submission or resolution) aborts and is returned;
/// otherwise every item settles and the per-item outcomes come back in
/// input order.
pub(crate) async fn run_batch<S>(
    items: Vec<Value>,
    concurrency: usize,
    fail_fast: bool,
    submit: S,
) -> Result<Vec<TaskResult>, PoolError>
where
    S: Fn(Value) -> Result<TaskHandle, PoolError>,
{
    let concurrency = concurrency.max(1);
    let mut outcomes = Vec::with_capacity(items.len());
    let mut window: VecDeque<Result<TaskHandle, PoolError>> = VecDeque::new();

    for item in items {
        if window.len() >= concurrency {
            settle_front(&mut window, &mut outcomes, fail_fast).await?;
        }
        window.push_back(submit(item));
    }
    while !window.is_empty() {
        settle_front(&mut window, &mut outcomes, fail_fast).await?;
    }

    Ok(outcomes)
}

/// Await the oldest slot in the window; submission errors settle in place
/// so ordering is preserved for them too.
async fn settle_front(
    window: &mut VecDeque<Result<TaskHandle, PoolError>>,
    outcomes: &mut Vec<TaskResult>,
    fail_fast: bool,
) -> Result<(), PoolError> {
    let Some(slot) = window.pop_front() else {
        return Ok(());
    };
    let result = match slot {
        Ok(handle) => handle.await,
        Err(err) => Err(err),
    };
    if fail_fast {
        if let Err(err) = result {
            return Err(err);
        }
    }
    outcomes.push(result);
    Ok(())
}
