//! Handler registration and type-erased dispatch.
//!
//! The registry is the single source of truth for valid task types: a
//! string-keyed table mapping each type to the handler that executes it.
//! Payloads and results are `serde_json::Value`, so the pool stays ignorant
//! of task semantics (email sending, thumbnailing, newsletter fan-out) —
//! those live entirely in the registered handlers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use super::error::PoolError;

/// Executes the payload of one task type.
///
/// Handlers must be safe to call concurrently from multiple workers; the
/// pool invokes them from dedicated worker threads, each hosting its own
/// single-threaded tokio runtime.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Run the handler against a payload, producing a result value or the
    /// failure cause surfaced to the caller as
    /// [`PoolError::HandlerExecution`].
    async fn run(&self, payload: Value) -> anyhow::Result<Value>;
}

/// Adapter so plain async closures can be registered without a named type.
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn run(&self, payload: Value) -> anyhow::Result<Value> {
        (self.0)(payload).await
    }
}

/// String-keyed handler table.
///
/// Read-heavy: workers resolve on every task, registration happens at
/// startup, so the map sits behind an `RwLock`.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a task type to a handler. Re-registering the same type
    /// overwrites the previous binding (last-writer-wins).
    pub fn register(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        let previous = self.handlers.write().insert(task_type.clone(), handler);
        if previous.is_some() {
            debug!(task_type = %task_type, "handler re-registered, previous binding replaced");
        } else {
            debug!(task_type = %task_type, "handler registered");
        }
    }

    /// Bind a task type to an async closure.
    pub fn register_fn<F, Fut>(&self, task_type: impl Into<String>, f: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(task_type, Arc::new(FnHandler(f)));
    }

    /// Look up the handler for a task type.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::UnknownTaskType`] when no handler is bound.
    pub fn resolve(&self, task_type: &str) -> Result<Arc<dyn TaskHandler>, PoolError> {
        self.handlers
            .read()
            .get(task_type)
            .cloned()
            .ok_or_else(|| PoolError::UnknownTaskType(task_type.to_string()))
    }

    /// Whether a handler is bound for the given type.
    #[must_use]
    pub fn contains(&self, task_type: &str) -> bool {
        self.handlers.read().contains_key(task_type)
    }
}
