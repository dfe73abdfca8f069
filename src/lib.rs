//! # Pressgang
//!
//! An elastic worker pool and task scheduler for the Pressgang publishing
//! platform.
//!
//! HTTP handlers should never send newsletters, render thumbnails, or churn
//! through comment re-indexing inline. This crate is the engine those
//! handlers defer to: a single-process, best-effort, at-most-once executor
//! for heterogeneous asynchronous work, with dynamic concurrency, health
//! supervision, timeout enforcement, and throughput metrics.
//!
//! ## Key Features
//!
//! - **Pluggable task types**: a string-keyed handler registry is the single
//!   source of truth for what the pool can run; the pool itself knows
//!   nothing about task semantics
//! - **Elastic workers**: a load-driven control loop grows and shrinks the
//!   worker set within `[min_workers, max_workers]`
//! - **Failure isolation**: every per-task failure (handler error, timeout,
//!   dead worker) rejects only that task's future
//! - **Self-healing**: a heartbeat sweep detects stuck workers, fails their
//!   tasks, and spawns replacements
//! - **Ordered batching**: `submit_batch` fans items out under bounded
//!   concurrency and returns results in input order
//!
//! ## Example
//!
//! ```rust,no_run
//! use pressgang::config::PoolConfig;
//! use pressgang::core::{BatchOptions, TaskPool};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() -> Result<(), pressgang::core::PoolError> {
//! let pool = TaskPool::new(
//!     PoolConfig::new()
//!         .with_min_workers(2)
//!         .with_max_workers(16)
//!         .with_scale_up_threshold(4.0),
//! )?;
//!
//! pool.register_handler_fn("resize-image", |payload| async move {
//!     // fetch, resize, store; return the new asset's metadata
//!     Ok(payload)
//! });
//! pool.start()?;
//!
//! // One-off submission from a request handler.
//! let asset = pool.submit("resize-image", json!({"upload_id": 311}))?.await?;
//!
//! // Fan a gallery out with bounded concurrency; results keep input order.
//! let gallery: Vec<_> = (0..20).map(|i| json!({"upload_id": i})).collect();
//! let resized = pool
//!     .submit_batch("resize-image", gallery, BatchOptions::default().with_concurrency(8))
//!     .await?;
//!
//! pool.stop();
//! # let _ = (asset, resized);
//! # Ok(())
//! # }
//! ```
//!
//! Workers are dedicated OS threads, each with its own single-threaded
//! tokio runtime, so handler work never competes with the host
//! application's async runtime and a wedged handler can only take down its
//! own thread — which the health monitor then reclaims.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Builders to construct pools from configuration.
pub mod builders;
/// Configuration models for pools and their scaling behavior.
pub mod config;
/// Core scheduling components: queue, workers, supervision, and the pool facade.
pub mod core;
/// Shared utilities.
pub mod util;
