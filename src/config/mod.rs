//! Configuration models for pools and their scaling behavior.

pub mod pool;

pub use pool::{PoolConfig, SchedulerConfig};
