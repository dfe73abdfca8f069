//! Builders to construct task pools from configuration.

use std::collections::HashMap;

use crate::config::{PoolConfig, SchedulerConfig};
use crate::core::{PoolError, TaskPool};

/// Build a single pool from configuration. Handlers are registered on the
/// returned pool before calling `start()`.
///
/// # Errors
///
/// Returns [`PoolError::InvalidConfig`] if validation fails.
pub fn build_pool(cfg: PoolConfig) -> Result<TaskPool, PoolError> {
    TaskPool::new(cfg)
}

/// Build every pool named in a scheduler configuration.
///
/// # Errors
///
/// Returns [`PoolError::InvalidConfig`] naming the first invalid pool.
pub fn build_pools(cfg: &SchedulerConfig) -> Result<HashMap<String, TaskPool>, PoolError> {
    cfg.validate().map_err(PoolError::InvalidConfig)?;

    let mut pools = HashMap::new();
    for (name, pool_cfg) in &cfg.pools {
        pools.insert(name.clone(), TaskPool::new(pool_cfg.clone())?);
    }
    Ok(pools)
}
