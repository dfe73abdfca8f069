//! Pool and scheduler configuration structures.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Worker pool configuration.
///
/// Durations are carried as millisecond fields so the structure round-trips
/// through JSON and environment variables without custom codecs; the
/// `Duration` accessors are what the pool itself consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers provisioned at `start()`; the scale-down floor.
    pub min_workers: usize,
    /// Scale-up ceiling.
    pub max_workers: usize,
    /// Default per-task timeout in milliseconds.
    pub task_timeout_ms: u64,
    /// Queue-depth-per-worker ratio that triggers scale-up.
    pub scale_up_threshold: f64,
    /// Tick period of the health monitor and autoscaler, milliseconds.
    pub health_check_interval_ms: u64,
    /// Maximum queued tasks before submissions are rejected; `None` leaves
    /// the queue unbounded.
    pub max_queue_depth: Option<usize>,
    /// How long the pool must sit idle before workers are retired,
    /// milliseconds.
    pub scale_down_cooldown_ms: u64,
    /// Consecutive health intervals without a heartbeat before a busy
    /// worker is declared dead.
    pub stalled_checks: u32,
    /// How long `stop()` waits for running tasks, milliseconds.
    pub drain_grace_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: num_cpus::get().max(2),
            task_timeout_ms: 30_000,
            scale_up_threshold: 4.0,
            health_check_interval_ms: 500,
            max_queue_depth: None,
            scale_down_cooldown_ms: 10_000,
            stalled_checks: 3,
            drain_grace_ms: 5_000,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum worker count.
    #[must_use]
    pub const fn with_min_workers(mut self, min_workers: usize) -> Self {
        self.min_workers = min_workers;
        self
    }

    /// Set the maximum worker count.
    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the default per-task timeout.
    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = ms(timeout);
        self
    }

    /// Set the queue-pressure ratio that triggers scale-up.
    #[must_use]
    pub const fn with_scale_up_threshold(mut self, threshold: f64) -> Self {
        self.scale_up_threshold = threshold;
        self
    }

    /// Set the health monitor / autoscaler tick period.
    #[must_use]
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval_ms = ms(interval);
        self
    }

    /// Bound the queue; submissions beyond this depth reject with
    /// `QueueFull`.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, max_depth: usize) -> Self {
        self.max_queue_depth = Some(max_depth);
        self
    }

    /// Set the idle window required before scale-down begins.
    #[must_use]
    pub fn with_scale_down_cooldown(mut self, cooldown: Duration) -> Self {
        self.scale_down_cooldown_ms = ms(cooldown);
        self
    }

    /// Set how many stalled health intervals mark a worker dead.
    #[must_use]
    pub const fn with_stalled_checks(mut self, checks: u32) -> Self {
        self.stalled_checks = checks;
        self
    }

    /// Set how long `stop()` waits for running tasks.
    #[must_use]
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace_ms = ms(grace);
        self
    }

    /// Default per-task timeout.
    #[must_use]
    pub const fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    /// Monitor tick period.
    #[must_use]
    pub const fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Idle window before scale-down.
    #[must_use]
    pub const fn scale_down_cooldown(&self) -> Duration {
        Duration::from_millis(self.scale_down_cooldown_ms)
    }

    /// Drain grace period for `stop()`.
    #[must_use]
    pub const fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_workers == 0 {
            return Err("min_workers must be greater than 0".into());
        }
        if self.max_workers < self.min_workers {
            return Err(format!(
                "max_workers ({}) must be >= min_workers ({})",
                self.max_workers, self.min_workers
            ));
        }
        if self.task_timeout_ms == 0 {
            return Err("task_timeout_ms must be greater than 0".into());
        }
        if !self.scale_up_threshold.is_finite() || self.scale_up_threshold <= 0.0 {
            return Err("scale_up_threshold must be a positive finite number".into());
        }
        if self.health_check_interval_ms == 0 {
            return Err("health_check_interval_ms must be greater than 0".into());
        }
        if self.max_queue_depth == Some(0) {
            return Err("max_queue_depth must be greater than 0 when set".into());
        }
        if self.stalled_checks == 0 {
            return Err("stalled_checks must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse a configuration from a JSON string and validate it. Missing
    /// fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error description.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build a configuration from defaults overridden by `PRESSGANG_*`
    /// environment variables (loading a `.env` file first when present):
    /// `PRESSGANG_MIN_WORKERS`, `PRESSGANG_MAX_WORKERS`,
    /// `PRESSGANG_TASK_TIMEOUT_MS`, `PRESSGANG_SCALE_UP_THRESHOLD`,
    /// `PRESSGANG_HEALTH_CHECK_INTERVAL_MS`, `PRESSGANG_MAX_QUEUE_DEPTH`
    /// (0 means unbounded), `PRESSGANG_SCALE_DOWN_COOLDOWN_MS`,
    /// `PRESSGANG_STALLED_CHECKS`, `PRESSGANG_DRAIN_GRACE_MS`.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error description.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let mut cfg = Self::default();
        env_override(&mut cfg.min_workers, "PRESSGANG_MIN_WORKERS")?;
        env_override(&mut cfg.max_workers, "PRESSGANG_MAX_WORKERS")?;
        env_override(&mut cfg.task_timeout_ms, "PRESSGANG_TASK_TIMEOUT_MS")?;
        env_override(&mut cfg.scale_up_threshold, "PRESSGANG_SCALE_UP_THRESHOLD")?;
        env_override(
            &mut cfg.health_check_interval_ms,
            "PRESSGANG_HEALTH_CHECK_INTERVAL_MS",
        )?;
        env_override(
            &mut cfg.scale_down_cooldown_ms,
            "PRESSGANG_SCALE_DOWN_COOLDOWN_MS",
        )?;
        env_override(&mut cfg.stalled_checks, "PRESSGANG_STALLED_CHECKS")?;
        env_override(&mut cfg.drain_grace_ms, "PRESSGANG_DRAIN_GRACE_MS")?;

        let mut depth: usize = 0;
        env_override(&mut depth, "PRESSGANG_MAX_QUEUE_DEPTH")?;
        if depth > 0 {
            cfg.max_queue_depth = Some(depth);
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn env_override<T>(field: &mut T, key: &str) -> Result<(), String>
where
    T: FromStr,
    T::Err: Display,
{
    if let Ok(raw) = std::env::var(key) {
        *field = raw
            .trim()
            .parse()
            .map_err(|e| format!("invalid {key}: {e}"))?;
    }
    Ok(())
}

/// Root configuration for hosts running several pools (e.g. one for email
/// delivery and one for media processing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Map of pool name to configuration.
    pub pools: HashMap<String, PoolConfig>,
}

impl SchedulerConfig {
    /// Validate all pools and ensure at least one pool exists.
    ///
    /// # Errors
    ///
    /// Returns a description naming the first invalid pool.
    pub fn validate(&self) -> Result<(), String> {
        if self.pools.is_empty() {
            return Err("at least one pool must be defined".into());
        }
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error description.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PoolConfig::new().validate().is_ok());
    }

    #[test]
    fn test_invalid_min_workers() {
        let cfg = PoolConfig::new().with_min_workers(0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_max_below_min() {
        let cfg = PoolConfig::new().with_min_workers(8).with_max_workers(2);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_invalid_threshold() {
        let cfg = PoolConfig::new().with_scale_up_threshold(0.0);
        assert!(cfg.validate().is_err());
        let cfg = PoolConfig::new().with_scale_up_threshold(f64::NAN);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_builder_round_trip() {
        let cfg = PoolConfig::new()
            .with_min_workers(2)
            .with_max_workers(8)
            .with_task_timeout(Duration::from_secs(5))
            .with_max_queue_depth(100)
            .with_stalled_checks(5);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.task_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.max_queue_depth, Some(100));
    }

    #[test]
    fn test_from_json_partial() {
        let cfg = PoolConfig::from_json_str(
            r#"{
                "min_workers": 1,
                "max_workers": 4,
                "scale_up_threshold": 2.5
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.min_workers, 1);
        assert_eq!(cfg.max_workers, 4);
        // Unspecified fields fall back to defaults.
        assert_eq!(cfg.task_timeout_ms, 30_000);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let result = PoolConfig::from_json_str(r#"{"min_workers": 0}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_scheduler_config() {
        let cfg = SchedulerConfig::from_json_str(
            r#"{
                "pools": {
                    "email": { "min_workers": 1, "max_workers": 4 },
                    "media": { "min_workers": 2, "max_workers": 8, "max_queue_depth": 500 }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.pools.len(), 2);
        assert_eq!(cfg.pools["media"].max_queue_depth, Some(500));
    }

    #[test]
    fn test_scheduler_config_empty_pools() {
        let cfg = SchedulerConfig {
            pools: HashMap::new(),
        };
        assert!(cfg.validate().is_err());
    }
}
