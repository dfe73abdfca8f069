//! Integration tests for elastic scaling and health supervision.
//!
//! These exercise the control loops end to end:
//! - Scale-up under queue pressure
//! - Scale-down toward the minimum after the idle cooldown
//! - Worker-count bounds holding throughout
//! - Dead-worker detection, task rejection, and self-healing

use std::time::{Duration, Instant};

use pressgang::config::PoolConfig;
use pressgang::core::{PoolError, TaskPool};
use serde_json::json;

fn register_io_bound(pool: &TaskPool, delay: Duration) {
    pool.register_handler_fn("deliver", move |payload| async move {
        // Stands in for an SMTP round-trip or a storage upload.
        tokio::time::sleep(delay).await;
        Ok(payload)
    });
}

/// A burst that pushes `queue_depth / workers` past the threshold must grow
/// the worker set beyond its initial size, never past the maximum.
#[tokio::test(flavor = "multi_thread")]
async fn test_scale_up_under_burst() {
    println!("\n=== test_scale_up_under_burst ===");

    let config = PoolConfig::new()
        .with_min_workers(2)
        .with_max_workers(8)
        .with_scale_up_threshold(2.0)
        .with_health_check_interval(Duration::from_millis(50))
        .with_scale_down_cooldown(Duration::from_secs(30))
        .with_drain_grace(Duration::from_secs(2));
    let pool = TaskPool::new(config).expect("Failed to create pool");
    register_io_bound(&pool, Duration::from_millis(50));
    pool.start().expect("Failed to start");

    let initial_workers = pool.stats().workers.len();
    assert_eq!(initial_workers, 2);

    let handles: Vec<_> = (0..100)
        .map(|i| pool.submit("deliver", json!(i)).expect("Failed to submit"))
        .collect();

    let results = futures::future::join_all(handles).await;
    assert!(results.into_iter().all(|r| r.is_ok()));

    let stats = pool.stats();
    println!(
        "peak={} final={} completed={}",
        stats.metrics.peak_worker_count,
        stats.workers.len(),
        stats.metrics.total_tasks_completed
    );
    assert!(
        stats.metrics.peak_worker_count > initial_workers,
        "Expected scale-up beyond {initial_workers} workers"
    );
    assert!(stats.metrics.peak_worker_count <= 8);
    assert_eq!(stats.metrics.total_tasks_completed, 100);

    pool.stop();
    println!("=== test_scale_up_under_burst PASSED ===\n");
}

/// After load subsides and the cooldown elapses, the worker count trends
/// back to the minimum, one retirement per tick, never below it.
#[tokio::test(flavor = "multi_thread")]
async fn test_scale_down_after_cooldown() {
    println!("\n=== test_scale_down_after_cooldown ===");

    let config = PoolConfig::new()
        .with_min_workers(2)
        .with_max_workers(8)
        .with_scale_up_threshold(2.0)
        .with_health_check_interval(Duration::from_millis(50))
        .with_scale_down_cooldown(Duration::from_millis(200))
        .with_drain_grace(Duration::from_secs(2));
    let pool = TaskPool::new(config).expect("Failed to create pool");
    register_io_bound(&pool, Duration::from_millis(50));
    pool.start().expect("Failed to start");

    let handles: Vec<_> = (0..100)
        .map(|i| pool.submit("deliver", json!(i)).expect("Failed to submit"))
        .collect();
    futures::future::join_all(handles).await;

    let after_burst = pool.stats().workers.len();
    println!("Workers after burst: {after_burst}");
    assert!(after_burst > 2, "Burst should have scaled the pool up");

    // Cooldown (200ms) + one retirement per 50ms tick + reaping slack.
    tokio::time::sleep(Duration::from_secs(3)).await;

    let stats = pool.stats();
    println!("Workers after cooldown: {}", stats.workers.len());
    assert_eq!(stats.workers.len(), 2, "Pool should be back at min_workers");

    pool.stop();
    println!("=== test_scale_down_after_cooldown PASSED ===\n");
}

/// `min_workers <= |workers| <= max_workers` holds at every observation
/// while the pool is running.
#[tokio::test(flavor = "multi_thread")]
async fn test_worker_count_bounds_hold_under_load() {
    println!("\n=== test_worker_count_bounds_hold_under_load ===");

    let config = PoolConfig::new()
        .with_min_workers(2)
        .with_max_workers(6)
        .with_scale_up_threshold(1.5)
        .with_health_check_interval(Duration::from_millis(50))
        .with_scale_down_cooldown(Duration::from_millis(200))
        .with_drain_grace(Duration::from_secs(2));
    let pool = TaskPool::new(config).expect("Failed to create pool");
    register_io_bound(&pool, Duration::from_millis(30));
    pool.start().expect("Failed to start");

    let handles: Vec<_> = (0..150)
        .map(|i| pool.submit("deliver", json!(i)).expect("Failed to submit"))
        .collect();

    // Sample worker counts through the burst and the subsequent wind-down.
    let deadline = Instant::now() + Duration::from_secs(2);
    let mut samples = 0;
    while Instant::now() < deadline {
        let count = pool.stats().workers.len();
        assert!((2..=6).contains(&count), "worker count {count} out of bounds");
        samples += 1;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    println!("Bounds held across {samples} samples");

    futures::future::join_all(handles).await;
    pool.stop();
    println!("=== test_worker_count_bounds_hold_under_load PASSED ===\n");
}

/// A handler that blocks its worker thread freezes the heartbeat; the
/// health monitor declares the worker dead, rejects its task with
/// `WorkerDied`, and spawns a replacement so the pool keeps serving.
#[tokio::test(flavor = "multi_thread")]
async fn test_dead_worker_detected_and_replaced() {
    println!("\n=== test_dead_worker_detected_and_replaced ===");

    let config = PoolConfig::new()
        .with_min_workers(1)
        .with_max_workers(2)
        .with_health_check_interval(Duration::from_millis(50))
        .with_stalled_checks(2)
        .with_scale_down_cooldown(Duration::from_secs(30))
        .with_drain_grace(Duration::from_secs(1));
    let pool = TaskPool::new(config).expect("Failed to create pool");
    pool.register_handler_fn("echo", |payload| async move { Ok(payload) });
    pool.register_handler_fn("wedge", |_| async {
        // Blocks the worker's runtime thread outright; the timeout guard
        // and heartbeat ticker both starve, which is the point.
        std::thread::sleep(Duration::from_millis(1500));
        Ok(json!("escaped"))
    });
    pool.start().expect("Failed to start");

    let started = Instant::now();
    let wedged = pool.submit("wedge", json!(null)).expect("Failed to submit");

    match wedged.await {
        Err(PoolError::WorkerDied { worker_id }) => {
            println!(
                "Worker {worker_id} declared dead after {:?}",
                started.elapsed()
            );
        }
        other => panic!("Expected WorkerDied, got: {other:?}"),
    }
    assert!(
        started.elapsed() < Duration::from_millis(1200),
        "Detection should beat the blocked handler's own completion"
    );

    // The pool self-healed: a replacement worker serves new tasks.
    let result = pool
        .submit("echo", json!("alive"))
        .expect("Failed to submit")
        .await
        .expect("Replacement worker should run tasks");
    assert_eq!(result, json!("alive"));

    let stats = pool.stats();
    println!("Workers after self-heal: {}", stats.workers.len());
    assert!(!stats.workers.is_empty());
    assert_eq!(stats.metrics.total_tasks_failed, 1);

    pool.stop();
    println!("=== test_dead_worker_detected_and_replaced PASSED ===\n");
}
