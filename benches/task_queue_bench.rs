//! Benchmarks for the task pool.
//!
//! Benchmarks cover:
//! - Submit/await round trips at varying burst sizes
//! - Batch fan-out at varying window sizes
//! - Mixed-priority submission
//! - Stats snapshot cost under load

use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::IndexedRandom;
use tokio::runtime::Runtime;

use pressgang::config::PoolConfig;
use pressgang::core::{BatchOptions, Priority, SubmitOptions, TaskPool};
use serde_json::json;

// ============================================================================
// Helpers
// ============================================================================

fn bench_pool(min_workers: usize, max_workers: usize) -> Arc<TaskPool> {
    let pool = TaskPool::new(
        PoolConfig::new()
            .with_min_workers(min_workers)
            .with_max_workers(max_workers)
            .with_health_check_interval(Duration::from_millis(200))
            .with_scale_down_cooldown(Duration::from_secs(60)),
    )
    .expect("failed to build pool");
    pool.register_handler_fn("noop", |payload| async move { Ok(payload) });
    pool.start().expect("failed to start pool");
    Arc::new(pool)
}

// ============================================================================
// Submit/await benchmarks
// ============================================================================

fn bench_submit_await(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_await");

    for burst in [100_u64, 500, 1_000] {
        group.throughput(Throughput::Elements(burst));
        group.bench_with_input(BenchmarkId::from_parameter(burst), &burst, |b, &burst| {
            let rt = Runtime::new().unwrap();
            let pool = bench_pool(4, 4);
            b.to_async(&rt).iter(|| {
                let pool = Arc::clone(&pool);
                async move {
                    let handles: Vec<_> = (0..burst)
                        .map(|i| pool.submit("noop", json!(i)).unwrap())
                        .collect();
                    for handle in handles {
                        black_box(handle.await.unwrap());
                    }
                }
            });
            pool.stop();
        });
    }
    group.finish();
}

// ============================================================================
// Batch benchmarks
// ============================================================================

fn bench_batch_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_fan_out");

    for concurrency in [8_usize, 32, 128] {
        group.throughput(Throughput::Elements(500));
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &concurrency,
            |b, &concurrency| {
                let rt = Runtime::new().unwrap();
                let pool = bench_pool(4, 4);
                b.to_async(&rt).iter(|| {
                    let pool = Arc::clone(&pool);
                    async move {
                        let items = (0..500).map(|i| json!(i)).collect();
                        let results = pool
                            .submit_batch(
                                "noop",
                                items,
                                BatchOptions::default().with_concurrency(concurrency),
                            )
                            .await
                            .unwrap();
                        black_box(results);
                    }
                });
                pool.stop();
            },
        );
    }
    group.finish();
}

// ============================================================================
// Priority benchmarks
// ============================================================================

fn bench_mixed_priorities(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixed_priorities");

    group.bench_function("burst_400_mixed", |b| {
        let rt = Runtime::new().unwrap();
        let pool = bench_pool(4, 4);
        let priorities = [
            Priority::Low,
            Priority::Normal,
            Priority::High,
            Priority::Critical,
        ];
        b.to_async(&rt).iter(|| {
            let pool = Arc::clone(&pool);
            let mut rng = rand::rng();
            let picks: Vec<Priority> = (0..400)
                .map(|_| *priorities.choose(&mut rng).unwrap())
                .collect();
            async move {
                let handles: Vec<_> = picks
                    .into_iter()
                    .enumerate()
                    .map(|(i, priority)| {
                        pool.submit_with(
                            "noop",
                            json!(i),
                            SubmitOptions::default().with_priority(priority),
                        )
                        .unwrap()
                    })
                    .collect();
                for handle in handles {
                    black_box(handle.await.unwrap());
                }
            }
        });
        pool.stop();
    });
    group.finish();
}

// ============================================================================
// Stats benchmarks
// ============================================================================

fn bench_stats_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("stats_snapshot");

    group.bench_function("under_load", |b| {
        let rt = Runtime::new().unwrap();
        let pool = bench_pool(4, 8);
        // Keep some tasks in flight while snapshotting.
        rt.block_on(async {
            for i in 0..64 {
                let _ = pool.submit("noop", json!(i));
            }
        });
        b.iter(|| black_box(pool.stats()));
        pool.stop();
    });
    group.finish();
}

criterion_group!(
    pool_benches,
    bench_submit_await,
    bench_batch_fan_out,
    bench_mixed_priorities,
    bench_stats_snapshot
);

criterion_main!(pool_benches);
