//! Concurrency Bound Tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;
use tandem::{PoolConfig, PoolError, ServerConfig, WorkerPool};

#[tokio::test(flavor = "current_thread")]
async fn k_tasks_beyond_pool_size_queue_and_complete() {
    let pool = WorkerPool::from_config(&ServerConfig {
        thread_pool_size: 3,
        ..ServerConfig::default()
    });
    pool.start().unwrap();

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..12)
        .map(|i| {
            let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
            pool.submit(move || {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                r.fetch_sub(1, Ordering::SeqCst);
                i
            })
            .unwrap()
        })
        .collect();

    let mut results = Vec::new();
    for h in handles {
        results.push(h.await.unwrap());
    }
    results.sort();

    assert_eq!(results, (0..12).collect::<Vec<_>>());
    assert!(peak.load(Ordering::SeqCst) <= 3);
    pool.drain();
    assert_eq!(pool.stats().tasks_completed, 12);
    pool.stop();
}

#[test]
fn queued_tasks_wait_for_a_free_worker() {
    let pool = WorkerPool::new(PoolConfig::new(2));
    pool.start().unwrap();
    let gate = Arc::new(Barrier::new(3));

    let blockers: Vec<_> = (0..2)
        .map(|_| {
            let g = Arc::clone(&gate);
            pool.submit(move || {
                g.wait();
            })
            .unwrap()
        })
        .collect();
    let queued = pool.submit(|| "ran").unwrap();

    std::thread::sleep(Duration::from_millis(50));
    let stats = pool.stats();
    assert_eq!(stats.active_tasks, 2);
    assert_eq!(stats.queue_depth, 1);

    gate.wait();
    for b in blockers {
        b.wait().unwrap();
    }
    assert_eq!(queued.wait(), Ok("ran"));
    pool.stop();
}

#[test]
fn zero_pool_size_uses_available_parallelism() {
    let config = ServerConfig {
        thread_pool_size: 0,
        ..ServerConfig::default()
    };
    let expected = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let pool = WorkerPool::from_config(&config);
    assert_eq!(pool.config().max_threads, expected);
}

#[test]
fn submit_before_start_is_rejected() {
    let pool = WorkerPool::new(PoolConfig::new(1));
    assert_eq!(pool.submit(|| ()).unwrap_err(), PoolError::NotStarted);
    pool.start().unwrap();
    assert!(pool.submit(|| ()).is_ok());
    pool.stop();
}
