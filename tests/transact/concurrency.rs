//! Concurrent Caller Tests
//!
//! Many callers on one event loop sharing one wrapper: bounded execution,
//! no shared sessions, no lost updates when the pool serializes.

use crate::common::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "current_thread")]
async fn single_worker_serializes_counter_increments() {
    let tb = TestBackend::with_pool_size(1);
    let initial = tb.counter("hits");
    let increment = tb.rw().wrap(increment_counter);

    let (a, b) = tokio::join!(
        increment.call("hits".to_string()),
        increment.call("hits".to_string())
    );

    let mut seen = vec![a.unwrap(), b.unwrap()];
    seen.sort();
    assert_eq!(seen, vec![initial + 1, initial + 2]);
    assert_eq!(tb.counter("hits"), initial + 2);
    assert_eq!(tb.metrics().commits, 2);
}

#[tokio::test(flavor = "current_thread")]
async fn at_most_pool_size_bodies_run_at_once() {
    const POOL: usize = 2;
    const TASKS: usize = 6;

    let tb = TestBackend::with_pool_size(POOL);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
    let slow = tb.ro().wrap(move |_store: &mut Store, _n: usize| {
        let now = r.fetch_add(1, Ordering::SeqCst) + 1;
        p.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(40));
        r.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    });

    let calls: Vec<_> = (0..TASKS).map(|n| slow.call(n)).collect();
    for call in calls {
        call.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= POOL);
    let stats = tb.backend.pool_stats();
    assert!(stats.peak_active <= POOL);
    assert!(stats.worker_count <= POOL);
    assert_eq!(tb.metrics().succeeded, TASKS as u64);
}

#[tokio::test(flavor = "current_thread")]
async fn concurrent_calls_never_share_a_session() {
    let tb = TestBackend::with_pool_size(4);
    let session_of = tb.ro().wrap(|store: &mut Store, _n: usize| {
        std::thread::sleep(Duration::from_millis(5));
        Ok(store.id())
    });

    let calls: Vec<_> = (0..16).map(|n| session_of.call(n)).collect();
    let mut sessions = HashSet::new();
    for call in calls {
        sessions.insert(call.await.unwrap());
    }

    assert_eq!(sessions.len(), 16);
    let m = tb.metrics();
    assert_eq!(m.sessions_opened, 16);
    assert_eq!(m.sessions_closed, 16);
}

#[tokio::test(flavor = "current_thread")]
async fn mixed_outcomes_under_concurrency_keep_discipline() {
    let tb = TestBackend::with_pool_size(3);
    let body = tb.rw().wrap(planned_body);

    let plan = [
        Planned::Succeed,
        Planned::RaiseOther,
        Planned::Succeed,
        Planned::ViolateIntegrity,
        Planned::RaiseProtocol,
        Planned::Succeed,
        Planned::LoseConnection,
        Planned::Panic,
    ];
    let calls: Vec<_> = plan
        .iter()
        .enumerate()
        .map(|(i, p)| body.call((*p, format!("mixed-{}", i))))
        .collect();

    let mut ok = 0;
    for call in calls {
        if call.await.is_ok() {
            ok += 1;
        }
    }

    let successes = plan.iter().filter(|p| p.succeeds()).count();
    assert_eq!(ok, successes);
    assert_eq!(tb.count("users"), successes as i64);

    let m = tb.metrics();
    assert_eq!(m.commits, successes as u64);
    assert_eq!(m.aborts, (plan.len() - successes) as u64);
    assert_eq!(m.sessions_opened, plan.len() as u64);
    assert_eq!(m.sessions_closed, plan.len() as u64);
}

#[test]
fn blocking_callers_without_runtime() {
    let tb = TestBackend::with_pool_size(2);
    let create = tb.rw().wrap(create_user);

    let threads: Vec<_> = (0..4)
        .map(|i| {
            let create = create.clone();
            std::thread::spawn(move || create.call(format!("thread-{}", i)).wait())
        })
        .collect();
    for t in threads {
        t.join().unwrap().unwrap();
    }

    assert_eq!(tb.count("users"), 4);
}
