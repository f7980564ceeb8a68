//! Shutdown Tests

use crate::common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "current_thread")]
async fn shutdown_drains_in_flight_transactions() {
    let tb = TestBackend::with_pool_size(2);
    let create = tb.rw().wrap(|store: &mut Store, name: String| {
        std::thread::sleep(Duration::from_millis(10));
        create_user(store, name)
    });

    let calls: Vec<_> = (0..6).map(|i| create.call(format!("late-{}", i))).collect();
    assert!(tb.backend.shutdown_hook().trigger_async().await.unwrap());

    for call in calls {
        call.await.unwrap();
    }
    assert_eq!(tb.count("users"), 6);
    assert_eq!(tb.metrics().open_sessions(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn repeated_shutdown_signals_stop_once() {
    let tb = TestBackend::new();
    let hook = tb.backend.shutdown_hook().clone();

    assert!(hook.trigger_async().await.unwrap());
    assert!(!hook.trigger_async().await.unwrap());
    assert!(!tb.backend.shutdown());
    assert!(hook.has_fired());
}

#[tokio::test(flavor = "current_thread")]
async fn calls_after_shutdown_are_rejected() {
    let tb = TestBackend::new();
    tb.backend.shutdown();

    let err = tb
        .rw()
        .wrap(create_user)
        .call("too-late".into())
        .await
        .unwrap_err();
    assert!(matches!(err, TransactError::PoolUnavailable(_)));
    assert!(!tb.user_exists("too-late"));
    assert_eq!(tb.metrics().sessions_opened, 0);
}

#[test]
fn concurrent_shutdown_from_many_threads() {
    let tb = TestBackend::with_pool_size(2);
    let stopped = Arc::new(AtomicUsize::new(0));

    std::thread::scope(|s| {
        for _ in 0..4 {
            let hook = tb.backend.shutdown_hook().clone();
            let stopped = Arc::clone(&stopped);
            s.spawn(move || {
                if hook.trigger() {
                    stopped.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });

    assert_eq!(stopped.load(Ordering::SeqCst), 1);
    assert!(!tb.backend.pool().is_running());
}
