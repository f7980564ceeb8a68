//! Session Lifecycle Tests
//!
//! Every wrapped call opens one session and closes it exactly once; success
//! commits exactly once, failure aborts and never commits.

use crate::common::*;

// ============================================================================
// Read-write success
// ============================================================================

#[tokio::test(flavor = "current_thread")]
async fn success_commits_once_and_closes_once() {
    let tb = TestBackend::new();
    let create = tb.rw().wrap(create_user);

    let id = create.call("ada".to_string()).await.unwrap();
    assert!(id > 0);
    assert!(tb.user_exists("ada"));

    let m = tb.metrics();
    assert_eq!(m.sessions_opened, 1);
    assert_eq!(m.sessions_closed, 1);
    assert_eq!(m.commits, 1);
    assert_eq!(m.aborts, 0);
    assert_eq!(m.succeeded, 1);
}

#[tokio::test(flavor = "current_thread")]
async fn each_call_gets_a_fresh_session() {
    let tb = TestBackend::new();
    let session_of = tb.rw().wrap(|store: &mut Store, ()| Ok(store.id()));

    let first = session_of.call(()).await.unwrap();
    let second = session_of.call(()).await.unwrap();
    assert_ne!(first, second);

    let m = tb.metrics();
    assert_eq!(m.sessions_opened, 2);
    assert_eq!(m.sessions_closed, 2);
}

#[tokio::test(flavor = "current_thread")]
async fn business_function_sees_its_own_writes() {
    let tb = TestBackend::new();
    let seed = tb.seed_user("grace");

    let count_posts = tb.rw().wrap(move |store: &mut Store, titles: Vec<String>| {
        for title in &titles {
            store.execute(
                "INSERT INTO posts (user_id, title) VALUES (?1, ?2)",
                params![seed, title],
            )?;
        }
        store.query_row(
            "SELECT COUNT(*) FROM posts WHERE user_id = ?1",
            params![seed],
            |r| r.get::<_, i64>(0),
        )
    });

    let seen = count_posts
        .call(vec!["a".into(), "b".into(), "c".into()])
        .await
        .unwrap();
    assert_eq!(seen, 3);
    assert_eq!(tb.count("posts"), 3);
}

#[tokio::test(flavor = "current_thread")]
async fn staged_writes_are_committed() {
    let tb = TestBackend::new();
    let stage = tb.rw().wrap(|store: &mut Store, names: Vec<String>| {
        for name in names {
            store.stage(
                "INSERT INTO users (name) VALUES (?1)",
                vec![tandem::rusqlite::types::Value::Text(name)],
            );
        }
        Ok(store.staged_len())
    });

    assert_eq!(stage.call(vec!["x".into(), "y".into()]).await.unwrap(), 2);
    assert_eq!(tb.count("users"), 2);
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test(flavor = "current_thread")]
async fn every_failure_kind_aborts_and_closes_once() {
    let tb = TestBackend::new();
    let body = tb.rw().wrap(planned_body);

    let failures = [
        Planned::LoseConnection,
        Planned::ViolateIntegrity,
        Planned::RaiseProtocol,
        Planned::RaiseOther,
        Planned::Panic,
    ];
    for (i, planned) in failures.iter().enumerate() {
        let result = body.call((*planned, format!("user-{}", i))).await;
        assert!(result.is_err(), "{:?} should fail", planned);
    }

    let m = tb.metrics();
    assert_eq!(m.sessions_opened, failures.len() as u64);
    assert_eq!(m.sessions_closed, failures.len() as u64);
    assert_eq!(m.aborts, failures.len() as u64);
    assert_eq!(m.commits, 0);
    assert_eq!(tb.count("users"), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn commit_failure_is_aborted_and_classified() {
    let tb = TestBackend::new();
    // Deferred foreign-key checks only fail at COMMIT.
    let orphan = tb.rw().wrap(|store: &mut Store, ()| {
        store.execute_batch("PRAGMA defer_foreign_keys = ON")?;
        store.execute(
            "INSERT INTO posts (user_id, title) VALUES (?1, ?2)",
            params![9999, "orphan"],
        )
    });

    let err = orphan.call(()).await.unwrap_err();
    assert!(err.is_integrity(), "unexpected error: {}", err);
    assert_eq!(tb.count("posts"), 0);

    let m = tb.metrics();
    assert_eq!(m.commits, 0);
    assert_eq!(m.aborts, 1);
    assert_eq!(m.sessions_closed, 1);
}

#[tokio::test(flavor = "current_thread")]
async fn panic_surfaces_as_panicked() {
    let tb = TestBackend::new();
    let err = tb
        .rw()
        .run(|_store: &mut Store| -> StoreResult<()> { panic!("kaboom") })
        .await
        .unwrap_err();

    match err {
        TransactError::Panicked(message) => assert!(message.contains("kaboom")),
        other => panic!("expected Panicked, got {:?}", other),
    }
    assert_eq!(tb.metrics().panicked, 1);
    assert_eq!(tb.metrics().sessions_closed, 1);

    // The worker survived and keeps serving.
    let id = tb.rw().wrap(create_user).call("after".into()).await.unwrap();
    assert!(id > 0);
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_store_is_fatal_for_that_task_only() {
    let tb = TestBackend::new();
    let err = tb
        .rw()
        .clone()
        .on_store("archive")
        .run(|_store| Ok(()))
        .await
        .unwrap_err();
    assert!(matches!(err, TransactError::StoreUnavailable(_)));

    tb.rw().wrap(create_user).call("still-fine".into()).await.unwrap();
    assert!(tb.user_exists("still-fine"));
}

#[tokio::test(flavor = "current_thread")]
async fn results_resume_on_the_caller_thread() {
    let tb = TestBackend::new();
    let caller = std::thread::current().id();
    let worker = tb
        .rw()
        .run(|_store| Ok(std::thread::current().id()))
        .await
        .unwrap();

    assert_ne!(worker, caller);
    assert_eq!(std::thread::current().id(), caller);
}
