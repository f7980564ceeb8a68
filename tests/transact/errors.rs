//! Error Taxonomy Tests
//!
//! What callers observe for each kind of failure raised inside a wrapped
//! business function.

use crate::common::*;

// ============================================================================
// ConnectionLoss
// ============================================================================

#[tokio::test(flavor = "current_thread")]
async fn connection_loss_is_distinguishable() {
    let tb = TestBackend::new();
    let body = tb.rw().wrap(planned_body);

    let err = body
        .call((Planned::LoseConnection, "lost".into()))
        .await
        .unwrap_err();

    assert!(err.is_connection_lost());
    assert!(matches!(err, TransactError::ConnectionLost { attempts: 1, .. }));
    assert!(!tb.user_exists("lost"));
    assert_eq!(tb.metrics().connection_lost, 1);
}

#[tokio::test(flavor = "current_thread")]
async fn connection_loss_can_be_suppressed_explicitly() {
    let tb = TestBackend::new();
    let body = tb.rw().wrap(planned_body);

    let suppressed = body
        .call((Planned::LoseConnection, "lost".into()))
        .await
        .or_empty()
        .unwrap();
    assert_eq!(suppressed, None);

    let delivered = body
        .call((Planned::Succeed, "kept".into()))
        .await
        .or_empty()
        .unwrap();
    assert_eq!(delivered.as_deref(), Some("kept"));

    let protocol = body
        .call((Planned::RaiseProtocol, "missing".into()))
        .await
        .or_empty();
    assert!(protocol.is_err());
}

#[tokio::test(flavor = "current_thread")]
async fn configured_retries_rerun_with_fresh_sessions() {
    let tb = TestBackend::with_config(|c| {
        c.connection_retries = RetryConfig::new().with_max_retries(2).with_base_delay_ms(1);
    });
    let body = tb.rw().wrap(planned_body);

    let err = body
        .call((Planned::LoseConnection, "flaky".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, TransactError::ConnectionLost { attempts: 3, .. }));

    let m = tb.metrics();
    assert_eq!(m.sessions_opened, 3);
    assert_eq!(m.sessions_closed, 3);
    assert_eq!(m.total_retries, 2);
    assert_eq!(m.aborts, 3);
    assert!(!tb.user_exists("flaky"));
}

#[tokio::test(flavor = "current_thread")]
async fn locked_database_is_connection_loss() {
    let tb = TestBackend::new();
    let uri = tb
        .backend
        .registry()
        .uri("main_store")
        .unwrap()
        .with_timeout(std::time::Duration::from_millis(50));
    tb.backend.registry().register("impatient", uri.clone());

    // Hold the write lock from a session outside the wrapper.
    let holder = StoreRegistry::new("main_store", uri).open_default().unwrap();
    holder
        .execute("INSERT INTO users (name) VALUES (?1)", params!["holder"])
        .unwrap();

    let err = tb
        .rw()
        .clone()
        .on_store("impatient")
        .wrap(create_user)
        .call("blocked".into())
        .await
        .unwrap_err();
    assert!(err.is_connection_lost(), "unexpected error: {}", err);

    holder.close();
    assert!(!tb.user_exists("blocked"));
    assert!(!tb.user_exists("holder"));
}

// ============================================================================
// IntegrityViolation
// ============================================================================

#[tokio::test(flavor = "current_thread")]
async fn unique_conflict_becomes_integrity_error() {
    let tb = TestBackend::new();
    tb.seed_user("taken");

    let err = tb
        .rw()
        .wrap(create_user)
        .call("taken".into())
        .await
        .unwrap_err();

    match err {
        TransactError::Integrity(e) => assert!(e.to_string().contains("UNIQUE")),
        other => panic!("expected Integrity, got {:?}", other),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn foreign_key_conflict_becomes_integrity_error() {
    let tb = TestBackend::new();
    let err = tb
        .rw()
        .run(|store| {
            store.execute(
                "INSERT INTO posts (user_id, title) VALUES (?1, ?2)",
                params![404, "nobody"],
            )
        })
        .await
        .unwrap_err();
    assert!(err.is_integrity());
}

#[tokio::test(flavor = "current_thread")]
async fn write_before_integrity_violation_is_rolled_back() {
    let tb = TestBackend::new();
    tb.seed_user("existing");

    let err = tb
        .rw()
        .run(|store| {
            store.execute("INSERT INTO users (name) VALUES (?1)", params!["fresh"])?;
            store.execute("INSERT INTO users (name) VALUES (?1)", params!["existing"])
        })
        .await
        .unwrap_err();

    assert!(err.is_integrity());
    assert!(!tb.user_exists("fresh"));
    assert_eq!(tb.count("users"), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn integrity_raised_by_business_logic_is_translated() {
    let tb = TestBackend::new();
    let err = tb
        .rw()
        .run(|store| -> StoreResult<()> {
            store.execute("INSERT INTO users (name) VALUES (?1)", params!["half"])?;
            Err(StoreError::integrity("duplicate submission"))
        })
        .await
        .unwrap_err();

    match err {
        TransactError::Integrity(e) => assert_eq!(e.0, "duplicate submission"),
        other => panic!("expected Integrity, got {:?}", other),
    }
    assert!(!tb.user_exists("half"));
}

// ============================================================================
// ProtocolError
// ============================================================================

#[tokio::test(flavor = "current_thread")]
async fn protocol_error_is_reraised_identically() {
    let tb = TestBackend::new();
    let raised = ProtocolError::new(412, "precondition failed: stale tip");
    let expected = raised.clone();

    let err = tb
        .rw()
        .run(move |store| -> StoreResult<()> {
            store.execute("INSERT INTO users (name) VALUES (?1)", params!["p"])?;
            Err(raised.clone().into())
        })
        .await
        .unwrap_err();

    assert_eq!(err.as_protocol(), Some(&expected));
    assert_eq!(err.to_string(), expected.to_string());
    assert!(!tb.user_exists("p"));
    assert_eq!(tb.metrics().protocol, 1);
}

// ============================================================================
// Unclassified
// ============================================================================

#[tokio::test(flavor = "current_thread")]
async fn other_error_is_reraised_unchanged() {
    let tb = TestBackend::new();
    let body = tb.rw().wrap(planned_body);

    let err = body
        .call((Planned::RaiseOther, "other".into()))
        .await
        .unwrap_err();

    assert_eq!(err.downcast_other::<Boom>(), Some(&Boom("planned")));
    assert_eq!(err.to_string(), "boom: planned");
}

#[tokio::test(flavor = "current_thread")]
async fn session_is_closed_before_other_error_is_observed() {
    let tb = TestBackend::new();
    let body = tb.rw().wrap(planned_body);

    let before = tb.metrics();
    let err = body
        .call((Planned::RaiseOther, "closed".into()))
        .await
        .unwrap_err();
    let after = tb.metrics();

    assert!(err.downcast_other::<Boom>().is_some());
    assert_eq!(after.sessions_opened - before.sessions_opened, 1);
    assert_eq!(after.sessions_closed - before.sessions_closed, 1);
    assert_eq!(after.open_sessions(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn engine_error_without_classification_is_passed_through() {
    let tb = TestBackend::new();
    let err = tb
        .rw()
        .run(|store| store.execute("INSERT INTO no_such_table VALUES (1)", []))
        .await
        .unwrap_err();

    let source = err
        .downcast_other::<tandem::rusqlite::Error>()
        .expect("rusqlite error carried unchanged");
    assert!(source.to_string().contains("no_such_table"));
}
