//! Transactional execution of blocking business functions
//!
//! A [`Transact`] turns a blocking function of `(&mut Store, args)` into
//! something the event loop can await. Every call:
//!
//! 1. is scheduled on the bounded [`WorkerPool`],
//! 2. opens a fresh, exclusive [`Store`] session from the registry,
//! 3. runs the body with that session,
//! 4. commits (read-write) or flushes and invalidates (read-only),
//! 5. aborts on any failure, and
//! 6. closes the session exactly once before the result is delivered.
//!
//! # Per-task lifecycle
//!
//! ```text
//! ACQUIRED ─► RUNNING ─┬─► COMMITTING ─┬─► CLOSED
//!                      ├─► FLUSHING  ──┤
//!                      └─► ABORTING ◄──┘
//!                              └──────────► CLOSED
//! ```
//!
//! # Error mapping
//!
//! | raised inside the body      | caller receives                            |
//! |-----------------------------|--------------------------------------------|
//! | `StoreError::ConnectionLoss`     | `TransactError::ConnectionLost` (after retries) |
//! | `StoreError::IntegrityViolation` | `TransactError::Integrity`                 |
//! | `StoreError::Protocol`           | `TransactError::Protocol`, unchanged       |
//! | `StoreError::Unclassified`       | `TransactError::Other`, unchanged          |
//! | panic                            | `TransactError::Panicked`                  |
//!
//! A `Transact` is immutable once built and may be cloned and shared by any
//! number of concurrent callers.

use crate::metrics::{Outcome, TransactionMonitor};
use crate::pool::{panic_message, TaskHandle, WorkerPool};
use std::fmt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tandem_core::{DatabaseIntegrityError, RetryConfig, TransactError};
use tandem_storage::{Store, StoreError, StoreRegistry, StoreResult};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Whether a successful body is committed or only flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Commit on success
    ReadWrite,
    /// Flush and invalidate on success; never commit
    ReadOnly,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::ReadWrite => write!(f, "read-write"),
            Mode::ReadOnly => write!(f, "read-only"),
        }
    }
}

/// Stage of a single task attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Session opened, body not yet entered
    Acquired,
    /// Body executing
    Running,
    /// Read-write success path
    Committing,
    /// Read-only success path
    Flushing,
    /// Failure path
    Aborting,
    /// Session closed; terminal
    Closed,
}

impl TaskState {
    /// Whether `next` may follow `self`
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Acquired, Running)
                | (Running, Committing)
                | (Running, Flushing)
                | (Running, Aborting)
                | (Committing, Closed)
                | (Committing, Aborting)
                | (Flushing, Closed)
                | (Flushing, Aborting)
                | (Aborting, Closed)
        )
    }

    /// Whether the attempt is finished
    pub fn is_terminal(self) -> bool {
        self == TaskState::Closed
    }
}

struct Lifecycle {
    session: Uuid,
    state: TaskState,
}

impl Lifecycle {
    fn new(session: Uuid) -> Self {
        trace!(target: "tandem::txn", %session, state = ?TaskState::Acquired);
        Self {
            session,
            state: TaskState::Acquired,
        }
    }

    fn advance(&mut self, next: TaskState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid task transition {:?} -> {:?}",
            self.state,
            next
        );
        trace!(target: "tandem::txn", session = %self.session, from = ?self.state, to = ?next);
        self.state = next;
    }
}

#[derive(Clone)]
struct TaskContext {
    registry: Arc<StoreRegistry>,
    monitor: Arc<TransactionMonitor>,
    store_name: Arc<str>,
    mode: Mode,
    retry: RetryConfig,
}

enum Failure {
    ConnectionLoss(String),
    Final(TransactError, Outcome),
}

/// Wrapper that runs blocking functions transactionally on the worker pool
#[derive(Clone)]
pub struct Transact {
    pool: Arc<WorkerPool>,
    ctx: Arc<TaskContext>,
}

impl fmt::Debug for Transact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transact")
            .field("store", &self.ctx.store_name)
            .field("mode", &self.ctx.mode)
            .field("retry", &self.ctx.retry)
            .finish()
    }
}

impl Transact {
    /// Create a wrapper bound to the registry's default store.
    ///
    /// Connection losses are not retried unless [`Transact::with_retry`] is
    /// used.
    pub fn new(
        pool: Arc<WorkerPool>,
        registry: Arc<StoreRegistry>,
        monitor: Arc<TransactionMonitor>,
        mode: Mode,
    ) -> Self {
        let store_name: Arc<str> = Arc::from(registry.default_name());
        Self {
            pool,
            ctx: Arc::new(TaskContext {
                registry,
                monitor,
                store_name,
                mode,
                retry: RetryConfig::no_retry(),
            }),
        }
    }

    /// Read-write wrapper: commit on success
    pub fn read_write(
        pool: Arc<WorkerPool>,
        registry: Arc<StoreRegistry>,
        monitor: Arc<TransactionMonitor>,
    ) -> Self {
        Self::new(pool, registry, monitor, Mode::ReadWrite)
    }

    /// Read-only wrapper: flush and invalidate on success, never commit
    pub fn read_only(
        pool: Arc<WorkerPool>,
        registry: Arc<StoreRegistry>,
        monitor: Arc<TransactionMonitor>,
    ) -> Self {
        Self::new(pool, registry, monitor, Mode::ReadOnly)
    }

    /// Same wrapper, bound to another registered store
    pub fn on_store(mut self, name: &str) -> Self {
        Arc::make_mut(&mut self.ctx).store_name = Arc::from(name);
        self
    }

    /// Same wrapper, retrying connection losses per `retry`
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        Arc::make_mut(&mut self.ctx).retry = retry;
        self
    }

    /// Commit policy
    pub fn mode(&self) -> Mode {
        self.ctx.mode
    }

    /// Store every call opens a session on
    pub fn store_name(&self) -> &str {
        &self.ctx.store_name
    }

    /// Retry policy for connection losses
    pub fn retry(&self) -> &RetryConfig {
        &self.ctx.retry
    }

    /// Run `body` once, transactionally, on the worker pool.
    ///
    /// The body may be invoked more than once if connection-loss retries
    /// are enabled; each invocation gets a fresh session.
    pub fn run<T, F>(&self, body: F) -> TransactFuture<T>
    where
        F: Fn(&mut Store) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let ctx = Arc::clone(&self.ctx);
        debug!(
            target: "tandem::txn",
            store = %ctx.store_name,
            mode = %ctx.mode,
            "Scheduling transaction"
        );
        match self.pool.submit(move || execute(&ctx, &body)) {
            Ok(handle) => TransactFuture {
                state: FutureState::Pending(handle),
            },
            Err(e) => {
                warn!(target: "tandem::txn", error = %e, "Transaction rejected by worker pool");
                TransactFuture {
                    state: FutureState::Rejected(Some(TransactError::PoolUnavailable(e.to_string()))),
                }
            }
        }
    }

    /// Wrap a business function so each call runs transactionally.
    ///
    /// Arguments are cloned into each attempt, so retried attempts see the
    /// original values.
    pub fn wrap<A, T, F>(&self, f: F) -> Transactional<A, T>
    where
        F: Fn(&mut Store, A) -> StoreResult<T> + Send + Sync + 'static,
        A: Clone + Send + 'static,
        T: Send + 'static,
    {
        Transactional {
            transact: self.clone(),
            body: Arc::new(f),
        }
    }
}

/// A business function bound to a [`Transact`] wrapper
pub struct Transactional<A, T> {
    transact: Transact,
    body: Arc<dyn Fn(&mut Store, A) -> StoreResult<T> + Send + Sync>,
}

impl<A, T> Clone for Transactional<A, T> {
    fn clone(&self) -> Self {
        Self {
            transact: self.transact.clone(),
            body: Arc::clone(&self.body),
        }
    }
}

impl<A, T> fmt::Debug for Transactional<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transactional")
            .field("transact", &self.transact)
            .finish_non_exhaustive()
    }
}

impl<A, T> Transactional<A, T>
where
    A: Clone + Send + 'static,
    T: Send + 'static,
{
    /// Invoke the wrapped function with `args`
    pub fn call(&self, args: A) -> TransactFuture<T> {
        let body = Arc::clone(&self.body);
        self.transact.run(move |store| body(store, args.clone()))
    }

    /// Wrapper this function runs under
    pub fn transact(&self) -> &Transact {
        &self.transact
    }
}

/// Result of a wrapped call, resolved on the caller's executor
#[derive(Debug)]
pub struct TransactFuture<T> {
    state: FutureState<T>,
}

#[derive(Debug)]
enum FutureState<T> {
    Rejected(Option<TransactError>),
    Pending(TaskHandle<Result<T, TransactError>>),
}

impl<T> TransactFuture<T> {
    /// Block the current thread until the outcome is available.
    ///
    /// For callers outside an async runtime; inside one, `.await` instead.
    pub fn wait(self) -> Result<T, TransactError> {
        match self.state {
            FutureState::Rejected(err) => Err(err.unwrap_or_else(already_resolved)),
            FutureState::Pending(handle) => match handle.wait() {
                Ok(outcome) => outcome,
                Err(e) => Err(TransactError::PoolUnavailable(e.to_string())),
            },
        }
    }
}

impl<T> Future for TransactFuture<T> {
    type Output = Result<T, TransactError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            FutureState::Rejected(err) => Poll::Ready(Err(err.take().unwrap_or_else(already_resolved))),
            FutureState::Pending(handle) => Pin::new(handle).poll(cx).map(|result| match result {
                Ok(outcome) => outcome,
                Err(e) => Err(TransactError::PoolUnavailable(e.to_string())),
            }),
        }
    }
}

fn already_resolved() -> TransactError {
    TransactError::PoolUnavailable("outcome already taken".to_string())
}

/// Turn a connection loss into an empty result.
///
/// Opt-in for callers that treat a lost connection as "nothing happened";
/// every other error is returned unchanged.
pub trait SuppressConnectionLoss<T> {
    /// `Ok(Some(value))` on success, `Ok(None)` on connection loss
    fn or_empty(self) -> Result<Option<T>, TransactError>;
}

impl<T> SuppressConnectionLoss<T> for Result<T, TransactError> {
    fn or_empty(self) -> Result<Option<T>, TransactError> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_connection_lost() => {
                info!(target: "tandem::txn", error = %e, "Connection loss suppressed; returning empty result");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

fn execute<T>(ctx: &TaskContext, body: &dyn Fn(&mut Store) -> StoreResult<T>) -> Result<T, TransactError> {
    let max_attempts = ctx.retry.max_attempts();
    let mut attempt = 0;
    loop {
        attempt += 1;
        ctx.monitor.record_start();
        let outcome = catch_unwind(AssertUnwindSafe(|| run_attempt(ctx, body)))
            .unwrap_or_else(|payload| {
                // Panic outside the body (open, commit, an observer). The
                // session, if any, was closed by its drop during unwinding.
                let message = panic_message(payload.as_ref());
                error!(
                    target: "tandem::txn",
                    store = %ctx.store_name,
                    panic = %message,
                    "Transaction attempt panicked"
                );
                Err(Failure::Final(TransactError::Panicked(message), Outcome::Panicked))
            });
        match outcome {
            Ok(value) => {
                ctx.monitor.record_outcome(Outcome::Succeeded);
                return Ok(value);
            }
            Err(Failure::ConnectionLoss(message)) if attempt < max_attempts => {
                let delay = ctx.retry.calculate_delay(attempt - 1);
                warn!(
                    target: "tandem::txn",
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Connection lost; retrying transaction"
                );
                ctx.monitor.record_retry();
                std::thread::sleep(delay);
            }
            Err(Failure::ConnectionLoss(message)) => {
                ctx.monitor.record_outcome(Outcome::ConnectionLost);
                return Err(TransactError::ConnectionLost {
                    attempts: attempt,
                    message,
                });
            }
            Err(Failure::Final(err, outcome)) => {
                ctx.monitor.record_outcome(outcome);
                return Err(err);
            }
        }
    }
}

fn run_attempt<T>(ctx: &TaskContext, body: &dyn Fn(&mut Store) -> StoreResult<T>) -> Result<T, Failure> {
    let opened = match ctx.mode {
        Mode::ReadWrite => ctx.registry.open(&ctx.store_name),
        Mode::ReadOnly => ctx.registry.open_read_only(&ctx.store_name),
    };
    let mut store = match opened {
        Ok(store) => store,
        Err(e) => {
            error!(target: "tandem::txn", store = %ctx.store_name, error = %e, "Cannot open store for transaction");
            return Err(Failure::Final(
                TransactError::StoreUnavailable(e.to_string()),
                Outcome::StoreUnavailable,
            ));
        }
    };

    let mut lifecycle = Lifecycle::new(store.id());
    lifecycle.advance(TaskState::Running);

    let result = match catch_unwind(AssertUnwindSafe(|| body(&mut store))) {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(
                target: "tandem::txn",
                session = %store.id(),
                panic = %message,
                "Transaction body panicked; aborting"
            );
            lifecycle.advance(TaskState::Aborting);
            if let Err(e) = store.abort() {
                warn!(target: "tandem::txn", session = %store.id(), error = %e, "Abort after panic failed");
            }
            lifecycle.advance(TaskState::Closed);
            store.close();
            return Err(Failure::Final(TransactError::Panicked(message), Outcome::Panicked));
        }
    };

    let finished = result.and_then(|value| {
        match ctx.mode {
            Mode::ReadWrite => {
                lifecycle.advance(TaskState::Committing);
                store.commit()?;
            }
            Mode::ReadOnly => {
                lifecycle.advance(TaskState::Flushing);
                store.flush()?;
                store.invalidate();
            }
        }
        Ok(value)
    });

    match finished {
        Ok(value) => {
            lifecycle.advance(TaskState::Closed);
            store.close();
            Ok(value)
        }
        Err(err) => {
            lifecycle.advance(TaskState::Aborting);
            if let Err(abort_err) = store.abort() {
                warn!(target: "tandem::txn", session = %store.id(), error = %abort_err, "Abort failed");
            }
            let failure = classify(err, store.id());
            lifecycle.advance(TaskState::Closed);
            store.close();
            Err(failure)
        }
    }
}

fn classify(err: StoreError, session: Uuid) -> Failure {
    match err {
        StoreError::ConnectionLoss(message) => {
            warn!(target: "tandem::txn", %session, error = %message, "Connection lost; transaction aborted");
            Failure::ConnectionLoss(message)
        }
        StoreError::IntegrityViolation(message) => {
            debug!(target: "tandem::txn", %session, error = %message, "Integrity violation; transaction aborted");
            Failure::Final(
                TransactError::Integrity(DatabaseIntegrityError(message)),
                Outcome::Integrity,
            )
        }
        StoreError::Protocol(e) => {
            debug!(target: "tandem::txn", %session, error = %e, "Protocol error; transaction aborted");
            Failure::Final(TransactError::Protocol(e), Outcome::Protocol)
        }
        StoreError::Unclassified(e) => {
            error!(target: "tandem::txn", %session, error = %e, "Unexpected error; session force-closed");
            Failure::Final(TransactError::Other(e), Outcome::Other)
        }
        other @ (StoreError::Open { .. } | StoreError::Closed(_) | StoreError::ReadOnly(_)) => {
            error!(target: "tandem::txn", %session, error = %other, "Session failure; transaction aborted");
            Failure::Final(TransactError::Other(Box::new(other)), Outcome::Other)
        }
    }
}
