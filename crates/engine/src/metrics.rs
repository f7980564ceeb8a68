//! Transaction and session accounting
//!
//! The [`TransactionMonitor`] owns every counter it exposes. It is attached
//! to the store registry as a [`SessionObserver`], so session-level counts
//! (opened, committed, flushed, invalidated, aborted, closed) come straight
//! from the sessions, and the transaction wrapper records task outcomes.
//!
//! All counters use Relaxed ordering; a snapshot taken while tasks are in
//! flight may be momentarily inconsistent across fields.

use std::sync::atomic::{AtomicU64, Ordering};
use tandem_storage::{SessionEvent, SessionObserver};
use uuid::Uuid;

/// How a wrapped task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Body returned a value and the commit (or flush) succeeded
    Succeeded,
    /// Connection loss on the final attempt
    ConnectionLost,
    /// Constraint conflict
    Integrity,
    /// Protocol error passed through
    Protocol,
    /// Unclassified error passed through
    Other,
    /// Body panicked
    Panicked,
    /// Store could not be opened
    StoreUnavailable,
}

/// Live counters for wrapped transactions
#[derive(Debug, Default)]
pub struct TransactionMonitor {
    active_count: AtomicU64,
    total_started: AtomicU64,
    total_retries: AtomicU64,

    succeeded: AtomicU64,
    connection_lost: AtomicU64,
    integrity: AtomicU64,
    protocol: AtomicU64,
    other: AtomicU64,
    panicked: AtomicU64,
    store_unavailable: AtomicU64,

    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,
    commits: AtomicU64,
    flushes: AtomicU64,
    invalidations: AtomicU64,
    aborts: AtomicU64,
}

impl TransactionMonitor {
    /// Create a monitor with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a task attempt starting (before its session is opened)
    pub fn record_start(&self) {
        self.active_count.fetch_add(1, Ordering::Relaxed);
        self.total_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an attempt that ended in a connection loss and will be retried
    pub fn record_retry(&self) {
        self.end_attempt();
        self.total_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how a task ended.
    ///
    /// Decrements the active count (saturating at 0).
    pub fn record_outcome(&self, outcome: Outcome) {
        self.end_attempt();
        let counter = match outcome {
            Outcome::Succeeded => &self.succeeded,
            Outcome::ConnectionLost => &self.connection_lost,
            Outcome::Integrity => &self.integrity,
            Outcome::Protocol => &self.protocol,
            Outcome::Other => &self.other,
            Outcome::Panicked => &self.panicked,
            Outcome::StoreUnavailable => &self.store_unavailable,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn end_attempt(&self) {
        // Saturating so an unmatched outcome cannot wrap the gauge
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
    }

    /// Number of attempts currently between start and outcome
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Get transaction metrics
    ///
    /// Returns current snapshot of transaction statistics.
    pub fn metrics(&self) -> TransactionMetrics {
        TransactionMetrics {
            active_count: self.active_count.load(Ordering::Relaxed),
            total_started: self.total_started.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            connection_lost: self.connection_lost.load(Ordering::Relaxed),
            integrity: self.integrity.load(Ordering::Relaxed),
            protocol: self.protocol.load(Ordering::Relaxed),
            other: self.other.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            store_unavailable: self.store_unavailable.load(Ordering::Relaxed),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            aborts: self.aborts.load(Ordering::Relaxed),
        }
    }
}

impl SessionObserver for TransactionMonitor {
    fn on_event(&self, _session: Uuid, event: SessionEvent) {
        let counter = match event {
            SessionEvent::Opened => &self.sessions_opened,
            SessionEvent::Flushed => &self.flushes,
            SessionEvent::Invalidated => &self.invalidations,
            SessionEvent::Committed => &self.commits,
            SessionEvent::Aborted => &self.aborts,
            SessionEvent::Closed => &self.sessions_closed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Transaction metrics
///
/// Snapshot of a [`TransactionMonitor`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionMetrics {
    /// Attempts currently running
    pub active_count: u64,
    /// Attempts started (a retried task counts once per attempt)
    pub total_started: u64,
    /// Attempts retried after a connection loss
    pub total_retries: u64,
    /// Tasks that returned a value
    pub succeeded: u64,
    /// Tasks that failed with a connection loss
    pub connection_lost: u64,
    /// Tasks that failed with an integrity violation
    pub integrity: u64,
    /// Tasks that failed with a protocol error
    pub protocol: u64,
    /// Tasks that failed with an unclassified error
    pub other: u64,
    /// Tasks whose body panicked
    pub panicked: u64,
    /// Tasks whose store could not be opened
    pub store_unavailable: u64,
    /// Sessions opened
    pub sessions_opened: u64,
    /// Sessions closed
    pub sessions_closed: u64,
    /// Commits
    pub commits: u64,
    /// Flushes
    pub flushes: u64,
    /// Invalidations
    pub invalidations: u64,
    /// Explicit aborts
    pub aborts: u64,
}

impl TransactionMetrics {
    /// Tasks that ended in any error
    pub fn total_failed(&self) -> u64 {
        self.connection_lost
            + self.integrity
            + self.protocol
            + self.other
            + self.panicked
            + self.store_unavailable
    }

    /// Tasks that ended, successfully or not
    pub fn total_completed(&self) -> u64 {
        self.succeeded + self.total_failed()
    }

    /// Sessions opened but not yet closed
    pub fn open_sessions(&self) -> u64 {
        self.sessions_opened.saturating_sub(self.sessions_closed)
    }
}
