//! Execution engine for Tandem
//!
//! This crate runs blocking database work for an event-loop server:
//! - WorkerPool: bounded threads with a FIFO queue and awaitable handles
//! - Transact: per-call store session, commit/flush, abort, exactly-once close
//! - TransactionMonitor: transaction and session accounting
//! - ShutdownHook: stops the pool once at process exit
//! - NotificationCounters: per-recipient counts owned by the backend
//!
//! The engine is the only component that knows about:
//! - Scheduling (which thread runs a task, and when)
//! - Mapping storage errors to caller-visible outcomes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod counters;
pub mod metrics;
pub mod pool;
pub mod shutdown;
pub mod transact;

pub use counters::NotificationCounters;
pub use metrics::{Outcome, TransactionMetrics, TransactionMonitor};
pub use pool::{PoolConfig, PoolError, PoolResult, PoolStats, TaskHandle, WorkerPool};
pub use shutdown::ShutdownHook;
pub use transact::{
    Mode, SuppressConnectionLoss, TaskState, Transact, TransactFuture, Transactional,
};
