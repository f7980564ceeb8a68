//! Tandem - transactional execution of blocking database work
//!
//! Tandem lets a single-threaded event-loop server run blocking database
//! work on a bounded pool of worker threads. Each wrapped call gets its own
//! store session, commits on success, aborts on failure, and always closes
//! the session before the caller sees the outcome.
//!
//! # Quick Start
//!
//! ```ignore
//! use tandem::{Backend, ServerConfig};
//! use tandem::rusqlite::params;
//!
//! let backend = Backend::bootstrap(ServerConfig::default())?;
//!
//! let rename = backend.transact().wrap(|store, (id, name): (i64, String)| {
//!     store.execute("UPDATE users SET name = ?1 WHERE id = ?2", params![name, id])
//! });
//!
//! // On the event loop
//! let updated = rename.call((7, "Ada".into())).await?;
//! ```
//!
//! # Architecture
//!
//! - `tandem-core`: errors, configuration, retry policy
//! - `tandem-storage`: store sessions, registry, engine error classification
//! - `tandem-engine`: worker pool, transaction wrapper, shutdown hook

pub mod backend;
pub mod logging;

pub use backend::{Backend, BootstrapError};
pub use logging::{env_filter, init_tracing};

pub use tandem_core::{
    ConfigError, DatabaseIntegrityError, LogLevel, ProtocolError, Result, RetryConfig,
    ServerConfig, TransactError, CONFIG_FILE_NAME, DATABASE_VERSION,
};
pub use tandem_engine::{
    Mode, NotificationCounters, PoolConfig, PoolError, PoolStats, ShutdownHook,
    SuppressConnectionLoss, TaskHandle, Transact, TransactFuture, Transactional,
    TransactionMetrics, TransactionMonitor, WorkerPool,
};
pub use tandem_storage::{
    rusqlite, Store, StoreError, StoreRegistry, StoreResult, StoreUri, UriError,
};
