//! Backend bootstrap
//!
//! Builds every runtime component from one [`ServerConfig`] value: the
//! worker pool, the store registry, both transaction wrappers, the shutdown
//! hook, and the notification counters. Nothing is global; a process may
//! host several backends.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tandem_core::{ConfigError, ServerConfig};
use tandem_engine::{
    NotificationCounters, PoolError, PoolStats, ShutdownHook, Transact, TransactionMetrics,
    TransactionMonitor, WorkerPool,
};
use tandem_storage::{StoreRegistry, UriError};
use thiserror::Error;
use tracing::info;

/// Errors raised while building a [`Backend`]
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration could not be loaded or is invalid
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `store_uri` could not be parsed
    #[error("invalid store uri: {0}")]
    StoreUri(#[from] UriError),

    /// Database directory could not be created
    #[error("cannot create database directory '{path}': {source}")]
    Io {
        /// Directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Worker pool failed to start
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// A running backend
pub struct Backend {
    config: ServerConfig,
    pool: Arc<WorkerPool>,
    registry: Arc<StoreRegistry>,
    monitor: Arc<TransactionMonitor>,
    transact: Transact,
    transact_ro: Transact,
    shutdown: ShutdownHook,
    counters: NotificationCounters,
}

impl Backend {
    /// Validate `config` and start every component.
    ///
    /// When no explicit `store_uri` is configured, the database directory
    /// under `working_path` is created if missing.
    ///
    /// # Errors
    ///
    /// See [`BootstrapError`].
    pub fn bootstrap(config: ServerConfig) -> Result<Self, BootstrapError> {
        config.validate()?;

        if config.store_uri.is_none() {
            let dir = config.db_path();
            std::fs::create_dir_all(&dir).map_err(|source| BootstrapError::Io {
                path: dir.clone(),
                source,
            })?;
        }

        let monitor = Arc::new(TransactionMonitor::new());
        let registry = Arc::new(StoreRegistry::from_config(&config)?.with_observer(monitor.clone()));
        let pool = Arc::new(WorkerPool::from_config(&config));
        pool.start()?;

        let transact = Transact::read_write(pool.clone(), registry.clone(), monitor.clone())
            .with_retry(config.connection_retries.clone());
        let transact_ro = Transact::read_only(pool.clone(), registry.clone(), monitor.clone())
            .with_retry(config.connection_retries.clone());
        let shutdown = ShutdownHook::new(pool.clone());

        info!(
            target: "tandem::config",
            store = %config.store_name,
            pool_size = pool.config().max_threads,
            retries = config.connection_retries.max_retries,
            "Backend ready"
        );

        Ok(Self {
            config,
            pool,
            registry,
            monitor,
            transact,
            transact_ro,
            shutdown,
            counters: NotificationCounters::new(),
        })
    }

    /// Load `path` and bootstrap from it
    pub fn from_config_file(path: &Path) -> Result<Self, BootstrapError> {
        Self::bootstrap(ServerConfig::from_file(path)?)
    }

    /// Configuration the backend was built from
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Read-write wrapper on the default store
    pub fn transact(&self) -> &Transact {
        &self.transact
    }

    /// Read-only wrapper on the default store
    pub fn transact_ro(&self) -> &Transact {
        &self.transact_ro
    }

    /// Store registry
    pub fn registry(&self) -> &Arc<StoreRegistry> {
        &self.registry
    }

    /// Worker pool
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Transaction and session counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.monitor.metrics()
    }

    /// Worker pool counters
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Hook that stops the pool; clone it into a signal handler
    pub fn shutdown_hook(&self) -> &ShutdownHook {
        &self.shutdown
    }

    /// Per-recipient notification counts
    pub fn counters(&self) -> &NotificationCounters {
        &self.counters
    }

    /// Stop the worker pool after in-flight tasks finish.
    ///
    /// Returns `false` if shutdown already happened.
    pub fn shutdown(&self) -> bool {
        self.shutdown.trigger()
    }
}
