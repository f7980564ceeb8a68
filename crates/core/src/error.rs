//! Error types visible to callers of transactional work
//!
//! Engine-level failures raised inside a transaction body are classified by
//! the storage layer and then translated into [`TransactError`] by the
//! transaction wrapper. Everything here uses `thiserror` for `Display` and
//! `Error` implementations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Boxed error used to carry unclassified failures through unchanged.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for caller-visible transactional outcomes
pub type Result<T> = std::result::Result<T, TransactError>;

/// A failure deliberately raised by business logic that maps onto an
/// externally visible status (for example an HTTP response code).
///
/// The transaction wrapper never inspects or rewrites these: the exact value
/// raised by the business function is the value the caller receives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}: {message}")]
pub struct ProtocolError {
    /// Status code to report to the remote peer
    pub status: u16,
    /// Human readable reason
    pub message: String,
}

impl ProtocolError {
    /// Create a protocol error with an arbitrary status
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 400 Bad Request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    /// 403 Forbidden
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(403, message)
    }

    /// 404 Not Found
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }
}

/// Domain integrity error produced from a storage-engine constraint conflict
/// (uniqueness, foreign key, check).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("database integrity error: {0}")]
pub struct DatabaseIntegrityError(pub String);

/// Outcome error of a wrapped transaction.
///
/// Each variant corresponds to one row of the error taxonomy. Only
/// `Integrity` is a translation; `Protocol` and `Other` carry the business
/// function's error unchanged.
#[derive(Debug, Error)]
pub enum TransactError {
    /// Transient engine or connection failure. The transaction was aborted
    /// and no write was persisted.
    #[error("connection lost after {attempts} attempt(s): {message}")]
    ConnectionLost {
        /// Number of attempts made (1 when retries are disabled)
        attempts: usize,
        /// Engine message from the last attempt
        message: String,
    },

    /// Constraint conflict detected while writing or committing
    #[error(transparent)]
    Integrity(#[from] DatabaseIntegrityError),

    /// Protocol-level error raised by the business function, unchanged
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Any other error raised by the business function, unchanged
    #[error(transparent)]
    Other(BoxError),

    /// The business function panicked on the worker thread
    #[error("transaction body panicked: {0}")]
    Panicked(String),

    /// The store could not be opened for this task
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The worker pool rejected or dropped the task
    #[error("worker pool unavailable: {0}")]
    PoolUnavailable(String),
}

impl TransactError {
    /// Wrap an arbitrary error as an unclassified failure
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        TransactError::Other(Box::new(err))
    }

    /// Whether this is a (possibly retried) connection loss
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, TransactError::ConnectionLost { .. })
    }

    /// Whether this is a translated integrity violation
    pub fn is_integrity(&self) -> bool {
        matches!(self, TransactError::Integrity(_))
    }

    /// Borrow the protocol error, if any
    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            TransactError::Protocol(e) => Some(e),
            _ => None,
        }
    }

    /// Downcast an unclassified error back to its original type
    pub fn downcast_other<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            TransactError::Other(e) => e.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("config file '{path}': {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("failed to parse config file '{path}': {message}")]
    Parse {
        /// File involved
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// A value is out of range or inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
