//! Engine-level error classification
//!
//! Business functions return `StoreResult<T>`. Any `rusqlite::Error` raised
//! through `?` is classified on conversion, so the transaction wrapper only
//! has to match on [`StoreError`] variants.

use rusqlite::ErrorCode;
use tandem_core::{BoxError, ProtocolError};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for store operations and business functions
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised inside a transaction body
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient engine or connection failure (busy, locked, I/O, cannot open)
    #[error("connection lost: {0}")]
    ConnectionLoss(String),

    /// Constraint conflict (unique, foreign key, check, not null)
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// Deliberate protocol-level failure raised by business logic
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Anything else, carried unchanged
    #[error(transparent)]
    Unclassified(BoxError),

    /// The store could not be opened
    #[error("cannot open store '{name}': {reason}")]
    Open {
        /// Registered store name
        name: String,
        /// Engine message
        reason: String,
    },

    /// Operation on a session that has already been closed
    #[error("store session {0} is closed")]
    Closed(Uuid),

    /// Commit attempted on a read-only session
    #[error("store session {0} is read-only; commit refused")]
    ReadOnly(Uuid),
}

impl StoreError {
    /// Build a connection-loss error from a message
    pub fn connection_loss(message: impl Into<String>) -> Self {
        StoreError::ConnectionLoss(message.into())
    }

    /// Build an integrity violation from a message
    pub fn integrity(message: impl Into<String>) -> Self {
        StoreError::IntegrityViolation(message.into())
    }

    /// Wrap an arbitrary error as unclassified
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Unclassified(Box::new(err))
    }

    /// Short classification label used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::ConnectionLoss(_) => "connection_loss",
            StoreError::IntegrityViolation(_) => "integrity_violation",
            StoreError::Protocol(_) => "protocol",
            StoreError::Unclassified(_) => "unclassified",
            StoreError::Open { .. } => "open",
            StoreError::Closed(_) => "closed",
            StoreError::ReadOnly(_) => "read_only",
        }
    }
}

impl From<BoxError> for StoreError {
    fn from(err: BoxError) -> Self {
        StoreError::Unclassified(err)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(e, _) => Some(e.code),
            _ => None,
        };
        match code {
            Some(ErrorCode::ConstraintViolation) => StoreError::IntegrityViolation(err.to_string()),
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::NotADatabase,
            ) => StoreError::ConnectionLoss(err.to_string()),
            _ => StoreError::Unclassified(Box::new(err)),
        }
    }
}
