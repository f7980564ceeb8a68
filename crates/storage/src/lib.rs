//! Storage layer for Tandem
//!
//! This crate owns everything that touches the database engine:
//! - StoreUri: connection strings with engine pragmas
//! - Store: one exclusive session (connection + manual transaction)
//! - StoreRegistry: named stores, one fresh session per open
//! - StoreError: classification of engine errors raised by business code

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod registry;
pub mod store;
pub mod uri;

pub use error::{StoreError, StoreResult};
pub use registry::StoreRegistry;
pub use store::{SessionEvent, SessionObserver, StagedWrite, Store};
pub use uri::{
    JournalMode, StoreUri, SynchronousMode, UriError, DEFAULT_BUSY_TIMEOUT, MAX_BUSY_TIMEOUT,
};

// Re-exported so business functions can name parameter and row types
pub use rusqlite;
