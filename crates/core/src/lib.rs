//! Core types for Tandem
//!
//! This crate defines the types shared by every layer:
//! - TransactError: caller-visible outcome errors of wrapped transactions
//! - ProtocolError / DatabaseIntegrityError: errors passed through or translated
//! - ServerConfig: bootstrap configuration (pool size, store, debug, logging)
//! - RetryConfig: opt-in retry policy for connection losses

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod retry;

pub use config::{LogLevel, ServerConfig, CONFIG_FILE_NAME, DATABASE_VERSION};
pub use error::{
    BoxError, ConfigError, DatabaseIntegrityError, ProtocolError, Result, TransactError,
};
pub use retry::RetryConfig;
