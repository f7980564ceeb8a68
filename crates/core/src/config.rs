//! Server bootstrap configuration via `tandem.toml`
//!
//! A plain value passed to the worker pool and store registry at
//! construction. There is no process-wide settings object: components that
//! need configuration receive a reference to a `ServerConfig`.

use crate::error::ConfigError;
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Schema version of the backing database file.
pub const DATABASE_VERSION: u32 = 1;

/// Config file name placed in the working directory.
pub const CONFIG_FILE_NAME: &str = "tandem.toml";

/// Log verbosity.
///
/// `TimeDebug` sits below `Debug` and enables per-statement timing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug plus timing statistics
    TimeDebug,
    /// Debug
    Debug,
    /// Informational
    Info,
    /// Warnings
    Warning,
    /// Errors
    Error,
    /// Critical only (default)
    #[default]
    Critical,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    ///
    /// `tracing` has no level above `error`, so `Critical` shares it.
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::TimeDebug => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

/// Server bootstrap configuration loaded from `tandem.toml`.
///
/// # Example
///
/// ```toml
/// thread_pool_size = 4
/// store_name = "main_store"
/// store_uri = "sqlite:/var/tandem/db/tandem-1.db?foreign_keys=ON&timeout=5"
/// debug = false
/// log_level = "info"
///
/// [connection_retries]
/// max_retries = 2
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Maximum number of database worker threads. `0` sizes the pool to the
    /// available parallelism of the host.
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,
    /// Name under which the default store is registered.
    #[serde(default = "default_store_name")]
    pub store_name: String,
    /// Connection string of the default store. Derived from `working_path`
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_uri: Option<String>,
    /// Root of the server's on-disk state.
    #[serde(default = "default_working_path")]
    pub working_path: PathBuf,
    /// Log every SQL statement executed through a store.
    #[serde(default)]
    pub debug: bool,
    /// Log verbosity.
    #[serde(default)]
    pub log_level: LogLevel,
    /// Addresses the request handler binds to.
    #[serde(default = "default_bind_addresses")]
    pub bind_addresses: Vec<String>,
    /// Port the request handler binds to.
    #[serde(default = "default_bind_port")]
    pub bind_port: u32,
    /// Retry policy for transactions that lose their connection.
    #[serde(default)]
    pub connection_retries: RetryConfig,
}

fn default_thread_pool_size() -> usize {
    1
}

fn default_store_name() -> String {
    "main_store".to_string()
}

fn default_working_path() -> PathBuf {
    PathBuf::from("/var/tandem")
}

fn default_bind_addresses() -> Vec<String> {
    vec!["127.0.0.1".to_string()]
}

fn default_bind_port() -> u32 {
    8082
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: default_thread_pool_size(),
            store_name: default_store_name(),
            store_uri: None,
            working_path: default_working_path(),
            debug: false,
            log_level: LogLevel::default(),
            bind_addresses: default_bind_addresses(),
            bind_port: default_bind_port(),
            connection_retries: RetryConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Directory holding the database files.
    pub fn db_path(&self) -> PathBuf {
        self.working_path.join("db")
    }

    /// Path of the versioned database file.
    pub fn database_file(&self) -> PathBuf {
        self.db_path()
            .join(format!("tandem-{}.db", DATABASE_VERSION))
    }

    /// Connection string of the default store.
    pub fn resolved_store_uri(&self) -> String {
        match &self.store_uri {
            Some(uri) => uri.clone(),
            None => format!("sqlite:{}?foreign_keys=ON", self.database_file().display()),
        }
    }

    /// Worker thread ceiling after resolving `thread_pool_size = 0`.
    pub fn effective_pool_size(&self) -> usize {
        if self.thread_pool_size > 0 {
            return self.thread_pool_size;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` for a port outside `0..65535`, an empty
    /// store name, or no bind address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_port >= 65535 {
            return Err(ConfigError::Invalid(format!(
                "bind_port {} out of range (0..65535)",
                self.bind_port
            )));
        }
        if self.store_name.trim().is_empty() {
            return Err(ConfigError::Invalid("store_name must not be empty".into()));
        }
        if self.bind_addresses.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one bind address is required".into(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tandem server configuration
#
# Maximum number of database worker threads (default: 1).
# 0 sizes the pool to the host's available parallelism.
thread_pool_size = 1

# Name of the default store.
store_name = "main_store"

# Connection string of the default store. When omitted it is derived from
# working_path as sqlite:<working_path>/db/tandem-<version>.db?foreign_keys=ON
# Recognized options: timeout (seconds), synchronous, journal_mode, foreign_keys
# store_uri = "sqlite:/var/tandem/db/tandem-1.db?foreign_keys=ON&timeout=5"

working_path = "/var/tandem"

# Log every SQL statement (default: false)
debug = false

# One of: timedebug, debug, info, warning, error, critical
log_level = "critical"

bind_addresses = ["127.0.0.1"]
bind_port = 8082

# Retry transactions that lose their connection (default: no retries)
# [connection_retries]
# max_retries = 3
# base_delay_ms = 10
# max_delay_ms = 100
"#
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: ServerConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        config.validate()?;
        tracing::debug!(target: "tandem::config", path = %path.display(), "Loaded server config");
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
