//! Store connection strings
//!
//! Format: `sqlite:<path>?option=value&option=value`. An empty path (or
//! `:memory:`) opens a private in-memory database per session.
//!
//! Recognized options:
//! - `timeout`: busy timeout in seconds (float, default 5)
//! - `synchronous`: off | normal | full | extra
//! - `journal_mode`: delete | truncate | persist | memory | wal | off
//! - `foreign_keys`: on | off (also 1/0, true/false)

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default busy timeout applied when the URI has no `timeout` option.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest busy timeout the engine accepts (`i32::MAX` milliseconds).
pub const MAX_BUSY_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64);

/// Errors produced while parsing a connection string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriError {
    /// Scheme other than `sqlite`
    #[error("unsupported store scheme '{0}'")]
    UnsupportedScheme(String),

    /// Connection string has no `scheme:` prefix
    #[error("store uri '{0}' has no scheme")]
    MissingScheme(String),

    /// Option name not understood
    #[error("unknown store option '{0}'")]
    UnknownOption(String),

    /// Option value not understood
    #[error("invalid value '{value}' for store option '{option}'")]
    InvalidValue {
        /// Option name
        option: String,
        /// Offending value
        value: String,
    },
}

/// SQLite `synchronous` pragma setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchronousMode {
    /// No syncs
    Off,
    /// Sync at critical moments
    Normal,
    /// Sync on every transaction
    Full,
    /// Full plus directory sync
    Extra,
}

impl SynchronousMode {
    /// Returns the SQLite pragma value.
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
            Self::Extra => "EXTRA",
        }
    }
}

impl FromStr for SynchronousMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "0" => Ok(Self::Off),
            "normal" | "1" => Ok(Self::Normal),
            "full" | "2" => Ok(Self::Full),
            "extra" | "3" => Ok(Self::Extra),
            _ => Err(()),
        }
    }
}

/// SQLite `journal_mode` pragma setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Rollback journal deleted after each transaction
    Delete,
    /// Rollback journal truncated
    Truncate,
    /// Rollback journal header zeroed
    Persist,
    /// Journal kept in memory
    Memory,
    /// Write-ahead log
    Wal,
    /// No journal
    Off,
}

impl JournalMode {
    /// Returns the SQLite pragma value.
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::Persist => "PERSIST",
            Self::Memory => "MEMORY",
            Self::Wal => "WAL",
            Self::Off => "OFF",
        }
    }
}

impl FromStr for JournalMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "delete" => Ok(Self::Delete),
            "truncate" => Ok(Self::Truncate),
            "persist" => Ok(Self::Persist),
            "memory" => Ok(Self::Memory),
            "wal" => Ok(Self::Wal),
            "off" => Ok(Self::Off),
            _ => Err(()),
        }
    }
}

/// Parsed store connection string
#[derive(Debug, Clone, PartialEq)]
pub struct StoreUri {
    /// Database file; `None` opens an in-memory database
    pub database: Option<PathBuf>,
    /// Connection-level busy timeout
    pub timeout: Duration,
    /// `PRAGMA synchronous`, left at the engine default when unset
    pub synchronous: Option<SynchronousMode>,
    /// `PRAGMA journal_mode`, left at the engine default when unset
    pub journal_mode: Option<JournalMode>,
    /// `PRAGMA foreign_keys`, left at the engine default when unset
    pub foreign_keys: Option<bool>,
}

impl StoreUri {
    /// A file-backed store with default options
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            database: Some(path.into()),
            ..Self::memory()
        }
    }

    /// An in-memory store with default options
    pub fn memory() -> Self {
        Self {
            database: None,
            timeout: DEFAULT_BUSY_TIMEOUT,
            synchronous: None,
            journal_mode: None,
            foreign_keys: None,
        }
    }

    /// Set the busy timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set `PRAGMA synchronous`
    pub fn with_synchronous(mut self, mode: SynchronousMode) -> Self {
        self.synchronous = Some(mode);
        self
    }

    /// Set `PRAGMA journal_mode`
    pub fn with_journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = Some(mode);
        self
    }

    /// Set `PRAGMA foreign_keys`
    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = Some(enabled);
        self
    }

    /// Whether sessions of this store share nothing (in-memory)
    pub fn is_memory(&self) -> bool {
        self.database.is_none()
    }

    fn apply_option(&mut self, option: &str, value: &str) -> Result<(), UriError> {
        let invalid = || UriError::InvalidValue {
            option: option.to_string(),
            value: value.to_string(),
        };
        match option {
            "timeout" => {
                let secs: f64 = value.parse().map_err(|_| invalid())?;
                let timeout = Duration::try_from_secs_f64(secs).map_err(|_| invalid())?;
                if timeout > MAX_BUSY_TIMEOUT {
                    return Err(invalid());
                }
                self.timeout = timeout;
            }
            "synchronous" => self.synchronous = Some(value.parse().map_err(|_| invalid())?),
            "journal_mode" => self.journal_mode = Some(value.parse().map_err(|_| invalid())?),
            "foreign_keys" => {
                self.foreign_keys = Some(match value.to_ascii_lowercase().as_str() {
                    "on" | "1" | "true" | "yes" => true,
                    "off" | "0" | "false" | "no" => false,
                    _ => return Err(invalid()),
                })
            }
            other => return Err(UriError::UnknownOption(other.to_string())),
        }
        Ok(())
    }
}

impl FromStr for StoreUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| UriError::MissingScheme(s.to_string()))?;
        if !scheme.eq_ignore_ascii_case("sqlite") {
            return Err(UriError::UnsupportedScheme(scheme.to_string()));
        }

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let mut uri = StoreUri::memory();
        if !path.is_empty() && path != ":memory:" {
            uri.database = Some(PathBuf::from(path));
        }

        for pair in query.into_iter().flat_map(|q| q.split('&')) {
            if pair.is_empty() {
                continue;
            }
            let (option, value) = pair.split_once('=').ok_or_else(|| UriError::InvalidValue {
                option: pair.to_string(),
                value: String::new(),
            })?;
            uri.apply_option(option, value)?;
        }
        Ok(uri)
    }
}

impl fmt::Display for StoreUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sqlite:")?;
        if let Some(path) = &self.database {
            write!(f, "{}", path.display())?;
        }
        write!(f, "?timeout={}", self.timeout.as_secs_f64())?;
        if let Some(mode) = self.synchronous {
            write!(f, "&synchronous={}", mode.pragma_value().to_ascii_lowercase())?;
        }
        if let Some(mode) = self.journal_mode {
            write!(f, "&journal_mode={}", mode.pragma_value().to_ascii_lowercase())?;
        }
        if let Some(on) = self.foreign_keys {
            write!(f, "&foreign_keys={}", if on { "on" } else { "off" })?;
        }
        Ok(())
    }
}
