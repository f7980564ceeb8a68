//! Exclusive database sessions
//!
//! A [`Store`] owns one SQLite connection with an open manual transaction.
//! It is created by the registry for a single task and closed exactly once:
//! explicitly through [`Store::close`], or on drop.
//!
//! # Lifecycle
//!
//! ```text
//! open ── BEGIN ──► in transaction ──► commit / abort ──► (BEGIN again)
//!                         │
//!                         └──────────► close (rollback of uncommitted work)
//! ```
//!
//! Staged writes are the session's pending in-memory state. They are applied
//! to the transaction by `flush()` and automatically before `commit()`, and
//! discarded by `invalidate()` and `abort()`.
//!
//! A read-only session refuses `commit()`; its writes live only until close.

use crate::error::{StoreError, StoreResult};
use crate::uri::{StoreUri, MAX_BUSY_TIMEOUT};
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Params, Row};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle events reported to a [`SessionObserver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection opened and transaction begun
    Opened,
    /// Staged writes applied without committing
    Flushed,
    /// Cached state discarded
    Invalidated,
    /// Transaction committed
    Committed,
    /// Transaction rolled back by an explicit abort
    Aborted,
    /// Connection closed (emitted once per session)
    Closed,
}

/// Receives session lifecycle events
///
/// Implemented by the engine's transaction metrics; tests use it to check
/// close/commit/abort discipline.
pub trait SessionObserver: Send + Sync {
    /// Called synchronously on the thread that owns the session
    fn on_event(&self, session: Uuid, event: SessionEvent);
}

/// A write deferred until the session is flushed or committed
#[derive(Debug, Clone, PartialEq)]
pub struct StagedWrite {
    /// Statement text
    pub sql: String,
    /// Positional parameters
    pub params: Vec<Value>,
}

/// Exclusive handle to one connection and its transaction
pub struct Store {
    id: Uuid,
    name: Arc<str>,
    conn: Option<Connection>,
    staged: Vec<StagedWrite>,
    debug: bool,
    read_only: bool,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("open", &self.conn.is_some())
            .field("staged", &self.staged.len())
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl Store {
    /// Open a new session against `uri`.
    ///
    /// Applies the URI's pragmas before beginning the transaction, since
    /// `foreign_keys` and `journal_mode` cannot change inside one.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Open` if the connection cannot be established or
    /// configured, or if the busy timeout exceeds [`MAX_BUSY_TIMEOUT`].
    pub fn open(
        name: Arc<str>,
        uri: &StoreUri,
        debug: bool,
        observer: Option<Arc<dyn SessionObserver>>,
    ) -> StoreResult<Self> {
        if uri.timeout > MAX_BUSY_TIMEOUT {
            return Err(StoreError::Open {
                name: name.to_string(),
                reason: format!("busy timeout {:?} exceeds {:?}", uri.timeout, MAX_BUSY_TIMEOUT),
            });
        }
        let conn = connect(uri).map_err(|e| StoreError::Open {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let store = Self {
            id: Uuid::new_v4(),
            name,
            conn: Some(conn),
            staged: Vec::new(),
            debug,
            read_only: false,
            observer,
        };
        debug!(target: "tandem::store", session = %store.id, store = %store.name, "Session opened");
        store.emit(SessionEvent::Opened);
        Ok(store)
    }

    /// Session identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Registered name of the store this session belongs to
    pub fn store_name(&self) -> &str {
        &self.name
    }

    /// Whether `commit()` is refused on this session
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn set_read_only(&mut self) {
        self.read_only = true;
    }

    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Borrow the underlying connection for operations not covered here
    pub fn connection(&self) -> StoreResult<&Connection> {
        self.conn.as_ref().ok_or(StoreError::Closed(self.id))
    }

    /// Execute one statement inside the transaction
    pub fn execute<P: Params>(&self, sql: &str, params: P) -> StoreResult<usize> {
        self.trace_sql(sql);
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(sql)?;
        Ok(stmt.execute(params)?)
    }

    /// Execute several `;`-separated statements without parameters
    pub fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        self.trace_sql(sql);
        Ok(self.connection()?.execute_batch(sql)?)
    }

    /// Query exactly one row
    pub fn query_row<T, P, F>(&self, sql: &str, params: P, f: F) -> StoreResult<T>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.trace_sql(sql);
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(sql)?;
        Ok(stmt.query_row(params, f)?)
    }

    /// Query zero or one row
    pub fn query_optional<T, P, F>(&self, sql: &str, params: P, f: F) -> StoreResult<Option<T>>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.trace_sql(sql);
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(sql)?;
        Ok(stmt.query_row(params, f).optional()?)
    }

    /// Query all rows, mapping each with `f`
    pub fn query_collect<T, P, F>(&self, sql: &str, params: P, f: F) -> StoreResult<Vec<T>>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.trace_sql(sql);
        let conn = self.connection()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, f)?;
        Ok(rows.collect::<rusqlite::Result<Vec<T>>>()?)
    }

    /// Defer a write until the next flush or commit
    pub fn stage(&mut self, sql: impl Into<String>, params: Vec<Value>) {
        self.staged.push(StagedWrite {
            sql: sql.into(),
            params,
        });
    }

    /// Number of writes waiting for a flush
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Apply staged writes to the transaction without committing.
    ///
    /// Returns the number of writes applied. On error the remaining staged
    /// writes are kept so an abort can discard them.
    pub fn flush(&mut self) -> StoreResult<usize> {
        let staged = std::mem::take(&mut self.staged);
        let count = staged.len();
        for (index, write) in staged.iter().enumerate() {
            if let Err(e) = self.execute(&write.sql, rusqlite::params_from_iter(write.params.iter())) {
                self.staged = staged[index..].to_vec();
                return Err(e);
            }
        }
        self.emit(SessionEvent::Flushed);
        Ok(count)
    }

    /// Discard staged state and cached statements so later reads go back to
    /// the engine.
    pub fn invalidate(&mut self) {
        self.staged.clear();
        if let Some(conn) = &self.conn {
            conn.flush_prepared_statement_cache();
        }
        self.emit(SessionEvent::Invalidated);
    }

    /// Flush staged writes and commit, then begin a new transaction.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ReadOnly` on a read-only session, leaving the
    /// transaction and staged writes untouched.
    pub fn commit(&mut self) -> StoreResult<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly(self.id));
        }
        if !self.staged.is_empty() {
            self.flush()?;
        }
        self.execute_batch("COMMIT")?;
        self.emit(SessionEvent::Committed);
        self.execute_batch("BEGIN")?;
        Ok(())
    }

    /// Roll back the transaction and drop staged writes, then begin a new
    /// transaction.
    pub fn abort(&mut self) -> StoreResult<()> {
        self.staged.clear();
        let conn = self.connection()?;
        if !conn.is_autocommit() {
            self.execute_batch("ROLLBACK")?;
        }
        self.emit(SessionEvent::Aborted);
        self.execute_batch("BEGIN")?;
        Ok(())
    }

    /// Close the session, rolling back anything not committed.
    pub fn close(mut self) {
        self.close_inner();
    }

    fn close_inner(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        self.staged.clear();
        if !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(target: "tandem::store", session = %self.id, error = %e, "Rollback on close failed");
            }
        }
        if let Err((_, e)) = conn.close() {
            warn!(target: "tandem::store", session = %self.id, error = %e, "Connection close failed");
        }
        debug!(target: "tandem::store", session = %self.id, "Session closed");
        self.emit(SessionEvent::Closed);
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(observer) = &self.observer {
            observer.on_event(self.id, event);
        }
    }

    fn trace_sql(&self, sql: &str) {
        if self.debug {
            debug!(target: "tandem::sql", session = %self.id, sql = %sql);
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.close_inner();
    }
}

fn connect(uri: &StoreUri) -> rusqlite::Result<Connection> {
    let conn = match &uri.database {
        Some(path) => Connection::open(path)?,
        None => Connection::open_in_memory()?,
    };
    conn.busy_timeout(uri.timeout)?;
    if let Some(mode) = uri.synchronous {
        conn.execute_batch(&format!("PRAGMA synchronous = {};", mode.pragma_value()))?;
    }
    if let Some(mode) = uri.journal_mode {
        conn.execute_batch(&format!("PRAGMA journal_mode = {};", mode.pragma_value()))?;
    }
    if let Some(on) = uri.foreign_keys {
        conn.execute_batch(&format!(
            "PRAGMA foreign_keys = {};",
            if on { "ON" } else { "OFF" }
        ))?;
    }
    conn.execute_batch("BEGIN")?;
    Ok(conn)
}
