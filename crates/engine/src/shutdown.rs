//! Process-exit hook for the worker pool
//!
//! The hook stops the pool at most once, whichever of an explicit
//! `trigger()`, a Ctrl-C, or `Backend::shutdown` gets there first.

use crate::pool::WorkerPool;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Stops a [`WorkerPool`] exactly once
#[derive(Clone)]
pub struct ShutdownHook {
    pool: Arc<WorkerPool>,
    fired: Arc<AtomicBool>,
}

impl ShutdownHook {
    /// Register a hook for `pool`
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop the pool, waiting for in-flight tasks.
    ///
    /// Returns `true` if this call performed the stop. Blocks; from async
    /// code use [`ShutdownHook::trigger_async`].
    pub fn trigger(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            debug!(target: "tandem::shutdown", "Shutdown already triggered");
            return false;
        }
        info!(target: "tandem::shutdown", "Stopping worker pool");
        self.pool.stop();
        true
    }

    /// Whether the hook has fired
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// `trigger()` on the runtime's blocking pool so the event loop keeps
    /// running while workers drain.
    pub async fn trigger_async(&self) -> io::Result<bool> {
        let hook = self.clone();
        tokio::task::spawn_blocking(move || hook.trigger())
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }

    /// Wait for Ctrl-C, then trigger.
    pub async fn wait_for_signal(&self) -> io::Result<bool> {
        tokio::signal::ctrl_c().await?;
        info!(target: "tandem::shutdown", "Interrupt received");
        self.trigger_async().await
    }
}
