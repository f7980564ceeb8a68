//! Bounded worker pool for blocking database work.
//!
//! Transaction bodies block on the database engine, so they never run on the
//! caller's event loop. The pool executes them on at most `max_threads` OS
//! threads and hands each result back through a [`TaskHandle`] future that
//! the caller awaits on its own executor.
//!
//! Threads are created lazily: `start()` spawns `min_threads` workers (zero
//! is allowed) and `submit()` adds a worker whenever queued work outnumbers
//! idle workers and the ceiling has not been reached. Queued tasks run in
//! FIFO order, but that is a fairness heuristic, not a guarantee callers may
//! rely on.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use tandem_core::ServerConfig;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Default maximum number of queued (not yet running) tasks.
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 65_536;

/// Result type alias for pool operations
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Errors returned by the worker pool
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// `submit` called before `start`
    #[error("worker pool has not been started")]
    NotStarted,

    /// `submit` called after `stop`
    #[error("worker pool has been stopped")]
    Stopped,

    /// The queue is at capacity
    #[error("worker pool queue is full ({0} tasks waiting)")]
    Backpressure(usize),

    /// The task was dropped before producing a result
    #[error("task was dropped before completing")]
    Canceled,

    /// No worker thread could be created
    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Sizing of a [`WorkerPool`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Workers spawned eagerly by `start()`
    pub min_threads: usize,
    /// Hard ceiling on concurrently running tasks
    pub max_threads: usize,
    /// Maximum number of queued tasks before `submit` reports backpressure
    pub max_queue_depth: usize,
}

impl PoolConfig {
    /// Lazily grown pool with the given ceiling
    pub fn new(max_threads: usize) -> Self {
        Self {
            min_threads: 0,
            max_threads: max_threads.max(1),
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
        }
    }

    /// Pool sized from `thread_pool_size`
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self::new(config.effective_pool_size())
    }

    /// Set the number of eagerly spawned workers
    pub fn with_min_threads(mut self, min_threads: usize) -> Self {
        self.min_threads = min_threads;
        self
    }

    /// Set the queue capacity
    pub fn with_max_queue_depth(mut self, max_queue_depth: usize) -> Self {
        self.max_queue_depth = max_queue_depth;
        self
    }
}

/// Pool metrics snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of tasks waiting in the queue.
    pub queue_depth: usize,
    /// Number of tasks currently being executed by workers.
    pub active_tasks: usize,
    /// Highest number of tasks ever executing at once.
    pub peak_active: usize,
    /// Total number of tasks completed since pool creation.
    pub tasks_completed: u64,
    /// Number of live worker threads.
    pub worker_count: usize,
    /// Worker ceiling.
    pub max_workers: usize,
}

type Job = Box<dyn FnOnce() + Send>;

struct QueueState {
    jobs: VecDeque<Job>,
    idle: usize,
}

struct PoolInner {
    queue: Mutex<QueueState>,
    work_ready: Condvar,
    drain_cond: Condvar,
    started: AtomicBool,
    shutdown: AtomicBool,
    queue_depth: AtomicUsize,
    active_tasks: AtomicUsize,
    peak_active: AtomicUsize,
    tasks_completed: AtomicU64,
}

/// Bounded pool of reusable worker threads
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_worker_id: AtomicUsize,
    config: PoolConfig,
}

impl WorkerPool {
    /// Create a pool. No thread exists until `start()`.
    pub fn new(config: PoolConfig) -> Self {
        let config = PoolConfig {
            min_threads: config.min_threads.min(config.max_threads.max(1)),
            max_threads: config.max_threads.max(1),
            max_queue_depth: config.max_queue_depth.max(1),
        };
        let inner = Arc::new(PoolInner {
            queue: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                idle: 0,
            }),
            work_ready: Condvar::new(),
            drain_cond: Condvar::new(),
            started: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            queue_depth: AtomicUsize::new(0),
            active_tasks: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
            tasks_completed: AtomicU64::new(0),
        });

        Self {
            inner,
            workers: Mutex::new(Vec::with_capacity(config.max_threads)),
            next_worker_id: AtomicUsize::new(0),
            config,
        }
    }

    /// Create a pool sized by the server configuration
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(PoolConfig::from_server_config(config))
    }

    /// Sizing in effect
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Start the pool, spawning `min_threads` workers.
    ///
    /// Calling `start` on a running pool is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Stopped` once the pool has been stopped, or
    /// `PoolError::Spawn` if an eager worker could not be created.
    pub fn start(&self) -> PoolResult<()> {
        let mut workers = self.workers.lock();
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::Stopped);
        }
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        while workers.len() < self.config.min_threads {
            let handle = self.spawn_worker()?;
            workers.push(handle);
        }
        info!(
            target: "tandem::pool",
            min_threads = self.config.min_threads,
            max_threads = self.config.max_threads,
            "Worker pool started"
        );
        Ok(())
    }

    /// Whether `start()` has been called and `stop()` has not
    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::Acquire) && !self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Submit a blocking task.
    ///
    /// The returned handle resolves with the task's return value once a
    /// worker has run it. Dropping the handle does not cancel the task.
    ///
    /// # Errors
    ///
    /// - `NotStarted` before `start()`, `Stopped` after `stop()`
    /// - `Backpressure` if the queue is at capacity
    /// - `Spawn` if the pool has no worker and none could be created
    pub fn submit<F, T>(&self, work: F) -> PoolResult<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        // Holding the worker list for the whole submission orders it against
        // stop(): either the task is enqueued while workers can still be
        // joined, or the submission observes the shutdown flag.
        let mut workers = self.workers.lock();
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::Stopped);
        }
        if !self.inner.started.load(Ordering::Acquire) {
            return Err(PoolError::NotStarted);
        }
        let depth = self.inner.queue_depth.load(Ordering::Acquire);
        if depth >= self.config.max_queue_depth {
            return Err(PoolError::Backpressure(depth));
        }

        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            // Receiver may have been dropped; the task still ran to completion.
            let _ = tx.send(work());
        });

        let needs_worker = {
            let mut queue = self.inner.queue.lock();
            queue.jobs.push_back(job);
            self.inner.queue_depth.fetch_add(1, Ordering::Release);
            queue.jobs.len() > queue.idle
        };
        self.inner.work_ready.notify_one();

        if needs_worker && workers.len() < self.config.max_threads {
            match self.spawn_worker() {
                Ok(handle) => workers.push(handle),
                Err(e) if workers.is_empty() => {
                    // Nobody could ever run the task; take it back out.
                    let mut queue = self.inner.queue.lock();
                    if queue.jobs.pop_back().is_some() {
                        self.inner.queue_depth.fetch_sub(1, Ordering::Release);
                    }
                    return Err(e);
                }
                Err(e) => {
                    warn!(target: "tandem::pool", error = %e, "Could not grow worker pool");
                }
            }
        }

        Ok(TaskHandle { rx })
    }

    /// Block until all queued and in-flight tasks have completed.
    ///
    /// Workers remain running after drain completes.
    pub fn drain(&self) {
        let mut queue = self.inner.queue.lock();
        while self.inner.queue_depth.load(Ordering::Acquire) > 0
            || self.inner.active_tasks.load(Ordering::Acquire) > 0
        {
            self.inner.drain_cond.wait(&mut queue);
        }
    }

    /// Stop the pool: refuse new work, let workers finish every queued and
    /// in-flight task, and join them.
    ///
    /// Returns `true` if this call performed the stop; later calls return
    /// `false` and do nothing. Must not be called from a worker thread.
    pub fn stop(&self) -> bool {
        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock();
            if self.inner.shutdown.swap(true, Ordering::AcqRel) {
                return false;
            }
            // Lock the queue before notifying so a worker between its
            // shutdown check and wait() cannot miss the wakeup.
            {
                let _queue = self.inner.queue.lock();
                self.inner.work_ready.notify_all();
            }
            workers.drain(..).collect()
        };

        let count = handles.len();
        for handle in handles {
            if handle.join().is_err() {
                error!(target: "tandem::pool", "Worker thread exited with a panic");
            }
        }
        info!(
            target: "tandem::pool",
            workers = count,
            tasks_completed = self.inner.tasks_completed.load(Ordering::Relaxed),
            "Worker pool stopped"
        );
        true
    }

    /// Return a snapshot of pool metrics.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            queue_depth: self.inner.queue_depth.load(Ordering::Relaxed),
            active_tasks: self.inner.active_tasks.load(Ordering::Relaxed),
            peak_active: self.inner.peak_active.load(Ordering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Relaxed),
            worker_count: self.workers.lock().len(),
            max_workers: self.config.max_threads,
        }
    }

    fn spawn_worker(&self) -> PoolResult<JoinHandle<()>> {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name(format!("tandem-db-{}", id))
            .spawn(move || worker_loop(&inner))
            .map_err(|e| PoolError::Spawn(e.to_string()))?;
        debug!(target: "tandem::pool", worker = id, "Spawned worker thread");
        Ok(handle)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Future resolving to a pooled task's return value
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Wait for the result from a thread that is not driving an async
    /// runtime.
    pub fn wait(self) -> PoolResult<T> {
        self.rx.blocking_recv().map_err(|_| PoolError::Canceled)
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = PoolResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| PoolError::Canceled))
    }
}

/// RAII guard that decrements `active_tasks` and notifies drain waiters on drop.
///
/// Keeps bookkeeping correct even if a task panics; otherwise `drain()`
/// would wait forever.
struct ActiveTaskGuard<'a> {
    inner: &'a PoolInner,
}

impl<'a> Drop for ActiveTaskGuard<'a> {
    fn drop(&mut self) {
        self.inner.tasks_completed.fetch_add(1, Ordering::Relaxed);
        let prev_active = self.inner.active_tasks.fetch_sub(1, Ordering::Release);

        if prev_active == 1 && self.inner.queue_depth.load(Ordering::Acquire) == 0 {
            let _queue = self.inner.queue.lock();
            self.inner.drain_cond.notify_all();
        }
    }
}

fn worker_loop(inner: &PoolInner) {
    loop {
        let job = {
            let mut queue = inner.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    inner.queue_depth.fetch_sub(1, Ordering::Release);
                    let active = inner.active_tasks.fetch_add(1, Ordering::AcqRel) + 1;
                    inner.peak_active.fetch_max(active, Ordering::Relaxed);
                    break job;
                }
                if inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                queue.idle += 1;
                inner.work_ready.wait(&mut queue);
                queue.idle -= 1;
            }
        };

        let _guard = ActiveTaskGuard { inner };

        // A panicking task must not take the worker down with it.
        if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
            error!(
                target: "tandem::pool",
                "pooled task panicked: {}",
                panic_message(e.as_ref())
            );
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(non-string panic)".to_string()
    }
}
