//! Worker pools for off-thread delivery and recomputation.
//!
//! Everything that leaves the calling thread goes through the [`WorkerPool`]
//! trait. Three implementations are provided:
//!
//! - [`ThreadPool`] - a bounded rayon pool; the production choice
//! - [`InlinePool`] - runs each job on the submitting thread, immediately
//! - [`DeferredPool`] - holds jobs until [`DeferredPool::run_pending`] is called,
//!   giving tests full control over interleavings
//!
//! All three track outstanding jobs the same way, so `is_idle` / `wait_idle`
//! mean "no job submitted and not yet finished", including jobs submitted by
//! other jobs.
//!
//! # Cancellation Example
//!
//! ```
//! use horizon_grid_core::threadpool::{DeferredPool, WorkerPool};
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::sync::Arc;
//!
//! let pool = DeferredPool::new();
//! let ran = Arc::new(AtomicBool::new(false));
//! let flag = ran.clone();
//!
//! let id = pool.submit(Box::new(move || flag.store(true, Ordering::SeqCst))).unwrap();
//! assert!(pool.cancel(id));
//! pool.run_pending();
//!
//! assert!(!ran.load(Ordering::SeqCst));
//! assert!(pool.is_idle());
//! ```

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rayon::{ThreadPool as RayonThreadPool, ThreadPoolBuilder};
use slotmap::{SlotMap, new_key_type};

use crate::error::PoolError;
use crate::fault::{Fault, FaultKind, FaultSink, fault_sink, panic_message};

new_key_type! {
    /// Identifies a submitted job until it starts running.
    pub struct JobId;
}

/// A unit of work for a pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Abstraction over where off-thread work runs.
pub trait WorkerPool: Send + Sync {
    /// Submit a job. Fails once the pool has been shut down.
    fn submit(&self, job: Job) -> Result<JobId, PoolError>;

    /// Cancel a job that has not started. Returns `false` if it already
    /// started, finished, or was never submitted here.
    fn cancel(&self, id: JobId) -> bool;

    /// Stop accepting jobs. Jobs already submitted still run.
    fn shutdown(&self);

    /// Whether [`shutdown`](Self::shutdown) has been called.
    fn is_shut_down(&self) -> bool;

    /// Whether every submitted job has finished.
    fn is_idle(&self) -> bool;

    /// Block until idle or until `timeout` elapses. Returns whether the pool
    /// is idle.
    fn wait_idle(&self, timeout: Duration) -> bool;
}

/// A cancellation flag shared between a queued job and its pool.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

#[derive(Default)]
struct BookState {
    queued: SlotMap<JobId, CancellationToken>,
    outstanding: usize,
}

/// Outstanding-job accounting shared by every pool implementation.
struct JobBook {
    state: Mutex<BookState>,
    idle: Condvar,
    faults: Arc<dyn FaultSink>,
}

impl Default for JobBook {
    fn default() -> Self {
        Self::new(fault_sink())
    }
}

impl JobBook {
    fn new(faults: Arc<dyn FaultSink>) -> Self {
        Self {
            state: Mutex::new(BookState::default()),
            idle: Condvar::new(),
            faults,
        }
    }

    /// Record a new job and wrap it so that it honours cancellation and
    /// settles the books when done.
    fn register(self: &Arc<Self>, job: Job) -> (JobId, Job) {
        let token = CancellationToken::new();
        let id = {
            let mut state = self.state.lock();
            state.outstanding += 1;
            state.queued.insert(token.clone())
        };

        let book = Arc::clone(self);
        let wrapped: Job = Box::new(move || {
            let cancelled = {
                let mut state = book.state.lock();
                state.queued.remove(id);
                token.is_cancelled()
            };

            if !cancelled {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                    book.faults
                        .report(Fault::new(FaultKind::JobPanic, panic_message(payload.as_ref())));
                }
            }

            book.finish();
        });

        (id, wrapped)
    }

    fn cancel(&self, id: JobId) -> bool {
        let mut state = self.state.lock();
        match state.queued.remove(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn finish(&self) {
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.outstanding == 0 {
            self.idle.notify_all();
        }
    }

    fn is_idle(&self) -> bool {
        self.state.lock().outstanding == 0
    }

    fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.outstanding > 0 {
            if self.idle.wait_until(&mut state, deadline).timed_out() {
                return state.outstanding == 0;
            }
        }
        true
    }
}

/// Configuration for creating a [`ThreadPool`].
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    /// Number of worker threads. `None` means use the number of CPU cores.
    pub num_threads: Option<usize>,
    /// Name prefix for worker threads.
    pub thread_name: String,
    /// Stack size for worker threads in bytes.
    pub stack_size: Option<usize>,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            thread_name: "horizon-grid".to_string(),
            stack_size: None,
        }
    }
}

impl ThreadPoolConfig {
    /// Create a new configuration with custom thread count.
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads: Some(num_threads),
            ..Default::default()
        }
    }

    /// Set the thread name prefix.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the worker stack size.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

/// A bounded pool of worker threads.
///
/// Backed by rayon. Jobs beyond the thread count wait in rayon's queue.
pub struct ThreadPool {
    pool: RayonThreadPool,
    book: Arc<JobBook>,
    active_tasks: Arc<AtomicUsize>,
    shut_down: AtomicBool,
}

impl ThreadPool {
    /// Create a new thread pool with the given configuration.
    pub fn new(config: ThreadPoolConfig) -> Result<Self, PoolError> {
        let name = config.thread_name.clone();
        let mut builder =
            ThreadPoolBuilder::new().thread_name(move |index| format!("{name}-{index}"));

        if let Some(num_threads) = config.num_threads {
            builder = builder.num_threads(num_threads.max(1));
        }

        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let pool = builder
            .build()
            .map_err(|e| PoolError::CreationFailed(e.to_string()))?;

        tracing::debug!(
            target: "horizon_grid_core::pool",
            threads = pool.current_num_threads(),
            name = %config.thread_name,
            "worker pool created"
        );

        Ok(Self {
            pool,
            book: Arc::new(JobBook::default()),
            active_tasks: Arc::new(AtomicUsize::new(0)),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Report job panics to `faults` instead of the process-wide sink.
    pub fn with_fault_sink(mut self, faults: Arc<dyn FaultSink>) -> Self {
        self.book = Arc::new(JobBook::new(faults));
        self
    }

    /// Get the number of threads in the pool.
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Get the number of currently running jobs.
    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::Acquire)
    }

    /// Number of jobs submitted and not yet finished.
    pub fn outstanding(&self) -> usize {
        self.book.outstanding()
    }
}

impl WorkerPool for ThreadPool {
    fn submit(&self, job: Job) -> Result<JobId, PoolError> {
        if self.is_shut_down() {
            return Err(PoolError::ShutDown);
        }

        let active_tasks = self.active_tasks.clone();
        let (id, wrapped) = self.book.register(job);
        self.pool.spawn(move || {
            active_tasks.fetch_add(1, Ordering::AcqRel);
            wrapped();
            active_tasks.fetch_sub(1, Ordering::AcqRel);
        });
        Ok(id)
    }

    fn cancel(&self, id: JobId) -> bool {
        self.book.cancel(id)
    }

    fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            tracing::debug!(target: "horizon_grid_core::pool", "worker pool shut down");
        }
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn is_idle(&self) -> bool {
        self.book.is_idle()
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        self.book.wait_idle(timeout)
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("num_threads", &self.num_threads())
            .field("active_tasks", &self.active_tasks())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Runs every job on the submitting thread before `submit` returns.
///
/// Jobs submitted by a running job run nested, immediately.
#[derive(Default)]
pub struct InlinePool {
    book: Arc<JobBook>,
    shut_down: AtomicBool,
}

impl InlinePool {
    /// Create an inline pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report job panics to `faults` instead of the process-wide sink.
    pub fn with_fault_sink(mut self, faults: Arc<dyn FaultSink>) -> Self {
        self.book = Arc::new(JobBook::new(faults));
        self
    }
}

impl WorkerPool for InlinePool {
    fn submit(&self, job: Job) -> Result<JobId, PoolError> {
        if self.is_shut_down() {
            return Err(PoolError::ShutDown);
        }
        let (id, wrapped) = self.book.register(job);
        wrapped();
        Ok(id)
    }

    fn cancel(&self, id: JobId) -> bool {
        self.book.cancel(id)
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn is_idle(&self) -> bool {
        self.book.is_idle()
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        self.book.wait_idle(timeout)
    }
}

impl std::fmt::Debug for InlinePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InlinePool")
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Holds jobs until the owner runs them.
///
/// Jobs run in submission order on whichever thread calls
/// [`run_pending`](Self::run_pending), [`run_one`](Self::run_one) or
/// [`wait_idle`](WorkerPool::wait_idle).
#[derive(Default)]
pub struct DeferredPool {
    book: Arc<JobBook>,
    queue: Mutex<VecDeque<Job>>,
    shut_down: AtomicBool,
}

impl DeferredPool {
    /// Create an empty deferred pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report job panics to `faults` instead of the process-wide sink.
    pub fn with_fault_sink(mut self, faults: Arc<dyn FaultSink>) -> Self {
        self.book = Arc::new(JobBook::new(faults));
        self
    }

    /// Number of jobs waiting to run, cancelled ones included.
    pub fn queued(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run the oldest queued job. Returns `false` if nothing was queued.
    pub fn run_one(&self) -> bool {
        let job = self.queue.lock().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run queued jobs, including ones they submit, until the queue is
    /// empty. Returns how many jobs were taken off the queue.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }
}

impl WorkerPool for DeferredPool {
    fn submit(&self, job: Job) -> Result<JobId, PoolError> {
        if self.is_shut_down() {
            return Err(PoolError::ShutDown);
        }
        let (id, wrapped) = self.book.register(job);
        self.queue.lock().push_back(wrapped);
        Ok(id)
    }

    fn cancel(&self, id: JobId) -> bool {
        self.book.cancel(id)
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn is_idle(&self) -> bool {
        self.book.is_idle()
    }

    /// Drains the queue on the calling thread.
    fn wait_idle(&self, _timeout: Duration) -> bool {
        self.run_pending();
        self.book.is_idle()
    }
}

impl std::fmt::Debug for DeferredPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredPool")
            .field("queued", &self.queued())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::CollectingFaultSink;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn test_thread_pool_runs_jobs() {
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(4)).unwrap();
        let counter = Arc::new(AtomicI32::new(0));

        for _ in 0..10 {
            let counter = counter.clone();
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.num_threads(), 4);
    }

    #[test]
    fn test_thread_pool_waits_for_nested_jobs() {
        let pool = Arc::new(ThreadPool::new(ThreadPoolConfig::with_threads(2)).unwrap());
        let counter = Arc::new(AtomicI32::new(0));

        let inner_pool = pool.clone();
        let inner_counter = counter.clone();
        pool.submit(Box::new(move || {
            let counter = inner_counter.clone();
            inner_pool
                .submit(Box::new(move || {
                    std::thread::sleep(Duration::from_millis(20));
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
            inner_counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_job_does_not_wedge_pool() {
        let faults = Arc::new(CollectingFaultSink::new());
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(1))
            .unwrap()
            .with_fault_sink(faults.clone());
        pool.submit(Box::new(|| panic!("job failure"))).unwrap();

        let counter = Arc::new(AtomicI32::new(0));
        let c = counter.clone();
        pool.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(faults.count(FaultKind::JobPanic), 1);
        assert_eq!(faults.faults()[0].message, "job failure");
    }

    #[test]
    fn test_inline_job_panic_is_reported() {
        let faults = Arc::new(CollectingFaultSink::new());
        let pool = InlinePool::new().with_fault_sink(faults.clone());
        pool.submit(Box::new(|| panic!("inline failure"))).unwrap();

        assert!(pool.is_idle());
        assert_eq!(faults.count(FaultKind::JobPanic), 1);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(1)).unwrap();
        pool.shutdown();
        assert!(pool.is_shut_down());
        assert_eq!(pool.submit(Box::new(|| {})).unwrap_err(), PoolError::ShutDown);

        let inline = InlinePool::new();
        inline.shutdown();
        assert_eq!(inline.submit(Box::new(|| {})).unwrap_err(), PoolError::ShutDown);
    }

    #[test]
    fn test_inline_pool_runs_immediately() {
        let pool = InlinePool::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c = counter.clone();
        let id = pool
            .submit(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(pool.is_idle());
        assert!(!pool.cancel(id));
    }

    #[test]
    fn test_deferred_pool_runs_in_order() {
        let pool = Arc::new(DeferredPool::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            pool.submit(Box::new(move || order.lock().push(i))).unwrap();
        }
        assert_eq!(pool.queued(), 3);
        assert!(!pool.is_idle());
        assert!(order.lock().is_empty());

        assert_eq!(pool.run_pending(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert!(pool.is_idle());
    }

    #[test]
    fn test_deferred_pool_cancel() {
        let pool = DeferredPool::new();
        let counter = Arc::new(AtomicI32::new(0));
        let c = counter.clone();
        let id = pool
            .submit(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        assert!(pool.cancel(id));
        assert!(!pool.cancel(id));
        assert!(pool.wait_idle(Duration::ZERO));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wait_idle_times_out() {
        let pool = ThreadPool::new(ThreadPoolConfig::with_threads(1)).unwrap();
        let release = Arc::new(AtomicBool::new(false));
        let r = release.clone();
        pool.submit(Box::new(move || {
            while !r.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
        }))
        .unwrap();

        assert!(!pool.wait_idle(Duration::from_millis(20)));
        release.store(true, Ordering::SeqCst);
        assert!(pool.wait_idle(Duration::from_secs(5)));
    }
}
