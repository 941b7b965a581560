//! Bounded-semaphore cooperative dispatch.
//!
//! [`SemaphoreDispatch`] runs jobs on dedicated worker threads that share
//! one queue. A counting semaphore bounds how many jobs execute at once,
//! independently of the number of threads. There is no driver thread:
//! a worker that finds the queue empty and no job in flight calls the
//! installed [`IdleHook`], through which the kernel advances the clock and
//! spawns the next tick.
//!
//! Idle workers sleep on a condition variable and re-poll every
//! `idle_poll`, so a hook that lost a race for the kernel's advance lock is
//! retried without an explicit wake-up.

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use pdes_dispatch::{
    current_worker, set_current_worker, BarrierKind, Dispatch, IdleHook, Job, PoolId,
    TickBarrier,
};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// Errors from semaphore dispatch construction.
#[derive(Debug, Error)]
pub enum SemaphoreError {
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for [`SemaphoreDispatch`].
#[derive(Debug, Clone)]
pub struct SemaphoreConfig {
    /// Number of dedicated worker threads.
    pub workers: usize,

    /// Maximum number of jobs executing at the same time.
    pub permits: usize,

    /// How often an idle worker re-polls the queue and the idle hook.
    pub idle_poll: Duration,

    /// Stack size for worker threads (bytes).
    pub stack_size: usize,
}

impl Default for SemaphoreConfig {
    fn default() -> Self {
        let workers = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4);
        Self::with_workers(workers)
    }
}

impl SemaphoreConfig {
    /// `workers` threads with one permit each.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            permits: workers,
            idle_poll: Duration::from_millis(1),
            stack_size: 2 * 1024 * 1024,
        }
    }

    pub fn permits(mut self, permits: usize) -> Self {
        self.permits = permits;
        self
    }

    pub fn validate(&self) -> Result<(), SemaphoreError> {
        if self.workers == 0 {
            return Err(SemaphoreError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.permits == 0 {
            return Err(SemaphoreError::InvalidConfig(
                "permits must be at least 1".to_string(),
            ));
        }
        if self.idle_poll.is_zero() {
            return Err(SemaphoreError::InvalidConfig(
                "idle_poll must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counting semaphore.
struct Semaphore {
    available: Mutex<usize>,
    released: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Self {
            available: Mutex::new(permits),
            released: Condvar::new(),
        }
    }

    fn acquire(&self) -> Permit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
        Permit(self)
    }

    fn release(&self) {
        *self.available.lock() += 1;
        self.released.notify_one();
    }
}

struct Permit<'a>(&'a Semaphore);

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

struct Inner {
    pool: PoolId,
    queue: Mutex<VecDeque<Job>>,
    available: Condvar,
    barrier: TickBarrier,
    semaphore: Semaphore,
    idle_hook: RwLock<Option<IdleHook>>,
    stop: AtomicBool,
    idle_poll: Duration,
}

impl Inner {
    fn run(&self, index: usize) {
        set_current_worker(self.pool, index);
        while let Some(job) = self.next_job() {
            {
                let _permit = self.semaphore.acquire();
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    tracing::error!(worker = index, "Job panicked on semaphore worker");
                }
            }
            self.barrier.exit();
        }
        tracing::trace!(worker = index, "Semaphore worker stopped");
    }

    /// Block until a job is available or the dispatcher stops. Calls the
    /// idle hook whenever nothing is queued or in flight.
    fn next_job(&self) -> Option<Job> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(job) = queue.pop_front() {
                return Some(job);
            }
            if self.stop.load(Ordering::Acquire) {
                return None;
            }
            if self.barrier.count() == 0 {
                let hook = self.idle_hook.read().clone();
                if let Some(hook) = hook {
                    MutexGuard::unlocked(&mut queue, || hook());
                    if let Some(job) = queue.pop_front() {
                        return Some(job);
                    }
                }
            }
            self.available.wait_for(&mut queue, self.idle_poll);
        }
    }
}

/// Cooperative workers gated by a bounded semaphore.
pub struct SemaphoreDispatch {
    config: SemaphoreConfig,
    inner: Arc<Inner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl SemaphoreDispatch {
    pub fn new(config: SemaphoreConfig) -> Result<Self, SemaphoreError> {
        config.validate()?;

        let inner = Arc::new(Inner {
            pool: PoolId::next(),
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            barrier: TickBarrier::new(BarrierKind::Blocking),
            semaphore: Semaphore::new(config.permits),
            idle_hook: RwLock::new(None),
            stop: AtomicBool::new(false),
            idle_poll: config.idle_poll,
        });

        let mut handles = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let worker = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("pdes-dist-{}", index))
                .stack_size(config.stack_size)
                .spawn(move || worker.run(index));
            match handle {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    inner.stop.store(true, Ordering::Release);
                    inner.available.notify_all();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(SemaphoreError::Spawn(e.to_string()));
                }
            }
        }

        tracing::info!(
            workers = config.workers,
            permits = config.permits,
            "Semaphore workers initialized"
        );

        Ok(Self {
            config,
            inner,
            handles: Mutex::new(handles),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn with_workers(workers: usize, permits: usize) -> Result<Self, SemaphoreError> {
        Self::new(SemaphoreConfig::with_workers(workers).permits(permits))
    }

    pub fn config(&self) -> &SemaphoreConfig {
        &self.config
    }
}

impl Dispatch for SemaphoreDispatch {
    fn name(&self) -> &'static str {
        "dist"
    }

    fn workers(&self) -> usize {
        self.config.workers
    }

    fn spawn(&self, job: Job) {
        self.inner.barrier.enter(1);
        self.inner.queue.lock().push_back(job);
        self.inner.available.notify_one();
    }

    #[instrument(level = "debug", skip_all, fields(jobs = jobs.len()))]
    fn spawn_batch(&self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        self.inner.barrier.enter(jobs.len());
        self.inner.queue.lock().extend(jobs);
        self.inner.available.notify_all();
    }

    fn in_flight(&self) -> usize {
        self.inner.barrier.count()
    }

    fn wait_quiescent(&self) {
        self.inner.barrier.wait();
    }

    fn worker_index(&self) -> Option<usize> {
        current_worker(self.inner.pool)
    }

    fn drives_clock(&self) -> bool {
        true
    }

    fn set_idle_hook(&self, hook: IdleHook) {
        *self.inner.idle_hook.write() = Some(hook);
    }

    fn notify_idle(&self) {
        self.inner.available.notify_all();
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        // The hook usually captures the owner of this dispatcher.
        self.inner.idle_hook.write().take();

        let on_worker = current_worker(self.inner.pool).is_some();
        if !on_worker {
            self.inner.barrier.wait();
        }
        self.inner.stop.store(true, Ordering::Release);
        self.inner.available.notify_all();
        if on_worker {
            return;
        }
        for handle in self.handles.lock().drain(..) {
            if handle.join().is_err() {
                tracing::warn!("Semaphore worker exited by panic");
            }
        }
        tracing::debug!(workers = self.config.workers, "Semaphore workers joined");
    }
}

impl Drop for SemaphoreDispatch {
    fn drop(&mut self) {
        self.shutdown();
    }
}
