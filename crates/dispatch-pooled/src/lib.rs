//! Rayon thread pool dispatch.
//!
//! This module provides [`PooledDispatch`], which runs tick jobs on a rayon
//! pool and detects quiescence with a [`TickBarrier`]. Three strategies are
//! built from it:
//!
//! - **Standard**: one rayon job per event, mutex + condition variable
//!   barrier. The driver sleeps while the tick runs.
//! - **Quick**: one rayon job per event, atomic barrier busy-polled by the
//!   driver.
//! - **Bunch**: events handed to rayon in chunks of `bunch_size`, atomic
//!   barrier. Amortizes per-job overhead for ticks with many tiny events.
//!
//! # Example
//!
//! ```no_run
//! use pdes_dispatch::{BarrierKind, WaitStrategy};
//! use pdes_dispatch_pooled::{PoolConfig, PooledDispatch};
//!
//! // Auto-detect cores, blocking barrier
//! let dispatch = PooledDispatch::new(PoolConfig::auto()).unwrap();
//!
//! // Or customize
//! let config = PoolConfig::builder()
//!     .threads(4)
//!     .barrier(BarrierKind::Spin(WaitStrategy::Backoff))
//!     .bunch_size(32)
//!     .build()
//!     .unwrap();
//! let dispatch = PooledDispatch::new(config).unwrap();
//! ```

use pdes_dispatch::{BarrierKind, CompletionGuard, Dispatch, Job, TickBarrier, WaitStrategy};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Errors from thread pool configuration.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Failed to build rayon thread pool: {0}")]
    RayonBuildError(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for the event worker pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of worker threads.
    pub threads: usize,

    /// How the driver waits for the tick to finish.
    pub barrier: BarrierKind,

    /// Events per rayon job. `1` submits every event as its own job.
    pub bunch_size: usize,

    /// Stack size for worker threads (bytes). Default: 2MB.
    pub stack_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::auto()
    }
}

impl PoolConfig {
    /// One worker per available core, blocking barrier, one job per event.
    pub fn auto() -> Self {
        let available = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4);

        Self::with_threads(available)
    }

    /// Blocking barrier, one job per event, `threads` workers.
    pub fn with_threads(threads: usize) -> Self {
        Self {
            threads,
            barrier: BarrierKind::Blocking,
            bunch_size: 1,
            stack_size: 2 * 1024 * 1024,
        }
    }

    /// Minimal configuration for testing (2 threads).
    pub fn minimal() -> Self {
        Self::with_threads(2)
    }

    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// Strategy name implied by the barrier and bunch size.
    pub fn strategy_name(&self) -> &'static str {
        match (self.barrier, self.bunch_size) {
            (BarrierKind::Blocking, _) => "standard",
            (BarrierKind::Spin(_), 0 | 1) => "quick",
            (BarrierKind::Spin(_), _) => "bunch",
        }
    }

    pub fn validate(&self) -> Result<(), PoolError> {
        if self.threads == 0 {
            return Err(PoolError::InvalidConfig(
                "threads must be at least 1".to_string(),
            ));
        }
        if self.bunch_size == 0 {
            return Err(PoolError::InvalidConfig(
                "bunch_size must be at least 1".to_string(),
            ));
        }
        if self.stack_size < 64 * 1024 {
            return Err(PoolError::InvalidConfig(format!(
                "stack_size {} is below the 64KiB minimum",
                self.stack_size
            )));
        }
        Ok(())
    }
}

/// Builder for PoolConfig.
#[derive(Debug, Clone)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Create a new builder with auto-detected defaults.
    pub fn new() -> Self {
        Self {
            config: PoolConfig::auto(),
        }
    }

    pub fn threads(mut self, count: usize) -> Self {
        self.config.threads = count;
        self
    }

    pub fn barrier(mut self, barrier: BarrierKind) -> Self {
        self.config.barrier = barrier;
        self
    }

    /// Spin-polling barrier with the given wait policy.
    pub fn spin(self, strategy: WaitStrategy) -> Self {
        self.barrier(BarrierKind::Spin(strategy))
    }

    pub fn bunch_size(mut self, size: usize) -> Self {
        self.config.bunch_size = size;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = size;
        self
    }

    /// Build the configuration, validating it first.
    pub fn build(self) -> Result<PoolConfig, PoolError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validation.
    pub fn build_unchecked(self) -> PoolConfig {
        self.config
    }
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Exits the barrier once per job of a bunch that has not finished, so a
/// bunch that unwinds part-way still releases the tick.
struct BunchGuard {
    barrier: Arc<TickBarrier>,
    remaining: usize,
}

impl Drop for BunchGuard {
    fn drop(&mut self) {
        for _ in 0..self.remaining {
            self.barrier.exit();
        }
    }
}

/// Rayon thread pool dispatch.
pub struct PooledDispatch {
    config: PoolConfig,
    pool: Arc<rayon::ThreadPool>,
    barrier: Arc<TickBarrier>,
    shut_down: AtomicBool,
}

impl PooledDispatch {
    /// Create a new pooled dispatch with the given configuration.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .stack_size(config.stack_size)
            .thread_name(|i| format!("pdes-worker-{}", i))
            .panic_handler(|_| {
                tracing::error!("Event job panicked outside the kernel's unwind guard");
            })
            .build()
            .map_err(|e| PoolError::RayonBuildError(e.to_string()))?;

        tracing::info!(
            threads = config.threads,
            strategy = config.strategy_name(),
            bunch_size = config.bunch_size,
            "Worker pool initialized"
        );

        Ok(Self {
            barrier: Arc::new(TickBarrier::new(config.barrier)),
            config,
            pool: Arc::new(pool),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Mutex + condition variable barrier, one job per event.
    pub fn standard(threads: usize) -> Result<Self, PoolError> {
        Self::new(PoolConfig::builder().threads(threads).build()?)
    }

    /// Spinning barrier, one job per event.
    pub fn quick(threads: usize, wait: WaitStrategy) -> Result<Self, PoolError> {
        Self::new(PoolConfig::builder().threads(threads).spin(wait).build()?)
    }

    /// Spinning barrier, `bunch_size` events per job.
    pub fn bunch(threads: usize, wait: WaitStrategy, bunch_size: usize) -> Result<Self, PoolError> {
        Self::new(
            PoolConfig::builder()
                .threads(threads)
                .spin(wait)
                .bunch_size(bunch_size)
                .build()?,
        )
    }

    /// Get the configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn spawn_bunch(&self, bunch: Vec<Job>) {
        let guard = BunchGuard {
            barrier: Arc::clone(&self.barrier),
            remaining: bunch.len(),
        };
        self.pool.spawn(move || {
            let mut guard = guard;
            for job in bunch {
                job();
                guard.remaining -= 1;
                guard.barrier.exit();
            }
        });
    }
}

impl Dispatch for PooledDispatch {
    fn name(&self) -> &'static str {
        self.config.strategy_name()
    }

    fn workers(&self) -> usize {
        self.config.threads
    }

    fn spawn(&self, job: Job) {
        self.barrier.enter(1);
        let guard = CompletionGuard::new(Arc::clone(&self.barrier));
        self.pool.spawn(move || {
            let _guard = guard;
            job();
        });
    }

    #[instrument(level = "debug", skip_all, fields(jobs = jobs.len()))]
    fn spawn_batch(&self, jobs: Vec<Job>) {
        if self.config.bunch_size <= 1 {
            for job in jobs {
                self.spawn(job);
            }
            return;
        }

        self.barrier.enter(jobs.len());
        let mut jobs = jobs.into_iter().peekable();
        while jobs.peek().is_some() {
            let bunch: Vec<Job> = jobs.by_ref().take(self.config.bunch_size).collect();
            self.spawn_bunch(bunch);
        }
    }

    fn in_flight(&self) -> usize {
        self.barrier.count()
    }

    fn wait_quiescent(&self) {
        self.barrier.wait();
    }

    fn worker_index(&self) -> Option<usize> {
        self.pool.current_thread_index()
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.barrier.wait();
        tracing::debug!(strategy = self.name(), "Worker pool drained");
    }
}

impl Drop for PooledDispatch {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_auto_config() {
        let config = PoolConfig::auto();
        assert!(config.threads >= 1);
        assert_eq!(config.strategy_name(), "standard");
        config.validate().unwrap();
    }

    #[test]
    fn test_builder() {
        let config = PoolConfig::builder()
            .threads(4)
            .spin(WaitStrategy::BusySpin)
            .bunch_size(8)
            .build()
            .unwrap();

        assert_eq!(config.threads, 4);
        assert_eq!(config.bunch_size, 8);
        assert_eq!(config.strategy_name(), "bunch");
    }

    #[test]
    fn test_invalid_config() {
        assert!(PoolConfig::builder().threads(0).build().is_err());
        assert!(PoolConfig::builder().bunch_size(0).build().is_err());
        assert!(PoolConfig::builder().stack_size(1024).build().is_err());
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(PooledDispatch::standard(2).unwrap().name(), "standard");
        assert_eq!(
            PooledDispatch::quick(2, WaitStrategy::Backoff).unwrap().name(),
            "quick"
        );
        assert_eq!(
            PooledDispatch::bunch(2, WaitStrategy::Backoff, 4)
                .unwrap()
                .name(),
            "bunch"
        );
    }

    fn run_jobs(dispatch: &PooledDispatch, count: usize) -> usize {
        let counter = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<Job> = (0..count)
            .map(|_| {
                let c = counter.clone();
                Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                }) as Job
            })
            .collect();
        dispatch.spawn_batch(jobs);
        dispatch.wait_quiescent();
        counter.load(Ordering::SeqCst)
    }

    #[test]
    fn test_wait_quiescent_sees_every_job() {
        for dispatch in [
            PooledDispatch::standard(3).unwrap(),
            PooledDispatch::quick(3, WaitStrategy::Backoff).unwrap(),
            PooledDispatch::bunch(3, WaitStrategy::BusySpin, 7).unwrap(),
        ] {
            assert_eq!(run_jobs(&dispatch, 100), 100, "{}", dispatch.name());
            assert!(dispatch.is_quiescent());
        }
    }

    #[test]
    fn test_nested_spawn_keeps_tick_open() {
        let dispatch = Arc::new(PooledDispatch::quick(2, WaitStrategy::Backoff).unwrap());
        let counter = Arc::new(AtomicUsize::new(0));

        let d = dispatch.clone();
        let c = counter.clone();
        dispatch.spawn(Box::new(move || {
            let c2 = c.clone();
            d.spawn(Box::new(move || {
                std::thread::sleep(std::time::Duration::from_millis(20));
                c2.fetch_add(1, Ordering::SeqCst);
            }));
            c.fetch_add(1, Ordering::SeqCst);
        }));

        dispatch.wait_quiescent();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_worker_index_only_inside_pool() {
        let dispatch = Arc::new(PooledDispatch::standard(2).unwrap());
        assert_eq!(dispatch.worker_index(), None);

        let seen = Arc::new(AtomicUsize::new(usize::MAX));
        let d = dispatch.clone();
        let s = seen.clone();
        dispatch.spawn(Box::new(move || {
            if let Some(index) = d.worker_index() {
                s.store(index, Ordering::SeqCst);
            }
        }));
        dispatch.wait_quiescent();
        assert!(seen.load(Ordering::SeqCst) < 2);
    }
}
