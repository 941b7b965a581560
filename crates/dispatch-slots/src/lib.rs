//! Double-buffered slot dispatch.
//!
//! [`SlotDispatch`] owns a fixed set of dedicated worker threads. Each worker
//! has one input slot made of two buffers: producers append to the intake
//! buffer while the worker drains the buffer it swapped out on its previous
//! poll. An idle worker spin-waits on its slot with the configured
//! [`WaitStrategy`] and parks briefly once the wait has gone on for long
//! enough.
//!
//! Batches from the driver are split into contiguous runs, one per slot. Jobs
//! spawned by a worker while it executes go into its own slot, so same-tick
//! follow-ups stay on the core that produced them.

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use pdes_dispatch::{
    current_worker, set_current_worker, BarrierKind, Dispatch, Job, PoolId, TickBarrier,
    WaitStrategy,
};
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;
use thiserror::Error;
use tracing::instrument;

/// How long an idle worker parks before polling its slot again.
const PARK_TIMEOUT: Duration = Duration::from_millis(1);

/// Errors from slot dispatch construction.
#[derive(Debug, Error)]
pub enum SlotError {
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for [`SlotDispatch`].
#[derive(Debug, Clone)]
pub struct SlotConfig {
    /// Number of dedicated worker threads.
    pub workers: usize,

    /// How idle workers and the driver poll.
    pub wait: WaitStrategy,

    /// Polls of an empty slot before the worker starts parking.
    pub park_after: u64,

    /// Stack size for worker threads (bytes).
    pub stack_size: usize,
}

impl Default for SlotConfig {
    fn default() -> Self {
        let workers = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(4);
        Self::with_workers(workers)
    }
}

impl SlotConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            wait: WaitStrategy::default(),
            park_after: 1024,
            stack_size: 2 * 1024 * 1024,
        }
    }

    pub fn wait(mut self, wait: WaitStrategy) -> Self {
        self.wait = wait;
        self
    }

    pub fn validate(&self) -> Result<(), SlotError> {
        if self.workers == 0 {
            return Err(SlotError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.stack_size < 64 * 1024 {
            return Err(SlotError::InvalidConfig(format!(
                "stack_size {} is below the 64KiB minimum",
                self.stack_size
            )));
        }
        Ok(())
    }
}

/// One worker's input. `queued` mirrors the intake length so polling does
/// not take the lock.
#[derive(Default)]
struct Slot {
    intake: Mutex<Vec<Job>>,
    queued: AtomicUsize,
}

impl Slot {
    fn push(&self, jobs: impl IntoIterator<Item = Job>) {
        let mut intake = self.intake.lock();
        let before = intake.len();
        intake.extend(jobs);
        self.queued
            .fetch_add(intake.len() - before, Ordering::Release);
    }

    /// Swap the intake with `front`, which must be empty.
    fn swap_into(&self, front: &mut Vec<Job>) {
        let mut intake = self.intake.lock();
        std::mem::swap(&mut *intake, front);
        self.queued.store(0, Ordering::Release);
    }

    fn has_work(&self) -> bool {
        self.queued.load(Ordering::Acquire) > 0
    }
}

struct Inner {
    pool: PoolId,
    slots: Vec<CachePadded<Slot>>,
    barrier: TickBarrier,
    stop: AtomicBool,
    wait: WaitStrategy,
    park_after: u64,
}

impl Inner {
    fn run(&self, index: usize) {
        set_current_worker(self.pool, index);
        let slot = &self.slots[index];
        let mut front: Vec<Job> = Vec::new();
        let mut waiter = self.wait.waiter();

        loop {
            if slot.has_work() {
                slot.swap_into(&mut front);
                for job in front.drain(..) {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!(worker = index, "Job panicked on slot worker");
                    }
                    self.barrier.exit();
                }
                waiter = self.wait.waiter();
                continue;
            }

            if self.stop.load(Ordering::Acquire) {
                break;
            }

            if waiter.polls() >= self.park_after {
                thread::park_timeout(PARK_TIMEOUT);
            } else {
                waiter.wait();
            }
        }

        tracing::trace!(worker = index, "Slot worker stopped");
    }
}

/// Dedicated worker threads fed through double-buffered slots.
pub struct SlotDispatch {
    config: SlotConfig,
    inner: Arc<Inner>,
    threads: Vec<Thread>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
    shut_down: AtomicBool,
}

impl SlotDispatch {
    pub fn new(config: SlotConfig) -> Result<Self, SlotError> {
        config.validate()?;

        let inner = Arc::new(Inner {
            pool: PoolId::next(),
            slots: (0..config.workers)
                .map(|_| CachePadded::new(Slot::default()))
                .collect(),
            barrier: TickBarrier::new(BarrierKind::Spin(config.wait)),
            stop: AtomicBool::new(false),
            wait: config.wait,
            park_after: config.park_after,
        });

        let mut handles = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let worker = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("pdes-slot-{}", index))
                .stack_size(config.stack_size)
                .spawn(move || worker.run(index));
            match handle {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    inner.stop.store(true, Ordering::Release);
                    for handle in handles {
                        handle.thread().unpark();
                        let _ = handle.join();
                    }
                    return Err(SlotError::Spawn(e.to_string()));
                }
            }
        }

        tracing::info!(
            workers = config.workers,
            wait = config.wait.name(),
            "Slot workers initialized"
        );

        Ok(Self {
            threads: handles.iter().map(|h| h.thread().clone()).collect(),
            handles: Mutex::new(handles),
            config,
            inner,
            next: AtomicUsize::new(0),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn with_workers(workers: usize, wait: WaitStrategy) -> Result<Self, SlotError> {
        Self::new(SlotConfig::with_workers(workers).wait(wait))
    }

    pub fn config(&self) -> &SlotConfig {
        &self.config
    }

    fn push(&self, index: usize, jobs: impl IntoIterator<Item = Job>) {
        self.inner.slots[index].push(jobs);
        if current_worker(self.inner.pool) != Some(index) {
            self.threads[index].unpark();
        }
    }

    fn next_slot(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % self.inner.slots.len()
    }
}

impl Dispatch for SlotDispatch {
    fn name(&self) -> &'static str {
        "buffered"
    }

    fn workers(&self) -> usize {
        self.config.workers
    }

    fn spawn(&self, job: Job) {
        self.inner.barrier.enter(1);
        let index = current_worker(self.inner.pool).unwrap_or_else(|| self.next_slot());
        self.push(index, [job]);
    }

    #[instrument(level = "debug", skip_all, fields(jobs = jobs.len()))]
    fn spawn_batch(&self, jobs: Vec<Job>) {
        if jobs.is_empty() {
            return;
        }
        self.inner.barrier.enter(jobs.len());

        let slots = self.inner.slots.len();
        let per_slot = jobs.len().div_ceil(slots);
        let start = self.next_slot();
        let mut jobs = jobs.into_iter();
        for offset in 0..slots {
            let run: Vec<Job> = jobs.by_ref().take(per_slot).collect();
            if run.is_empty() {
                break;
            }
            self.push((start + offset) % slots, run);
        }
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

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        // A worker cannot wait for itself; stop the others and detach.
        let on_worker = current_worker(self.inner.pool).is_some();
        if !on_worker {
            self.inner.barrier.wait();
        }
        self.inner.stop.store(true, Ordering::Release);
        for thread in &self.threads {
            thread.unpark();
        }
        if on_worker {
            return;
        }
        for handle in self.handles.lock().drain(..) {
            if handle.join().is_err() {
                tracing::warn!("Slot worker exited by panic");
            }
        }
        tracing::debug!(workers = self.config.workers, "Slot workers joined");
    }
}

impl Drop for SlotDispatch {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config() {
        assert!(SlotConfig::with_workers(0).validate().is_err());
        let mut config = SlotConfig::with_workers(2);
        config.stack_size = 16;
        assert!(SlotDispatch::new(config).is_err());
    }

    #[test]
    fn test_batch_spread_over_slots() {
        let dispatch = SlotDispatch::with_workers(3, WaitStrategy::Backoff).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let jobs: Vec<Job> = (0..30)
            .map(|_| {
                let c = counter.clone();
                let s = seen.clone();
                let pool = dispatch.inner.pool;
                Box::new(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                    s.lock().push(current_worker(pool));
                }) as Job
            })
            .collect();
        dispatch.spawn_batch(jobs);
        dispatch.wait_quiescent();

        assert_eq!(counter.load(Ordering::SeqCst), 30);
        let seen = seen.lock();
        assert!(seen.iter().all(|w| matches!(w, Some(i) if *i < 3)));
        for worker in 0..3 {
            assert_eq!(seen.iter().filter(|w| **w == Some(worker)).count(), 10);
        }
    }

    #[test]
    fn test_child_job_stays_on_spawning_worker() {
        let dispatch = Arc::new(SlotDispatch::with_workers(2, WaitStrategy::Yield).unwrap());
        let workers = Arc::new(Mutex::new(Vec::new()));

        let d = dispatch.clone();
        let w = workers.clone();
        dispatch.spawn(Box::new(move || {
            w.lock().push(d.worker_index());
            let d2 = d.clone();
            let w2 = w.clone();
            d.spawn(Box::new(move || w2.lock().push(d2.worker_index())));
        }));
        dispatch.wait_quiescent();

        let workers = workers.lock();
        assert_eq!(workers.len(), 2);
        assert!(workers[0].is_some());
        assert_eq!(workers[0], workers[1]);
    }

    #[test]
    fn test_panicking_job_releases_tick() {
        let dispatch = SlotDispatch::with_workers(1, WaitStrategy::BusySpin).unwrap();
        dispatch.spawn(Box::new(|| panic!("boom")));
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        dispatch.spawn(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        dispatch.wait_quiescent();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(dispatch.is_quiescent());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let dispatch = SlotDispatch::with_workers(2, WaitStrategy::Backoff).unwrap();
        dispatch.shutdown();
        dispatch.shutdown();
        assert_eq!(dispatch.handles.lock().len(), 0);
    }
}
