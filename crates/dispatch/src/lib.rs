//! Dispatch trait for executing the events of one tick across workers.
//!
//! This crate defines the [`Dispatch`] trait the kernel uses to run every
//! event due at the current clock value and to detect when they have all
//! finished. Strategies differ only in how work is handed off and how the
//! driver waits:
//!
//! - [`SyncDispatch`](https://docs.rs/pdes-dispatch-sync) runs jobs on the driver thread (baseline)
//! - [`PooledDispatch`](https://docs.rs/pdes-dispatch-pooled) uses a rayon pool with a blocking or spinning barrier
//! - [`SlotDispatch`](https://docs.rs/pdes-dispatch-slots) hands batches to dedicated threads through double-buffered slots
//! - [`SemaphoreDispatch`](https://docs.rs/pdes-dispatch-semaphore) lets idle workers advance the clock themselves
//!
//! # Barriers
//!
//! [`TickBarrier`] counts in-flight jobs. The blocking flavour sleeps on a
//! condition variable; the spinning flavour busy-polls an atomic counter
//! using a configurable [`WaitStrategy`]. Spinning trades CPU for latency
//! and is kept next to the blocking variant for benchmarking.

mod barrier;
mod wait;
mod worker;

pub use barrier::{BarrierKind, BlockingBarrier, CompletionGuard, SpinBarrier, TickBarrier};
pub use wait::{WaitStrategy, Waiter};
pub use worker::{current_worker, set_current_worker, PoolId};

use std::sync::Arc;

/// A unit of work handed to a dispatcher. Jobs never block on kernel resources.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Called by cooperative workers when they find nothing to run.
pub type IdleHook = Arc<dyn Fn() + Send + Sync + 'static>;

/// Trait for running the jobs of one tick and detecting quiescence.
///
/// # Contract
///
/// - A job counts as in flight from [`spawn`](Dispatch::spawn) until it
///   returns, so a job spawned by a running job keeps the tick open.
/// - [`spawn`](Dispatch::spawn) never runs the job inline on the caller.
/// - [`wait_quiescent`](Dispatch::wait_quiescent) returns only once the
///   in-flight count has reached zero.
/// - [`shutdown`](Dispatch::shutdown) drains in-flight jobs before stopping
///   any worker.
pub trait Dispatch: Send + Sync + 'static {
    /// Short strategy name for logs and reports.
    fn name(&self) -> &'static str;

    /// Number of workers executing jobs.
    fn workers(&self) -> usize;

    /// Queue a job for execution in the current tick.
    fn spawn(&self, job: Job);

    /// Queue several jobs at once.
    fn spawn_batch(&self, jobs: Vec<Job>) {
        for job in jobs {
            self.spawn(job);
        }
    }

    /// Jobs spawned and not yet finished.
    fn in_flight(&self) -> usize;

    fn is_quiescent(&self) -> bool {
        self.in_flight() == 0
    }

    /// Block (or spin) the calling thread until no job is in flight.
    fn wait_quiescent(&self);

    /// Index of the calling thread among this dispatcher's workers.
    ///
    /// Used by the kernel to select a worker-private event buffer.
    fn worker_index(&self) -> Option<usize>;

    /// Whether workers advance the clock themselves through the idle hook
    /// instead of a dedicated driver thread.
    fn drives_clock(&self) -> bool {
        false
    }

    /// Install the hook cooperative workers call when idle. Ignored by
    /// dispatchers that do not drive the clock.
    fn set_idle_hook(&self, _hook: IdleHook) {}

    /// Wake idle workers so they poll the idle hook.
    fn notify_idle(&self) {}

    /// Drain in-flight jobs, then stop workers. Idempotent.
    fn shutdown(&self);
}
