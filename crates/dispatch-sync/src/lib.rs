//! Sequential dispatch: the single-threaded correctness baseline.
//!
//! [`SyncDispatch`] never runs a job at spawn time. Jobs are queued and run
//! one after another on the driver thread when it waits for quiescence, in
//! the order they were spawned. Jobs spawned by running jobs join the same
//! queue, so same-tick follow-ups run before the wait returns.

use parking_lot::Mutex;
use pdes_dispatch::{Dispatch, Job};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Dispatch that runs jobs on the thread calling `wait_quiescent`.
///
/// Used as the reference every concurrent strategy is compared against.
#[derive(Default)]
pub struct SyncDispatch {
    queue: Mutex<VecDeque<Job>>,
    in_flight: AtomicUsize,
}

impl SyncDispatch {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Decrements the in-flight count even if the job unwinds.
struct Finished<'a>(&'a AtomicUsize);

impl Drop for Finished<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Dispatch for SyncDispatch {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn workers(&self) -> usize {
        1
    }

    fn spawn(&self, job: Job) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.queue.lock().push_back(job);
    }

    fn spawn_batch(&self, jobs: Vec<Job>) {
        self.in_flight.fetch_add(jobs.len(), Ordering::AcqRel);
        self.queue.lock().extend(jobs);
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn wait_quiescent(&self) {
        loop {
            // Lock released before the job runs: jobs spawn into this queue.
            let job = self.queue.lock().pop_front();
            match job {
                Some(job) => {
                    let _finished = Finished(&self.in_flight);
                    job();
                }
                None => break,
            }
        }
    }

    fn worker_index(&self) -> Option<usize> {
        None
    }

    fn shutdown(&self) {
        self.wait_quiescent();
    }
}
