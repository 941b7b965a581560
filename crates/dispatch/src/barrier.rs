//! In-flight counters that tell the driver when a tick is complete.

use crate::WaitStrategy;
use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Which barrier flavour a dispatcher uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierKind {
    /// Mutex-protected counter, driver sleeps on a condition variable.
    Blocking,
    /// Atomic counter, driver busy-polls with the given policy.
    Spin(WaitStrategy),
}

/// Mutex + condition variable counter.
///
/// Lowest overhead at low concurrency, but the driver sleeps and wakes on
/// every tick.
#[derive(Debug, Default)]
pub struct BlockingBarrier {
    count: Mutex<usize>,
    zero: Condvar,
}

impl BlockingBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self, n: usize) {
        *self.count.lock() += n;
    }

    fn exit(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.zero.notify_all();
        }
    }

    fn count(&self) -> usize {
        *self.count.lock()
    }

    fn wait(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.zero.wait(&mut count);
        }
    }
}

/// Atomic counter polled by the driver.
#[derive(Debug)]
pub struct SpinBarrier {
    count: CachePadded<AtomicUsize>,
    strategy: WaitStrategy,
}

impl SpinBarrier {
    pub fn new(strategy: WaitStrategy) -> Self {
        Self {
            count: CachePadded::new(AtomicUsize::new(0)),
            strategy,
        }
    }

    fn enter(&self, n: usize) {
        self.count.fetch_add(n, Ordering::AcqRel);
    }

    fn exit(&self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    fn wait(&self) {
        let mut waiter = self.strategy.waiter();
        while self.count.load(Ordering::Acquire) > 0 {
            waiter.wait();
        }
    }
}

/// Counts jobs between spawn and completion.
#[derive(Debug)]
pub enum TickBarrier {
    Blocking(BlockingBarrier),
    Spin(SpinBarrier),
}

impl TickBarrier {
    pub fn new(kind: BarrierKind) -> Self {
        match kind {
            BarrierKind::Blocking => TickBarrier::Blocking(BlockingBarrier::new()),
            BarrierKind::Spin(strategy) => TickBarrier::Spin(SpinBarrier::new(strategy)),
        }
    }

    /// Register `n` new in-flight jobs. Must happen before the jobs are
    /// visible to any worker.
    #[inline]
    pub fn enter(&self, n: usize) {
        match self {
            TickBarrier::Blocking(b) => b.enter(n),
            TickBarrier::Spin(b) => b.enter(n),
        }
    }

    /// Mark one job finished.
    #[inline]
    pub fn exit(&self) {
        match self {
            TickBarrier::Blocking(b) => b.exit(),
            TickBarrier::Spin(b) => b.exit(),
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        match self {
            TickBarrier::Blocking(b) => b.count(),
            TickBarrier::Spin(b) => b.count(),
        }
    }

    /// Return once the count reaches zero.
    pub fn wait(&self) {
        match self {
            TickBarrier::Blocking(b) => b.wait(),
            TickBarrier::Spin(b) => b.wait(),
        }
    }
}

/// Calls [`TickBarrier::exit`] when dropped, so a job that unwinds still
/// releases the tick.
pub struct CompletionGuard(Arc<TickBarrier>);

impl CompletionGuard {
    pub fn new(barrier: Arc<TickBarrier>) -> Self {
        Self(barrier)
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn kinds() -> [BarrierKind; 3] {
        [
            BarrierKind::Blocking,
            BarrierKind::Spin(WaitStrategy::BusySpin),
            BarrierKind::Spin(WaitStrategy::Backoff),
        ]
    }

    #[test]
    fn test_wait_returns_immediately_when_idle() {
        for kind in kinds() {
            let barrier = TickBarrier::new(kind);
            assert_eq!(barrier.count(), 0);
            barrier.wait();
        }
    }

    #[test]
    fn test_wait_blocks_until_all_exit() {
        for kind in kinds() {
            let barrier = Arc::new(TickBarrier::new(kind));
            barrier.enter(3);

            let handles: Vec<_> = (0..3)
                .map(|i| {
                    let guard = CompletionGuard::new(barrier.clone());
                    thread::spawn(move || {
                        thread::sleep(Duration::from_millis(5 * i));
                        drop(guard);
                    })
                })
                .collect();

            barrier.wait();
            assert_eq!(barrier.count(), 0);
            for handle in handles {
                handle.join().unwrap();
            }
        }
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let barrier = Arc::new(TickBarrier::new(BarrierKind::Blocking));
        barrier.enter(1);
        let guard = CompletionGuard::new(barrier.clone());
        let result = thread::spawn(move || {
            let _guard = guard;
            panic!("boom");
        })
        .join();
        assert!(result.is_err());
        assert_eq!(barrier.count(), 0);
    }
}
