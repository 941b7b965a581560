//! Worker identity for dispatchers that own their threads.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Cell<Option<(PoolId, usize)>> = const { Cell::new(None) };
}

/// Distinguishes worker threads of different dispatchers in one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u64);

impl PoolId {
    pub fn next() -> Self {
        PoolId(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Record that the calling thread is worker `index` of `pool`.
pub fn set_current_worker(pool: PoolId, index: usize) {
    CURRENT.with(|current| current.set(Some((pool, index))));
}

/// Index of the calling thread if it is a worker of `pool`.
pub fn current_worker(pool: PoolId) -> Option<usize> {
    CURRENT.with(|current| match current.get() {
        Some((id, index)) if id == pool => Some(index),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_identity_is_per_pool() {
        let a = PoolId::next();
        let b = PoolId::next();
        std::thread::spawn(move || {
            assert_eq!(current_worker(a), None);
            set_current_worker(a, 3);
            assert_eq!(current_worker(a), Some(3));
            assert_eq!(current_worker(b), None);
        })
        .join()
        .unwrap();
        assert_eq!(current_worker(a), None);
    }
}
