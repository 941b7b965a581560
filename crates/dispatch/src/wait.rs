//! Busy-wait policies for spinning barriers and slots.

use crossbeam::utils::Backoff;
use serde::Deserialize;

/// How a spinning waiter burns time between polls.
///
/// `BusySpin` is the raw `while counter > 0 {}` loop with only a CPU spin
/// hint: lowest wake-up latency, one core pinned at 100% per waiter. The
/// other policies give the core back progressively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Spin with `std::hint::spin_loop` only.
    BusySpin,
    /// Yield the thread to the OS scheduler on every poll.
    Yield,
    /// Exponential spin backoff, then yield once backoff saturates.
    #[default]
    Backoff,
}

impl WaitStrategy {
    /// A fresh waiter for one wait episode.
    pub fn waiter(self) -> Waiter {
        Waiter {
            strategy: self,
            backoff: Backoff::new(),
            polls: 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WaitStrategy::BusySpin => "busy_spin",
            WaitStrategy::Yield => "yield",
            WaitStrategy::Backoff => "backoff",
        }
    }
}

impl std::str::FromStr for WaitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "busy_spin" | "busy-spin" | "spin" => Ok(WaitStrategy::BusySpin),
            "yield" => Ok(WaitStrategy::Yield),
            "backoff" => Ok(WaitStrategy::Backoff),
            other => Err(format!("unknown wait strategy: {other}")),
        }
    }
}

/// Stateful helper for one spin-wait loop.
///
/// ```
/// use pdes_dispatch::WaitStrategy;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let counter = AtomicUsize::new(0);
/// let mut waiter = WaitStrategy::Backoff.waiter();
/// while counter.load(Ordering::Acquire) > 0 {
///     waiter.wait();
/// }
/// ```
#[derive(Debug)]
pub struct Waiter {
    strategy: WaitStrategy,
    backoff: Backoff,
    polls: u64,
}

impl Waiter {
    #[inline]
    pub fn wait(&mut self) {
        self.polls += 1;
        match self.strategy {
            WaitStrategy::BusySpin => std::hint::spin_loop(),
            WaitStrategy::Yield => std::thread::yield_now(),
            WaitStrategy::Backoff => {
                if self.backoff.is_completed() {
                    std::thread::yield_now();
                } else {
                    self.backoff.snooze();
                }
            }
        }
    }

    /// Number of polls made so far.
    pub fn polls(&self) -> u64 {
        self.polls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waiter_counts_polls() {
        for strategy in [
            WaitStrategy::BusySpin,
            WaitStrategy::Yield,
            WaitStrategy::Backoff,
        ] {
            let mut waiter = strategy.waiter();
            for _ in 0..50 {
                waiter.wait();
            }
            assert_eq!(waiter.polls(), 50);
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!("spin".parse::<WaitStrategy>(), Ok(WaitStrategy::BusySpin));
        assert_eq!("yield".parse::<WaitStrategy>(), Ok(WaitStrategy::Yield));
        assert!("sleep".parse::<WaitStrategy>().is_err());
    }
}
