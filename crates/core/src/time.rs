//! Simulation time.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A point on the simulation clock.
///
/// Simulation time is an integer tick count with no relation to wall-clock
/// time. The kernel's local virtual time (LVT) and every event timestamp are
/// expressed in `SimTime`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimTime(u64);

impl SimTime {
    /// The zero point of simulation time.
    pub const ZERO: SimTime = SimTime(0);

    /// The largest representable time.
    pub const MAX: SimTime = SimTime(u64::MAX);

    #[inline]
    pub const fn new(ticks: u64) -> Self {
        SimTime(ticks)
    }

    #[inline]
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Time `delay` ticks after `self`, saturating at [`SimTime::MAX`].
    #[inline]
    pub fn after(self, delay: u64) -> SimTime {
        SimTime(self.0.saturating_add(delay))
    }

    /// Ticks elapsed since `earlier`, or `None` if `earlier` is in the future.
    #[inline]
    pub fn since(self, earlier: SimTime) -> Option<u64> {
        self.0.checked_sub(earlier.0)
    }
}

impl From<u64> for SimTime {
    fn from(ticks: u64) -> Self {
        SimTime(ticks)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(SimTime::new(3) < SimTime::new(4));
        assert_eq!(SimTime::ZERO, SimTime::new(0));
    }

    #[test]
    fn test_after_saturates() {
        assert_eq!(SimTime::new(10).after(5), SimTime::new(15));
        assert_eq!(SimTime::MAX.after(1), SimTime::MAX);
    }

    #[test]
    fn test_since() {
        assert_eq!(SimTime::new(30).since(SimTime::new(10)), Some(20));
        assert_eq!(SimTime::new(10).since(SimTime::new(30)), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(SimTime::new(42).to_string(), "t=42");
    }
}
