//! Driving-loop phases.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Phase of the kernel's driving loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Phase {
    /// Constructed, initial events being seeded.
    Init = 0,
    /// No event in flight; the future set may be inspected.
    Quiescent = 1,
    /// The clock is being moved and observers notified.
    Advance = 2,
    /// The current tick's events are executing.
    Dispatching = 3,
    /// The run reached its horizon or ran out of events.
    Terminated = 4,
}

impl Phase {
    fn from_u8(raw: u8) -> Phase {
        match raw {
            0 => Phase::Init,
            1 => Phase::Quiescent,
            2 => Phase::Advance,
            3 => Phase::Dispatching,
            _ => Phase::Terminated,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Quiescent => "quiescent",
            Phase::Advance => "advance",
            Phase::Dispatching => "dispatching",
            Phase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// A [`Phase`] readable from any worker thread.
#[derive(Debug)]
pub struct AtomicPhase(AtomicU8);

impl AtomicPhase {
    pub fn new(phase: Phase) -> Self {
        Self(AtomicU8::new(phase as u8))
    }

    #[inline]
    pub fn load(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, phase: Phase) {
        self.0.store(phase as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_atomic() {
        let phase = AtomicPhase::new(Phase::Init);
        for p in [
            Phase::Quiescent,
            Phase::Advance,
            Phase::Dispatching,
            Phase::Terminated,
        ] {
            phase.store(p);
            assert_eq!(phase.load(), p);
        }
    }
}
