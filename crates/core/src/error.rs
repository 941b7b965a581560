//! Kernel error taxonomy.

use crate::SimTime;
use thiserror::Error;

/// Errors surfaced by the kernel to submitters and to the caller of `run`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    /// An event was submitted with a timestamp earlier than the current clock.
    ///
    /// Retroactive events invalidate every result produced so far, so the
    /// run is aborted rather than the event dropped.
    #[error("causal restriction broken: event at {event_time} submitted while lvt is {lvt}")]
    CausalityViolation { event_time: SimTime, lvt: SimTime },

    /// An event action panicked while executing.
    #[error("event at {time} panicked: {message}")]
    EventPanicked { time: SimTime, message: String },

    /// `run_until` was asked to stop at a time the clock has already passed.
    #[error("horizon {horizon} is behind the clock at {lvt}")]
    HorizonBehindClock { horizon: SimTime, lvt: SimTime },

    /// `run` was called while another run is in progress.
    #[error("kernel is already running")]
    AlreadyRunning,

    /// The kernel faulted in an earlier run and cannot continue.
    #[error("kernel faulted in a previous run: {0}")]
    Faulted(Box<KernelError>),
}

impl KernelError {
    /// Whether this error is a causality violation.
    pub fn is_causality_violation(&self) -> bool {
        matches!(self, KernelError::CausalityViolation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_causality_message_reports_both_times() {
        let err = KernelError::CausalityViolation {
            event_time: SimTime::new(3),
            lvt: SimTime::new(7),
        };
        let msg = err.to_string();
        assert!(msg.contains("causal restriction broken"));
        assert!(msg.contains("t=3"));
        assert!(msg.contains("t=7"));
        assert!(err.is_causality_violation());
    }
}
