//! Run summaries.

use crate::Strategy;
use pdes_core::SimTime;
use std::fmt;
use std::time::Duration;

/// Summary of one call to [`run_until`](crate::LogicalProcess::run_until).
///
/// Counts cover only the run that produced the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub strategy: Strategy,
    /// Clock value when the run ended. Always the horizon on success.
    pub final_time: SimTime,
    /// Distinct timestamps dispatched.
    pub ticks: u64,
    pub events_executed: u64,
    /// Events reached by the clock but skipped because they were cancelled.
    pub events_cancelled: u64,
    /// Events left at or beyond the horizon.
    pub events_pending: usize,
    /// Wall-clock duration.
    pub elapsed: Duration,
}

impl RunReport {
    /// Executed events per wall-clock second.
    pub fn events_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.events_executed as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<10} {} ticks={} executed={} cancelled={} pending={} elapsed={:.3?}",
            self.strategy.name(),
            self.final_time,
            self.ticks,
            self.events_executed,
            self.events_cancelled,
            self.events_pending,
            self.elapsed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_rate() {
        let report = RunReport {
            strategy: Strategy::Quick,
            final_time: SimTime::new(20),
            ticks: 2,
            events_executed: 3,
            events_cancelled: 0,
            events_pending: 1,
            elapsed: Duration::from_millis(500),
        };
        let text = report.to_string();
        assert!(text.starts_with("quick"));
        assert!(text.contains("t=20"));
        assert!(text.contains("executed=3"));
        assert!((report.events_per_sec() - 6.0).abs() < 1e-9);
    }
}
