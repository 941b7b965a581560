//! Per-tick population snapshots.

use crate::cohort::{Cohort, StateCounts};
use parking_lot::Mutex;
use pdes_kernel::{ClockObserver, Scheduler, SimTime};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub time: SimTime,
    pub counts: StateCounts,
}

/// Records the cohort's population each time the clock advances.
///
/// Observers run while no event is in flight, so each snapshot reflects
/// every transition strictly before its time and none at or after it. A
/// final snapshot is taken when the run completes.
pub struct SnapshotObserver {
    cohort: Arc<Cohort>,
    snapshots: Mutex<Vec<Snapshot>>,
}

impl SnapshotObserver {
    pub fn new(cohort: Arc<Cohort>) -> Arc<Self> {
        Arc::new(Self {
            cohort,
            snapshots: Mutex::new(Vec::new()),
        })
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.snapshots.lock().clone()
    }

    fn take(&self, time: SimTime) {
        let counts = self.cohort.counts();
        self.snapshots.lock().push(Snapshot { time, counts });
    }
}

impl ClockObserver for SnapshotObserver {
    fn on_clock_change(&self, now: SimTime, _scheduler: &dyn Scheduler) {
        self.take(now);
    }

    fn on_run_complete(&self, final_time: SimTime) {
        self.take(final_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkloadConfig;
    use pdes_kernel::{KernelConfig, LogicalProcess};

    #[test]
    fn test_one_snapshot_per_tick_plus_final() {
        let kernel = LogicalProcess::new(KernelConfig::sequential(30)).unwrap();
        let cohort = Cohort::new(WorkloadConfig {
            patients: 20,
            ..WorkloadConfig::default()
        });
        let observer = SnapshotObserver::new(cohort.clone());
        kernel.add_observer(observer.clone());
        cohort.seed(&kernel).unwrap();
        let report = kernel.run().unwrap();

        let snapshots = observer.snapshots();
        assert_eq!(snapshots.len() as u64, report.ticks + 1);
        assert!(snapshots.windows(2).all(|w| w[0].time < w[1].time));
        assert!(snapshots.iter().all(|s| s.counts.total() == 20));

        let last = snapshots.last().unwrap();
        assert_eq!(last.time, SimTime::new(30));
        assert_eq!(last.counts, cohort.counts());
    }
}
