//! Execution and clock recorders.

use parking_lot::Mutex;
use pdes_core::{ClockObserver, Scheduler, SimTime};
use std::sync::Arc;

/// One executed event: the clock it ran at and a caller-chosen label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Execution {
    pub time: SimTime,
    pub label: u64,
}

/// Thread-safe log of executed events, in completion order.
#[derive(Debug, Default)]
pub struct Recorder {
    log: Mutex<Vec<Execution>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, time: SimTime, label: u64) {
        self.log.lock().push(Execution { time, label });
    }

    pub fn len(&self) -> usize {
        self.log.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in the order they were recorded.
    pub fn entries(&self) -> Vec<Execution> {
        self.log.lock().clone()
    }

    /// Entries sorted by `(time, label)`; comparable across strategies.
    pub fn sorted(&self) -> Vec<Execution> {
        let mut entries = self.entries();
        entries.sort();
        entries
    }

    /// Labels recorded at `time`, sorted.
    pub fn labels_at(&self, time: SimTime) -> Vec<u64> {
        let mut labels: Vec<u64> = self
            .log
            .lock()
            .iter()
            .filter(|e| e.time == time)
            .map(|e| e.label)
            .collect();
        labels.sort_unstable();
        labels
    }

    /// Whether completion order never goes back in time.
    pub fn is_time_ordered(&self) -> bool {
        self.log
            .lock()
            .windows(2)
            .all(|pair| pair[0].time <= pair[1].time)
    }
}

/// Observer that logs every clock change together with how many events a
/// [`Recorder`] had seen at that moment.
#[derive(Debug, Default)]
pub struct ClockLog {
    recorder: Option<Arc<Recorder>>,
    ticks: Mutex<Vec<(SimTime, usize)>>,
    completed: Mutex<Vec<SimTime>>,
}

impl ClockLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A log that snapshots `recorder.len()` at every tick.
    pub fn watching(recorder: Arc<Recorder>) -> Arc<Self> {
        Arc::new(Self {
            recorder: Some(recorder),
            ..Self::default()
        })
    }

    /// Clock values seen, in order.
    pub fn times(&self) -> Vec<SimTime> {
        self.ticks.lock().iter().map(|(time, _)| *time).collect()
    }

    /// `(clock, events recorded before the observer ran)` per tick.
    pub fn ticks(&self) -> Vec<(SimTime, usize)> {
        self.ticks.lock().clone()
    }

    /// Final clock of every completed run.
    pub fn completed(&self) -> Vec<SimTime> {
        self.completed.lock().clone()
    }
}

impl ClockObserver for ClockLog {
    fn on_clock_change(&self, now: SimTime, _scheduler: &dyn Scheduler) {
        let seen = self.recorder.as_ref().map_or(0, |r| r.len());
        self.ticks.lock().push((now, seen));
    }

    fn on_run_complete(&self, final_time: SimTime) {
        self.completed.lock().push(final_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_orders_and_filters() {
        let recorder = Recorder::new();
        recorder.record(SimTime::new(5), 2);
        recorder.record(SimTime::new(5), 1);
        recorder.record(SimTime::new(3), 9);

        assert_eq!(recorder.len(), 3);
        assert!(!recorder.is_time_ordered());
        assert_eq!(recorder.labels_at(SimTime::new(5)), vec![1, 2]);
        assert_eq!(recorder.sorted()[0].label, 9);
    }
}
