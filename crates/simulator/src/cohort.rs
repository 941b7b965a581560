//! Synthetic cohort workload.
//!
//! Each patient is a chain of events: at most one transition of a given
//! patient is pending at a time, and the patient's random stream travels
//! with the chain. Which worker runs an event therefore never changes what
//! the patient draws, and every strategy produces the same transitions.
//!
//! ```text
//!   Well ──check──► Well          (after 1..=max_delay)
//!   Well ──check──► Sick
//!   Sick ─────────► Recovered     (cancels the pending death deadline)
//!   Sick ─────────► Deceased
//!   Recovered ────► Well          (relapse)
//! ```

use crate::WorkloadConfig;
use parking_lot::Mutex;
use pdes_kernel::{KernelError, LogicalProcess, Scheduler, SimTime};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Health {
    Well,
    Sick,
    Recovered,
    Deceased,
}

impl Health {
    pub const ALL: [Health; 4] = [
        Health::Well,
        Health::Sick,
        Health::Recovered,
        Health::Deceased,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Health::Well => "well",
            Health::Sick => "sick",
            Health::Recovered => "recovered",
            Health::Deceased => "deceased",
        }
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Transition {
    pub time: SimTime,
    pub patient: u64,
    pub to: Health,
}

/// Patients per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub well: usize,
    pub sick: usize,
    pub recovered: usize,
    pub deceased: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.well + self.sick + self.recovered + self.deceased
    }
}

impl fmt::Display for StateCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "well={} sick={} recovered={} deceased={}",
            self.well, self.sick, self.recovered, self.deceased
        )
    }
}

struct Patient {
    id: u64,
    rng: ChaCha8Rng,
}

impl Patient {
    fn new(seed: u64, id: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(id);
        Self { id, rng }
    }

    fn delay(&mut self, max_delay: u64) -> u64 {
        self.rng.gen_range(1..=max_delay)
    }
}

/// Shared state of a running cohort.
pub struct Cohort {
    config: WorkloadConfig,
    counts: [AtomicUsize; 4],
    log: Mutex<Vec<Transition>>,
}

impl Cohort {
    pub fn new(config: WorkloadConfig) -> Arc<Self> {
        let counts = [
            AtomicUsize::new(config.patients),
            AtomicUsize::new(0),
            AtomicUsize::new(0),
            AtomicUsize::new(0),
        ];
        Arc::new(Self {
            config,
            counts,
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// Current population per state.
    pub fn counts(&self) -> StateCounts {
        let load = |health: Health| self.counts[health.index()].load(Ordering::Acquire);
        StateCounts {
            well: load(Health::Well),
            sick: load(Health::Sick),
            recovered: load(Health::Recovered),
            deceased: load(Health::Deceased),
        }
    }

    /// Every transition so far, sorted.
    pub fn transitions(&self) -> Vec<Transition> {
        let mut transitions = self.log.lock().clone();
        transitions.sort_unstable();
        transitions
    }

    /// Schedule each patient's first check, starting at the kernel's clock.
    ///
    /// Returns the number of patients seeded.
    pub fn seed(self: &Arc<Self>, kernel: &LogicalProcess) -> Result<usize, KernelError> {
        let start = kernel.now();
        for id in 0..self.config.patients as u64 {
            let mut patient = Patient::new(self.config.seed, id);
            let offset = patient.rng.gen_range(0..self.config.max_delay);
            let cohort = Arc::clone(self);
            kernel.schedule(start.after(offset), move |s| cohort.check(patient, s))?;
        }
        Ok(self.config.patients)
    }

    fn enter(&self, patient: u64, from: Health, to: Health, time: SimTime) {
        self.counts[from.index()].fetch_sub(1, Ordering::AcqRel);
        self.counts[to.index()].fetch_add(1, Ordering::AcqRel);
        self.log.lock().push(Transition { time, patient, to });
    }

    fn check(self: &Arc<Self>, mut patient: Patient, s: &dyn Scheduler) {
        if patient.rng.gen_bool(self.config.sick_probability) {
            self.enter(patient.id, Health::Well, Health::Sick, s.now());
            self.fall_sick(patient, s);
        } else {
            self.schedule_check(patient, s);
        }
    }

    fn schedule_check(self: &Arc<Self>, mut patient: Patient, s: &dyn Scheduler) {
        let delay = patient.delay(self.config.max_delay);
        let id = patient.id;
        let cohort = Arc::clone(self);
        if let Err(error) = s.schedule_in(delay, move |s| cohort.check(patient, s)) {
            warn!(patient = id, %error, "check rejected");
        }
    }

    /// A sick patient either dies at the deadline or recovers before it. A
    /// recovery cancels the deadline it beat.
    fn fall_sick(self: &Arc<Self>, mut patient: Patient, s: &dyn Scheduler) {
        let id = patient.id;
        let deadline = 1 + patient.delay(self.config.max_delay);
        let fatal = patient.rng.gen_bool(self.config.fatality);

        let cohort = Arc::clone(self);
        let death = match s.schedule_in(deadline, move |s| {
            cohort.enter(id, Health::Sick, Health::Deceased, s.now())
        }) {
            Ok(handle) => handle,
            Err(error) => {
                warn!(patient = id, %error, "deadline rejected");
                return;
            }
        };
        if fatal {
            return;
        }

        let recovery = patient.rng.gen_range(1..deadline);
        let cohort = Arc::clone(self);
        let result = s.schedule_in(recovery, move |s| {
            death.cancel();
            cohort.recover(patient, s);
        });
        if let Err(error) = result {
            warn!(patient = id, %error, "recovery rejected");
        }
    }

    fn recover(self: &Arc<Self>, mut patient: Patient, s: &dyn Scheduler) {
        self.enter(patient.id, Health::Sick, Health::Recovered, s.now());
        if !patient.rng.gen_bool(self.config.relapse) {
            return;
        }

        let id = patient.id;
        let delay = patient.delay(self.config.max_delay);
        let cohort = Arc::clone(self);
        let result = s.schedule_in(delay, move |s| {
            cohort.enter(patient.id, Health::Recovered, Health::Well, s.now());
            cohort.schedule_check(patient, s);
        });
        if let Err(error) = result {
            warn!(patient = id, %error, "relapse rejected");
        }
    }
}

impl fmt::Debug for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cohort")
            .field("patients", &self.config.patients)
            .field("counts", &self.counts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pdes_kernel::KernelConfig;

    fn workload(patients: usize) -> WorkloadConfig {
        WorkloadConfig {
            patients,
            ..WorkloadConfig::default()
        }
    }

    #[test]
    fn test_population_is_conserved() {
        let kernel = LogicalProcess::new(KernelConfig::sequential(60)).unwrap();
        let cohort = Cohort::new(workload(200));
        assert_eq!(cohort.seed(&kernel).unwrap(), 200);
        kernel.run().unwrap();

        let counts = cohort.counts();
        assert_eq!(counts.total(), 200);
        assert!(counts.sick + counts.recovered + counts.deceased > 0);
        assert!(!cohort.transitions().is_empty());
    }

    #[test]
    fn test_recoveries_cancel_deadlines() {
        let config = WorkloadConfig {
            patients: 100,
            sick_probability: 1.0,
            fatality: 0.0,
            relapse: 0.0,
            ..WorkloadConfig::default()
        };
        let kernel = LogicalProcess::new(KernelConfig::sequential(200)).unwrap();
        let cohort = Cohort::new(config);
        cohort.seed(&kernel).unwrap();
        let report = kernel.run().unwrap();

        let counts = cohort.counts();
        assert_eq!(counts.recovered, 100);
        assert_eq!(counts.deceased, 0);
        assert_eq!(report.events_cancelled, 100);
    }

    #[test]
    fn test_same_seed_same_transitions() {
        let run = || {
            let kernel = LogicalProcess::new(KernelConfig::sequential(50)).unwrap();
            let cohort = Cohort::new(workload(50));
            cohort.seed(&kernel).unwrap();
            kernel.run().unwrap();
            cohort.transitions()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_patients_draw_independent_streams() {
        let mut a = Patient::new(7, 0);
        let mut b = Patient::new(7, 1);
        let draws = |p: &mut Patient| (0..8).map(|_| p.delay(1_000)).collect::<Vec<_>>();
        assert_ne!(draws(&mut a), draws(&mut b));
    }
}
