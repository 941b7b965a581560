//! Running the cohort under one or more strategies.

use crate::cohort::{Cohort, StateCounts, Transition};
use crate::snapshot::{Snapshot, SnapshotObserver};
use crate::{LoadError, SimulatorConfig};
use pdes_kernel::{ConfigError, KernelConfig, KernelError, LogicalProcess, RunReport, Strategy};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("kernel configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid workload: {0}")]
    Workload(String),

    #[error("run failed: {0}")]
    Kernel(#[from] KernelError),
}

/// What one run produced.
#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    pub report: RunReport,
    /// Sorted.
    pub transitions: Vec<Transition>,
    pub snapshots: Vec<Snapshot>,
    pub counts: StateCounts,
}

impl SimulationOutcome {
    /// Same transitions and same per-tick populations.
    pub fn same_history(&self, other: &SimulationOutcome) -> bool {
        self.transitions == other.transitions && self.snapshots == other.snapshots
    }

    /// Transitions present in exactly one of the two outcomes.
    pub fn divergence(&self, other: &SimulationOutcome) -> usize {
        let mut a = self.transitions.iter().peekable();
        let mut b = other.transitions.iter().peekable();
        let mut differing = 0;
        loop {
            match (a.peek(), b.peek()) {
                (Some(x), Some(y)) if x == y => {
                    a.next();
                    b.next();
                }
                (Some(x), Some(y)) if x < y => {
                    differing += 1;
                    a.next();
                }
                (Some(_), Some(_)) => {
                    differing += 1;
                    b.next();
                }
                (Some(_), None) => {
                    differing += 1;
                    a.next();
                }
                (None, Some(_)) => {
                    differing += 1;
                    b.next();
                }
                (None, None) => return differing,
            }
        }
    }
}

/// A strategy's run checked against the sequential baseline.
#[derive(Debug, Clone)]
pub struct Verification {
    pub candidate: SimulationOutcome,
    pub baseline: SimulationOutcome,
}

impl Verification {
    pub fn is_equivalent(&self) -> bool {
        self.candidate.same_history(&self.baseline)
    }

    /// Candidate wall time relative to the baseline; above 1.0 is faster.
    pub fn speedup(&self) -> f64 {
        let candidate = self.candidate.report.elapsed.as_secs_f64();
        if candidate > 0.0 {
            self.baseline.report.elapsed.as_secs_f64() / candidate
        } else {
            0.0
        }
    }
}

/// Runs the configured cohort workload.
#[derive(Debug, Clone)]
pub struct Simulator {
    config: SimulatorConfig,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Result<Self, SimulatorError> {
        config.kernel.validate()?;
        config
            .workload
            .validate()
            .map_err(SimulatorError::Workload)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn run(&self) -> Result<SimulationOutcome, SimulatorError> {
        self.run_with(self.config.kernel.clone())
    }

    /// Run the workload on a fresh kernel built from `kernel`.
    #[instrument(skip_all, fields(strategy = %kernel.strategy, workers = kernel.workers))]
    pub fn run_with(&self, kernel: KernelConfig) -> Result<SimulationOutcome, SimulatorError> {
        let process = LogicalProcess::new(kernel)?;
        let cohort = Cohort::new(self.config.workload.clone());
        let observer = SnapshotObserver::new(cohort.clone());
        process.add_observer(observer.clone());

        let seeded = cohort.seed(&process)?;
        debug!(seeded, pending = process.pending(), "cohort seeded");

        let report = process.run()?;
        let counts = cohort.counts();
        info!(
            strategy = %report.strategy,
            executed = report.events_executed,
            ticks = report.ticks,
            %counts,
            "simulation finished"
        );

        Ok(SimulationOutcome {
            report,
            transitions: cohort.transitions(),
            snapshots: observer.snapshots(),
            counts,
        })
    }

    /// Run the configured strategy and the sequential baseline on the same
    /// workload.
    pub fn verify(&self) -> Result<Verification, SimulatorError> {
        let candidate = self.run()?;
        let baseline = self.run_with(self.baseline_config())?;
        let verification = Verification {
            candidate,
            baseline,
        };
        if !verification.is_equivalent() {
            warn!(
                strategy = %verification.candidate.report.strategy,
                differing = verification.candidate.divergence(&verification.baseline),
                "strategy diverged from sequential baseline"
            );
        }
        Ok(verification)
    }

    /// Run every strategy, each verified against one shared baseline.
    ///
    /// Parallel strategies use at least two workers so that none of them
    /// collapses into the sequential one.
    pub fn compare(&self) -> Result<Vec<Verification>, SimulatorError> {
        let baseline = self.run_with(self.baseline_config())?;
        let workers = self.config.kernel.resolved_workers().max(2);

        let mut results = Vec::with_capacity(Strategy::ALL.len());
        for strategy in Strategy::ALL {
            let config = match strategy {
                Strategy::Sequential => self.baseline_config(),
                Strategy::Bunch => KernelConfig {
                    strategy,
                    workers,
                    bunch_size: self.config.kernel.bunch_size.max(2),
                    ..self.config.kernel.clone()
                },
                _ => KernelConfig {
                    strategy,
                    workers,
                    ..self.config.kernel.clone()
                },
            };
            let candidate = self.run_with(config)?;
            results.push(Verification {
                candidate,
                baseline: baseline.clone(),
            });
        }
        Ok(results)
    }

    fn baseline_config(&self) -> KernelConfig {
        KernelConfig {
            strategy: Strategy::Sequential,
            workers: 1,
            permits: 0,
            ..self.config.kernel.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkloadConfig;
    use pdes_kernel::SimTime;
    use tracing_test::traced_test;

    fn config(strategy: Strategy) -> SimulatorConfig {
        SimulatorConfig {
            kernel: KernelConfig::builder()
                .strategy(strategy)
                .workers(3)
                .horizon(60)
                .bunch_size(4)
                .build_unchecked(),
            workload: WorkloadConfig {
                patients: 150,
                seed: 9,
                ..WorkloadConfig::default()
            },
        }
    }

    #[traced_test]
    #[test]
    fn test_every_strategy_matches_baseline() {
        let simulator = Simulator::new(config(Strategy::Standard)).unwrap();
        let results = simulator.compare().unwrap();
        assert_eq!(results.len(), Strategy::ALL.len());
        for verification in &results {
            let strategy = verification.candidate.report.strategy;
            assert!(verification.is_equivalent(), "{strategy}");
            assert_eq!(verification.candidate.divergence(&verification.baseline), 0);
            assert_eq!(verification.candidate.report.final_time, SimTime::new(60));
        }
    }

    #[traced_test]
    #[test]
    fn test_verify_configured_strategy() {
        let simulator = Simulator::new(config(Strategy::Buffered)).unwrap();
        let verification = simulator.verify().unwrap();
        assert!(verification.is_equivalent());
        assert_eq!(verification.candidate.report.strategy, Strategy::Buffered);
        assert_eq!(verification.baseline.report.strategy, Strategy::Sequential);
        assert_eq!(verification.candidate.counts.total(), 150);
    }

    #[test]
    fn test_invalid_workload_is_rejected() {
        let mut config = config(Strategy::Quick);
        config.workload.max_delay = 0;
        assert!(matches!(
            Simulator::new(config),
            Err(SimulatorError::Workload(_))
        ));
    }

    #[test]
    fn test_divergence_counts_symmetric_difference() {
        let simulator = Simulator::new(config(Strategy::Sequential)).unwrap();
        let outcome = simulator.run().unwrap();
        let mut other = outcome.clone();
        assert_eq!(outcome.divergence(&other), 0);

        other.transitions.pop();
        assert_eq!(outcome.divergence(&other), 1);
        assert!(!outcome.same_history(&other));
    }
}
