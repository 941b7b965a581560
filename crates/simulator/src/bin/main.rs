//! PDES simulator CLI
//!
//! Runs the cohort workload on the kernel with a chosen dispatch strategy.
//!
//! # Example
//!
//! ```bash
//! # Run the quick strategy on 4 workers up to t=500
//! pdes-sim --strategy quick --workers 4 --horizon 500 --patients 10000
//!
//! # Check the configured strategy against the sequential baseline
//! pdes-sim --config sim.toml --verify
//!
//! # Time every strategy on the same workload
//! pdes-sim --compare --seed 7
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use pdes_kernel::{FutureSetKind, SimTime, Strategy, WaitStrategy};
use pdes_simulator::{SimulationOutcome, Simulator, SimulatorConfig, Verification};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// PDES Simulator
///
/// Runs a seeded cohort workload on the discrete-event kernel. Results are
/// reproducible for a given seed regardless of the strategy.
#[derive(Parser, Debug)]
#[command(name = "pdes-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML file with `[kernel]` and `[workload]` tables. Flags override it.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Dispatch strategy: sequential, standard, quick, bunch, buffered, dist
    #[arg(short = 's', long)]
    strategy: Option<Strategy>,

    /// Worker threads (0 = one per core, 1 = sequential)
    #[arg(short = 'w', long)]
    workers: Option<usize>,

    /// Simulated time to run up to
    #[arg(short = 't', long)]
    horizon: Option<u64>,

    /// Future event set: heap, tree, double_heap, double_tree
    #[arg(long)]
    future_set: Option<FutureSetKind>,

    /// Spin wait for quick, bunch and buffered: busy_spin, yield, backoff
    #[arg(long)]
    wait: Option<WaitStrategy>,

    /// Events per job for the bunch strategy
    #[arg(long)]
    bunch_size: Option<usize>,

    /// Concurrent events for the dist strategy (0 = one per worker)
    #[arg(long)]
    permits: Option<usize>,

    /// Number of patients in the cohort
    #[arg(short = 'p', long)]
    patients: Option<usize>,

    /// Random seed for reproducible results. When omitted, a random seed is used.
    #[arg(long)]
    seed: Option<u64>,

    /// Also run the sequential baseline and compare histories
    #[arg(long, conflicts_with = "compare")]
    verify: bool,

    /// Run every strategy and print wall times
    #[arg(long)]
    compare: bool,

    /// Print the last N population snapshots
    #[arg(long, default_value = "5")]
    snapshots: usize,

    /// Dump Prometheus metrics at the end
    #[arg(long)]
    metrics: bool,
}

impl Args {
    fn into_config(self) -> Result<SimulatorConfig> {
        let mut config = match &self.config {
            Some(path) => SimulatorConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => SimulatorConfig::default(),
        };

        let kernel = &mut config.kernel;
        if let Some(strategy) = self.strategy {
            kernel.strategy = strategy;
        }
        if let Some(workers) = self.workers {
            kernel.workers = workers;
        }
        if let Some(horizon) = self.horizon {
            kernel.horizon = SimTime::new(horizon);
        }
        if let Some(kind) = self.future_set {
            kernel.future_set = kind;
        }
        if let Some(wait) = self.wait {
            kernel.wait = wait;
        }
        if let Some(size) = self.bunch_size {
            kernel.bunch_size = size;
        }
        if let Some(permits) = self.permits {
            kernel.permits = permits;
        }

        let workload = &mut config.workload;
        if let Some(patients) = self.patients {
            workload.patients = patients;
        }
        workload.seed = match (self.seed, &self.config) {
            (Some(seed), _) => seed,
            (None, Some(_)) => workload.seed,
            (None, None) => rand::random(),
        };
        Ok(config)
    }
}

fn print_outcome(outcome: &SimulationOutcome, snapshots: usize) {
    println!("{}", outcome.report);
    println!("  {:.0} events/s", outcome.report.events_per_sec());
    let tail = outcome.snapshots.len().saturating_sub(snapshots);
    for snapshot in &outcome.snapshots[tail..] {
        println!("  {:>8}  {}", snapshot.time.to_string(), snapshot.counts);
    }
}

fn print_verification(verification: &Verification) {
    let candidate = &verification.candidate;
    let verdict = if verification.is_equivalent() {
        "ok".to_string()
    } else {
        format!(
            "DIVERGED ({} transitions)",
            candidate.divergence(&verification.baseline)
        )
    };
    println!(
        "{:<10} {:>10.3?} speedup={:>5.2} executed={:<8} {}",
        candidate.report.strategy.name(),
        candidate.report.elapsed,
        verification.speedup(),
        candidate.report.events_executed,
        verdict
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,pdes_kernel=info,pdes_simulator=info")),
        )
        .init();

    let args = Args::parse();
    let (verify, compare, metrics, snapshots) =
        (args.verify, args.compare, args.metrics, args.snapshots);

    if metrics {
        pdes_metrics_prometheus::install();
    } else {
        pdes_metrics_noop::install();
    }

    let config = args.into_config()?;
    info!(
        strategy = %config.kernel.strategy,
        workers = config.kernel.resolved_workers(),
        horizon = %config.kernel.horizon,
        patients = config.workload.patients,
        seed = config.workload.seed,
        "Starting simulation"
    );

    let simulator = Simulator::new(config).context("invalid configuration")?;

    let mut diverged = false;
    if compare {
        println!("=== Strategy comparison (baseline: sequential) ===");
        for verification in simulator.compare().context("comparison run failed")? {
            print_verification(&verification);
            diverged |= !verification.is_equivalent();
        }
    } else if verify {
        let verification = simulator.verify().context("verification run failed")?;
        print_outcome(&verification.candidate, snapshots);
        println!();
        print_verification(&verification);
        diverged = !verification.is_equivalent();
    } else {
        let outcome = simulator.run().context("simulation failed")?;
        print_outcome(&outcome, snapshots);
    }

    if metrics {
        let text = pdes_metrics_prometheus::gather_text()
            .map_err(anyhow::Error::msg)
            .context("encoding metrics")?;
        println!("\n=== Metrics ===\n{text}");
    }

    if diverged {
        bail!("a strategy diverged from the sequential baseline");
    }
    Ok(())
}
