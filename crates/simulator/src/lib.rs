//! Cohort workload harness for the PDES kernel.
//!
//! Drives a synthetic population through health states on a
//! [`LogicalProcess`](pdes_kernel::LogicalProcess), records every
//! transition, and snapshots the population at each tick. Because each
//! patient's random stream travels with its own event chain, the recorded
//! history is the same under every dispatch strategy, which makes the
//! harness a cross-check of the parallel strategies against the sequential
//! baseline.
//!
//! # Example
//!
//! ```
//! use pdes_simulator::{Simulator, SimulatorConfig};
//!
//! let config = SimulatorConfig::from_toml_str(
//!     r#"
//!     [kernel]
//!     strategy = "quick"
//!     workers = 2
//!     horizon = 40
//!
//!     [workload]
//!     patients = 50
//!     seed = 7
//!     "#,
//! )
//! .unwrap();
//!
//! let simulator = Simulator::new(config).unwrap();
//! let verification = simulator.verify().unwrap();
//! assert!(verification.is_equivalent());
//! ```

mod cohort;
mod config;
mod runner;
mod snapshot;

pub use cohort::{Cohort, Health, StateCounts, Transition};
pub use config::{LoadError, SimulatorConfig, WorkloadConfig};
pub use runner::{SimulationOutcome, Simulator, SimulatorError, Verification};
pub use snapshot::{Snapshot, SnapshotObserver};
