//! Test helpers for the PDES kernel.
//!
//! - [`Recorder`]: thread-safe log of executed events
//! - [`ClockLog`]: observer recording every clock change
//! - [`EventGraph`]: seeded, reproducible trees of events whose expected
//!   executions can be computed without running a kernel
//! - [`strategy_configs`] / [`future_set_configs`]: configuration matrices
//!
//! # Example
//!
//! ```rust
//! use pdes_test_helpers::{strategy_configs, EventGraph, GraphConfig, Recorder};
//! use pdes_kernel::{LogicalProcess, SimTime};
//! use std::sync::Arc;
//!
//! let graph = Arc::new(EventGraph::generate(7, &GraphConfig::default()));
//! let expected = graph.expected(SimTime::new(50));
//!
//! for config in strategy_configs(2, 50) {
//!     let kernel = LogicalProcess::new(config).unwrap();
//!     let recorder = Recorder::new();
//!     graph.seed(&kernel, &recorder).unwrap();
//!     kernel.run().unwrap();
//!     assert_eq!(recorder.sorted(), expected);
//! }
//! ```

mod graph;
mod recorder;

pub use graph::{EventGraph, GraphConfig};
pub use recorder::{ClockLog, Execution, Recorder};

use pdes_kernel::{FutureSetKind, KernelConfig, Strategy, WaitStrategy};

/// One configuration per strategy with `workers` workers.
///
/// Spinning strategies use the backoff wait so tests do not pin cores.
pub fn strategy_configs(workers: usize, horizon: u64) -> Vec<KernelConfig> {
    Strategy::ALL
        .into_iter()
        .map(|strategy| config(strategy, workers, horizon))
        .collect()
}

/// One configuration per future set representation for `strategy`.
pub fn future_set_configs(strategy: Strategy, workers: usize, horizon: u64) -> Vec<KernelConfig> {
    [
        FutureSetKind::Heap,
        FutureSetKind::Tree,
        FutureSetKind::DoubleHeap,
        FutureSetKind::DoubleTree,
    ]
    .into_iter()
    .map(|kind| KernelConfig {
        future_set: kind,
        ..config(strategy, workers, horizon)
    })
    .collect()
}

fn config(strategy: Strategy, workers: usize, horizon: u64) -> KernelConfig {
    KernelConfig::builder()
        .strategy(strategy)
        .workers(workers)
        .horizon(horizon)
        .wait(WaitStrategy::Backoff)
        .bunch_size(3)
        .build_unchecked()
}
