//! Core types for the PDES kernel.
//!
//! This crate provides the foundational types shared by the kernel, the
//! dispatchers and application code:
//!
//! - [`SimTime`]: integer simulation time
//! - [`Event`]: a timestamped, cancellable unit of work
//! - [`FutureEventSet`]: swappable priority containers for pending events
//! - [`Scheduler`]: the causality-gated submission interface seen by events
//! - [`ClockObserver`]: notified once per tick when the clock advances
//! - [`KernelError`]: errors reported to submitters and to `run`
//!
//! # Driving loop
//!
//! ```text
//! Init → Quiescent → Advance → Dispatching → Quiescent → … → Terminated
//! ```
//!
//! The clock only moves in the `Advance` phase, which is entered only when
//! no event is in flight.

mod error;
mod event;
mod future_set;
mod phase;
mod time;
mod traits;

pub use error::KernelError;
pub use event::{CancelHandle, Event, EventAction, EventHandle, EventId, EventKey};
pub use future_set::{
    DoubleBuffered, FutureEventSet, FutureSetKind, HeapEventSet, TreeEventSet,
};
pub use phase::{AtomicPhase, Phase};
pub use time::SimTime;
pub use traits::{ClockObserver, FnObserver, Scheduler};
