//! Conservative parallel discrete-event simulation kernel.
//!
//! A [`LogicalProcess`] advances a single simulation clock (LVT) and runs
//! every event due at the current time, possibly concurrently, before the
//! clock may move again. Events can only be scheduled at or after the
//! current clock; anything earlier is a causality violation and aborts the
//! run.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     LogicalProcess                       │
//! │                                                          │
//! │  submit ──► causality gate ──┬─► t == lvt: dispatcher    │
//! │                              ├─► t >  lvt: future set    │
//! │                              │            (or worker     │
//! │                              │             buffer)       │
//! │                              └─► t <  lvt: error         │
//! │                                                          │
//! │  loop:  quiescent ─► merge buffers ─► lvt = min(t)       │
//! │           ▲          ─► observers ─► drain tick          │
//! │           └──────────── dispatch + wait ◄──┘             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The dispatcher is chosen by [`Strategy`]; the future set representation
//! by [`FutureSetKind`](pdes_core::FutureSetKind). Both are independent of
//! the loop above.

mod config;
mod process;
mod report;
mod state;
mod strategy;

pub use config::{ConfigError, KernelConfig, KernelConfigBuilder};
pub use process::LogicalProcess;
pub use report::RunReport;
pub use strategy::Strategy;

pub use pdes_core::{
    ClockObserver, Event, EventHandle, FnObserver, FutureSetKind, KernelError, Phase, Scheduler,
    SimTime,
};
pub use pdes_dispatch::WaitStrategy;
