//! Events and their ordering keys.

use crate::{Scheduler, SimTime};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Sequence number assigned by the kernel when an event is submitted.
///
/// Strictly increasing per kernel, so it breaks ties between events that
/// share a timestamp in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(u64);

impl EventId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        EventId(raw)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E#{}", self.0)
    }
}

/// Key for ordering events in a future event set.
///
/// Events are ordered by:
/// 1. Time (earlier first)
/// 2. Sequence number (FIFO for the same time)
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct EventKey {
    /// When this event should be processed.
    pub time: SimTime,
    /// Sequence number for deterministic FIFO ordering.
    pub sequence: EventId,
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.time.cmp(&other.time) {
            Ordering::Equal => {}
            ord => return ord,
        }

        self.sequence.cmp(&other.sequence)
    }
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The work an event performs when dispatched.
///
/// Actions receive the kernel's submission interface so they can schedule
/// follow-up events. They must run to completion without blocking on
/// kernel resources.
pub type EventAction = Box<dyn FnOnce(&dyn Scheduler) + Send + 'static>;

/// Shared cancellation flag of an event.
///
/// Cancellation is advisory: it prevents the action from running if it is
/// observed before execution starts, and has no effect afterwards.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Acquire)
    }
}

/// A timestamped unit of work.
///
/// Created by application code and handed to the kernel, which owns it until
/// it is executed, skipped because it was cancelled, or the run ends.
pub struct Event {
    time: SimTime,
    sequence: EventId,
    cancel: CancelHandle,
    action: EventAction,
}

impl Event {
    /// Create an event that runs `action` at `time`.
    ///
    /// The sequence number is assigned by the kernel on submission.
    pub fn new<F>(time: SimTime, action: F) -> Self
    where
        F: FnOnce(&dyn Scheduler) + Send + 'static,
    {
        Self {
            time,
            sequence: EventId::new(0),
            cancel: CancelHandle::new(),
            action: Box::new(action),
        }
    }

    pub fn time(&self) -> SimTime {
        self.time
    }

    pub fn sequence(&self) -> EventId {
        self.sequence
    }

    pub fn key(&self) -> EventKey {
        EventKey {
            time: self.time,
            sequence: self.sequence,
        }
    }

    /// Stamp the submission sequence number. Called by the kernel's gate.
    pub fn assign_sequence(&mut self, sequence: EventId) {
        self.sequence = sequence;
    }

    /// A handle that can cancel this event, before or after submission.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Handle describing this event after submission.
    pub fn handle(&self) -> EventHandle {
        EventHandle {
            id: self.sequence,
            time: self.time,
            cancel: self.cancel.clone(),
        }
    }

    /// Run the action unless the event has been cancelled.
    ///
    /// Returns `true` if the action ran.
    pub fn execute(self, scheduler: &dyn Scheduler) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        (self.action)(scheduler);
        true
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("time", &self.time)
            .field("sequence", &self.sequence)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Returned by the kernel when an event is accepted.
#[derive(Debug, Clone)]
pub struct EventHandle {
    id: EventId,
    time: SimTime,
    cancel: CancelHandle,
}

impl EventHandle {
    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Cancel the event. No effect if it has already started executing.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
