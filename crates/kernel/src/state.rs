//! Shared kernel state: clock, future set, causality gate and clock advance.
//!
//! Everything here is reachable from worker threads through the jobs the
//! kernel hands to its dispatcher. The driving loops in
//! [`process`](crate::process) only sequence calls into this module.

use crate::Strategy;
use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex, RwLock};
use pdes_core::{
    AtomicPhase, ClockObserver, Event, EventHandle, EventId, FutureEventSet, KernelError, Phase,
    Scheduler, SimTime,
};
use pdes_dispatch::{Dispatch, Job};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Where a submission came from. Only submissions made while the run is
/// executing can fault it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    External,
    Event,
    Observer,
}

/// Outcome of one clock advance.
pub(crate) enum Step {
    /// A tick's events were handed to the dispatcher.
    Dispatched,
    /// Nothing left before the horizon.
    Finished,
    /// An earlier tick faulted.
    Faulted(KernelError),
}

/// Monotonic counters, read as deltas per run.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub ticks: AtomicU64,
    pub executed: AtomicU64,
    pub cancelled: AtomicU64,
}

pub(crate) struct KernelState {
    pub(crate) strategy: Strategy,
    lvt: AtomicU64,
    horizon: AtomicU64,
    pub(crate) phase: AtomicPhase,
    next_sequence: AtomicU64,
    future: Mutex<Box<dyn FutureEventSet>>,
    /// One per worker when the strategy buffers worker submissions.
    buffers: Vec<CachePadded<Mutex<Vec<Event>>>>,
    pub(crate) dispatch: Box<dyn Dispatch>,
    observers: RwLock<Vec<Arc<dyn ClockObserver>>>,
    fault: Mutex<Option<KernelError>>,
    pub(crate) counters: Counters,
    pub(crate) running: AtomicBool,
    /// Set while idle workers may advance the clock.
    driving: AtomicBool,
    advancing: Mutex<()>,
    /// Result slot for runs whose clock is advanced by workers.
    outcome: Mutex<Option<Result<SimTime, KernelError>>>,
    outcome_ready: Condvar,
}

impl KernelState {
    pub(crate) fn new(
        strategy: Strategy,
        start_time: SimTime,
        future: Box<dyn FutureEventSet>,
        dispatch: Box<dyn Dispatch>,
    ) -> Self {
        let buffers = if strategy.uses_worker_buffers() {
            (0..dispatch.workers())
                .map(|_| CachePadded::new(Mutex::new(Vec::new())))
                .collect()
        } else {
            Vec::new()
        };

        Self {
            strategy,
            lvt: AtomicU64::new(start_time.ticks()),
            horizon: AtomicU64::new(start_time.ticks()),
            phase: AtomicPhase::new(Phase::Init),
            next_sequence: AtomicU64::new(1),
            future: Mutex::new(future),
            buffers,
            dispatch,
            observers: RwLock::new(Vec::new()),
            fault: Mutex::new(None),
            counters: Counters::default(),
            running: AtomicBool::new(false),
            driving: AtomicBool::new(false),
            advancing: Mutex::new(()),
            outcome: Mutex::new(None),
            outcome_ready: Condvar::new(),
        }
    }

    #[inline]
    pub(crate) fn now(&self) -> SimTime {
        SimTime::new(self.lvt.load(Ordering::Acquire))
    }

    pub(crate) fn horizon(&self) -> SimTime {
        SimTime::new(self.horizon.load(Ordering::Acquire))
    }

    pub(crate) fn set_horizon(&self, horizon: SimTime) {
        self.horizon.store(horizon.ticks(), Ordering::Release);
    }

    pub(crate) fn add_observer(&self, observer: Arc<dyn ClockObserver>) {
        self.observers.write().push(observer);
    }

    /// Events waiting in the future set and in worker buffers.
    pub(crate) fn pending(&self) -> usize {
        let buffered: usize = self.buffers.iter().map(|b| b.lock().len()).sum();
        self.future.lock().len() + buffered
    }

    pub(crate) fn fault(&self) -> Option<KernelError> {
        self.fault.lock().clone()
    }

    /// Keep the first fault of a run.
    fn record_fault(&self, error: KernelError) {
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some(error);
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Causality gate
    // ═══════════════════════════════════════════════════════════════════

    pub(crate) fn submit(
        self: &Arc<Self>,
        mut event: Event,
        origin: Origin,
    ) -> Result<EventHandle, KernelError> {
        if origin == Origin::External && self.running.load(Ordering::Acquire) {
            return self.submit_during_run(event);
        }

        let lvt = self.now();
        let time = event.time();

        if time < lvt {
            let error = KernelError::CausalityViolation {
                event_time: time,
                lvt,
            };
            pdes_metrics::record_causality_violation();
            warn!(
                event_time = time.ticks(),
                lvt = lvt.ticks(),
                origin = ?origin,
                "Rejected retroactive event"
            );
            if origin != Origin::External {
                self.record_fault(error.clone());
            }
            return Err(error);
        }

        event.assign_sequence(EventId::new(
            self.next_sequence.fetch_add(1, Ordering::Relaxed),
        ));
        let handle = event.handle();
        let dispatching = self.phase.load() == Phase::Dispatching;

        if dispatching && time == lvt {
            trace!(time = time.ticks(), id = %handle.id(), "Same-tick event dispatched");
            self.dispatch.spawn(self.job(event));
        } else if dispatching && !self.buffers.is_empty() {
            match self
                .dispatch
                .worker_index()
                .and_then(|index| self.buffers.get(index))
            {
                Some(buffer) => buffer.lock().push(event),
                None => self.future.lock().push(event),
            }
        } else {
            self.future.lock().push(event);
        }

        Ok(handle)
    }

    /// Outside submissions while a run is active never reach the dispatcher.
    /// The tick at `lvt` belongs to the run, so only later times are
    /// accepted. The check holds the future-set lock, which the clock only
    /// moves under.
    fn submit_during_run(&self, mut event: Event) -> Result<EventHandle, KernelError> {
        let mut future = self.future.lock();
        let lvt = self.now();
        let time = event.time();

        if time <= lvt {
            pdes_metrics::record_causality_violation();
            warn!(
                event_time = time.ticks(),
                lvt = lvt.ticks(),
                "Rejected outside event for a tick owned by the active run"
            );
            return Err(KernelError::CausalityViolation {
                event_time: time,
                lvt,
            });
        }

        event.assign_sequence(EventId::new(
            self.next_sequence.fetch_add(1, Ordering::Relaxed),
        ));
        let handle = event.handle();
        future.push(event);
        Ok(handle)
    }

    // ═══════════════════════════════════════════════════════════════════
    // Execution
    // ═══════════════════════════════════════════════════════════════════

    fn job(self: &Arc<Self>, event: Event) -> Job {
        let state = Arc::clone(self);
        Box::new(move || state.execute(event))
    }

    fn execute(self: &Arc<Self>, event: Event) {
        let time = event.time();
        let id = event.sequence();
        let scope = Scope {
            state: self,
            origin: Origin::Event,
        };

        match catch_unwind(AssertUnwindSafe(|| event.execute(&scope))) {
            Ok(true) => {
                self.counters.executed.fetch_add(1, Ordering::Relaxed);
                pdes_metrics::record_event_executed();
                trace!(time = time.ticks(), %id, "Event executed");
            }
            Ok(false) => {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                pdes_metrics::record_event_cancelled();
                trace!(time = time.ticks(), %id, "Cancelled event skipped");
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                pdes_metrics::record_event_panicked();
                warn!(time = time.ticks(), %id, %message, "Event action panicked");
                self.record_fault(KernelError::EventPanicked { time, message });
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Clock advance
    // ═══════════════════════════════════════════════════════════════════

    /// Move worker-buffered events into the future set. Only called while
    /// nothing is in flight.
    fn merge_buffers(&self) {
        if self.buffers.is_empty() {
            return;
        }
        let mut future = self.future.lock();
        let mut merged = 0;
        for buffer in &self.buffers {
            let events = std::mem::take(&mut *buffer.lock());
            merged += events.len();
            future.extend(events);
        }
        if merged > 0 {
            pdes_metrics::record_buffer_merge(merged);
            trace!(merged, "Merged worker buffers");
        }
    }

    /// Advance the clock to the next pending timestamp and dispatch its
    /// events. Must only be called while no event is in flight.
    pub(crate) fn advance(self: &Arc<Self>) -> Step {
        self.phase.store(Phase::Quiescent);
        if let Some(fault) = self.fault() {
            return Step::Faulted(fault);
        }

        self.merge_buffers();
        let horizon = self.horizon();
        let now = {
            let future = self.future.lock();
            match future.peek_time() {
                Some(time) if time < horizon => {
                    self.lvt.store(time.ticks(), Ordering::Release);
                    time
                }
                _ => {
                    self.lvt.fetch_max(horizon.ticks(), Ordering::AcqRel);
                    return Step::Finished;
                }
            }
        };

        self.phase.store(Phase::Advance);
        self.notify_observers(now);

        let (due, remaining) = {
            let mut future = self.future.lock();
            let due = future.drain_at(now);
            (due, future.len())
        };

        let batch = due.len();
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);
        pdes_metrics::record_tick(now.ticks(), batch);
        pdes_metrics::set_future_set_size(remaining);
        debug!(time = now.ticks(), batch, remaining, "Tick dispatched");

        let jobs: Vec<Job> = due.into_iter().map(|event| self.job(event)).collect();
        self.phase.store(Phase::Dispatching);
        self.dispatch.spawn_batch(jobs);
        Step::Dispatched
    }

    fn notify_observers(self: &Arc<Self>, now: SimTime) {
        let observers = self.observers.read().clone();
        let scope = Scope {
            state: self,
            origin: Origin::Observer,
        };
        for observer in observers {
            let notified = catch_unwind(AssertUnwindSafe(|| observer.on_clock_change(now, &scope)));
            if let Err(payload) = notified {
                let message = format!("clock observer: {}", panic_message(payload.as_ref()));
                warn!(time = now.ticks(), %message, "Clock observer panicked");
                self.record_fault(KernelError::EventPanicked { time: now, message });
            }
        }
    }

    /// Tell observers the run is over. The advance that found nothing left
    /// before the horizon has already clamped the clock to it.
    ///
    /// A panicking observer faults the run like a panicking event.
    pub(crate) fn finish(&self) -> Result<SimTime, KernelError> {
        let final_time = self.now();
        self.phase.store(Phase::Terminated);

        let observers = self.observers.read().clone();
        for observer in observers {
            let notified = catch_unwind(AssertUnwindSafe(|| observer.on_run_complete(final_time)));
            if let Err(payload) = notified {
                let message = format!("run-complete observer: {}", panic_message(payload.as_ref()));
                warn!(time = final_time.ticks(), %message, "Clock observer panicked");
                self.record_fault(KernelError::EventPanicked {
                    time: final_time,
                    message,
                });
            }
        }

        match self.fault() {
            Some(fault) => Err(fault),
            None => Ok(final_time),
        }
    }

    /// Wait for the in-flight events of the current tick.
    pub(crate) fn wait_quiescent(&self) {
        let started = Instant::now();
        self.dispatch.wait_quiescent();
        pdes_metrics::record_quiescence_wait(started.elapsed().as_secs_f64());
    }

    // ═══════════════════════════════════════════════════════════════════
    // Cooperative advance
    // ═══════════════════════════════════════════════════════════════════

    /// Idle hook for dispatchers that drive the clock. Advances only if a
    /// run is active, nothing is in flight and no other worker is advancing.
    pub(crate) fn try_advance(self: &Arc<Self>) {
        let Some(_advancing) = self.advancing.try_lock() else {
            return;
        };
        if !self.driving.load(Ordering::Acquire) || !self.dispatch.is_quiescent() {
            return;
        }

        match self.advance() {
            Step::Dispatched => {}
            Step::Finished => {
                let outcome = self.finish();
                self.complete(outcome);
            }
            Step::Faulted(error) => {
                self.phase.store(Phase::Terminated);
                self.complete(Err(error));
            }
        }
    }

    /// Hand the clock to idle workers.
    pub(crate) fn start_cooperative(&self) {
        self.phase.store(Phase::Quiescent);
        self.driving.store(true, Ordering::Release);
        self.dispatch.notify_idle();
    }

    fn complete(&self, result: Result<SimTime, KernelError>) {
        self.driving.store(false, Ordering::Release);
        *self.outcome.lock() = Some(result);
        self.outcome_ready.notify_all();
    }

    /// Block until a worker-driven run completes.
    pub(crate) fn wait_outcome(&self) -> Result<SimTime, KernelError> {
        let mut outcome = self.outcome.lock();
        loop {
            if let Some(result) = outcome.take() {
                return result;
            }
            self.outcome_ready.wait(&mut outcome);
        }
    }
}

/// The [`Scheduler`] handed to event actions and observers.
struct Scope<'a> {
    state: &'a Arc<KernelState>,
    origin: Origin,
}

impl Scheduler for Scope<'_> {
    fn now(&self) -> SimTime {
        self.state.now()
    }

    fn submit(&self, event: Event) -> Result<EventHandle, KernelError> {
        self.state.submit(event, self.origin)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
