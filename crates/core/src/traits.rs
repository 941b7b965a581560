//! Seams between the kernel and application code.

use crate::{Event, EventHandle, KernelError, SimTime};

/// The kernel's event-submission interface.
///
/// Handed to every event action and clock observer. All submissions pass the
/// causality gate:
///
/// - `time < now()`: rejected with [`KernelError::CausalityViolation`]
/// - `time == now()`: runs in the current tick, never inline
/// - `time > now()`: queued for a later tick
pub trait Scheduler: Send + Sync {
    /// Current local virtual time.
    fn now(&self) -> SimTime;

    /// Submit an event through the causality gate.
    fn submit(&self, event: Event) -> Result<EventHandle, KernelError>;
}

impl dyn Scheduler + '_ {
    /// Schedule `action` to run at `time`.
    pub fn schedule<F>(&self, time: SimTime, action: F) -> Result<EventHandle, KernelError>
    where
        F: FnOnce(&dyn Scheduler) + Send + 'static,
    {
        self.submit(Event::new(time, action))
    }

    /// Schedule `action` to run `delay` ticks from now.
    pub fn schedule_in<F>(&self, delay: u64, action: F) -> Result<EventHandle, KernelError>
    where
        F: FnOnce(&dyn Scheduler) + Send + 'static,
    {
        let time = self.now().after(delay);
        self.submit(Event::new(time, action))
    }
}

/// Notified by the kernel whenever the clock advances.
///
/// Observers run synchronously on the thread that advances the clock, once
/// per tick, after LVT is updated and before the tick's events dispatch. No
/// event is executing while an observer runs, so observers may read
/// application state without synchronizing against events.
pub trait ClockObserver: Send + Sync {
    /// The clock moved to `now`. Events scheduled here at `now` join the tick.
    fn on_clock_change(&self, now: SimTime, scheduler: &dyn Scheduler);

    /// The run finished with the clock at `final_time`.
    fn on_run_complete(&self, _final_time: SimTime) {}
}

/// Adapts a closure into a [`ClockObserver`].
pub struct FnObserver<F>(pub F);

impl<F> ClockObserver for FnObserver<F>
where
    F: Fn(SimTime, &dyn Scheduler) + Send + Sync,
{
    fn on_clock_change(&self, now: SimTime, scheduler: &dyn Scheduler) {
        (self.0)(now, scheduler)
    }
}
