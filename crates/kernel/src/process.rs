//! The logical process: public kernel handle and driving loops.

use crate::state::{KernelState, Origin, Step};
use crate::strategy::build_dispatch;
use crate::{ConfigError, KernelConfig, RunReport, Strategy};
use pdes_core::{
    ClockObserver, Event, EventHandle, FnObserver, KernelError, Phase, Scheduler, SimTime,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

/// A conservative discrete-event simulation kernel.
///
/// Owns the clock (LVT), the future event set and a dispatcher. Each call to
/// [`run_until`](Self::run_until) repeats:
///
/// 1. wait until no event of the current tick is in flight
/// 2. move the clock to the earliest pending timestamp
/// 3. notify clock observers
/// 4. dispatch every event due at the new clock value
///
/// until the earliest pending timestamp reaches the horizon or nothing is
/// pending. The clock then reads the horizon.
///
/// # Example
///
/// ```
/// use pdes_kernel::{KernelConfig, LogicalProcess};
/// use pdes_kernel::SimTime;
///
/// let kernel = LogicalProcess::new(KernelConfig::sequential(20)).unwrap();
/// kernel
///     .schedule(SimTime::new(5), |scheduler| {
///         scheduler.schedule_in(3, |_| {}).unwrap();
///     })
///     .unwrap();
///
/// let report = kernel.run().unwrap();
/// assert_eq!(report.events_executed, 2);
/// assert_eq!(report.final_time, SimTime::new(20));
/// ```
pub struct LogicalProcess {
    config: KernelConfig,
    state: Arc<KernelState>,
}

impl LogicalProcess {
    /// Create a kernel and start its workers.
    pub fn new(config: KernelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let strategy = config.effective_strategy();
        let dispatch = build_dispatch(&config)?;
        let state = Arc::new(KernelState::new(
            strategy,
            config.start_time,
            config.future_set.build(),
            dispatch,
        ));

        if state.dispatch.drives_clock() {
            let weak = Arc::downgrade(&state);
            state.dispatch.set_idle_hook(Arc::new(move || {
                if let Some(state) = weak.upgrade() {
                    state.try_advance();
                }
            }));
        }

        info!(
            strategy = strategy.name(),
            workers = state.dispatch.workers(),
            future_set = config.future_set.name(),
            start_time = config.start_time.ticks(),
            "Kernel created"
        );

        Ok(Self { config, state })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// The strategy in use (sequential when configured with one worker).
    pub fn strategy(&self) -> Strategy {
        self.state.strategy
    }

    /// Current local virtual time.
    pub fn now(&self) -> SimTime {
        self.state.now()
    }

    pub fn phase(&self) -> Phase {
        self.state.phase.load()
    }

    /// Events submitted and not yet dispatched.
    pub fn pending(&self) -> usize {
        self.state.pending()
    }

    /// Register an observer notified once per tick.
    pub fn add_observer(&self, observer: Arc<dyn ClockObserver>) {
        self.state.add_observer(observer);
    }

    /// Register a closure notified once per tick.
    pub fn on_clock_change<F>(&self, callback: F)
    where
        F: Fn(SimTime, &dyn Scheduler) + Send + Sync + 'static,
    {
        self.add_observer(Arc::new(FnObserver(callback)));
    }

    /// Submit an event from outside the run.
    ///
    /// Rejected retroactive events are returned as errors without faulting
    /// the kernel.
    pub fn submit(&self, event: Event) -> Result<EventHandle, KernelError> {
        self.state.submit(event, Origin::External)
    }

    /// Schedule `action` to run at `time`.
    pub fn schedule<F>(&self, time: SimTime, action: F) -> Result<EventHandle, KernelError>
    where
        F: FnOnce(&dyn Scheduler) + Send + 'static,
    {
        self.submit(Event::new(time, action))
    }

    /// Schedule `action` to run `delay` ticks after the current clock.
    pub fn schedule_in<F>(&self, delay: u64, action: F) -> Result<EventHandle, KernelError>
    where
        F: FnOnce(&dyn Scheduler) + Send + 'static,
    {
        self.submit(Event::new(self.now().after(delay), action))
    }

    /// Run until the configured horizon.
    pub fn run(&self) -> Result<RunReport, KernelError> {
        self.run_until(self.config.horizon)
    }

    /// Run until the earliest pending event is at or beyond `horizon`.
    ///
    /// May be called again with the same or a later horizon to continue the
    /// simulation. A horizon the clock has already passed is refused with
    /// [`KernelError::HorizonBehindClock`] and leaves the kernel untouched.
    /// Returns the first fault of the run: a causality violation or panic
    /// raised by an event or observer. A faulted kernel refuses further runs.
    ///
    /// While a run is active, submissions from other threads are only
    /// accepted for times after the current clock; they never join the
    /// tick in progress.
    #[instrument(level = "debug", skip(self), fields(strategy = self.state.strategy.name()))]
    pub fn run_until(&self, horizon: SimTime) -> Result<RunReport, KernelError> {
        if let Some(fault) = self.state.fault() {
            return Err(KernelError::Faulted(Box::new(fault)));
        }
        if self.state.running.swap(true, Ordering::AcqRel) {
            return Err(KernelError::AlreadyRunning);
        }
        let _running = RunningGuard(&self.state.running);

        let lvt = self.now();
        if horizon < lvt {
            return Err(KernelError::HorizonBehindClock { horizon, lvt });
        }

        let started = Instant::now();
        let ticks = self.state.counters.ticks.load(Ordering::Relaxed);
        let executed = self.state.counters.executed.load(Ordering::Relaxed);
        let cancelled = self.state.counters.cancelled.load(Ordering::Relaxed);

        info!(
            from = self.now().ticks(),
            horizon = horizon.ticks(),
            pending = self.pending(),
            "Run started"
        );

        self.state.set_horizon(horizon);
        let result = if self.state.dispatch.drives_clock() {
            self.run_cooperative()
        } else {
            self.run_driver()
        };

        let final_time = match result {
            Ok(final_time) => final_time,
            Err(error) => {
                warn!(lvt = self.now().ticks(), %error, "Run aborted");
                return Err(error);
            }
        };

        let report = RunReport {
            strategy: self.state.strategy,
            final_time,
            ticks: self.state.counters.ticks.load(Ordering::Relaxed) - ticks,
            events_executed: self.state.counters.executed.load(Ordering::Relaxed) - executed,
            events_cancelled: self.state.counters.cancelled.load(Ordering::Relaxed) - cancelled,
            events_pending: self.pending(),
            elapsed: started.elapsed(),
        };
        pdes_metrics::record_run_complete(self.state.strategy.name(), report.elapsed.as_secs_f64());

        info!(
            final_time = report.final_time.ticks(),
            ticks = report.ticks,
            executed = report.events_executed,
            cancelled = report.events_cancelled,
            pending = report.events_pending,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Run finished"
        );
        Ok(report)
    }

    /// The calling thread drives the clock and waits out every tick.
    fn run_driver(&self) -> Result<SimTime, KernelError> {
        loop {
            match self.state.advance() {
                Step::Dispatched => self.state.wait_quiescent(),
                Step::Finished => return self.state.finish(),
                Step::Faulted(error) => {
                    self.state.phase.store(Phase::Terminated);
                    return Err(error);
                }
            }
        }
    }

    /// Idle workers drive the clock; the calling thread only waits for the
    /// outcome.
    fn run_cooperative(&self) -> Result<SimTime, KernelError> {
        self.state.start_cooperative();
        self.state.wait_outcome()
    }
}

/// Clears the running flag on every exit from `run_until`.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler for LogicalProcess {
    fn now(&self) -> SimTime {
        self.state.now()
    }

    fn submit(&self, event: Event) -> Result<EventHandle, KernelError> {
        self.state.submit(event, Origin::External)
    }
}

impl Drop for LogicalProcess {
    fn drop(&mut self) {
        self.state.dispatch.shutdown();
    }
}

impl std::fmt::Debug for LogicalProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalProcess")
            .field("strategy", &self.state.strategy)
            .field("lvt", &self.now())
            .field("phase", &self.phase())
            .field("pending", &self.pending())
            .finish()
    }
}
