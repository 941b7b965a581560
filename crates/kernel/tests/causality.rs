//! Causality gate, cancellation and fault handling.

use pdes_kernel::{
    ClockObserver, Event, KernelConfig, KernelError, LogicalProcess, Scheduler, SimTime, Strategy,
};
use pdes_test_helpers::{strategy_configs, Recorder};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use tracing_test::traced_test;

fn t(ticks: u64) -> SimTime {
    SimTime::new(ticks)
}

/// A retroactive submission from outside a run is rejected with both
/// timestamps and leaves the kernel usable.
#[traced_test]
#[test]
fn test_external_past_submission_is_rejected() {
    let kernel = LogicalProcess::new(KernelConfig::sequential(10)).unwrap();
    kernel.schedule(t(3), |_| {}).unwrap();
    kernel.run().unwrap();
    assert_eq!(kernel.now(), t(10));

    let error = kernel.schedule(t(5), |_| {}).unwrap_err();
    assert_eq!(
        error,
        KernelError::CausalityViolation {
            event_time: t(5),
            lvt: t(10),
        }
    );
    let message = error.to_string();
    assert!(message.contains("t=5") && message.contains("t=10"), "{message}");
    assert_eq!(kernel.pending(), 0);

    kernel.run_until(t(20)).unwrap();
}

/// A start time later than a seeded event rejects it before the run.
#[test]
fn test_start_time_gates_seeding() {
    let config = KernelConfig::builder()
        .start_time(100)
        .horizon(200)
        .workers(1)
        .build()
        .unwrap();
    let kernel = LogicalProcess::new(config).unwrap();
    let error = kernel.schedule(t(50), |_| {}).unwrap_err();
    assert!(error.is_causality_violation());
}

/// An event scheduling into the past aborts the run with the violation,
/// and the kernel refuses to run again.
#[traced_test]
#[test]
fn test_past_submission_from_event_aborts_run() {
    for config in strategy_configs(2, 40) {
        let strategy = config.strategy;
        let kernel = LogicalProcess::new(config).unwrap();
        let recorder = Recorder::new();

        kernel
            .schedule(t(5), |s| {
                let result = s.schedule(SimTime::new(2), |_| {});
                assert!(result.is_err());
            })
            .unwrap();
        let r = recorder.clone();
        kernel
            .schedule(t(30), move |s| r.record(s.now(), 30))
            .unwrap();

        let error = kernel.run().unwrap_err();
        assert_eq!(
            error,
            KernelError::CausalityViolation {
                event_time: t(2),
                lvt: t(5),
            },
            "{strategy}"
        );
        assert!(recorder.is_empty(), "{strategy} kept running after a fault");
        assert!(kernel.now() < t(30));

        match kernel.run() {
            Err(KernelError::Faulted(inner)) => assert!(inner.is_causality_violation()),
            other => panic!("{strategy}: expected Faulted, got {other:?}"),
        }
    }
}

/// Cancelling before the clock reaches an event skips its action; events
/// can also cancel later events while the run is in progress.
#[traced_test]
#[test]
fn test_cancellation_skips_action() {
    for config in strategy_configs(2, 50) {
        let strategy = config.strategy;
        let kernel = LogicalProcess::new(config).unwrap();
        let recorder = Recorder::new();

        let r = recorder.clone();
        let early = kernel.schedule(t(4), move |s| r.record(s.now(), 4)).unwrap();
        early.cancel();

        let r = recorder.clone();
        let later = kernel
            .schedule(t(20), move |s| r.record(s.now(), 20))
            .unwrap();
        let r = recorder.clone();
        kernel
            .schedule(t(10), move |s| {
                later.cancel();
                r.record(s.now(), 10);
            })
            .unwrap();

        let report = kernel.run().unwrap();
        assert_eq!(
            recorder.sorted().iter().map(|e| e.label).collect::<Vec<_>>(),
            vec![10],
            "{strategy}"
        );
        assert_eq!(report.events_executed, 1);
        assert_eq!(report.events_cancelled, 2);
        assert!(early.is_cancelled());
    }
}

/// Cancelling after an event ran has no effect.
#[test]
fn test_cancel_after_execution_is_noop() {
    let kernel = LogicalProcess::new(KernelConfig::sequential(10)).unwrap();
    let recorder = Recorder::new();
    let r = recorder.clone();
    let event = Event::new(t(1), move |s| r.record(s.now(), 1));
    let handle = kernel.submit(event).unwrap();

    let report = kernel.run().unwrap();
    handle.cancel();
    assert_eq!(report.events_executed, 1);
    assert_eq!(recorder.len(), 1);
}

/// A panicking action aborts the run at the next quiescent point without
/// leaving the tick open.
#[traced_test]
#[test]
fn test_panicking_event_faults_run() {
    for config in strategy_configs(3, 40) {
        let strategy = config.strategy;
        let kernel = LogicalProcess::new(config).unwrap();
        let recorder = Recorder::new();

        kernel.schedule(t(5), |_| panic!("boom")).unwrap();
        for label in 0..4 {
            let r = recorder.clone();
            kernel
                .schedule(t(5), move |s| r.record(s.now(), label))
                .unwrap();
        }
        let r = recorder.clone();
        kernel
            .schedule(t(6), move |s| r.record(s.now(), 99))
            .unwrap();

        match kernel.run() {
            Err(KernelError::EventPanicked { time, message }) => {
                assert_eq!(time, t(5), "{strategy}");
                assert!(message.contains("boom"), "{strategy}: {message}");
            }
            other => panic!("{strategy}: expected EventPanicked, got {other:?}"),
        }
        assert_eq!(recorder.labels_at(t(5)), vec![0, 1, 2, 3], "{strategy}");
        assert!(recorder.labels_at(t(6)).is_empty(), "{strategy}");
    }
}

struct PanicOnComplete;

impl ClockObserver for PanicOnComplete {
    fn on_clock_change(&self, _now: SimTime, _scheduler: &dyn Scheduler) {}

    fn on_run_complete(&self, _final_time: SimTime) {
        panic!("report failed");
    }
}

/// A panicking clock observer faults the run once its tick drains, and a
/// panicking completion callback faults the run instead of escaping it.
#[traced_test]
#[test]
fn test_panicking_observer_faults_run() {
    for config in strategy_configs(2, 40) {
        let strategy = config.strategy;
        let kernel = LogicalProcess::new(config).unwrap();
        let recorder = Recorder::new();

        kernel.on_clock_change(|now, _| {
            if now == SimTime::new(5) {
                panic!("observer boom");
            }
        });
        for time in [5, 8] {
            let r = recorder.clone();
            kernel
                .schedule(t(time), move |s| r.record(s.now(), time))
                .unwrap();
        }

        match kernel.run() {
            Err(KernelError::EventPanicked { time, message }) => {
                assert_eq!(time, t(5), "{strategy}");
                assert!(message.contains("clock observer"), "{strategy}: {message}");
                assert!(message.contains("observer boom"), "{strategy}: {message}");
            }
            other => panic!("{strategy}: expected EventPanicked, got {other:?}"),
        }
        assert_eq!(recorder.labels_at(t(5)), vec![5], "{strategy}");
        assert!(recorder.labels_at(t(8)).is_empty(), "{strategy}");
    }

    for config in strategy_configs(2, 10) {
        let strategy = config.strategy;
        let kernel = LogicalProcess::new(config).unwrap();
        let recorder = Recorder::new();
        kernel.add_observer(Arc::new(PanicOnComplete));
        let r = recorder.clone();
        kernel.schedule(t(3), move |s| r.record(s.now(), 3)).unwrap();

        match kernel.run() {
            Err(KernelError::EventPanicked { time, message }) => {
                assert_eq!(time, t(10), "{strategy}");
                assert!(message.contains("report failed"), "{strategy}: {message}");
            }
            other => panic!("{strategy}: expected EventPanicked, got {other:?}"),
        }
        assert_eq!(recorder.labels_at(t(3)), vec![3], "{strategy}");

        match kernel.run_until(t(20)) {
            Err(KernelError::Faulted(inner)) => {
                assert!(matches!(*inner, KernelError::EventPanicked { .. }), "{strategy}")
            }
            other => panic!("{strategy}: expected Faulted, got {other:?}"),
        }
    }
}

/// While a run is active, another thread may only schedule after the
/// current tick; the tick in progress is not reopened.
#[traced_test]
#[test]
fn test_outside_submission_during_run() {
    for config in strategy_configs(2, 20) {
        let strategy = config.strategy;
        let kernel = Arc::new(LogicalProcess::new(config).unwrap());
        let recorder = Recorder::new();

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let r = recorder.clone();
        kernel
            .schedule(t(5), move |s| {
                r.record(s.now(), 5);
                started_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
            .unwrap();

        let runner = {
            let kernel = kernel.clone();
            thread::spawn(move || kernel.run())
        };

        started_rx.recv().unwrap();
        let error = kernel.schedule(t(5), |_| {}).unwrap_err();
        assert_eq!(
            error,
            KernelError::CausalityViolation {
                event_time: t(5),
                lvt: t(5),
            },
            "{strategy}"
        );
        let r = recorder.clone();
        kernel
            .schedule(t(7), move |s| r.record(s.now(), 7))
            .unwrap();
        release_tx.send(()).unwrap();

        let report = runner.join().unwrap().unwrap();
        assert_eq!(report.ticks, 2, "{strategy}");
        assert_eq!(report.events_executed, 2, "{strategy}");
        assert_eq!(recorder.labels_at(t(7)), vec![7], "{strategy}");
    }
}

/// A second `run_until` while one is in progress is refused.
#[test]
fn test_concurrent_run_is_refused() {
    let config = KernelConfig::builder()
        .strategy(Strategy::Standard)
        .workers(2)
        .horizon(10)
        .build()
        .unwrap();
    let kernel = Arc::new(LogicalProcess::new(config).unwrap());

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    kernel
        .schedule(t(1), move |_| {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .unwrap();

    let runner = {
        let kernel = kernel.clone();
        thread::spawn(move || kernel.run())
    };

    started_rx.recv().unwrap();
    assert_eq!(kernel.run().unwrap_err(), KernelError::AlreadyRunning);
    release_tx.send(()).unwrap();

    let report = runner.join().unwrap().unwrap();
    assert_eq!(report.events_executed, 1);
}
