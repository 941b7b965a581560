//! Metrics facade for the PDES kernel.
//!
//! Provides a [`MetricsRecorder`] trait with kernel-specific methods and default
//! no-op implementations. A global singleton recorder is accessed via `recorder()`,
//! and convenience free functions delegate to it.
//!
//! # Usage
//!
//! Callers record metrics via free functions:
//! ```ignore
//! pdes_metrics::record_tick(time, batch_len);
//! pdes_metrics::record_quiescence_wait(wait_secs);
//! ```
//!
//! At startup, install a backend:
//! ```ignore
//! // Benchmarks and the harness:
//! pdes_metrics_prometheus::install();
//!
//! // Tests (optional, defaults to no-op):
//! pdes_metrics_noop::install();
//! ```

use std::sync::OnceLock;

// ═══════════════════════════════════════════════════════════════════════
// Trait
// ═══════════════════════════════════════════════════════════════════════

/// Kernel metrics recording trait.
///
/// All methods have default no-op implementations so backends only need
/// to override the metrics they care about.
#[allow(unused_variables)]
pub trait MetricsRecorder: Send + Sync + 'static {
    // ── Clock ────────────────────────────────────────────────────────

    /// Record a tick dispatched at `time` with `batch` events.
    fn record_tick(&self, time: u64, batch: usize) {}

    /// Record how long the driver waited for a tick to quiesce.
    fn record_quiescence_wait(&self, wait_secs: f64) {}

    /// Record a finished run.
    fn record_run_complete(&self, strategy: &str, elapsed_secs: f64) {}

    // ── Events ───────────────────────────────────────────────────────

    /// Record an event whose action ran.
    fn record_event_executed(&self) {}

    /// Record an event skipped because it was cancelled.
    fn record_event_cancelled(&self) {}

    /// Record an event whose action panicked.
    fn record_event_panicked(&self) {}

    /// Record a rejected retroactive submission.
    fn record_causality_violation(&self) {}

    // ── Future set ───────────────────────────────────────────────────

    /// Record worker-buffered events merged into the future set.
    fn record_buffer_merge(&self, count: usize) {}

    /// Set the pending future-set size gauge.
    fn set_future_set_size(&self, size: usize) {}
}

// ═══════════════════════════════════════════════════════════════════════
// Global singleton
// ═══════════════════════════════════════════════════════════════════════

struct NoopRecorder;
impl MetricsRecorder for NoopRecorder {}

static RECORDER: OnceLock<Box<dyn MetricsRecorder>> = OnceLock::new();

/// Install a global metrics recorder.
///
/// Can only be called once. Subsequent calls are silently ignored.
pub fn set_global_recorder(recorder: Box<dyn MetricsRecorder>) {
    let _ = RECORDER.set(recorder);
}

/// Whether a recorder has been installed.
pub fn is_installed() -> bool {
    RECORDER.get().is_some()
}

/// Get the global metrics recorder.
///
/// Returns a no-op recorder if none has been installed.
#[inline]
fn recorder() -> &'static dyn MetricsRecorder {
    RECORDER.get().map(|r| r.as_ref()).unwrap_or(&NoopRecorder)
}

// ═══════════════════════════════════════════════════════════════════════
// Convenience free functions
// ═══════════════════════════════════════════════════════════════════════

// ── Clock ────────────────────────────────────────────────────────────

/// Record a tick dispatched at `time` with `batch` events.
#[inline]
pub fn record_tick(time: u64, batch: usize) {
    recorder().record_tick(time, batch);
}

/// Record how long the driver waited for a tick to quiesce.
#[inline]
pub fn record_quiescence_wait(wait_secs: f64) {
    recorder().record_quiescence_wait(wait_secs);
}

/// Record a finished run.
#[inline]
pub fn record_run_complete(strategy: &str, elapsed_secs: f64) {
    recorder().record_run_complete(strategy, elapsed_secs);
}

// ── Events ───────────────────────────────────────────────────────────

#[inline]
pub fn record_event_executed() {
    recorder().record_event_executed();
}

#[inline]
pub fn record_event_cancelled() {
    recorder().record_event_cancelled();
}

#[inline]
pub fn record_event_panicked() {
    recorder().record_event_panicked();
}

#[inline]
pub fn record_causality_violation() {
    recorder().record_causality_violation();
}

// ── Future set ───────────────────────────────────────────────────────

/// Record worker-buffered events merged into the future set.
#[inline]
pub fn record_buffer_merge(count: usize) {
    recorder().record_buffer_merge(count);
}

/// Set the pending future-set size gauge.
#[inline]
pub fn set_future_set_size(size: usize) {
    recorder().set_future_set_size(size);
}
