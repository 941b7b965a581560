//! Prometheus metrics backend for the PDES kernel.
//!
//! Implements [`pdes_metrics::MetricsRecorder`] using native Prometheus
//! counters, gauges, and histograms.
//!
//! # Usage
//!
//! Call [`install()`] once at startup before any metrics are recorded:
//! ```ignore
//! pdes_metrics_prometheus::install();
//! ```

use pdes_metrics::MetricsRecorder;
use prometheus::{
    register_counter, register_gauge, register_gauge_vec, register_histogram,
    register_histogram_vec, Counter, Gauge, GaugeVec, Histogram, HistogramVec,
};

/// Kernel Prometheus metrics.
pub struct Metrics {
    // === Clock ===
    pub ticks: Counter,
    pub tick_batch_size: Histogram,
    pub clock: Gauge,
    pub quiescence_wait: Histogram,
    pub run_duration: HistogramVec,
    pub build_info: GaugeVec,

    // === Events ===
    pub events_executed: Counter,
    pub events_cancelled: Counter,
    pub events_panicked: Counter,
    pub causality_violations: Counter,

    // === Future set ===
    pub buffer_merged_events: Histogram,
    pub future_set_size: Gauge,
}

impl Metrics {
    fn new() -> Self {
        let wait_buckets = vec![
            0.000_001, 0.000_01, 0.000_1, 0.001, 0.01, 0.1, 1.0,
        ];
        let run_buckets = vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0];
        let size_buckets = vec![1.0, 2.0, 4.0, 8.0, 16.0, 64.0, 256.0, 1024.0, 8192.0];

        let build_info = register_gauge_vec!(
            "pdes_build_info",
            "Kernel build information",
            &["version"]
        )
        .unwrap();

        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1.0);

        Self {
            build_info,

            // Clock
            ticks: register_counter!("pdes_ticks_total", "Total number of ticks dispatched")
                .unwrap(),

            tick_batch_size: register_histogram!(
                "pdes_tick_batch_size",
                "Events pulled from the future set per tick",
                size_buckets.clone()
            )
            .unwrap(),

            clock: register_gauge!("pdes_lvt", "Current local virtual time").unwrap(),

            quiescence_wait: register_histogram!(
                "pdes_quiescence_wait_seconds",
                "Time the driver waited for a tick's events to finish",
                wait_buckets
            )
            .unwrap(),

            run_duration: register_histogram_vec!(
                "pdes_run_duration_seconds",
                "Wall-clock duration of a run by strategy",
                &["strategy"],
                run_buckets
            )
            .unwrap(),

            // Events
            events_executed: register_counter!(
                "pdes_events_executed_total",
                "Events whose action ran"
            )
            .unwrap(),

            events_cancelled: register_counter!(
                "pdes_events_cancelled_total",
                "Events skipped because they were cancelled"
            )
            .unwrap(),

            events_panicked: register_counter!(
                "pdes_events_panicked_total",
                "Events whose action panicked"
            )
            .unwrap(),

            causality_violations: register_counter!(
                "pdes_causality_violations_total",
                "Submissions rejected for being earlier than the clock"
            )
            .unwrap(),

            // Future set
            buffer_merged_events: register_histogram!(
                "pdes_buffer_merged_events",
                "Worker-buffered events merged per quiescent phase",
                size_buckets
            )
            .unwrap(),

            future_set_size: register_gauge!(
                "pdes_future_set_size",
                "Events pending in the future set"
            )
            .unwrap(),
        }
    }
}

/// Prometheus-backed metrics recorder.
pub struct PrometheusRecorder {
    metrics: Metrics,
}

impl PrometheusRecorder {
    fn new() -> Self {
        Self {
            metrics: Metrics::new(),
        }
    }
}

impl MetricsRecorder for PrometheusRecorder {
    // ── Clock ────────────────────────────────────────────────────────

    fn record_tick(&self, time: u64, batch: usize) {
        self.metrics.ticks.inc();
        self.metrics.clock.set(time as f64);
        self.metrics.tick_batch_size.observe(batch as f64);
    }

    fn record_quiescence_wait(&self, wait_secs: f64) {
        self.metrics.quiescence_wait.observe(wait_secs);
    }

    fn record_run_complete(&self, strategy: &str, elapsed_secs: f64) {
        self.metrics
            .run_duration
            .with_label_values(&[strategy])
            .observe(elapsed_secs);
    }

    // ── Events ───────────────────────────────────────────────────────

    fn record_event_executed(&self) {
        self.metrics.events_executed.inc();
    }

    fn record_event_cancelled(&self) {
        self.metrics.events_cancelled.inc();
    }

    fn record_event_panicked(&self) {
        self.metrics.events_panicked.inc();
    }

    fn record_causality_violation(&self) {
        self.metrics.causality_violations.inc();
    }

    // ── Future set ───────────────────────────────────────────────────

    fn record_buffer_merge(&self, count: usize) {
        self.metrics.buffer_merged_events.observe(count as f64);
    }

    fn set_future_set_size(&self, size: usize) {
        self.metrics.future_set_size.set(size as f64);
    }
}

/// Install the Prometheus metrics recorder as the global backend.
///
/// Idempotent, safe to call multiple times (e.g., in tests). Only the
/// first call creates and registers the Prometheus metrics.
pub fn install() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        pdes_metrics::set_global_recorder(Box::new(PrometheusRecorder::new()));
    });
}

/// Gather and encode all registered Prometheus metrics as text format.
///
/// Returns `(content_type, encoded_body)`.
pub fn encode_metrics() -> Result<(String, Vec<u8>), String> {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let content_type = encoder.format_type().to_string();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("{e}"))?;
    Ok((content_type, buffer))
}

/// Registered metrics as Prometheus text exposition format.
pub fn gather_text() -> Result<String, String> {
    let (_, body) = encode_metrics()?;
    String::from_utf8(body).map_err(|e| format!("{e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_and_gather() {
        install();
        install();
        pdes_metrics::record_tick(7, 3);
        pdes_metrics::record_event_executed();

        let text = gather_text().unwrap();
        assert!(text.contains("pdes_ticks_total"));
        assert!(text.contains("pdes_events_executed_total"));
    }
}
