//! No-op metrics recorder.
//!
//! Installs a recorder that silently discards all metrics.
//! This is the default behavior when no recorder is installed,
//! but can be explicitly installed for clarity.

/// A metrics recorder that does nothing.
pub struct NoopRecorder;

impl pdes_metrics::MetricsRecorder for NoopRecorder {}

/// Install the no-op recorder as the global metrics backend.
pub fn install() {
    pdes_metrics::set_global_recorder(Box::new(NoopRecorder));
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_install_marks_recorder_present() {
        super::install();
        assert!(pdes_metrics::is_installed());
        pdes_metrics::record_tick(1, 1);
        pdes_metrics::set_future_set_size(0);
    }
}
