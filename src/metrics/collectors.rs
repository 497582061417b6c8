//! Recording helpers for run and stage metrics.

use super::prometheus::{
    FANOUT_WORKERS, REPORTING_FAILURES, RUNS_TOTAL, STAGE_DURATION, STAGE_EXECUTIONS_TOTAL,
};

/// Records ingestflow operational metrics.
///
/// Every method is a no-op until `init_metrics()` has run.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a finished run.
    pub fn record_run(&self, pipeline: &str, outcome: &str) {
        if let Some(runs_total) = RUNS_TOTAL.get() {
            runs_total.with_label_values(&[pipeline, outcome]).inc();
        }

        tracing::trace!(pipeline = pipeline, outcome = outcome, "Recorded run metric");
    }

    /// Record one stage execution.
    pub fn record_stage(&self, pipeline: &str, success: bool, duration_secs: f64) {
        let result = if success { "success" } else { "failure" };

        if let Some(executions) = STAGE_EXECUTIONS_TOTAL.get() {
            executions.with_label_values(&[pipeline, result]).inc();
        }

        if let Some(duration) = STAGE_DURATION.get() {
            duration.with_label_values(&[pipeline]).observe(duration_secs);
        }

        tracing::trace!(
            pipeline = pipeline,
            result = result,
            duration_secs = duration_secs,
            "Recorded stage metric"
        );
    }

    /// Record the size of a fan-out.
    pub fn record_fanout(&self, pipeline: &str, workers: usize) {
        if let Some(gauge) = FANOUT_WORKERS.get() {
            gauge.with_label_values(&[pipeline]).set(workers as f64);
        }
    }

    /// Record a status report that could not be delivered.
    pub fn record_reporting_failure(&self, pipeline: &str) {
        if let Some(failures) = REPORTING_FAILURES.get() {
            failures.with_label_values(&[pipeline]).inc();
        }
    }
}
