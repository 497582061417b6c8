//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by ingestflow and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all ingestflow metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total runs, labeled by pipeline and outcome.
pub static RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total stage executions, labeled by pipeline and result.
pub static STAGE_EXECUTIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Stage duration in seconds, labeled by pipeline.
pub static STAGE_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Workers created by the last fan-out, labeled by pipeline.
pub static FANOUT_WORKERS: OnceLock<GaugeVec> = OnceLock::new();

/// Status reports that could not be delivered, labeled by pipeline.
pub static REPORTING_FAILURES: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Recording before initialization is a no-op.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let runs_total = CounterVec::new(
        Opts::new("ingestflow_runs_total", "Total number of pipeline runs"),
        &["pipeline", "outcome"],
    )?;

    let stage_executions_total = CounterVec::new(
        Opts::new("ingestflow_stage_executions_total", "Total number of stage executions"),
        &["pipeline", "result"],
    )?;

    let stage_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "ingestflow_stage_duration_seconds",
            "Stage execution duration in seconds",
        )
        .buckets(vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]),
        &["pipeline"],
    )?;

    let fanout_workers = GaugeVec::new(
        Opts::new("ingestflow_fanout_workers", "Workers created by the last fan-out"),
        &["pipeline"],
    )?;

    let reporting_failures = CounterVec::new(
        Opts::new(
            "ingestflow_reporting_failures_total",
            "Status reports that could not be delivered",
        ),
        &["pipeline"],
    )?;

    registry.register(Box::new(runs_total.clone()))?;
    registry.register(Box::new(stage_executions_total.clone()))?;
    registry.register(Box::new(stage_duration.clone()))?;
    registry.register(Box::new(fanout_workers.clone()))?;
    registry.register(Box::new(reporting_failures.clone()))?;

    // If any of these fail, metrics were already initialized
    let _ = REGISTRY.set(registry);
    let _ = RUNS_TOTAL.set(runs_total);
    let _ = STAGE_EXECUTIONS_TOTAL.set(stage_executions_total);
    let _ = STAGE_DURATION.set(stage_duration);
    let _ = FANOUT_WORKERS.set(fanout_workers);
    let _ = REPORTING_FAILURES.set(reporting_failures);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// If the registry has not been initialized or encoding fails, returns a
/// comment line describing the problem.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
