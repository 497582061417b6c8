//! Metrics module for Prometheus-based monitoring.
//!
//! Counts runs by outcome, stage executions by result, stage durations,
//! fan-out sizes and undeliverable status reports.
//!
//! # Example
//!
//! ```ignore
//! use ingestflow::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics()?;
//! MetricsCollector::new().record_run("devtest_step2", "QA");
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    FANOUT_WORKERS, REGISTRY, REPORTING_FAILURES, RUNS_TOTAL, STAGE_DURATION,
    STAGE_EXECUTIONS_TOTAL,
};
