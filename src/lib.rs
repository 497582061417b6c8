//! ingestflow: trigger-driven ingest pipelines with exactly-once status reporting.
//!
//! This library runs multi-stage data-processing pipelines. Each run gets a
//! private workspace, executes its stages as shell processes, branches on
//! their exit codes, assembles and validates dataset metadata, and reports
//! one final status (`QA`, `Error` or `Invalid`) to the ingest API.

// Core modules
pub mod branch;
pub mod cli;
pub mod command;
pub mod context;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod executor;
pub mod graph;
pub mod metadata;
pub mod metrics;
pub mod pipelines;
pub mod registry;
pub mod status;
pub mod validation;
pub mod workspace;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use engine::{Engine, EngineConfig};
pub use error::{
    CommandError, EngineError, ExecutionError, GraphError, MetadataError, RegistrationError,
    RegistryError, ReportingError, SchemaLoadError, TriggerError, WorkspaceError,
};
pub use graph::{PipelineDefinition, PipelineRunner, RunSummary};
pub use status::{RunOutcome, StatusReport};
