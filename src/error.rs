//! Error types for ingestflow operations.
//!
//! Defines error types for every subsystem a run touches:
//! - Workspace allocation and cleanup
//! - Trigger payload parsing
//! - Command construction and stage execution
//! - Dataset registration and status reporting
//! - Metadata assembly and schema loading
//! - Pipeline graph definitions and the pipeline registry
//!
//! Stage-level failures (non-zero exits, spawn failures) are not errors at the
//! engine level: they are recorded and drive branch decisions. Only workspace,
//! registration and reporting failures propagate to the caller of a run.

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::ConfigError;

/// Errors that can occur while allocating or removing a run workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Workspace {path:?} already exists")]
    AlreadyExists { path: PathBuf },

    #[error("Cannot allocate workspace {path:?}: {source}")]
    Unwritable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove workspace {path:?}: {source}")]
    Cleanup {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl WorkspaceError {
    /// Returns true for errors raised before the workspace existed.
    pub fn is_allocation(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. } | Self::Unwritable { .. })
    }
}

/// Errors that can occur while turning a trigger payload into a run context.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Trigger payload is missing required field '{0}'")]
    MissingField(String),

    #[error("Trigger payload carries both 'dag_provenance' and 'dag_provenance_list'")]
    ConflictingProvenance,

    #[error("Cannot decrypt auth token: {0}")]
    InvalidToken(String),

    #[error("Malformed trigger payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while building a stage command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Run metadata is missing '{0}'")]
    MissingMetadata(String),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("Stage '{0}' needs a fan-out item but none was supplied")]
    MissingItem(String),

    #[error("Cannot expand fan-out stage '{stage}': {reason}")]
    Expansion { stage: String, reason: String },
}

/// Errors that can occur while executing a stage process.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Failed to spawn process for stage '{stage}': {source}")]
    Spawn {
        stage: String,
        source: std::io::Error,
    },

    #[error("Failed waiting for stage '{stage}': {source}")]
    Wait {
        stage: String,
        source: std::io::Error,
    },

    #[error("Cannot open run log {path:?}: {source}")]
    Log {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Stage '{stage}' working directory {dir:?} escapes the workspace")]
    InvalidWorkingDir { stage: String, dir: PathBuf },

    #[error("Queue '{queue}' no longer accepts processes")]
    QueueClosed { queue: String },
}

/// Errors that can occur while registering a derived dataset.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Dataset registration rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Unexpected registration response: {0}")]
    InvalidResponse(String),

    #[error("Cannot determine dataset type: run metadata has no '{0}'")]
    MissingDatasetType(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while sending the final status report.
#[derive(Debug, Error)]
pub enum ReportingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Status report rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Errors that can occur while assembling run metadata.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Extractor result {0:?} not found")]
    MissingResult(PathBuf),

    #[error("Invalid manifest {path:?}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("Extractor produced {0}, expected a mapping")]
    NotAMapping(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur while loading a metadata schema.
#[derive(Debug, Error)]
pub enum SchemaLoadError {
    #[error("Invalid pattern '{pattern}' at '{field}': {reason}")]
    InvalidPattern {
        field: String,
        pattern: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Errors that can occur while assembling a pipeline definition.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Pipeline '{0}' declares no stages")]
    Empty(String),

    #[error("Stage '{0}' is declared twice")]
    DuplicateStage(String),

    #[error("Stage '{stage}' continues to unknown stage '{target}'")]
    UnknownSuccessor { stage: String, target: String },

    #[error("Stage '{stage}' continues backwards to '{target}'")]
    BackwardEdge { stage: String, target: String },

    #[error("Stage '{stage}' is gated on '{target}', which does not run before it")]
    UnknownGateStage { stage: String, target: String },
}

/// Errors that can occur during pipeline registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Pipeline '{0}' not found in registry")]
    UnknownPipeline(String),

    #[error("Pipeline '{0}' already exists in registry")]
    DuplicatePipeline(String),

    #[error("Invalid pipeline definition: {0}")]
    Definition(#[from] GraphError),
}

/// Errors that abort a run and propagate to its caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Trigger(#[from] TriggerError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Reporting(#[from] ReportingError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Schema(#[from] SchemaLoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Run task did not complete: {0}")]
    Task(#[from] tokio::task::JoinError),
}
