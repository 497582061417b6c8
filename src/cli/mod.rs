//! Command-line interface for ingestflow.
//!
//! Provides commands for running pipelines against trigger payloads,
//! listing registered pipelines, and checking metadata documents.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
