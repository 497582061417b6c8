//! Built-in pipeline definitions.
//!
//! Each submodule exposes a `NAME` and a `definition` factory taking the
//! engine configuration, which supplies the workflow descriptor root and
//! tool settings. [`builtins`] lists them for the registry.

pub mod devtest;
pub mod pyramid;
pub mod salmon;
pub mod scan;

use crate::engine::EngineConfig;
use crate::error::GraphError;
use crate::graph::PipelineDefinition;

/// Signature shared by the built-in factories.
pub type BuiltinFactory = fn(&EngineConfig) -> Result<PipelineDefinition, GraphError>;

/// Directory in the workspace that workflow tools write their output to.
pub const OUTPUT_DIR: &str = "cwl_out";

/// Every built-in pipeline with its factory.
pub fn builtins() -> [(&'static str, BuiltinFactory); 4] {
    [
        (devtest::NAME, devtest::definition),
        (salmon::NAME, salmon::definition),
        (pyramid::NAME, pyramid::definition),
        (scan::NAME, scan::definition),
    ]
}
