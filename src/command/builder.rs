//! Stage context, invocations and the command-building trait.

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use super::tokens::ArgVector;
use crate::context::RunContext;
use crate::dataset::Dataset;
use crate::engine::EngineConfig;
use crate::error::CommandError;
use crate::workspace::Workspace;

/// One unit of work produced by a fan-out expand step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Position of the item in expansion order.
    pub index: usize,
    /// Input the worker operates on.
    pub path: PathBuf,
}

impl WorkItem {
    pub fn new(index: usize, path: impl Into<PathBuf>) -> Self {
        Self {
            index,
            path: path.into(),
        }
    }
}

/// Everything a command builder may read.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    pub stage: &'a str,
    pub run: &'a RunContext,
    pub workspace: &'a Workspace,
    pub dataset: &'a Dataset,
    pub config: &'a EngineConfig,
    pub item: Option<&'a WorkItem>,
}

impl<'a> StageContext<'a> {
    /// The fan-out item this stage instance was created for.
    pub fn item(&self) -> Result<&'a WorkItem, CommandError> {
        self.item
            .ok_or_else(|| CommandError::MissingItem(self.stage.to_string()))
    }

    /// Absolute path of a workflow descriptor under the pipeline base dir.
    pub fn descriptor(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.config.pipeline_base_dir.join(relative)
    }

    /// Path inside the run workspace.
    pub fn workspace_path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.workspace.join(relative)
    }
}

/// A fully built process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Command line, run through the configured shell.
    pub argv: ArgVector,
    /// Working directory relative to the workspace root.
    pub working_dir: PathBuf,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(argv: ArgVector) -> Self {
        Self {
            argv,
            working_dir: PathBuf::new(),
            env: Vec::new(),
        }
    }

    /// Runs the process in a subdirectory of the workspace.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Prepends the configured tool directory to `PATH`.
    pub fn with_tool_path(self, config: &EngineConfig) -> Self {
        match &config.tool_bin_dir {
            Some(bin) => {
                let path = match std::env::var("PATH") {
                    Ok(current) if !current.is_empty() => format!("{}:{}", bin.display(), current),
                    _ => bin.display().to_string(),
                };
                self.with_env("PATH", path)
            }
            None => self,
        }
    }
}

/// Builds the invocation for one stage.
///
/// Implementations must be deterministic: the same context always yields the
/// same invocation.
pub trait CommandSpec: Send + Sync {
    fn build(&self, ctx: &StageContext<'_>) -> Result<Invocation, CommandError>;
}

impl<F> CommandSpec for F
where
    F: Fn(&StageContext<'_>) -> Result<Invocation, CommandError> + Send + Sync,
{
    fn build(&self, ctx: &StageContext<'_>) -> Result<Invocation, CommandError> {
        self(ctx)
    }
}

/// Parses a numeric run parameter that may arrive as a number or a string.
///
/// Missing or unparseable values yield `default`; an unparseable value is
/// logged.
pub fn parse_numeric_param<T>(name: &str, value: Option<&Value>, default: T) -> T
where
    T: FromStr + Display + Copy,
{
    let raw = match value {
        None | Some(Value::Null) => {
            debug!(param = name, %default, "Parameter not supplied, using default");
            return default;
        }
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(other) => other.to_string(),
    };

    match raw.parse::<T>() {
        Ok(parsed) => parsed,
        Err(_) => {
            warn!(param = name, value = %raw, %default, "Could not parse parameter, using default");
            default
        }
    }
}

/// Reads a list of strings from run metadata. A missing key is an empty list.
pub fn string_list_param(run: &RunContext, name: &str) -> Result<Vec<String>, CommandError> {
    match run.metadata_value(name) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CommandError::InvalidField {
                        field: name.to_string(),
                        reason: format!("expected a string, got {}", item),
                    })
            })
            .collect(),
        Some(other) => Err(CommandError::InvalidField {
            field: name.to_string(),
            reason: format!("expected a list of strings, got {}", other),
        }),
    }
}

/// Copies a workspace subdirectory into the dataset directory, then removes it.
#[derive(Debug, Clone)]
pub struct MoveDataCommand {
    from: PathBuf,
}

impl MoveDataCommand {
    pub fn new(from: impl Into<PathBuf>) -> Self {
        Self { from: from.into() }
    }
}

impl CommandSpec for MoveDataCommand {
    fn build(&self, ctx: &StageContext<'_>) -> Result<Invocation, CommandError> {
        let source = ctx.workspace_path(&self.from);
        let dest = ctx.dataset.path.display().to_string();
        let argv = ArgVector::command(["mkdir", "-p", dest.as_str()])
            .and_then(ArgVector::command([
                "cp".to_string(),
                "-R".to_string(),
                format!("{}/.", source.display()),
                dest.clone(),
            ]))
            .and_then(ArgVector::command([
                "rm".to_string(),
                "-rf".to_string(),
                source.display().to_string(),
            ]));
        Ok(Invocation::new(argv))
    }
}
