//! Runs one stage process and captures its output into the run log.

use std::path::{Component, Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::record::ExecutionRecord;
use super::slots::ExecutionSlots;
use crate::command::Invocation;
use crate::engine::EngineConfig;
use crate::error::ExecutionError;
use crate::workspace::Workspace;

/// What to run and where its output goes.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionRequest<'a> {
    pub stage_name: &'a str,
    /// Queue name, already prefixed.
    pub queue: &'a str,
    pub invocation: &'a Invocation,
    pub workspace: &'a Workspace,
    /// Log receiving stdout and stderr.
    pub log_path: &'a Path,
}

/// Executes stage processes through a shell.
#[derive(Debug, Clone)]
pub struct StageExecutor {
    shell: PathBuf,
    retries: u32,
    retry_delay: Duration,
    slots: ExecutionSlots,
}

impl StageExecutor {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            retries: 0,
            retry_delay: Duration::ZERO,
            slots: ExecutionSlots::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            retries: config.stage_retries,
            retry_delay: config.retry_delay,
            slots: ExecutionSlots::from_config(config),
        }
    }

    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.retry_delay = delay;
        self
    }

    pub fn with_slots(mut self, slots: ExecutionSlots) -> Self {
        self.slots = slots;
        self
    }

    /// Runs the invocation and returns its record.
    ///
    /// A process that cannot be started is retried up to the configured count;
    /// if it never starts, the record carries the spawn error. A process that
    /// runs is never retried, whatever its exit status.
    pub async fn execute(&self, request: ExecutionRequest<'_>) -> ExecutionRecord {
        let _permit = match self.slots.acquire(request.queue).await {
            Ok(permit) => permit,
            Err(e) => {
                let start = log_offset(request.log_path).await;
                warn!(stage = request.stage_name, error = %e, "No slot for stage process");
                append_note(request.log_path, &e.to_string()).await;
                return ExecutionRecord::spawn_failed(request.stage_name, e.to_string(), start);
            }
        };
        let mut attempt = 0;

        loop {
            attempt += 1;
            let start = log_offset(request.log_path).await;

            match self.run_once(&request).await {
                Ok((status, range)) => {
                    let exit_code = exit_code(status);
                    info!(
                        stage = request.stage_name,
                        exit_code,
                        queue = request.queue,
                        "Stage process finished"
                    );
                    return ExecutionRecord::completed(request.stage_name, exit_code, range)
                        .with_attempts(attempt);
                }
                Err(e @ ExecutionError::Spawn { .. }) if attempt <= self.retries => {
                    warn!(
                        stage = request.stage_name,
                        attempt,
                        error = %e,
                        "Stage process did not start, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    warn!(stage = request.stage_name, error = %e, "Stage process failed to run");
                    append_note(request.log_path, &e.to_string()).await;
                    return ExecutionRecord::spawn_failed(request.stage_name, e.to_string(), start)
                        .with_attempts(attempt);
                }
            }
        }
    }

    async fn run_once(
        &self,
        request: &ExecutionRequest<'_>,
    ) -> Result<(ExitStatus, std::ops::Range<u64>), ExecutionError> {
        let working_dir = resolve_working_dir(request)?;

        let log_err = |source| ExecutionError::Log {
            path: request.log_path.to_path_buf(),
            source,
        };
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(request.log_path)
            .await
            .map_err(log_err)?;
        let start = log.metadata().await.map_err(log_err)?.len();
        let log = log.into_std().await;
        let stderr = log.try_clone().map_err(log_err)?;

        let command_line = request.invocation.argv.to_shell_string();
        debug!(stage = request.stage_name, command = %command_line, "Spawning stage process");

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&command_line)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr));
        for (key, value) in &request.invocation.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|source| ExecutionError::Spawn {
            stage: request.stage_name.to_string(),
            source,
        })?;

        let status = child.wait().await.map_err(|source| ExecutionError::Wait {
            stage: request.stage_name.to_string(),
            source,
        })?;

        let end = log_offset(request.log_path).await.max(start);
        Ok((status, start..end))
    }
}

/// Resolves the working directory, which must stay inside the workspace.
fn resolve_working_dir(request: &ExecutionRequest<'_>) -> Result<PathBuf, ExecutionError> {
    let dir = &request.invocation.working_dir;
    let escapes = dir
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ExecutionError::InvalidWorkingDir {
            stage: request.stage_name.to_string(),
            dir: dir.clone(),
        });
    }
    Ok(request.workspace.join(dir))
}

/// Current length of the run log, 0 if it does not exist yet.
pub(crate) async fn log_offset(path: &Path) -> u64 {
    tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
}

/// Appends a line to the run log, best effort.
pub(crate) async fn append_note(path: &Path, note: &str) {
    let line = format!("{}\n", note);
    let written = match OpenOptions::new().create(true).append(true).open(path).await {
        Ok(mut file) => file.write_all(line.as_bytes()).await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        warn!(path = %path.display(), error = %e, "Cannot write to run log");
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
