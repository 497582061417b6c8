//! Execution records.

use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exit code recorded when a process could not be started.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Outcome of one stage process. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub stage_name: String,
    /// Raw exit status; signals map to `128 + signal`.
    pub exit_code: i32,
    /// Byte range of the run log written by this process.
    pub log_range: Range<u64>,
    /// When the process finished.
    pub timestamp: DateTime<Utc>,
    /// Number of spawn attempts.
    pub attempts: u32,
    /// Set when no process ran at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_error: Option<String>,
}

impl ExecutionRecord {
    pub fn completed(stage_name: impl Into<String>, exit_code: i32, log_range: Range<u64>) -> Self {
        Self {
            stage_name: stage_name.into(),
            exit_code,
            log_range,
            timestamp: Utc::now(),
            attempts: 1,
            spawn_error: None,
        }
    }

    /// Record for a stage whose process never started.
    pub fn spawn_failed(stage_name: impl Into<String>, error: impl Into<String>, log_offset: u64) -> Self {
        Self {
            stage_name: stage_name.into(),
            exit_code: SPAWN_FAILURE_EXIT_CODE,
            log_range: log_offset..log_offset,
            timestamp: Utc::now(),
            attempts: 1,
            spawn_error: Some(error.into()),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Shifts the log range by `base`, for output merged into another log.
    pub fn rebased(self, base: u64) -> Self {
        Self {
            log_range: base + self.log_range.start..base + self.log_range.end,
            ..self
        }
    }

    pub fn is_success(&self) -> bool {
        self.spawn_error.is_none() && self.exit_code == 0
    }

    pub fn is_spawn_failure(&self) -> bool {
        self.spawn_error.is_some()
    }
}
