//! Branch decisions.
//!
//! After a gated stage, [`decide`] folds the exit codes of the gating records
//! into a single [`BranchDecision`]. The graph turns that decision into a
//! [`StageResult`]: either the next stage or the error path.

use serde::{Deserialize, Serialize};

use crate::executor::ExecutionRecord;

/// Outcome of evaluating one branch point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchDecision {
    Continue,
    Divert,
}

/// Continues iff every record succeeded. An empty set continues.
pub fn decide<'a, I>(records: I) -> BranchDecision
where
    I: IntoIterator<Item = &'a ExecutionRecord>,
{
    if records.into_iter().all(ExecutionRecord::is_success) {
        BranchDecision::Continue
    } else {
        BranchDecision::Divert
    }
}

/// How a diverted run is reported.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// `Invalid` with the tail of the run log.
    #[default]
    ReportInvalid,
    /// `Error` with a fixed message.
    ReportError { message: String },
}

impl FailurePolicy {
    /// `Error` with "An error occurred in {pipeline}".
    pub fn error_in(pipeline: &str) -> Self {
        Self::ReportError {
            message: format!("An error occurred in {}", pipeline),
        }
    }
}

/// Where the graph goes after a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageResult {
    /// Proceed to the named stage, or to the join when `None`.
    Continue(Option<String>),
    /// Take the error path.
    Divert(FailurePolicy),
}
