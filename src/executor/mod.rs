//! Stage execution.
//!
//! [`StageExecutor`] runs one invocation through the configured shell inside
//! the run workspace, appending stdout and stderr to the run log, and returns
//! an [`ExecutionRecord`]. Failures to start a process are recorded as spawn
//! failures; they count as stage failures for branching but are kept distinct
//! from a non-zero exit.

pub mod record;
pub mod runner;
pub mod slots;

pub use record::{ExecutionRecord, SPAWN_FAILURE_EXIT_CODE};
pub use runner::{ExecutionRequest, StageExecutor};
pub use slots::{ExecutionSlots, QueueClass};
