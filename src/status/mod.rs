//! Status reporting.
//!
//! Every run ends in exactly one [`StatusReport`] sent to a [`StatusSink`].
//! The [`MetadataReporter`] decides the outcome: `QA` with validated
//! metadata, `Error` for schema violations and explicit error paths, and
//! `Invalid` with the run log tail when a stage failed.

pub mod report;
pub mod reporter;
pub mod sink;

pub use report::{RunOutcome, StatusMethod, StatusReport};
pub use reporter::{MetadataReporter, ReportInputs};
pub use sink::{HttpStatusSink, MemorySink, StatusSink};
