//! Pipeline graphs and the run loop.
//!
//! A [`PipelineDefinition`] is a static graph of stages: process stages run
//! one command, fan-out stages expand into one worker per item at run time.
//! Each gated stage is followed by a branch point that either continues or
//! diverts to the error report. [`PipelineRunner`] walks one definition for
//! one trigger and sends exactly one status report.

pub mod definition;
pub mod fanout;
pub mod followup;
pub mod runner;

pub use definition::{Gate, PipelineBuilder, PipelineDefinition, StageDef, StageKind, Successor};
pub use fanout::{Expander, FileExpander, SearchRoot};
pub use followup::{FollowUp, FollowUpTable};
pub use runner::{PipelineRunner, RunServices, RunState, RunSummary};
