//! Command construction for pipeline stages.
//!
//! A stage's [`CommandSpec`] turns the run context into an [`Invocation`]:
//! an [`ArgVector`] plus working directory and environment. Argument vectors
//! keep literal shell operators ([`ControlToken`]) apart from data, and data
//! tokens are always quoted into a single shell word.

pub mod builder;
pub mod tokens;

pub use builder::{
    parse_numeric_param, string_list_param, CommandSpec, Invocation, MoveDataCommand,
    StageContext, WorkItem,
};
pub use tokens::{shell_quote, ArgVector, ControlToken, Token};
