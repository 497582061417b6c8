//! Per-run workspaces.
//!
//! Every run owns exactly one temporary directory, named after its run id,
//! holding the run log (`session.log`) and any intermediate tool output.
//! Workspaces are never shared between runs.
//!
//! # Lifecycle
//!
//! - [`WorkspaceProvider::create`] allocates the directory before the first
//!   stage and fails if it already exists.
//! - [`WorkspaceProvider::destroy`] removes it and is a no-op when the
//!   directory is already gone.
//! - [`WorkspaceGuard`] brackets a run: the graph releases it on its terminal
//!   transition, and dropping an unreleased guard (for example when the run's
//!   future is cancelled) still removes the directory.

pub mod manager;

pub use manager::{LocalWorkspaces, Workspace, WorkspaceGuard, WorkspaceProvider, SESSION_LOG};
