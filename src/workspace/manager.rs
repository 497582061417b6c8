//! Workspace allocation, removal and the cleanup guard.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::error::WorkspaceError;

/// File name of the run log inside a workspace.
pub const SESSION_LOG: &str = "session.log";

/// A run's working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    run_id: String,
    path: PathBuf,
}

impl Workspace {
    pub fn new(run_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            run_id: run_id.into(),
            path: path.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the run log.
    pub fn log_path(&self) -> PathBuf {
        self.path.join(SESSION_LOG)
    }

    /// Resolves a path relative to the workspace root.
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }
}

/// Creates and removes run workspaces.
pub trait WorkspaceProvider: Send + Sync {
    /// Allocates the workspace for `run_id`.
    ///
    /// # Errors
    ///
    /// Returns `WorkspaceError::AlreadyExists` if the directory exists and
    /// `WorkspaceError::Unwritable` if it cannot be created.
    fn create(&self, run_id: &str) -> Result<Workspace, WorkspaceError>;

    /// Removes a workspace. Removing a missing workspace succeeds.
    fn destroy(&self, path: &Path) -> Result<(), WorkspaceError>;
}

/// Workspaces allocated as subdirectories of a local root.
#[derive(Debug, Clone)]
pub struct LocalWorkspaces {
    root: PathBuf,
}

impl LocalWorkspaces {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory a run id maps to.
    pub fn path_for(&self, run_id: &str) -> PathBuf {
        self.root.join(directory_name(run_id))
    }
}

impl WorkspaceProvider for LocalWorkspaces {
    fn create(&self, run_id: &str) -> Result<Workspace, WorkspaceError> {
        let path = self.path_for(run_id);
        let unwritable = |source| WorkspaceError::Unwritable {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.root).map_err(unwritable)?;

        // create_dir (not create_dir_all) so that a concurrent run with the same
        // id loses instead of sharing the directory
        match fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(WorkspaceError::AlreadyExists { path });
            }
            Err(e) => return Err(unwritable(e)),
        }

        fs::File::create(path.join(SESSION_LOG)).map_err(unwritable)?;

        info!(run_id, path = %path.display(), "Workspace created");
        Ok(Workspace::new(run_id, path))
    }

    fn destroy(&self, path: &Path) -> Result<(), WorkspaceError> {
        match fs::remove_dir_all(path) {
            Ok(()) => {
                info!(path = %path.display(), "Workspace removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "Workspace already absent");
                Ok(())
            }
            Err(source) => Err(WorkspaceError::Cleanup {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Maps a run id to a single path component.
fn directory_name(run_id: &str) -> String {
    run_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Removes a workspace exactly once, on release or on drop.
pub struct WorkspaceGuard {
    provider: Arc<dyn WorkspaceProvider>,
    path: Option<PathBuf>,
}

impl WorkspaceGuard {
    pub fn new(provider: Arc<dyn WorkspaceProvider>, workspace: &Workspace) -> Self {
        Self {
            provider,
            path: Some(workspace.path().to_path_buf()),
        }
    }

    /// Removes the workspace now. Later calls and the drop are no-ops.
    pub fn release(&mut self) -> Result<(), WorkspaceError> {
        match self.path.take() {
            Some(path) => self.provider.destroy(&path),
            None => Ok(()),
        }
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = self.provider.destroy(&path) {
                error!(error = %e, "Workspace cleanup failed on abort");
            }
        }
    }
}
