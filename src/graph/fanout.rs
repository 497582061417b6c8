//! Fan-out expansion.

use std::path::PathBuf;

use walkdir::WalkDir;

use crate::command::{StageContext, WorkItem};
use crate::error::CommandError;

/// The expand step of a fan-out stage: returns one item per worker.
///
/// Runs when the graph reaches the stage, after every earlier stage finished.
/// An empty result means the stage has nothing to do.
pub trait Expander: Send + Sync {
    fn expand(&self, ctx: &StageContext<'_>) -> Result<Vec<WorkItem>, CommandError>;
}

impl<F> Expander for F
where
    F: Fn(&StageContext<'_>) -> Result<Vec<WorkItem>, CommandError> + Send + Sync,
{
    fn expand(&self, ctx: &StageContext<'_>) -> Result<Vec<WorkItem>, CommandError> {
        self(ctx)
    }
}

/// Where [`FileExpander`] searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchRoot {
    /// The run's source data.
    Source,
    /// A directory inside the workspace.
    Workspace(PathBuf),
}

/// One work item per file under a root whose name ends with a suffix.
///
/// Files are visited recursively in path order; paths containing any of the
/// excluded fragments are skipped.
#[derive(Debug, Clone)]
pub struct FileExpander {
    root: SearchRoot,
    suffix: String,
    exclude: Vec<String>,
}

impl FileExpander {
    pub fn new(root: SearchRoot, suffix: impl Into<String>) -> Self {
        Self {
            root,
            suffix: suffix.into(),
            exclude: Vec::new(),
        }
    }

    pub fn excluding(mut self, fragment: impl Into<String>) -> Self {
        self.exclude.push(fragment.into());
        self
    }
}

impl Expander for FileExpander {
    fn expand(&self, ctx: &StageContext<'_>) -> Result<Vec<WorkItem>, CommandError> {
        let root = match &self.root {
            SearchRoot::Source => ctx.run.source_path.clone(),
            SearchRoot::Workspace(rel) => ctx.workspace_path(rel),
        };

        let mut items = Vec::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(|e| CommandError::Expansion {
                stage: ctx.stage.to_string(),
                reason: e.to_string(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path().to_string_lossy();
            if !path.ends_with(&self.suffix) || self.exclude.iter().any(|x| path.contains(x.as_str())) {
                continue;
            }
            items.push(WorkItem::new(items.len(), entry.path()));
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PlainToken, RunContext, TriggerPayload};
    use crate::dataset::Dataset;
    use crate::engine::EngineConfig;
    use crate::workspace::Workspace;
    use tempfile::TempDir;

    fn expand(expander: &FileExpander, source: &std::path::Path) -> Result<Vec<WorkItem>, CommandError> {
        let payload = TriggerPayload {
            parent_submission_id: Some("abc".to_string()),
            parent_lz_path: Some(source.to_path_buf()),
            auth_tok: Some("tok".to_string()),
            ..Default::default()
        };
        let run = RunContext::from_trigger(&payload, &PlainToken).unwrap();
        let workspace = Workspace::new("r", source.join("ws"));
        let dataset = Dataset::new("d", source.join("out"));
        let config = EngineConfig::default();
        let ctx = StageContext {
            stage: "workers",
            run: &run,
            workspace: &workspace,
            dataset: &dataset,
            config: &config,
            item: None,
        };
        expander.expand(&ctx)
    }

    #[test]
    fn test_file_expander() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("b")).unwrap();
        std::fs::create_dir_all(root.join("toosmall")).unwrap();
        std::fs::write(root.join("b/img2.ome.tiff"), "").unwrap();
        std::fs::write(root.join("a.ome.tiff"), "").unwrap();
        std::fs::write(root.join("toosmall/img3.ome.tiff"), "").unwrap();
        std::fs::write(root.join("notes.txt"), "").unwrap();

        let expander = FileExpander::new(SearchRoot::Source, ".ome.tiff").excluding("toosmall");
        let items = expand(&expander, root).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0], WorkItem::new(0, root.join("a.ome.tiff")));
        assert_eq!(items[1], WorkItem::new(1, root.join("b/img2.ome.tiff")));
    }

    #[test]
    fn test_no_matches_is_empty() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("notes.txt"), "").unwrap();

        let expander = FileExpander::new(SearchRoot::Source, ".ome.tiff");
        assert!(expand(&expander, temp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_root_is_error() {
        let expander = FileExpander::new(SearchRoot::Source, ".ome.tiff");
        let err = expand(&expander, std::path::Path::new("/nonexistent/lz")).unwrap_err();
        assert!(matches!(err, CommandError::Expansion { .. }));
    }
}
