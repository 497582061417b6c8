//! Pluggable producers of domain metadata.

use std::fs;
use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::context::RunContext;
use crate::error::MetadataError;
use crate::workspace::Workspace;

/// Key under which extractors place their record.
pub const METADATA_KEY: &str = "metadata";

/// Produces the structured record merged into run metadata.
///
/// The returned fields are merged at the top level of the metadata record.
pub trait Extractor: Send + Sync {
    fn extract(
        &self,
        run: &RunContext,
        workspace: &Workspace,
    ) -> Result<Map<String, Value>, MetadataError>;
}

/// Contributes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExtractor;

impl Extractor for NoopExtractor {
    fn extract(&self, _: &RunContext, _: &Workspace) -> Result<Map<String, Value>, MetadataError> {
        Ok(Map::new())
    }
}

/// Returns the trigger's `metadata_to_return` under `metadata`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerMetadataExtractor;

impl Extractor for TriggerMetadataExtractor {
    fn extract(&self, run: &RunContext, _: &Workspace) -> Result<Map<String, Value>, MetadataError> {
        let value = run
            .metadata_value("metadata_to_return")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let mut out = Map::new();
        out.insert(METADATA_KEY.to_string(), value);
        Ok(out)
    }
}

/// Reads a YAML mapping written into the workspace by a stage.
#[derive(Debug, Clone)]
pub struct YamlResultExtractor {
    file: PathBuf,
}

impl YamlResultExtractor {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }
}

impl Default for YamlResultExtractor {
    fn default() -> Self {
        Self::new("rslt.yml")
    }
}

impl Extractor for YamlResultExtractor {
    fn extract(&self, _: &RunContext, workspace: &Workspace) -> Result<Map<String, Value>, MetadataError> {
        let path = workspace.join(&self.file);
        if !path.is_file() {
            return Err(MetadataError::MissingResult(path));
        }
        let text = fs::read_to_string(&path)?;
        let value: Value = serde_yaml::from_str(&text)?;
        if !value.is_object() {
            return Err(MetadataError::NotAMapping(describe(&value).to_string()));
        }

        let mut out = Map::new();
        out.insert(METADATA_KEY.to_string(), value);
        Ok(out)
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{PlainToken, TriggerPayload};
    use crate::workspace::{LocalWorkspaces, WorkspaceProvider};
    use serde_json::json;
    use tempfile::TempDir;

    fn run(metadata: Value) -> RunContext {
        let payload = TriggerPayload {
            submission_id: Some("sub".to_string()),
            lz_path: Some(PathBuf::from("/lz/sub")),
            auth_tok: Some("tok".to_string()),
            metadata: metadata.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        };
        RunContext::from_trigger(&payload, &PlainToken).unwrap()
    }

    #[test]
    fn test_trigger_metadata_extractor() {
        let temp = TempDir::new().unwrap();
        let ws = LocalWorkspaces::new(temp.path()).create("r").unwrap();

        let out = TriggerMetadataExtractor
            .extract(&run(json!({"metadata_to_return": {"k": 1}})), &ws)
            .unwrap();
        assert_eq!(out["metadata"], json!({"k": 1}));

        let out = TriggerMetadataExtractor.extract(&run(json!({})), &ws).unwrap();
        assert_eq!(out["metadata"], json!({}));
    }

    #[test]
    fn test_yaml_result_extractor() {
        let temp = TempDir::new().unwrap();
        let ws = LocalWorkspaces::new(temp.path()).create("r").unwrap();
        fs::write(ws.join("rslt.yml"), "collectiontype: devtest\ncomponents:\n  - a\n").unwrap();

        let out = YamlResultExtractor::default().extract(&run(json!({})), &ws).unwrap();
        assert_eq!(out["metadata"], json!({"collectiontype": "devtest", "components": ["a"]}));
    }

    #[test]
    fn test_yaml_result_errors() {
        let temp = TempDir::new().unwrap();
        let ws = LocalWorkspaces::new(temp.path()).create("r").unwrap();

        let err = YamlResultExtractor::default().extract(&run(json!({})), &ws).unwrap_err();
        assert!(matches!(err, MetadataError::MissingResult(_)));

        fs::write(ws.join("rslt.yml"), "- a\n- b\n").unwrap();
        let err = YamlResultExtractor::default().extract(&run(json!({})), &ws).unwrap_err();
        assert!(matches!(err, MetadataError::NotAMapping(ref s) if s == "a list"));
    }

    #[test]
    fn test_noop_extractor() {
        let temp = TempDir::new().unwrap();
        let ws = LocalWorkspaces::new(temp.path()).create("r").unwrap();
        assert!(NoopExtractor.extract(&run(json!({})), &ws).unwrap().is_empty());
    }
}
