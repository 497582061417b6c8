//! Trigger payloads and the run context derived from them.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::credential::{Credential, TokenDecryptor};
use crate::error::TriggerError;

/// The structured payload that starts a run.
///
/// Derived-dataset pipelines are triggered with the parent-keyed fields
/// (`parent_submission_id`, `parent_lz_path`, `crypt_auth_tok`); pipelines that
/// work on a dataset in place receive `submission_id`, `lz_path` and `auth_tok`.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_submission_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_tok: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypt_auth_tok: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lz_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_lz_path: Option<PathBuf>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dag_provenance: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dag_provenance_list: Option<Vec<Value>>,
}

impl TriggerPayload {
    /// Parses a payload from JSON text.
    pub fn from_json(text: &str) -> Result<Self, TriggerError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a payload from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, TriggerError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

// Tokens are shown redacted.
impl fmt::Debug for TriggerPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |token: &Option<String>| token.as_ref().map(|t| Credential::new(t.as_str()));
        f.debug_struct("TriggerPayload")
            .field("run_id", &self.run_id)
            .field("submission_id", &self.submission_id)
            .field("parent_submission_id", &self.parent_submission_id)
            .field("auth_tok", &redact(&self.auth_tok))
            .field("crypt_auth_tok", &redact(&self.crypt_auth_tok))
            .field("lz_path", &self.lz_path)
            .field("parent_lz_path", &self.parent_lz_path)
            .field("metadata", &self.metadata)
            .field("dag_provenance", &self.dag_provenance)
            .field("dag_provenance_list", &self.dag_provenance_list)
            .finish()
    }
}

/// Provenance accumulated by upstream triggers.
///
/// A payload carries either a map or a list, never both.
#[derive(Debug, Clone, PartialEq)]
pub enum Provenance {
    Map(Map<String, Value>),
    List(Vec<Value>),
}

impl Provenance {
    fn from_payload(payload: &TriggerPayload) -> Result<Self, TriggerError> {
        match (&payload.dag_provenance, &payload.dag_provenance_list) {
            (Some(_), Some(_)) => Err(TriggerError::ConflictingProvenance),
            (Some(map), None) => Ok(Self::Map(map.clone())),
            (None, Some(list)) => Ok(Self::List(list.clone())),
            (None, None) => Ok(Self::List(Vec::new())),
        }
    }
}

/// Immutable input for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Identifier of this run; names the workspace.
    pub run_id: String,
    /// Dataset the run reads from.
    pub dataset_id: String,
    /// Location of the source data.
    pub source_path: PathBuf,
    /// Credential for ingest API calls.
    pub credential: Credential,
    /// Free-form, pipeline-specific metadata supplied by the trigger.
    pub metadata: Map<String, Value>,
    /// Provenance accumulated upstream.
    pub provenance: Provenance,
}

impl RunContext {
    /// Builds a run context from a trigger payload.
    ///
    /// A missing `run_id` gets a generated one. `crypt_auth_tok` takes
    /// precedence over `auth_tok` and is passed through `decryptor`.
    ///
    /// # Errors
    ///
    /// Returns `TriggerError` if a required field is missing, the token cannot be
    /// decrypted, or both provenance forms are present.
    pub fn from_trigger(
        payload: &TriggerPayload,
        decryptor: &dyn TokenDecryptor,
    ) -> Result<Self, TriggerError> {
        let run_id = payload
            .run_id
            .clone()
            .unwrap_or_else(|| format!("run-{}", Uuid::new_v4()));

        let dataset_id = payload
            .parent_submission_id
            .clone()
            .or_else(|| payload.submission_id.clone())
            .ok_or_else(|| TriggerError::MissingField("parent_submission_id".to_string()))?;

        let source_path = payload
            .parent_lz_path
            .clone()
            .or_else(|| payload.lz_path.clone())
            .ok_or_else(|| TriggerError::MissingField("parent_lz_path".to_string()))?;

        let credential = match (&payload.crypt_auth_tok, &payload.auth_tok) {
            (Some(encrypted), _) => decryptor.decrypt(encrypted)?,
            (None, Some(plain)) => Credential::new(plain.clone()),
            (None, None) => return Err(TriggerError::MissingField("auth_tok".to_string())),
        };

        let provenance = Provenance::from_payload(payload)?;

        Ok(Self {
            run_id,
            dataset_id,
            source_path,
            credential,
            metadata: payload.metadata.clone(),
            provenance,
        })
    }

    /// Looks up a trigger metadata value.
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Looks up a trigger metadata value that must be a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::credential::PlainToken;
    use serde_json::json;

    fn derived_payload() -> TriggerPayload {
        TriggerPayload::from_json(
            &json!({
                "run_id": "run-42",
                "parent_submission_id": "abc123",
                "parent_lz_path": "/lz/Vanderbilt/abc123",
                "crypt_auth_tok": "secret-token",
                "metadata": {"delay_sec": "10", "files_to_copy": ["a.txt"]},
                "dag_provenance_list": ["scan.dag ingestflow-0.1.0"]
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_from_trigger_parent_keys() {
        let ctx = RunContext::from_trigger(&derived_payload(), &PlainToken).unwrap();
        assert_eq!(ctx.run_id, "run-42");
        assert_eq!(ctx.dataset_id, "abc123");
        assert_eq!(ctx.source_path, PathBuf::from("/lz/Vanderbilt/abc123"));
        assert_eq!(ctx.credential.expose(), "secret-token");
        assert_eq!(ctx.metadata_str("delay_sec"), Some("10"));
        assert_eq!(
            ctx.provenance,
            Provenance::List(vec![json!("scan.dag ingestflow-0.1.0")])
        );
    }

    #[test]
    fn test_from_trigger_direct_keys() {
        let payload = TriggerPayload {
            submission_id: Some("sub-1".to_string()),
            lz_path: Some(PathBuf::from("/lz/sub-1")),
            auth_tok: Some("plain".to_string()),
            ..Default::default()
        };
        let ctx = RunContext::from_trigger(&payload, &PlainToken).unwrap();
        assert_eq!(ctx.dataset_id, "sub-1");
        assert!(ctx.run_id.starts_with("run-"));
        assert_eq!(ctx.provenance, Provenance::List(Vec::new()));
    }

    #[test]
    fn test_conflicting_provenance_is_flagged() {
        let mut payload = derived_payload();
        payload.dag_provenance = Some(Map::new());
        let err = RunContext::from_trigger(&payload, &PlainToken).unwrap_err();
        assert!(matches!(err, TriggerError::ConflictingProvenance));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let mut payload = derived_payload();
        payload.auth_tok = Some("plain-secret-value".to_string());
        let rendered = format!("{:?}", payload);
        assert!(!rendered.contains("secret-token"));
        assert!(!rendered.contains("plain-secret-value"));
        assert!(rendered.contains("run-42"));
    }

    #[test]
    fn test_missing_token() {
        let mut payload = derived_payload();
        payload.crypt_auth_tok = None;
        let err = RunContext::from_trigger(&payload, &PlainToken).unwrap_err();
        assert!(err.to_string().contains("auth_tok"));
    }

    #[test]
    fn test_missing_source_path() {
        let mut payload = derived_payload();
        payload.parent_lz_path = None;
        let err = RunContext::from_trigger(&payload, &PlainToken).unwrap_err();
        assert!(err.to_string().contains("parent_lz_path"));
    }

    #[test]
    fn test_provenance_map() {
        let mut payload = derived_payload();
        payload.dag_provenance_list = None;
        payload.dag_provenance = Some(
            json!({"trig_codex.dag": "ingestflow-0.1.0"})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let ctx = RunContext::from_trigger(&payload, &PlainToken).unwrap();
        assert!(matches!(ctx.provenance, Provenance::Map(ref m) if m.len() == 1));
    }
}
