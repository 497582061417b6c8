//! Follow-up dispatch after a successful scan.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::context::{Credential, RunContext, TriggerPayload};
use crate::metadata::{METADATA_KEY, PROVENANCE_LIST_KEY, PROVENANCE_MAP_KEY};
use crate::status::{RunOutcome, StatusReport};

/// Maps a value of the extracted metadata to the pipeline that should run next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowUpTable {
    key: String,
    targets: BTreeMap<String, String>,
}

impl FollowUpTable {
    /// Dispatches on `metadata[key]`.
    pub fn on(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            targets: BTreeMap::new(),
        }
    }

    pub fn route(mut self, value: impl Into<String>, pipeline: impl Into<String>) -> Self {
        self.targets.insert(value.into(), pipeline.into());
        self
    }

    pub fn targets(&self) -> impl Iterator<Item = (&str, &str)> {
        self.targets.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The follow-up for a finished run, if any.
    ///
    /// Only `QA` reports whose extracted metadata names a routed value produce
    /// a follow-up. Its trigger carries the run's dataset as parent, the
    /// extracted metadata and the reported provenance. The credential travels
    /// beside the payload and only joins it in [`FollowUp::dispatch_payload`].
    pub fn resolve(&self, run: &RunContext, report: &StatusReport) -> Option<FollowUp> {
        if report.status != RunOutcome::QA {
            return None;
        }
        let metadata = report.metadata.get(METADATA_KEY)?.as_object()?;
        let value = metadata.get(&self.key)?.as_str()?;
        let pipeline = self.targets.get(value)?;

        let payload = TriggerPayload {
            run_id: Some(format!("{}__{}", run.run_id, pipeline)),
            parent_submission_id: Some(run.dataset_id.clone()),
            parent_lz_path: Some(run.source_path.clone()),
            metadata: metadata.clone(),
            dag_provenance: report
                .metadata
                .get(PROVENANCE_MAP_KEY)
                .and_then(Value::as_object)
                .cloned(),
            dag_provenance_list: report
                .metadata
                .get(PROVENANCE_LIST_KEY)
                .and_then(Value::as_array)
                .cloned(),
            ..Default::default()
        };

        Some(FollowUp {
            trigger: format!("trig_{}", value),
            pipeline: pipeline.clone(),
            payload,
            credential: run.credential.clone(),
        })
    }
}

/// A run to start once the current one has reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FollowUp {
    /// Name of the downstream trigger, `trig_{value}`.
    pub trigger: String,
    /// Registry name of the pipeline to run.
    pub pipeline: String,
    /// Trigger for the next run, without its token.
    pub payload: TriggerPayload,
    #[serde(skip)]
    pub credential: Credential,
}

impl FollowUp {
    /// The payload to hand to the next run, token included.
    pub fn dispatch_payload(&self) -> TriggerPayload {
        TriggerPayload {
            auth_tok: Some(self.credential.expose().to_string()),
            ..self.payload.clone()
        }
    }
}
