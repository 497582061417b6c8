//! Dataset targets and derived-dataset registration.
//!
//! Pipelines either write into a newly registered derived dataset or operate
//! on the dataset they were triggered for. Registration goes through a
//! [`DatasetRegistrar`]: [`HttpRegistrar`] talks to the ingest API,
//! [`LocalRegistrar`] allocates directories locally for dry runs.

pub mod registrar;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::RegistrationError;

pub use registrar::{DatasetRegistrar, HttpRegistrar, LocalRegistrar};

/// The dataset a run writes to and reports on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub uuid: String,
    pub path: PathBuf,
}

impl Dataset {
    pub fn new(uuid: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            uuid: uuid.into(),
            path: path.into(),
        }
    }

    /// The triggering dataset itself.
    pub fn existing(run: &RunContext) -> Self {
        Self::new(run.dataset_id.clone(), run.source_path.clone())
    }
}

/// How a derived dataset's types are chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetTypes {
    Fixed(Vec<String>),
    /// `{metadata[key]}{suffix}`, e.g. `{assay_type}_pyramid`.
    FromMetadata { key: String, suffix: String },
}

impl DatasetTypes {
    pub fn fixed<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Fixed(types.into_iter().map(Into::into).collect())
    }

    pub fn resolve(&self, run: &RunContext) -> Result<Vec<String>, RegistrationError> {
        match self {
            Self::Fixed(types) => Ok(types.clone()),
            Self::FromMetadata { key, suffix } => run
                .metadata_str(key)
                .map(|value| vec![format!("{}{}", value, suffix)])
                .ok_or_else(|| RegistrationError::MissingDatasetType(key.clone())),
        }
    }
}

/// Which dataset a pipeline works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetTarget {
    /// Operate on the triggering dataset; no registration.
    Existing,
    /// Register a new dataset derived from the triggering one.
    Derived { types: DatasetTypes },
}

/// Body of a derived-dataset registration call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub source_dataset_uuid: String,
    pub derived_dataset_name: String,
    pub derived_dataset_types: Vec<String>,
}

impl RegistrationRequest {
    /// Builds the request for a run. The name is
    /// `{pipeline}__{parent dataset}__{workflow}`.
    pub fn for_run(
        pipeline: &str,
        workflow_name: &str,
        types: &DatasetTypes,
        run: &RunContext,
    ) -> Result<Self, RegistrationError> {
        Ok(Self {
            source_dataset_uuid: run.dataset_id.clone(),
            derived_dataset_name: format!("{}__{}__{}", pipeline, run.dataset_id, workflow_name),
            derived_dataset_types: types.resolve(run)?,
        })
    }
}
