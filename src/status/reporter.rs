//! Turns a finished run into its status report.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::report::StatusReport;
use crate::branch::FailurePolicy;
use crate::context::RunContext;
use crate::dataset::Dataset;
use crate::error::MetadataError;
use crate::executor::ExecutionRecord;
use crate::metadata::{merge_provenance, run_entries, Extractor, FileManifest, MetadataRecord};
use crate::validation::MetadataSchema;
use crate::workspace::Workspace;

/// What the reporter needs to know about a run that reached the success path.
pub struct ReportInputs<'a> {
    pub pipeline: &'a str,
    pub run: &'a RunContext,
    pub workspace: &'a Workspace,
    pub dataset: &'a Dataset,
    pub records: &'a [ExecutionRecord],
    pub extractor: &'a dyn Extractor,
    /// Descriptor files recorded in provenance.
    pub provenance_files: &'a [PathBuf],
    /// Descriptors whose adjacent manifests describe the output.
    pub manifest_descriptors: &'a [PathBuf],
}

/// Builds status reports.
///
/// Report construction is pure apart from reading the workspace and the
/// dataset directory, so identical inputs give identical reports.
#[derive(Debug, Clone)]
pub struct MetadataReporter {
    schema: Arc<MetadataSchema>,
    log_tail_lines: usize,
}

impl MetadataReporter {
    pub fn new(schema: Arc<MetadataSchema>, log_tail_lines: usize) -> Self {
        Self {
            schema,
            log_tail_lines,
        }
    }

    /// Report for a run that did not divert.
    ///
    /// Any failed record, including ungated ones, makes the run `Invalid`
    /// with the log tail. Otherwise the metadata is assembled and validated.
    pub fn report(&self, inputs: &ReportInputs<'_>) -> StatusReport {
        let dataset_id = inputs.dataset.uuid.as_str();

        if let Some(failed) = inputs.records.iter().find(|r| !r.is_success()) {
            debug!(stage = %failed.stage_name, exit_code = failed.exit_code, "Reporting failed run");
            return StatusReport::invalid(dataset_id, self.log_tail(&inputs.workspace.log_path()));
        }

        let record = match self.assemble(inputs) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Metadata extraction failed");
                return StatusReport::error(
                    dataset_id,
                    format!("internal error; metadata extraction failed: {}", e),
                );
            }
        };

        let validation = self.schema.validate(&record.to_value());
        if !validation.valid {
            warn!(violations = %validation.summary(), "Run metadata violates schema");
            return StatusReport::error(
                dataset_id,
                format!("internal error; schema violation: {}", validation.summary()),
            );
        }

        StatusReport::qa(dataset_id, record.into_map())
    }

    /// Report for a run that took the error path.
    pub fn error_report(
        &self,
        policy: &FailurePolicy,
        dataset: &Dataset,
        workspace: &Workspace,
    ) -> StatusReport {
        match policy {
            FailurePolicy::ReportInvalid => {
                StatusReport::invalid(dataset.uuid.as_str(), self.log_tail(&workspace.log_path()))
            }
            FailurePolicy::ReportError { message } => StatusReport::error(dataset.uuid.as_str(), message.as_str()),
        }
    }

    fn assemble(&self, inputs: &ReportInputs<'_>) -> Result<MetadataRecord, MetadataError> {
        let entries = run_entries(inputs.pipeline, inputs.provenance_files);
        let provenance = merge_provenance(&inputs.run.provenance, &entries);
        let extracted = inputs.extractor.extract(inputs.run, inputs.workspace)?;
        let manifest = FileManifest::for_descriptors(inputs.manifest_descriptors)?
            .describe_directory(&inputs.dataset.path)?;
        Ok(MetadataRecord::assemble(provenance, extracted, manifest))
    }

    /// The last lines of the run log.
    pub fn log_tail(&self, log_path: &Path) -> String {
        match std::fs::read(log_path) {
            Ok(bytes) => tail_lines(&String::from_utf8_lossy(&bytes), self.log_tail_lines),
            Err(e) => {
                warn!(path = %log_path.display(), error = %e, "Cannot read run log");
                format!("run log unavailable: {}", e)
            }
        }
    }
}

fn tail_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
