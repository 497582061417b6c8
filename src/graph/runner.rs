//! The run loop: one pass over a pipeline graph for one trigger.
//!
//! A run walks a fixed sequence of states:
//!
//! ```text
//! Init -> WorkspaceReady -> DatasetRegistered -> Stage/Branch ... -> ErrorReport? -> Join -> Reported -> Cleaned
//! ```
//!
//! Stages execute in declaration order unless a successor skips ahead. After
//! each gated stage the branch evaluator either continues or diverts to the
//! error report. Both paths meet at the join, which sends exactly one status
//! report before the workspace is removed.

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use super::definition::{Gate, PipelineDefinition, StageDef, StageKind, Successor};
use super::followup::FollowUp;
use crate::branch::{decide, BranchDecision, FailurePolicy, StageResult};
use crate::command::{CommandSpec, StageContext};
use crate::context::RunContext;
use crate::dataset::{Dataset, DatasetRegistrar, DatasetTarget, RegistrationRequest};
use crate::engine::EngineConfig;
use crate::error::{EngineError, RegistrationError};
use crate::executor::runner::{append_note, log_offset};
use crate::executor::{ExecutionRecord, ExecutionRequest, StageExecutor};
use crate::metrics::MetricsCollector;
use crate::status::{MetadataReporter, ReportInputs, RunOutcome, StatusReport, StatusSink};
use crate::workspace::{Workspace, WorkspaceGuard, WorkspaceProvider};

/// Position of a run in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum RunState {
    Init,
    WorkspaceReady,
    DatasetRegistered,
    /// Executing the stage at this index.
    Stage(usize),
    /// Evaluating the gate after the stage at this index.
    Branch(usize),
    ErrorReport,
    Join,
    Reported,
    Cleaned,
}

/// Collaborators shared by every run of an engine.
pub struct RunServices {
    pub workspaces: Arc<dyn WorkspaceProvider>,
    pub registrar: Arc<dyn DatasetRegistrar>,
    pub sink: Arc<dyn StatusSink>,
    pub executor: StageExecutor,
    pub reporter: MetadataReporter,
    pub config: Arc<EngineConfig>,
    pub metrics: MetricsCollector,
}

/// What a finished run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub pipeline: String,
    pub dataset: Dataset,
    pub report: StatusReport,
    pub records: Vec<ExecutionRecord>,
    pub states: Vec<RunState>,
    /// Stage whose gate diverted the run to the error path.
    pub diverted_at: Option<String>,
    /// Next pipeline to trigger, when the definition routes one.
    pub follow_up: Option<FollowUp>,
}

impl RunSummary {
    pub fn outcome(&self) -> RunOutcome {
        self.report.status
    }
}

/// Where the stage walk ended.
struct Walk {
    records: Vec<ExecutionRecord>,
    diverted: Option<(String, FailurePolicy)>,
}

/// Executes pipeline definitions against run contexts.
#[derive(Clone)]
pub struct PipelineRunner {
    services: Arc<RunServices>,
}

impl PipelineRunner {
    pub fn new(services: Arc<RunServices>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &RunServices {
        &self.services
    }

    /// Runs `def` once for `run`.
    ///
    /// Stage failures never surface as errors; they decide the report. The
    /// workspace is removed on every path once it exists, including when
    /// registration or reporting fails.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` when the workspace cannot be allocated or
    /// removed, when dataset registration fails, or when the status report
    /// cannot be delivered.
    pub async fn run(
        &self,
        def: &PipelineDefinition,
        run: RunContext,
    ) -> Result<RunSummary, EngineError> {
        let services = &self.services;
        let mut states = vec![RunState::Init];

        info!(
            run_id = %run.run_id,
            pipeline = %def.name,
            dataset_id = %run.dataset_id,
            authorization = %format!("Bearer {}", run.credential),
            "Run starting"
        );

        let workspace = services.workspaces.create(&run.run_id)?;
        let mut guard = WorkspaceGuard::new(services.workspaces.clone(), &workspace);
        states.push(RunState::WorkspaceReady);
        debug!(path = %workspace.path().display(), "Workspace ready");

        let dataset = match self.resolve_dataset(def, &run).await {
            Ok(dataset) => dataset,
            Err(e) => {
                error!(run_id = %run.run_id, error = %e, "Dataset registration failed");
                if let Err(cleanup) = guard.release() {
                    error!(error = %cleanup, "Workspace cleanup failed");
                }
                return Err(e.into());
            }
        };
        states.push(RunState::DatasetRegistered);
        info!(dataset_uuid = %dataset.uuid, path = %dataset.path.display(), "Dataset ready");

        let walk = self
            .walk_stages(def, &run, &workspace, &dataset, &mut states)
            .await;

        // The error report runs whatever state the diverting stage left behind.
        if let Some((stage, _)) = &walk.diverted {
            states.push(RunState::ErrorReport);
            warn!(run_id = %run.run_id, stage = %stage, "Run diverted to error report");
        }
        let report = self.build_report(def, &run, &workspace, &dataset, &walk).await;

        // Exactly one of the two paths reaches the join.
        states.push(RunState::Join);

        let sent = services.sink.send(&report, &run.credential).await;
        match &sent {
            Ok(()) => {
                states.push(RunState::Reported);
                info!(
                    run_id = %run.run_id,
                    dataset_uuid = %report.dataset_id,
                    status = %report.status,
                    "Status reported"
                );
            }
            Err(e) => {
                services.metrics.record_reporting_failure(&def.name);
                error!(
                    run_id = %run.run_id,
                    dataset_uuid = %report.dataset_id,
                    status = %report.status,
                    error = %e,
                    "Status report was not delivered; dataset status needs manual attention"
                );
            }
        }

        let cleaned = guard.release();
        match &cleaned {
            Ok(()) => states.push(RunState::Cleaned),
            Err(e) => error!(run_id = %run.run_id, error = %e, "Workspace cleanup failed"),
        }

        sent?;
        cleaned?;

        services.metrics.record_run(&def.name, report.status.as_str());

        let follow_up = def
            .follow_up
            .as_ref()
            .and_then(|table| table.resolve(&run, &report));
        if let Some(next) = &follow_up {
            info!(trigger = %next.trigger, pipeline = %next.pipeline, "Follow-up pipeline selected");
        }

        Ok(RunSummary {
            run_id: run.run_id.clone(),
            pipeline: def.name.clone(),
            dataset,
            report,
            records: walk.records,
            states,
            diverted_at: walk.diverted.map(|(stage, _)| stage),
            follow_up,
        })
    }

    /// Assembles the report on the blocking pool, since it walks and hashes
    /// the whole dataset.
    async fn build_report(
        &self,
        def: &PipelineDefinition,
        run: &RunContext,
        workspace: &Workspace,
        dataset: &Dataset,
        walk: &Walk,
    ) -> StatusReport {
        let reporter = self.services.reporter.clone();
        let pipeline = def.name.clone();
        let extractor = def.extractor.clone();
        let provenance_files = def.provenance_files.clone();
        let manifest_descriptors = def.manifest_descriptors.clone();
        let run = run.clone();
        let workspace = workspace.clone();
        let dataset = dataset.clone();
        let records = walk.records.clone();
        let diverted = walk.diverted.clone();
        let dataset_id = dataset.uuid.clone();

        let assembled = tokio::task::spawn_blocking(move || match diverted {
            Some((_, policy)) => reporter.error_report(&policy, &dataset, &workspace),
            None => reporter.report(&ReportInputs {
                pipeline: &pipeline,
                run: &run,
                workspace: &workspace,
                dataset: &dataset,
                records: &records,
                extractor: extractor.as_ref(),
                provenance_files: &provenance_files,
                manifest_descriptors: &manifest_descriptors,
            }),
        })
        .await;

        match assembled {
            Ok(report) => report,
            Err(e) => {
                error!(dataset_uuid = %dataset_id, error = %e, "Report assembly did not finish");
                StatusReport::error(dataset_id, format!("internal error; report assembly failed: {}", e))
            }
        }
    }

    async fn resolve_dataset(
        &self,
        def: &PipelineDefinition,
        run: &RunContext,
    ) -> Result<Dataset, RegistrationError> {
        match &def.dataset {
            DatasetTarget::Existing => Ok(Dataset::existing(run)),
            DatasetTarget::Derived { types } => {
                let request =
                    RegistrationRequest::for_run(&def.name, &def.workflow_name, types, run)?;
                self.services
                    .registrar
                    .register(&request, &run.credential)
                    .await
            }
        }
    }

    async fn walk_stages(
        &self,
        def: &PipelineDefinition,
        run: &RunContext,
        workspace: &Workspace,
        dataset: &Dataset,
        states: &mut Vec<RunState>,
    ) -> Walk {
        let mut records: Vec<ExecutionRecord> = Vec::new();
        let mut by_stage: HashMap<&str, Range<usize>> = HashMap::new();
        let mut idx = 0;

        while let Some(stage) = def.stages.get(idx) {
            states.push(RunState::Stage(idx));
            let start = records.len();
            let produced = self.run_stage(def, stage, run, workspace, dataset).await;
            records.extend(produced);
            by_stage.insert(stage.name.as_str(), start..records.len());

            let next = match &stage.on_success {
                Successor::Next => def.stages.get(idx + 1).map(|s| s.name.clone()),
                Successor::Goto(target) => Some(target.clone()),
            };

            let result = match &stage.gate {
                Gate::Ungated => StageResult::Continue(next),
                gate => {
                    states.push(RunState::Branch(idx));
                    let mut gating: Vec<&ExecutionRecord> = records[start..].iter().collect();
                    if let Gate::With(others) = gate {
                        for other in others {
                            if let Some(range) = by_stage.get(other.as_str()) {
                                gating.extend(records[range.clone()].iter());
                            }
                        }
                    }
                    match decide(gating) {
                        BranchDecision::Continue => StageResult::Continue(next),
                        BranchDecision::Divert => StageResult::Divert(stage.on_failure.clone()),
                    }
                }
            };

            match result {
                StageResult::Continue(Some(name)) => {
                    idx = def.stage_index(&name).unwrap_or(def.stages.len());
                }
                StageResult::Continue(None) => break,
                StageResult::Divert(policy) => {
                    return Walk {
                        records,
                        diverted: Some((stage.name.clone(), policy)),
                    };
                }
            }
        }

        Walk {
            records,
            diverted: None,
        }
    }

    async fn run_stage(
        &self,
        def: &PipelineDefinition,
        stage: &StageDef,
        run: &RunContext,
        workspace: &Workspace,
        dataset: &Dataset,
    ) -> Vec<ExecutionRecord> {
        let config = self.services.config.as_ref();
        let queue = stage.queue.queue_name(&config.queue_prefix);
        let session_log = workspace.log_path();
        let ctx = StageContext {
            stage: &stage.name,
            run,
            workspace,
            dataset,
            config,
            item: None,
        };

        match &stage.kind {
            StageKind::Process(spec) => {
                let record = self
                    .run_process(&def.name, &stage.name, &queue, spec.as_ref(), &ctx, &session_log)
                    .await;
                vec![record]
            }
            StageKind::FanOut { expander, worker } => {
                let items = match expander.expand(&ctx) {
                    Ok(items) => items,
                    Err(e) => {
                        warn!(stage = %stage.name, error = %e, "Fan-out expansion failed");
                        return vec![failed_to_build(&stage.name, &e, &session_log).await];
                    }
                };

                self.services.metrics.record_fanout(&def.name, items.len());
                info!(stage = %stage.name, workers = items.len(), "Fanning out");

                let names: Vec<String> = items
                    .iter()
                    .map(|item| format!("{}_worker_{}", stage.name, item.index))
                    .collect();
                let logs: Vec<PathBuf> = names
                    .iter()
                    .map(|name| workspace.join(format!("{}.log", name)))
                    .collect();

                let queue = queue.as_str();
                let workers = items.iter().zip(&names).zip(&logs).map(|((item, name), log)| {
                    let ctx = StageContext {
                        stage: name,
                        item: Some(item),
                        ..ctx
                    };
                    async move {
                        self.run_process(&def.name, name, queue, worker.as_ref(), &ctx, log)
                            .await
                    }
                });
                let records = join_all(workers).await;

                merge_worker_logs(&session_log, records, &logs).await
            }
        }
    }

    async fn run_process(
        &self,
        pipeline: &str,
        stage_name: &str,
        queue: &str,
        spec: &dyn CommandSpec,
        ctx: &StageContext<'_>,
        log_path: &Path,
    ) -> ExecutionRecord {
        let started = Instant::now();

        let record = match spec.build(ctx) {
            Ok(invocation) => {
                self.services
                    .executor
                    .execute(ExecutionRequest {
                        stage_name,
                        queue,
                        invocation: &invocation,
                        workspace: ctx.workspace,
                        log_path,
                    })
                    .await
            }
            Err(e) => {
                warn!(stage = %stage_name, error = %e, "Cannot build stage command");
                failed_to_build(stage_name, &e, log_path).await
            }
        };

        self.services.metrics.record_stage(
            pipeline,
            record.is_success(),
            started.elapsed().as_secs_f64(),
        );
        record
    }
}

/// Record for a stage whose command never got as far as a process.
async fn failed_to_build(
    stage_name: &str,
    err: &impl std::fmt::Display,
    log_path: &Path,
) -> ExecutionRecord {
    let offset = log_offset(log_path).await;
    append_note(log_path, &format!("[{}] {}", stage_name, err)).await;
    ExecutionRecord::spawn_failed(stage_name, err.to_string(), offset)
}

/// Appends each worker log to the session log in item order.
///
/// Record ranges are rebased onto the session log, and the worker logs are
/// removed once copied.
async fn merge_worker_logs(
    session_log: &Path,
    records: Vec<ExecutionRecord>,
    worker_logs: &[PathBuf],
) -> Vec<ExecutionRecord> {
    let mut merged = Vec::with_capacity(records.len());
    for (record, worker_log) in records.into_iter().zip(worker_logs) {
        let base = log_offset(session_log).await;
        match tokio::fs::read(worker_log).await {
            Ok(bytes) => {
                if let Err(e) = append_bytes(session_log, &bytes).await {
                    warn!(log = %worker_log.display(), error = %e, "Cannot merge worker log");
                }
                if let Err(e) = tokio::fs::remove_file(worker_log).await {
                    debug!(log = %worker_log.display(), error = %e, "Cannot remove worker log");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(log = %worker_log.display(), error = %e, "Cannot read worker log"),
        }
        merged.push(record.rebased(base));
    }
    merged
}

async fn append_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}
