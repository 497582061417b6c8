//! Integration tests driving whole runs through `/bin/sh` stages.
//!
//! Datasets are allocated locally and status reports land in an in-memory
//! sink, so no test touches the network.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tempfile::TempDir;

use ingestflow::branch::FailurePolicy;
use ingestflow::command::{
    parse_numeric_param, ArgVector, ControlToken, Invocation, StageContext, WorkItem,
};
use ingestflow::context::{Credential, PlainToken, RunContext, TriggerPayload};
use ingestflow::dataset::{Dataset, DatasetRegistrar, DatasetTypes, LocalRegistrar, RegistrationRequest};
use ingestflow::executor::{ExecutionRecord, StageExecutor};
use ingestflow::graph::{PipelineDefinition, PipelineRunner, RunServices, RunState, StageDef};
use ingestflow::metadata::{Extractor, TriggerMetadataExtractor, ENGINE_VERSION};
use ingestflow::metrics::MetricsCollector;
use ingestflow::status::{MemorySink, MetadataReporter, ReportInputs, StatusSink};
use ingestflow::validation::MetadataSchema;
use ingestflow::workspace::{LocalWorkspaces, Workspace, WorkspaceProvider};
use ingestflow::{
    CommandError, EngineConfig, EngineError, MetadataError, RegistrationError, RunOutcome,
    WorkspaceError,
};

// ============================================================================
// Fixtures
// ============================================================================

/// Local workspaces that count removals.
struct CountingWorkspaces {
    inner: LocalWorkspaces,
    destroyed: AtomicUsize,
}

impl WorkspaceProvider for CountingWorkspaces {
    fn create(&self, run_id: &str) -> Result<Workspace, WorkspaceError> {
        self.inner.create(run_id)
    }

    fn destroy(&self, path: &Path) -> Result<(), WorkspaceError> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        self.inner.destroy(path)
    }
}

struct RejectingRegistrar;

#[async_trait]
impl DatasetRegistrar for RejectingRegistrar {
    async fn register(
        &self,
        _request: &RegistrationRequest,
        _credential: &Credential,
    ) -> Result<Dataset, RegistrationError> {
        Err(RegistrationError::Rejected {
            status: 400,
            body: "no such parent".to_string(),
        })
    }
}

/// Puts a non-mapping under `metadata`.
struct ScalarMetadata;

impl Extractor for ScalarMetadata {
    fn extract(&self, _: &RunContext, _: &Workspace) -> Result<Map<String, Value>, MetadataError> {
        let mut out = Map::new();
        out.insert("metadata".to_string(), json!(42));
        Ok(out)
    }
}

struct Harness {
    temp: TempDir,
    workspaces: Arc<CountingWorkspaces>,
    sink: Arc<MemorySink>,
    runner: PipelineRunner,
}

impl Harness {
    fn new() -> Self {
        Self::with(MemorySink::new(), None)
    }

    fn with(sink: MemorySink, registrar: Option<Arc<dyn DatasetRegistrar>>) -> Self {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig::new()
            .with_workspace_root(temp.path().join("tmp"))
            .with_pipeline_base_dir(temp.path().join("pipelines"));
        let workspaces = Arc::new(CountingWorkspaces {
            inner: LocalWorkspaces::new(temp.path().join("tmp")),
            destroyed: AtomicUsize::new(0),
        });
        let sink = Arc::new(sink);
        let registrar: Arc<dyn DatasetRegistrar> = match registrar {
            Some(registrar) => registrar,
            None => Arc::new(LocalRegistrar::new(temp.path().join("derived"))),
        };

        let services = RunServices {
            workspaces: workspaces.clone(),
            registrar,
            sink: sink.clone(),
            executor: StageExecutor::new("/bin/sh"),
            reporter: MetadataReporter::new(Arc::new(MetadataSchema::embedded().unwrap()), 20),
            config: Arc::new(config),
            metrics: MetricsCollector::new(),
        };

        Self {
            temp,
            workspaces,
            sink,
            runner: PipelineRunner::new(Arc::new(services)),
        }
    }

    fn source(&self) -> PathBuf {
        let source = self.temp.path().join("lz/parent-1");
        std::fs::create_dir_all(&source).unwrap();
        source
    }

    fn trigger(&self, run_id: &str, extra: Value) -> RunContext {
        let mut payload = json!({
            "run_id": run_id,
            "parent_submission_id": "parent-1",
            "parent_lz_path": self.source(),
            "crypt_auth_tok": "secret",
            "metadata": {"metadata_to_return": {"sample": "s1"}}
        });
        if let (Some(base), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        let payload = TriggerPayload::from_json(&payload.to_string()).unwrap();
        RunContext::from_trigger(&payload, &PlainToken).unwrap()
    }

    fn destroyed(&self) -> usize {
        self.workspaces.destroyed.load(Ordering::SeqCst)
    }

    fn workspace_exists(&self, run_id: &str) -> bool {
        self.temp.path().join("tmp").join(run_id).exists()
    }
}

fn derived(name: &str) -> ingestflow::graph::PipelineBuilder {
    PipelineDefinition::builder(name, format!("{}-workflow", name))
        .derived(DatasetTypes::fixed(["test"]))
        .extractor(TriggerMetadataExtractor)
}

/// Writes `result.txt` into the dataset.
fn write_output(ctx: &StageContext<'_>) -> Result<Invocation, CommandError> {
    let target = ctx.dataset.path.join("result.txt").display().to_string();
    Ok(Invocation::new(
        ArgVector::command(["echo", "counts"])
            .control(ControlToken::Redirect)
            .arg(target),
    ))
}

fn exit_one(_ctx: &StageContext<'_>) -> Result<Invocation, CommandError> {
    Ok(Invocation::new(
        ArgVector::command(["echo", "tool crashed: bad input"])
            .then(ArgVector::command(["exit", "1"])),
    ))
}

fn no_items(_ctx: &StageContext<'_>) -> Result<Vec<WorkItem>, CommandError> {
    Ok(Vec::new())
}

fn never_runs(_ctx: &StageContext<'_>) -> Result<Invocation, CommandError> {
    Ok(Invocation::new(ArgVector::command(["false"])))
}

fn echo_delay(ctx: &StageContext<'_>) -> Result<Invocation, CommandError> {
    let delay: u64 = parse_numeric_param("delay_sec", ctx.run.metadata_value("delay_sec"), 30);
    let target = ctx.dataset.path.join("delay.txt").display().to_string();
    Ok(Invocation::new(
        ArgVector::command(["echo"])
            .arg(delay.to_string())
            .control(ControlToken::Redirect)
            .arg(target),
    ))
}

// ============================================================================
// Outcomes
// ============================================================================

#[tokio::test]
async fn test_success_reports_qa_with_metadata() {
    let h = Harness::new();
    let def = derived("success")
        .stage(StageDef::process("pipeline_exec", write_output))
        .build()
        .unwrap();

    let summary = h.runner.run(&def, h.trigger("run-a", json!({}))).await.unwrap();

    assert_eq!(summary.outcome(), RunOutcome::QA);
    assert_eq!(summary.report.message, "the process ran");
    assert_eq!(summary.records[0].exit_code, 0);

    let reports = h.sink.reports().await;
    assert_eq!(reports.len(), 1);
    let metadata = &reports[0].metadata;
    assert_eq!(metadata["metadata"], json!({"sample": "s1"}));
    assert_eq!(metadata["files"][0]["rel_path"], json!("result.txt"));
    assert_eq!(metadata["files"][0]["size"], json!(7));
    assert_eq!(
        metadata["dag_provenance_list"],
        json!([format!("success {}", ENGINE_VERSION)])
    );
}

#[tokio::test]
async fn test_stage_failure_reports_invalid_with_log_tail() {
    let h = Harness::new();
    let def = derived("failing")
        .stage(StageDef::process("pipeline_exec", exit_one))
        .stage(StageDef::process("after", write_output))
        .build()
        .unwrap();

    let summary = h.runner.run(&def, h.trigger("run-b", json!({}))).await.unwrap();

    assert_eq!(summary.outcome(), RunOutcome::Invalid);
    assert_eq!(summary.records.len(), 1);
    assert_eq!(summary.records[0].exit_code, 1);
    assert!(summary.report.message.contains("tool crashed: bad input"));
    assert!(summary.report.metadata.is_empty());
    assert!(summary.states.contains(&RunState::ErrorReport));
}

#[tokio::test]
async fn test_schema_violation_reports_error() {
    let h = Harness::new();
    let def = derived("violating")
        .extractor(ScalarMetadata)
        .stage(StageDef::process("pipeline_exec", write_output))
        .build()
        .unwrap();

    let summary = h.runner.run(&def, h.trigger("run-c", json!({}))).await.unwrap();

    assert_eq!(summary.outcome(), RunOutcome::Error);
    assert!(summary.report.metadata.is_empty());
    assert!(summary.report.message.starts_with("internal error; schema violation:"));
    assert!(summary.report.message.contains("metadata"));
}

#[tokio::test]
async fn test_empty_fan_out_proceeds_to_join() {
    let h = Harness::new();
    let def = derived("fan")
        .stage(StageDef::fan_out("workers", no_items, never_runs))
        .stage(StageDef::process("pipeline_exec", write_output))
        .build()
        .unwrap();

    let summary = h.runner.run(&def, h.trigger("run-d", json!({}))).await.unwrap();

    assert_eq!(summary.records.len(), 1);
    assert_eq!(summary.records[0].stage_name, "pipeline_exec");
    assert!(summary.states.contains(&RunState::Join));
    assert_eq!(summary.outcome(), RunOutcome::QA);
}

#[tokio::test]
async fn test_explicit_error_path() {
    let h = Harness::new();
    let def = derived("explicit")
        .stage(
            StageDef::process("pipeline_exec", exit_one)
                .on_failure(FailurePolicy::error_in("explicit-workflow")),
        )
        .build()
        .unwrap();

    let summary = h.runner.run(&def, h.trigger("run-e", json!({}))).await.unwrap();

    assert_eq!(summary.outcome(), RunOutcome::Error);
    assert_eq!(summary.report.message, "An error occurred in explicit-workflow");
}

// ============================================================================
// Cleanup
// ============================================================================

#[tokio::test]
async fn test_workspace_destroyed_once_on_success_and_failure() {
    let h = Harness::new();
    let ok = derived("ok")
        .stage(StageDef::process("pipeline_exec", write_output))
        .build()
        .unwrap();
    let bad = derived("bad")
        .stage(StageDef::process("pipeline_exec", exit_one))
        .build()
        .unwrap();

    h.runner.run(&ok, h.trigger("run-ok", json!({}))).await.unwrap();
    assert_eq!(h.destroyed(), 1);
    assert!(!h.workspace_exists("run-ok"));

    h.runner.run(&bad, h.trigger("run-bad", json!({}))).await.unwrap();
    assert_eq!(h.destroyed(), 2);
    assert!(!h.workspace_exists("run-bad"));
}

#[tokio::test]
async fn test_registration_failure_cleans_up_without_report() {
    let h = Harness::with(MemorySink::new(), Some(Arc::new(RejectingRegistrar) as Arc<dyn DatasetRegistrar>));
    let def = derived("unregistered")
        .stage(StageDef::process("pipeline_exec", write_output))
        .build()
        .unwrap();

    let err = h
        .runner
        .run(&def, h.trigger("run-reg", json!({})))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Registration(_)));
    assert_eq!(h.destroyed(), 1);
    assert!(!h.workspace_exists("run-reg"));
    assert!(h.sink.reports().await.is_empty());
}

#[tokio::test]
async fn test_reporting_failure_still_cleans_workspace() {
    let h = Harness::with(MemorySink::rejecting(502), None);
    let def = derived("unreported")
        .stage(StageDef::process("pipeline_exec", write_output))
        .build()
        .unwrap();

    let err = h
        .runner
        .run(&def, h.trigger("run-rep", json!({})))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Reporting(_)));
    assert_eq!(h.destroyed(), 1);
    assert!(!h.workspace_exists("run-rep"));
}

// ============================================================================
// Provenance, idempotence, parameters
// ============================================================================

#[tokio::test]
async fn test_provenance_map_is_extended_in_place() {
    let h = Harness::new();
    let descriptor = h.temp.path().join("pipelines/tool.cwl");
    std::fs::create_dir_all(descriptor.parent().unwrap()).unwrap();
    std::fs::write(&descriptor, "cwlVersion: v1.0\n").unwrap();

    let def = derived("traced")
        .descriptor(&descriptor)
        .stage(StageDef::process("pipeline_exec", write_output))
        .build()
        .unwrap();

    let run = h.trigger(
        "run-prov",
        json!({"dag_provenance": {"trig_codex.dag": "ingestflow-0.0.9"}}),
    );
    let summary = h.runner.run(&def, run).await.unwrap();

    assert_eq!(summary.outcome(), RunOutcome::QA);
    assert!(summary.report.metadata.get("dag_provenance_list").is_none());
    let provenance = summary.report.metadata["dag_provenance"].as_object().unwrap();
    assert_eq!(provenance["trig_codex.dag"], json!("ingestflow-0.0.9"));
    assert_eq!(provenance["traced"], json!(ENGINE_VERSION));
    let digest = provenance["tool.cwl"].as_str().unwrap();
    assert!(digest.starts_with("sha256:"));
    assert_eq!(digest.len(), "sha256:".len() + 64);
}

#[tokio::test]
async fn test_provenance_list_keeps_upstream_entries() {
    let h = Harness::new();
    let def = derived("listed")
        .stage(StageDef::process("pipeline_exec", write_output))
        .build()
        .unwrap();

    let run = h.trigger(
        "run-list",
        json!({"dag_provenance_list": ["scan_and_begin_processing ingestflow-0.0.9"]}),
    );
    let summary = h.runner.run(&def, run).await.unwrap();

    assert_eq!(
        summary.report.metadata["dag_provenance_list"],
        json!([
            "scan_and_begin_processing ingestflow-0.0.9",
            format!("listed {}", ENGINE_VERSION)
        ])
    );
}

#[test]
fn test_conflicting_provenance_is_rejected() {
    let payload = TriggerPayload::from_json(
        &json!({
            "parent_submission_id": "p",
            "parent_lz_path": "/lz/p",
            "auth_tok": "t",
            "dag_provenance": {},
            "dag_provenance_list": []
        })
        .to_string(),
    )
    .unwrap();

    assert!(RunContext::from_trigger(&payload, &PlainToken).is_err());
}

#[test]
fn test_reporter_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let source = temp.path().join("lz");
    let dataset_dir = temp.path().join("dataset");
    let ws_dir = temp.path().join("ws");
    std::fs::create_dir_all(&source).unwrap();
    std::fs::create_dir_all(&dataset_dir).unwrap();
    std::fs::create_dir_all(&ws_dir).unwrap();
    std::fs::write(dataset_dir.join("a.csv"), "x,y\n1,2\n").unwrap();
    std::fs::write(ws_dir.join("session.log"), "").unwrap();

    let payload = TriggerPayload {
        parent_submission_id: Some("parent".to_string()),
        parent_lz_path: Some(source),
        auth_tok: Some("t".to_string()),
        ..Default::default()
    };
    let run = RunContext::from_trigger(&payload, &PlainToken).unwrap();
    let workspace = Workspace::new("run", &ws_dir);
    let dataset = Dataset::new("uuid-1", &dataset_dir);
    let records = vec![ExecutionRecord::completed("pipeline_exec", 0, 0..0)];
    let reporter = MetadataReporter::new(Arc::new(MetadataSchema::embedded().unwrap()), 20);

    let inputs = ReportInputs {
        pipeline: "idem",
        run: &run,
        workspace: &workspace,
        dataset: &dataset,
        records: &records,
        extractor: &TriggerMetadataExtractor,
        provenance_files: &[],
        manifest_descriptors: &[],
    };

    let first = reporter.report(&inputs);
    let second = reporter.report(&inputs);
    assert_eq!(first.status, RunOutcome::QA);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_unparseable_numeric_param_falls_back_to_default() {
    assert_eq!(parse_numeric_param::<u64>("delay_sec", Some(&json!("soon")), 30), 30);
    assert_eq!(parse_numeric_param::<u64>("delay_sec", Some(&json!("5")), 30), 5);
    assert_eq!(parse_numeric_param::<u64>("delay_sec", None, 30), 30);

    let h = Harness::new();
    let def = derived("delayed")
        .stage(StageDef::process("pipeline_exec", echo_delay))
        .build()
        .unwrap();
    let summary = h
        .runner
        .run(&def, h.trigger("run-num", json!({"metadata": {"delay_sec": "later"}})))
        .await
        .unwrap();

    assert_eq!(summary.outcome(), RunOutcome::QA);
    let written = std::fs::read_to_string(summary.dataset.path.join("delay.txt")).unwrap();
    assert_eq!(written.trim(), "30");
}

#[tokio::test]
async fn test_memory_sink_records_single_report_per_run() {
    let sink = MemorySink::new();
    let h = Harness::with(sink, None);
    let def = derived("single")
        .stage(StageDef::process("pipeline_exec", write_output))
        .build()
        .unwrap();

    for run_id in ["run-1", "run-2"] {
        h.runner.run(&def, h.trigger(run_id, json!({}))).await.unwrap();
    }

    let reports = h.sink.reports().await;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.status == RunOutcome::QA));

    // Sink trait objects are usable directly.
    let direct: &dyn StatusSink = h.sink.as_ref();
    direct
        .send(&reports[0], &Credential::new("t"))
        .await
        .unwrap();
    assert_eq!(h.sink.reports().await.len(), 3);
}
