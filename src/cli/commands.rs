//! CLI command definitions for ingestflow.
//!
//! This module provides the command-line interface for running registered
//! pipelines against trigger payloads, listing pipelines, and checking run
//! metadata against the dataset schema.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use crate::context::TriggerPayload;
use crate::engine::{Engine, EngineConfig};
use crate::graph::{FollowUp, RunSummary};
use crate::metrics::{export_metrics, init_metrics};
use crate::registry::PipelineRegistry;
use crate::validation::MetadataSchema;

/// Default directory for datasets allocated by dry runs.
const DEFAULT_DRY_RUN_DATASETS: &str = "./ingest-datasets";

/// Trigger-driven ingest pipeline engine.
#[derive(Parser)]
#[command(name = "ingestflow")]
#[command(about = "Run multi-stage ingest pipelines and report dataset status")]
#[command(version)]
#[command(
    long_about = "ingestflow runs registered ingest pipelines for trigger payloads.\n\nEach run gets its own workspace, executes its stages as shell processes, and sends exactly one status report (QA, Error or Invalid) to the ingest API.\n\nExample usage:\n  ingestflow run --pipeline devtest_step2 --trigger trigger.json --dry-run"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run a pipeline once per trigger payload.
    Run(RunArgs),

    /// List registered pipelines.
    #[command(alias = "ls")]
    List(ListArgs),

    /// Validate a metadata document against the dataset metadata schema.
    CheckMetadata(CheckMetadataArgs),
}

/// Arguments for `ingestflow run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Registered pipeline name.
    #[arg(short, long)]
    pub pipeline: String,

    /// Trigger payload JSON files; runs execute concurrently.
    #[arg(short, long, required = true, num_args = 1..)]
    pub trigger: Vec<PathBuf>,

    /// Keep registration and status reports local instead of calling the ingest API.
    #[arg(long)]
    pub dry_run: bool,

    /// Directory for datasets allocated by a dry run.
    #[arg(long, default_value = DEFAULT_DRY_RUN_DATASETS)]
    pub dataset_root: PathBuf,

    /// Write Prometheus metrics to this file after the batch.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `ingestflow list`.
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Output JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `ingestflow check-metadata`.
#[derive(Parser, Debug)]
pub struct CheckMetadataArgs {
    /// Metadata JSON document.
    #[arg(short, long)]
    pub file: PathBuf,

    /// Schema YAML file; the built-in dataset schema is used when omitted.
    #[arg(short, long)]
    pub schema: Option<PathBuf>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args).await,
        Commands::List(args) => run_list_command(args),
        Commands::CheckMetadata(args) => run_check_metadata_command(args),
    }
}

#[derive(Debug, Clone, Serialize)]
struct RunEntry {
    trigger: String,
    run_id: Option<String>,
    dataset_id: Option<String>,
    outcome: Option<String>,
    message: Option<String>,
    follow_up: Option<FollowUp>,
    error: Option<String>,
}

impl RunEntry {
    fn from_summary(trigger: &Path, summary: &RunSummary) -> Self {
        Self {
            trigger: trigger.display().to_string(),
            run_id: Some(summary.run_id.clone()),
            dataset_id: Some(summary.report.dataset_id.clone()),
            outcome: Some(summary.outcome().to_string()),
            message: Some(summary.report.message.clone()),
            follow_up: summary.follow_up.clone(),
            error: None,
        }
    }

    fn from_error(trigger: &Path, error: impl std::fmt::Display) -> Self {
        Self {
            trigger: trigger.display().to_string(),
            run_id: None,
            dataset_id: None,
            outcome: None,
            message: None,
            follow_up: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct RunOutput {
    status: String,
    pipeline: String,
    dry_run: bool,
    completed: usize,
    failed: usize,
    runs: Vec<RunEntry>,
}

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    let config = EngineConfig::from_env()?;
    init_metrics().map_err(|e| anyhow::anyhow!("Failed to initialize metrics: {}", e))?;

    let triggers = args
        .trigger
        .iter()
        .map(|path| {
            TriggerPayload::from_file(path)
                .map_err(|e| anyhow::anyhow!("Cannot read trigger {}: {}", path.display(), e))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let registry = PipelineRegistry::with_builtins();
    let engine = if args.dry_run {
        let (engine, _sink) = Engine::dry_run(config, registry, &args.dataset_root)?;
        engine
    } else {
        Engine::http(config, registry)?
    };

    info!(pipeline = %args.pipeline, runs = triggers.len(), dry_run = args.dry_run, "Running pipeline");
    let results = engine.run_batch(&args.pipeline, &triggers).await;

    let runs: Vec<RunEntry> = args
        .trigger
        .iter()
        .zip(&results)
        .map(|(path, result)| match result {
            Ok(summary) => RunEntry::from_summary(path, summary),
            Err(e) => {
                warn!(trigger = %path.display(), error = %e, "Run failed");
                RunEntry::from_error(path, e)
            }
        })
        .collect();

    let failed = runs.iter().filter(|r| r.error.is_some()).count();
    let output = RunOutput {
        status: if failed == 0 {
            "success".to_string()
        } else {
            "failed".to_string()
        },
        pipeline: args.pipeline.clone(),
        dry_run: args.dry_run,
        completed: runs.len() - failed,
        failed,
        runs,
    };

    if let Some(path) = &args.metrics_out {
        fs::write(path, export_metrics())?;
        info!(path = %path.display(), "Metrics written");
    }

    if args.json {
        let json_output = serde_json::to_string_pretty(&output)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json_output);
    } else {
        for run in &output.runs {
            match (&run.outcome, &run.error) {
                (Some(outcome), _) => println!(
                    "{}  {}  {}",
                    run.run_id.as_deref().unwrap_or("-"),
                    outcome,
                    run.dataset_id.as_deref().unwrap_or("-")
                ),
                (None, Some(error)) => println!("{}  error: {}", run.trigger, error),
                (None, None) => {}
            }
            if let Some(follow_up) = &run.follow_up {
                println!("  follow-up: {} ({})", follow_up.pipeline, follow_up.trigger);
            }
        }
    }

    if failed > 0 {
        return Err(anyhow::anyhow!(
            "{} of {} runs failed",
            failed,
            output.completed + failed
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
struct PipelineEntry {
    name: String,
    workflow: String,
    stages: Vec<String>,
}

fn run_list_command(args: ListArgs) -> anyhow::Result<()> {
    let config = EngineConfig::from_env()?;
    let registry = PipelineRegistry::with_builtins();

    let mut entries = Vec::new();
    for name in registry.names() {
        let def = registry.instantiate(name, &config)?;
        entries.push(PipelineEntry {
            name: def.name.clone(),
            workflow: def.workflow_name.clone(),
            stages: def.stages.iter().map(|s| s.name.clone()).collect(),
        });
    }

    if args.json {
        let json_output = serde_json::to_string_pretty(&entries)
            .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
        println!("{}", json_output);
    } else {
        for entry in &entries {
            println!("{:<28} {}", entry.name, entry.stages.join(" -> "));
        }
    }
    Ok(())
}

fn run_check_metadata_command(args: CheckMetadataArgs) -> anyhow::Result<()> {
    let text = fs::read_to_string(&args.file)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", args.file.display(), e))?;
    let document: serde_json::Value = serde_json::from_str(&text)?;
    let schema = MetadataSchema::load(args.schema.as_deref())?;

    let result = schema.validate(&document);
    for warning in &result.warnings {
        warn!(file = %args.file.display(), "{}", warning);
    }
    if !result.valid {
        return Err(anyhow::anyhow!(
            "{} does not match the schema: {}",
            args.file.display(),
            result.summary()
        ));
    }

    println!("{}: valid", args.file.display());
    Ok(())
}
