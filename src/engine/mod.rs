//! The ingest engine: pipeline dispatch by name.
//!
//! [`Engine`] ties the pipeline registry to a [`PipelineRunner`]. A trigger
//! names a pipeline; the engine instantiates its definition, builds the run
//! context and runs it. Batches run concurrently up to
//! `max_concurrent_runs`, each in its own workspace.
//!
//! # Example
//!
//! ```no_run
//! use ingestflow::context::TriggerPayload;
//! use ingestflow::engine::{Engine, EngineConfig};
//! use ingestflow::registry::PipelineRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::http(EngineConfig::from_env()?, PipelineRegistry::with_builtins())?;
//! let trigger = TriggerPayload::from_file("trigger.json".as_ref())?;
//! let summary = engine.run("devtest_step2", &trigger).await?;
//! println!("{}", summary.outcome());
//! # Ok(())
//! # }
//! ```

pub mod config;

pub use config::{ConfigError, EngineConfig};

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::context::{Base64Token, PlainToken, RunContext, TokenDecryptor, TriggerPayload};
use crate::dataset::{HttpRegistrar, LocalRegistrar};
use crate::error::EngineError;
use crate::executor::StageExecutor;
use crate::graph::{PipelineDefinition, PipelineRunner, RunServices, RunSummary};
use crate::metrics::MetricsCollector;
use crate::registry::PipelineRegistry;
use crate::status::{HttpStatusSink, MemorySink, MetadataReporter};
use crate::validation::MetadataSchema;
use crate::workspace::LocalWorkspaces;

/// Runs registered pipelines for incoming triggers.
pub struct Engine {
    registry: PipelineRegistry,
    runner: PipelineRunner,
    decryptor: Arc<dyn TokenDecryptor>,
}

impl Engine {
    /// Creates an engine over explicit services.
    ///
    /// The token decryptor follows `decode_base64_tokens` in the services'
    /// configuration.
    pub fn new(registry: PipelineRegistry, services: RunServices) -> Self {
        let decryptor: Arc<dyn TokenDecryptor> = if services.config.decode_base64_tokens {
            Arc::new(Base64Token)
        } else {
            Arc::new(PlainToken)
        };
        Self {
            registry,
            runner: PipelineRunner::new(Arc::new(services)),
            decryptor,
        }
    }

    /// Engine talking to the ingest API for registration and status.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` if the configuration is invalid, the schema
    /// cannot be loaded, or an HTTP client cannot be built.
    pub fn http(config: EngineConfig, registry: PipelineRegistry) -> Result<Self, EngineError> {
        config.validate()?;
        let services = RunServices {
            workspaces: Arc::new(LocalWorkspaces::new(&config.workspace_root)),
            registrar: Arc::new(HttpRegistrar::new(&config)?),
            sink: Arc::new(HttpStatusSink::new(&config)?),
            executor: StageExecutor::from_config(&config),
            reporter: reporter_for(&config)?,
            config: Arc::new(config),
            metrics: MetricsCollector::new(),
        };
        Ok(Self::new(registry, services))
    }

    /// Engine that never leaves the machine.
    ///
    /// Derived datasets are allocated under `dataset_root` and reports are
    /// kept in the returned sink.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` if the configuration is invalid or the schema
    /// cannot be loaded.
    pub fn dry_run(
        config: EngineConfig,
        registry: PipelineRegistry,
        dataset_root: impl Into<PathBuf>,
    ) -> Result<(Self, Arc<MemorySink>), EngineError> {
        config.validate()?;
        let sink = Arc::new(MemorySink::new());
        let services = RunServices {
            workspaces: Arc::new(LocalWorkspaces::new(&config.workspace_root)),
            registrar: Arc::new(LocalRegistrar::new(dataset_root)),
            sink: sink.clone(),
            executor: StageExecutor::from_config(&config),
            reporter: reporter_for(&config)?,
            config: Arc::new(config),
            metrics: MetricsCollector::new(),
        };
        Ok((Self::new(registry, services), sink))
    }

    /// Replaces the token decryptor.
    pub fn with_decryptor(mut self, decryptor: impl TokenDecryptor + 'static) -> Self {
        self.decryptor = Arc::new(decryptor);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.runner.services().config
    }

    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    /// Runs `pipeline` once for `trigger`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError` for an unknown pipeline, a malformed trigger, or
    /// any error propagated by the run itself.
    pub async fn run(
        &self,
        pipeline: &str,
        trigger: &TriggerPayload,
    ) -> Result<RunSummary, EngineError> {
        let (def, run) = self.prepare(pipeline, trigger)?;
        self.runner.run(&def, run).await
    }

    /// Runs `pipeline` for every trigger, at most `max_concurrent_runs` at once.
    ///
    /// Each run is its own task. Results are returned in trigger order.
    pub async fn run_batch(
        &self,
        pipeline: &str,
        triggers: &[TriggerPayload],
    ) -> Vec<Result<RunSummary, EngineError>> {
        let limit = self.config().max_concurrent_runs.max(1);
        let permits = Arc::new(Semaphore::new(limit));
        info!(pipeline, runs = triggers.len(), limit, "Starting batch");

        let handles: Vec<_> = triggers
            .iter()
            .map(|trigger| {
                let prepared = self.prepare(pipeline, trigger);
                let runner = self.runner.clone();
                let permits = permits.clone();
                tokio::spawn(async move {
                    let (def, run) = prepared?;
                    let _permit = permits.acquire_owned().await;
                    runner.run(&def, run).await
                })
            })
            .collect();

        join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or_else(|e| Err(EngineError::from(e))))
            .collect()
    }

    fn prepare(
        &self,
        pipeline: &str,
        trigger: &TriggerPayload,
    ) -> Result<(PipelineDefinition, RunContext), EngineError> {
        let def = self.registry.instantiate(pipeline, self.config())?;
        let run = RunContext::from_trigger(trigger, self.decryptor.as_ref())?;
        debug!(run_id = %run.run_id, pipeline, "Dispatching run");
        Ok((def, run))
    }
}

fn reporter_for(config: &EngineConfig) -> Result<MetadataReporter, EngineError> {
    let schema = MetadataSchema::load(config.schema_path.as_deref())?;
    Ok(MetadataReporter::new(Arc::new(schema), config.log_tail_lines))
}
