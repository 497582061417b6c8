//! Pipeline definitions: stages, gates and successors.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::fanout::Expander;
use super::followup::FollowUpTable;
use crate::branch::FailurePolicy;
use crate::command::CommandSpec;
use crate::dataset::{DatasetTarget, DatasetTypes};
use crate::error::GraphError;
use crate::executor::QueueClass;
use crate::metadata::{Extractor, NoopExtractor};

/// What a stage runs.
#[derive(Clone)]
pub enum StageKind {
    /// One process.
    Process(Arc<dyn CommandSpec>),
    /// One worker process per item returned by the expander.
    FanOut {
        expander: Arc<dyn Expander>,
        worker: Arc<dyn CommandSpec>,
    },
}

impl fmt::Debug for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process(_) => f.write_str("Process"),
            Self::FanOut { .. } => f.write_str("FanOut"),
        }
    }
}

/// Which records decide the branch after a stage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Gate {
    /// The stage's own records.
    #[default]
    Own,
    /// No branch point; the records still count toward the final outcome.
    Ungated,
    /// The stage's own records plus those of the named earlier stages.
    With(Vec<String>),
}

/// Where a stage goes when its branch continues.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Successor {
    /// The next declared stage, or the join after the last one.
    #[default]
    Next,
    /// A later stage, skipping the ones between.
    Goto(String),
}

/// One stage of a pipeline.
#[derive(Debug, Clone)]
pub struct StageDef {
    pub name: String,
    pub kind: StageKind,
    pub queue: QueueClass,
    pub gate: Gate,
    pub on_success: Successor,
    pub on_failure: FailurePolicy,
}

impl StageDef {
    pub fn process(name: impl Into<String>, command: impl CommandSpec + 'static) -> Self {
        Self::new(name, StageKind::Process(Arc::new(command)))
    }

    pub fn fan_out(
        name: impl Into<String>,
        expander: impl Expander + 'static,
        worker: impl CommandSpec + 'static,
    ) -> Self {
        Self::new(
            name,
            StageKind::FanOut {
                expander: Arc::new(expander),
                worker: Arc::new(worker),
            },
        )
    }

    fn new(name: impl Into<String>, kind: StageKind) -> Self {
        Self {
            name: name.into(),
            kind,
            queue: QueueClass::General,
            gate: Gate::Own,
            on_success: Successor::Next,
            on_failure: FailurePolicy::ReportInvalid,
        }
    }

    pub fn queue(mut self, queue: QueueClass) -> Self {
        self.queue = queue;
        self
    }

    pub fn ungated(mut self) -> Self {
        self.gate = Gate::Ungated;
        self
    }

    pub fn gated_with<I, S>(mut self, stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gate = Gate::With(stages.into_iter().map(Into::into).collect());
        self
    }

    pub fn goto(mut self, stage: impl Into<String>) -> Self {
        self.on_success = Successor::Goto(stage.into());
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }
}

/// A complete pipeline: one instance of the run graph.
#[derive(Clone)]
pub struct PipelineDefinition {
    /// Registry name, e.g. `salmon_rnaseq_10x`.
    pub name: String,
    /// Workflow name used in derived dataset names, e.g. `salmon-rnaseq`.
    pub workflow_name: String,
    pub dataset: DatasetTarget,
    pub stages: Vec<StageDef>,
    pub extractor: Arc<dyn Extractor>,
    pub provenance_files: Vec<PathBuf>,
    pub manifest_descriptors: Vec<PathBuf>,
    pub follow_up: Option<FollowUpTable>,
}

impl fmt::Debug for PipelineDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineDefinition")
            .field("name", &self.name)
            .field("workflow_name", &self.workflow_name)
            .field("dataset", &self.dataset)
            .field("stages", &self.stages)
            .field("provenance_files", &self.provenance_files)
            .field("manifest_descriptors", &self.manifest_descriptors)
            .field("follow_up", &self.follow_up)
            .finish_non_exhaustive()
    }
}

impl PipelineDefinition {
    pub fn builder(name: impl Into<String>, workflow_name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name, workflow_name)
    }

    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Checks that the stage graph is well formed.
    ///
    /// Stage names are unique, successors point forward, and gates only name
    /// stages that run earlier.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.stages.is_empty() {
            return Err(GraphError::Empty(self.name.clone()));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(GraphError::DuplicateStage(stage.name.clone()));
            }
        }

        for (idx, stage) in self.stages.iter().enumerate() {
            if let Successor::Goto(target) = &stage.on_success {
                match self.stage_index(target) {
                    None => {
                        return Err(GraphError::UnknownSuccessor {
                            stage: stage.name.clone(),
                            target: target.clone(),
                        })
                    }
                    Some(t) if t <= idx => {
                        return Err(GraphError::BackwardEdge {
                            stage: stage.name.clone(),
                            target: target.clone(),
                        })
                    }
                    Some(_) => {}
                }
            }

            if let Gate::With(others) = &stage.gate {
                for other in others {
                    if !matches!(self.stage_index(other), Some(o) if o < idx) {
                        return Err(GraphError::UnknownGateStage {
                            stage: stage.name.clone(),
                            target: other.clone(),
                        });
                    }
                }
            }
        }

        Ok(())
    }
}

/// Builder for [`PipelineDefinition`].
pub struct PipelineBuilder {
    def: PipelineDefinition,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>, workflow_name: impl Into<String>) -> Self {
        Self {
            def: PipelineDefinition {
                name: name.into(),
                workflow_name: workflow_name.into(),
                dataset: DatasetTarget::Existing,
                stages: Vec::new(),
                extractor: Arc::new(NoopExtractor),
                provenance_files: Vec::new(),
                manifest_descriptors: Vec::new(),
                follow_up: None,
            },
        }
    }

    /// Registers a derived dataset before the first stage.
    pub fn derived(mut self, types: DatasetTypes) -> Self {
        self.def.dataset = DatasetTarget::Derived { types };
        self
    }

    /// Operates on the triggering dataset.
    pub fn existing(mut self) -> Self {
        self.def.dataset = DatasetTarget::Existing;
        self
    }

    pub fn stage(mut self, stage: StageDef) -> Self {
        self.def.stages.push(stage);
        self
    }

    pub fn extractor(mut self, extractor: impl Extractor + 'static) -> Self {
        self.def.extractor = Arc::new(extractor);
        self
    }

    /// Adds a workflow descriptor: recorded in provenance and searched for a manifest.
    pub fn descriptor(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.def.provenance_files.push(path.clone());
        self.def.manifest_descriptors.push(path);
        self
    }

    pub fn provenance_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.def.provenance_files.push(path.into());
        self
    }

    pub fn follow_up(mut self, table: FollowUpTable) -> Self {
        self.def.follow_up = Some(table);
        self
    }

    pub fn build(self) -> Result<PipelineDefinition, GraphError> {
        self.def.validate()?;
        Ok(self.def)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ArgVector, Invocation, StageContext};
    use crate::error::CommandError;

    fn noop(_: &StageContext<'_>) -> Result<Invocation, CommandError> {
        Ok(Invocation::new(ArgVector::command(["true"])))
    }

    #[test]
    fn test_build_valid_pipeline() {
        let def = PipelineDefinition::builder("p", "p-workflow")
            .stage(StageDef::process("a", noop).goto("c"))
            .stage(StageDef::process("b", noop))
            .stage(StageDef::process("c", noop).ungated())
            .stage(StageDef::process("d", noop).gated_with(["a", "c"]))
            .build()
            .unwrap();

        assert_eq!(def.stage_index("c"), Some(2));
        assert_eq!(def.stages[2].gate, Gate::Ungated);
        assert!(matches!(def.dataset, DatasetTarget::Existing));
    }

    #[test]
    fn test_empty_pipeline() {
        let err = PipelineDefinition::builder("p", "w").build().unwrap_err();
        assert!(matches!(err, GraphError::Empty(_)));
    }

    #[test]
    fn test_duplicate_stage() {
        let err = PipelineDefinition::builder("p", "w")
            .stage(StageDef::process("a", noop))
            .stage(StageDef::process("a", noop))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateStage(_)));
    }

    #[test]
    fn test_backward_and_unknown_edges() {
        let err = PipelineDefinition::builder("p", "w")
            .stage(StageDef::process("a", noop))
            .stage(StageDef::process("b", noop).goto("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::BackwardEdge { .. }));

        let err = PipelineDefinition::builder("p", "w")
            .stage(StageDef::process("a", noop).goto("zzz"))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownSuccessor { .. }));
    }

    #[test]
    fn test_gate_must_name_earlier_stage() {
        let err = PipelineDefinition::builder("p", "w")
            .stage(StageDef::process("a", noop).gated_with(["b"]))
            .stage(StageDef::process("b", noop))
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownGateStage { .. }));
    }
}
