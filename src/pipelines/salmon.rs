//! `salmon_rnaseq_10x`: quantifies 10x RNA-seq reads and converts the
//! marker-gene table for the portal.

use crate::branch::FailurePolicy;
use crate::command::{ArgVector, Invocation, MoveDataCommand, StageContext};
use crate::dataset::DatasetTypes;
use crate::engine::EngineConfig;
use crate::error::{CommandError, GraphError};
use crate::graph::{PipelineDefinition, StageDef};

use super::OUTPUT_DIR;

pub const NAME: &str = "salmon_rnaseq_10x";
const WORKFLOW: &str = "salmon-rnaseq";
const PIPELINE_CWL: &str = "salmon-rnaseq/pipeline.cwl";
const ARROW_CWL: &str = "portal-containers/h5ad-to-arrow.cwl";
const MARKER_GENES_FILE: &str = "cluster_marker_genes.h5ad";
const MARKER_GENES_DIR: &str = "cluster-marker-genes";

pub fn definition(config: &EngineConfig) -> Result<PipelineDefinition, GraphError> {
    let base = &config.pipeline_base_dir;
    PipelineDefinition::builder(NAME, WORKFLOW)
        .derived(DatasetTypes::fixed([NAME]))
        .descriptor(base.join(PIPELINE_CWL))
        .descriptor(base.join(ARROW_CWL))
        .stage(
            StageDef::process("pipeline_exec", quantify)
                .on_failure(FailurePolicy::error_in(WORKFLOW)),
        )
        .stage(StageDef::process("move_files", collect_marker_genes).ungated())
        .stage(
            StageDef::process("make_arrow1", make_arrow)
                .on_failure(FailurePolicy::error_in(WORKFLOW)),
        )
        .stage(StageDef::process("move_data", MoveDataCommand::new(OUTPUT_DIR)).ungated())
        .build()
}

fn quantify(ctx: &StageContext<'_>) -> Result<Invocation, CommandError> {
    let argv = ArgVector::command(["cwltool", "--debug", "--outdir"])
        .arg(ctx.workspace_path(OUTPUT_DIR).display().to_string())
        .arg("--parallel")
        .arg(ctx.descriptor(PIPELINE_CWL).display().to_string())
        .arg("--fastq_dir")
        .arg(ctx.run.source_path.display().to_string())
        .arg("--threads")
        .arg(ctx.config.workflow_threads.to_string());
    Ok(Invocation::new(argv).with_tool_path(ctx.config))
}

fn collect_marker_genes(_ctx: &StageContext<'_>) -> Result<Invocation, CommandError> {
    let argv = ArgVector::command(["mkdir", MARKER_GENES_DIR])
        .then(ArgVector::command(["mv", MARKER_GENES_FILE, MARKER_GENES_DIR]));
    Ok(Invocation::new(argv).in_dir(OUTPUT_DIR))
}

fn make_arrow(ctx: &StageContext<'_>) -> Result<Invocation, CommandError> {
    let argv = ArgVector::command(["cwltool"])
        .arg(ctx.descriptor(ARROW_CWL).display().to_string())
        .args(["--input_dir", "."]);
    Ok(Invocation::new(argv)
        .in_dir(format!("{}/{}", OUTPUT_DIR, MARKER_GENES_DIR))
        .with_tool_path(ctx.config))
}
