//! `devtest_step2`: a smoke-test pipeline that waits, copies a few source
//! files and moves them into a derived dataset.

use crate::branch::FailurePolicy;
use crate::command::{
    parse_numeric_param, string_list_param, ArgVector, Invocation, MoveDataCommand, StageContext,
};
use crate::dataset::DatasetTypes;
use crate::engine::EngineConfig;
use crate::error::{CommandError, GraphError};
use crate::graph::{PipelineDefinition, StageDef};
use crate::metadata::TriggerMetadataExtractor;

use super::OUTPUT_DIR;

pub const NAME: &str = "devtest_step2";
const WORKFLOW: &str = "devtest-step2-pipeline";
const DEFAULT_DELAY_SECS: u64 = 30;

pub fn definition(_config: &EngineConfig) -> Result<PipelineDefinition, GraphError> {
    PipelineDefinition::builder(NAME, WORKFLOW)
        .derived(DatasetTypes::fixed(["devtest"]))
        .extractor(TriggerMetadataExtractor)
        .stage(
            StageDef::process("pipeline_exec", copy_files)
                .on_failure(FailurePolicy::error_in(WORKFLOW)),
        )
        .stage(StageDef::process("move_data", MoveDataCommand::new(OUTPUT_DIR)).ungated())
        .build()
}

/// `sleep DELAY ; cd SOURCE ; mkdir -p OUT ; cp FILES... OUT`
fn copy_files(ctx: &StageContext<'_>) -> Result<Invocation, CommandError> {
    let delay: u64 = parse_numeric_param(
        "delay_sec",
        ctx.run.metadata_value("delay_sec"),
        DEFAULT_DELAY_SECS,
    );
    let files = string_list_param(ctx.run, "files_to_copy")?;
    let out = ctx.workspace_path(OUTPUT_DIR).display().to_string();

    let mut argv = ArgVector::command(["sleep"])
        .arg(delay.to_string())
        .then(ArgVector::command(["cd"]).arg(ctx.run.source_path.display().to_string()))
        .then(ArgVector::command(["mkdir", "-p"]).arg(out.as_str()));
    if !files.is_empty() {
        argv = argv.then(ArgVector::command(["cp"]).args(files).arg(out));
    }

    Ok(Invocation::new(argv))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::fixture::Fixture;
    use serde_json::json;

    #[test]
    fn test_copy_command() {
        let fx = Fixture::new(json!({"delay_sec": "5", "files_to_copy": ["a.txt", "b c.txt"]}));
        let invocation = copy_files(&fx.ctx("pipeline_exec", None)).unwrap();
        assert_eq!(
            invocation.argv.to_shell_string(),
            "sleep 5 ; cd /lz/abc123 ; mkdir -p /tmp/ws/run-1/cwl_out ; \
             cp a.txt 'b c.txt' /tmp/ws/run-1/cwl_out"
        );
    }

    #[test]
    fn test_unparseable_delay_uses_default() {
        let fx = Fixture::new(json!({"delay_sec": "soon"}));
        let invocation = copy_files(&fx.ctx("pipeline_exec", None)).unwrap();
        assert_eq!(
            invocation.argv.to_shell_string(),
            "sleep 30 ; cd /lz/abc123 ; mkdir -p /tmp/ws/run-1/cwl_out"
        );
    }

    #[test]
    fn test_bad_file_list() {
        let fx = Fixture::new(json!({"files_to_copy": "a.txt"}));
        let err = copy_files(&fx.ctx("pipeline_exec", None)).unwrap_err();
        assert!(matches!(err, CommandError::InvalidField { .. }));
    }

    #[test]
    fn test_definition_shape() {
        let def = definition(&EngineConfig::default()).unwrap();
        assert_eq!(def.stages.len(), 2);
        assert_eq!(
            def.stages[0].on_failure,
            FailurePolicy::error_in("devtest-step2-pipeline")
        );
    }
}
