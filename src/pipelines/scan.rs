//! `scan_and_begin_processing`: extracts metadata from a newly uploaded
//! dataset in place and picks the pipeline that should process it next.

use crate::command::{ArgVector, Invocation, StageContext};
use crate::engine::EngineConfig;
use crate::error::{CommandError, GraphError};
use crate::graph::{FollowUpTable, PipelineDefinition, StageDef};
use crate::metadata::YamlResultExtractor;

use super::{devtest, salmon};

pub const NAME: &str = "scan_and_begin_processing";
const EXTRACT_SCRIPT: &str = "md/metadata_extract.py";
const RESULT_FILE: &str = "rslt.yml";
const DISPATCH_KEY: &str = "collectiontype";

pub fn definition(config: &EngineConfig) -> Result<PipelineDefinition, GraphError> {
    PipelineDefinition::builder(NAME, NAME)
        .existing()
        .extractor(YamlResultExtractor::new(RESULT_FILE))
        .provenance_file(config.pipeline_base_dir.join(EXTRACT_SCRIPT))
        .stage(StageDef::process("run_md_extract", extract_metadata).ungated())
        .follow_up(
            FollowUpTable::on(DISPATCH_KEY)
                .route("rnaseq_10x", salmon::NAME)
                .route("devtest", devtest::NAME)
                .route("codex", "codex_cytokit"),
        )
        .build()
}

/// `python md/metadata_extract.py --out ./rslt.yml --yaml SOURCE`, run in the workspace.
fn extract_metadata(ctx: &StageContext<'_>) -> Result<Invocation, CommandError> {
    let argv = ArgVector::command(["python"])
        .arg(ctx.descriptor(EXTRACT_SCRIPT).display().to_string())
        .args(["--out", "./rslt.yml", "--yaml"])
        .arg(ctx.run.source_path.display().to_string());

    let pythonpath = match std::env::var("PYTHONPATH") {
        Ok(current) if !current.is_empty() => {
            format!("{}:{}", current, ctx.config.pipeline_base_dir.display())
        }
        _ => ctx.config.pipeline_base_dir.display().to_string(),
    };

    Ok(Invocation::new(argv)
        .with_env("PYTHONPATH", pythonpath)
        .with_tool_path(ctx.config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetTarget;
    use crate::pipelines::fixture::Fixture;
    use serde_json::json;

    #[test]
    fn test_extract_command() {
        let fx = Fixture::new(json!({}));
        let invocation = extract_metadata(&fx.ctx("run_md_extract", None)).unwrap();
        assert_eq!(
            invocation.argv.to_shell_string(),
            "python /opt/pipelines/md/metadata_extract.py --out ./rslt.yml --yaml /lz/abc123"
        );
        assert!(invocation
            .env
            .iter()
            .any(|(k, v)| k == "PYTHONPATH" && v.ends_with("/opt/pipelines")));
    }

    #[test]
    fn test_definition_routes_follow_ups() {
        let def = definition(&EngineConfig::default()).unwrap();
        assert_eq!(def.dataset, DatasetTarget::Existing);

        let table = def.follow_up.unwrap();
        let targets: Vec<(&str, &str)> = table.targets().collect();
        assert_eq!(
            targets,
            vec![
                ("codex", "codex_cytokit"),
                ("devtest", "devtest_step2"),
                ("rnaseq_10x", "salmon_rnaseq_10x"),
            ]
        );
    }
}
