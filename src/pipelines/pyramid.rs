//! `generic_pyramid`: tiles every OME-TIFF image of a dataset into an image
//! pyramid, one GPU worker per image.

use crate::branch::FailurePolicy;
use crate::command::{ArgVector, Invocation, MoveDataCommand, StageContext};
use crate::dataset::DatasetTypes;
use crate::engine::EngineConfig;
use crate::error::{CommandError, GraphError};
use crate::executor::QueueClass;
use crate::graph::{FileExpander, PipelineDefinition, SearchRoot, StageDef};

use super::OUTPUT_DIR;

pub const NAME: &str = "generic_pyramid";
const TILER_CWL: &str = "portal-containers/ome-tiff-tiler.cwl";
const IMAGE_SUFFIX: &str = ".ome.tiff";
const SKIP_FRAGMENT: &str = "toosmall";
const GPU_QUEUE: &str = "gpu000_q1";

pub fn definition(config: &EngineConfig) -> Result<PipelineDefinition, GraphError> {
    PipelineDefinition::builder(NAME, NAME)
        .derived(DatasetTypes::FromMetadata {
            key: "assay_type".to_string(),
            suffix: "_pyramid".to_string(),
        })
        .descriptor(config.pipeline_base_dir.join(TILER_CWL))
        .stage(StageDef::process("prepare_output", prepare_output).ungated())
        .stage(
            StageDef::fan_out(
                "tile_images",
                FileExpander::new(SearchRoot::Source, IMAGE_SUFFIX).excluding(SKIP_FRAGMENT),
                tile_image,
            )
            .queue(QueueClass::gpu(GPU_QUEUE))
            .on_failure(FailurePolicy::error_in(NAME)),
        )
        .stage(StageDef::process("move_data", MoveDataCommand::new(OUTPUT_DIR)).ungated())
        .build()
}

fn prepare_output(ctx: &StageContext<'_>) -> Result<Invocation, CommandError> {
    let argv = ArgVector::command(["mkdir", "-p"])
        .arg(ctx.workspace_path(OUTPUT_DIR).display().to_string());
    Ok(Invocation::new(argv))
}

/// One tiler run; each image gets its own output directory.
fn tile_image(ctx: &StageContext<'_>) -> Result<Invocation, CommandError> {
    let item = ctx.item()?;
    let argv = ArgVector::command(["cwltool", "--outdir"])
        .arg(format!("pyramid_{}", item.index))
        .arg(ctx.descriptor(TILER_CWL).display().to_string())
        .arg("--ometiff_file")
        .arg(item.path.display().to_string());
    Ok(Invocation::new(argv)
        .in_dir(OUTPUT_DIR)
        .with_tool_path(ctx.config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::WorkItem;
    use crate::graph::StageKind;
    use crate::pipelines::fixture::Fixture;
    use serde_json::json;

    #[test]
    fn test_tile_command() {
        let fx = Fixture::new(json!({"assay_type": "codex"}));
        let item = WorkItem::new(3, "/lz/abc123/img/slide 1.ome.tiff");
        let invocation = tile_image(&fx.ctx("tile_images_worker_3", Some(&item))).unwrap();
        assert_eq!(
            invocation.argv.to_shell_string(),
            "cwltool --outdir pyramid_3 /opt/pipelines/portal-containers/ome-tiff-tiler.cwl \
             --ometiff_file '/lz/abc123/img/slide 1.ome.tiff'"
        );
    }

    #[test]
    fn test_worker_needs_item() {
        let fx = Fixture::new(json!({}));
        let err = tile_image(&fx.ctx("tile_images", None)).unwrap_err();
        assert!(matches!(err, CommandError::MissingItem(_)));
    }

    #[test]
    fn test_definition_shape() {
        let def = definition(&EngineConfig::default()).unwrap();
        let tile = &def.stages[1];
        assert!(matches!(tile.kind, StageKind::FanOut { .. }));
        assert_eq!(tile.queue, QueueClass::gpu("gpu000_q1"));
    }
}
