//! overlay-text: draw the requested text onto every raster.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use mf_av::{EngineTask, TextSpec};

use crate::artifact::StageArtifact;
use crate::context::StageContext;
use crate::stage::Stage;

/// Composite the overlay text onto each artifact with a fontconfig-resolved
/// font. Passes artifacts through untouched when no overlay was requested.
#[derive(Debug, Default)]
pub struct OverlayText;

#[async_trait]
impl Stage for OverlayText {
    fn name(&self) -> &'static str {
        "overlay-text"
    }

    async fn run(
        &self,
        ctx: &StageContext,
        input: Vec<StageArtifact>,
    ) -> mf_core::Result<Vec<StageArtifact>> {
        let Some(overlay) = &ctx.options.text else {
            return Ok(input);
        };

        let font_file = ctx.resolve_font(overlay.font_family.as_deref()).await?;
        let spec = TextSpec {
            text: overlay.text.clone(),
            font_file,
            size: overlay.font_size,
            color: overlay.color.clone(),
            x: overlay.x,
            y: overlay.y,
        };
        let spec = &spec;

        futures::stream::iter(input.into_iter().enumerate())
            .map(|(i, artifact)| async move {
                let output = ctx.workspace.file(&format!(
                    "text-{:04}.{}",
                    i + 1,
                    artifact.format.extension()
                ))?;
                let invocation = ctx
                    .invoke(EngineTask::CompositeText {
                        input: artifact.path.clone(),
                        format: artifact.format,
                        output: output.clone(),
                        text: spec.clone(),
                    })
                    .await?;
                let (width, height) = ctx.measure(&output, artifact.format, &invocation.engine)?;
                Ok::<_, mf_core::Error>(StageArtifact {
                    path: output,
                    width,
                    height,
                    ..artifact
                })
            })
            .buffered(ctx.fan_out())
            .try_collect()
            .await
    }
}
