//! rasterize-pages: render selected document pages to PNG.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use mf_av::EngineTask;
use mf_core::MediaFormat;

use crate::artifact::StageArtifact;
use crate::context::StageContext;
use crate::stage::Stage;

/// Render each page at the effective DPI, up to `fan_out` at a time.
/// Output keeps page order.
#[derive(Debug, Default)]
pub struct RasterizePages;

#[async_trait]
impl Stage for RasterizePages {
    fn name(&self) -> &'static str {
        "rasterize-pages"
    }

    async fn run(
        &self,
        ctx: &StageContext,
        input: Vec<StageArtifact>,
    ) -> mf_core::Result<Vec<StageArtifact>> {
        let dpi = ctx.dpi();

        futures::stream::iter(input)
            .map(|page| async move {
                let index = page.page.unwrap_or(0);
                let output = ctx.workspace.file(&format!("raster-{:04}.png", index + 1))?;
                let invocation = ctx
                    .invoke(EngineTask::RasterizePage {
                        input: page.path.clone(),
                        page: index,
                        dpi,
                        output: output.clone(),
                    })
                    .await?;
                let (width, height) = ctx.measure(&output, MediaFormat::Png, &invocation.engine)?;
                Ok::<_, mf_core::Error>(
                    StageArtifact::new(output, MediaFormat::Png)
                        .with_page(index)
                        .with_dimensions(width, height),
                )
            })
            .buffered(ctx.fan_out())
            .try_collect()
            .await
    }

    fn weight(&self) -> f32 {
        3.0
    }
}
