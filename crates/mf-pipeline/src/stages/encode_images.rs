//! encode-images: write each raster in the target format.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use mf_av::{EngineTask, Fit};

use crate::artifact::StageArtifact;
use crate::context::StageContext;
use crate::stage::Stage;

/// Encode every artifact to the target format.
///
/// Paged artifacts become `page-NNNN.ext`; a lone unpaged artifact becomes
/// `output.ext`.
#[derive(Debug, Default)]
pub struct EncodeImages {
    resize: bool,
}

impl EncodeImages {
    /// `resize` applies the requested output box here; leave it off when an
    /// earlier stage already resized.
    pub fn new(resize: bool) -> Self {
        Self { resize }
    }
}

#[async_trait]
impl Stage for EncodeImages {
    fn name(&self) -> &'static str {
        "encode-images"
    }

    async fn run(
        &self,
        ctx: &StageContext,
        input: Vec<StageArtifact>,
    ) -> mf_core::Result<Vec<StageArtifact>> {
        let target = ctx.target;
        let fit = if self.resize { ctx.fit() } else { Fit::default() };
        let quality = Some(ctx.quality());

        futures::stream::iter(input)
            .map(|artifact| async move {
                let name = match artifact.page {
                    Some(page) => format!("page-{:04}.{}", page + 1, target.extension()),
                    None => format!("output.{}", target.extension()),
                };
                let output = ctx.workspace.file(&name)?;
                let invocation = ctx
                    .invoke(EngineTask::TranscodeImage {
                        input: artifact.path.clone(),
                        from: artifact.format,
                        output: output.clone(),
                        to: target,
                        fit,
                        quality,
                    })
                    .await?;
                let (width, height) = ctx.measure(&output, target, &invocation.engine)?;
                let mut encoded = StageArtifact::new(output, target).with_dimensions(width, height);
                encoded.page = artifact.page;
                Ok::<_, mf_core::Error>(encoded)
            })
            .buffered(ctx.fan_out())
            .try_collect()
            .await
    }

    fn weight(&self) -> f32 {
        2.0
    }
}
