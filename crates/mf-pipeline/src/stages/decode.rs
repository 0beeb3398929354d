//! decode-image: normalize a raster input to a lossless intermediate.

use async_trait::async_trait;
use mf_av::EngineTask;
use mf_core::MediaFormat;

use crate::artifact::StageArtifact;
use crate::context::StageContext;
use crate::stage::Stage;

/// Transcode the input to PNG, applying the requested output box.
#[derive(Debug, Default)]
pub struct DecodeImage;

#[async_trait]
impl Stage for DecodeImage {
    fn name(&self) -> &'static str {
        "decode-image"
    }

    async fn run(
        &self,
        ctx: &StageContext,
        input: Vec<StageArtifact>,
    ) -> mf_core::Result<Vec<StageArtifact>> {
        let source = super::single(self.name(), input)?;
        let output = ctx.workspace.file("decoded.png")?;

        let invocation = ctx
            .invoke(EngineTask::TranscodeImage {
                input: source.path.clone(),
                from: source.format,
                output: output.clone(),
                to: MediaFormat::Png,
                fit: ctx.fit(),
                quality: None,
            })
            .await?;
        let (width, height) = ctx.measure(&output, MediaFormat::Png, &invocation.engine)?;

        Ok(vec![
            StageArtifact::new(output, MediaFormat::Png).with_dimensions(width, height)
        ])
    }
}
