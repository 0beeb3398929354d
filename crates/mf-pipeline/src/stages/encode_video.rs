//! encode-video: single-invocation audio/video transcode.

use async_trait::async_trait;
use mf_av::{DrawText, EngineTask, VideoEncode};
use mf_core::MediaKind;

use crate::artifact::StageArtifact;
use crate::context::StageContext;
use crate::stage::Stage;

/// Transcode the input with one ffmpeg run. A text overlay is rendered in
/// the same filter graph, reading its text from a workspace file.
#[derive(Debug, Default)]
pub struct EncodeVideo;

#[async_trait]
impl Stage for EncodeVideo {
    fn name(&self) -> &'static str {
        "encode-video"
    }

    async fn run(
        &self,
        ctx: &StageContext,
        input: Vec<StageArtifact>,
    ) -> mf_core::Result<Vec<StageArtifact>> {
        let source = super::single(self.name(), input)?;
        let target = ctx.target;

        let text = match &ctx.options.text {
            Some(overlay) if target.kind() != MediaKind::Audio => {
                let font_file = ctx.resolve_font(overlay.font_family.as_deref()).await?;
                let text_file = ctx.workspace.write("overlay.txt", &overlay.text)?;
                Some(DrawText {
                    text_file,
                    font_file,
                    size: overlay.font_size,
                    color: overlay.color.clone(),
                    x: overlay.x,
                    y: overlay.y,
                    window: None,
                })
            }
            _ => None,
        };

        let output = ctx
            .workspace
            .file(&format!("output.{}", target.extension()))?;
        let invocation = ctx
            .invoke(EngineTask::EncodeVideo(VideoEncode {
                input: source.path.clone(),
                input_format: source.format,
                output: output.clone(),
                output_format: target,
                fit: ctx.fit(),
                quality: Some(ctx.quality()),
                text,
            }))
            .await?;
        let (width, height) = ctx.measure(&output, target, &invocation.engine)?;

        Ok(vec![
            StageArtifact::new(output, target).with_dimensions(width, height)
        ])
    }

    fn weight(&self) -> f32 {
        4.0
    }
}
