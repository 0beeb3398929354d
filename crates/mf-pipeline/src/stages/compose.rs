//! compose-video: render a composition to MP4.

use std::collections::HashMap;

use async_trait::async_trait;
use mf_av::{ComposeSpec, DrawText, EngineTask, Layer};
use mf_core::{Composition, Element, Error, MediaFormat, RejectionKind};

use crate::artifact::StageArtifact;
use crate::context::StageContext;
use crate::stage::Stage;

/// Build the layer list for a composition and render it in one ffmpeg run.
///
/// Input artifacts are the materialized assets, in the same order as
/// `asset_names`.
#[derive(Debug)]
pub struct ComposeVideo {
    spec: Composition,
    asset_names: Vec<String>,
}

impl ComposeVideo {
    pub fn new(spec: Composition, asset_names: Vec<String>) -> Self {
        Self { spec, asset_names }
    }
}

#[async_trait]
impl Stage for ComposeVideo {
    fn name(&self) -> &'static str {
        "compose-video"
    }

    async fn run(
        &self,
        ctx: &StageContext,
        input: Vec<StageArtifact>,
    ) -> mf_core::Result<Vec<StageArtifact>> {
        let assets: HashMap<&str, &StageArtifact> = self
            .asset_names
            .iter()
            .map(String::as_str)
            .zip(input.iter())
            .collect();
        let asset = |name: &str| {
            assets.get(name).copied().ok_or_else(|| {
                Error::rejected(
                    RejectionKind::UnsupportedFormat,
                    format!("asset {name:?} was not supplied"),
                )
            })
        };

        let mut layers = Vec::with_capacity(self.spec.elements.len());
        for (i, element) in self.spec.elements.iter().enumerate() {
            let layer = match element {
                Element::Image {
                    asset: name,
                    x,
                    y,
                    start_secs,
                    duration_secs,
                    zoom_to,
                } => {
                    let source = asset(name)?;
                    Layer::Image {
                        path: source.path.clone(),
                        format: source.format,
                        x: *x,
                        y: *y,
                        start_secs: *start_secs,
                        duration_secs: *duration_secs,
                        zoom_to: *zoom_to,
                    }
                }
                Element::Video {
                    asset: name,
                    x,
                    y,
                    start_secs,
                } => {
                    let source = asset(name)?;
                    Layer::Video {
                        path: source.path.clone(),
                        format: source.format,
                        x: *x,
                        y: *y,
                        start_secs: *start_secs,
                    }
                }
                Element::Audio {
                    asset: name,
                    start_secs,
                } => {
                    let source = asset(name)?;
                    Layer::Audio {
                        path: source.path.clone(),
                        format: source.format,
                        start_secs: *start_secs,
                    }
                }
                Element::Text {
                    text,
                    font_family,
                    font_size,
                    color,
                    x,
                    y,
                    start_secs,
                    duration_secs,
                } => {
                    let font_file = ctx.resolve_font(font_family.as_deref()).await?;
                    let text_file = ctx.workspace.write(&format!("text-{i:02}.txt"), text)?;
                    let window = match duration_secs {
                        Some(d) => Some((*start_secs, start_secs + d)),
                        None if *start_secs > 0.0 => Some((*start_secs, self.spec.duration_secs)),
                        None => None,
                    };
                    Layer::Text(DrawText {
                        text_file,
                        font_file,
                        size: *font_size,
                        color: color.clone(),
                        x: *x,
                        y: *y,
                        window,
                    })
                }
            };
            layers.push(layer);
        }

        let output = ctx.workspace.file("composition.mp4")?;
        ctx.invoke(EngineTask::ComposeVideo(ComposeSpec {
            width: self.spec.width,
            height: self.spec.height,
            duration_secs: self.spec.duration_secs,
            fps: self.spec.fps,
            layers,
            output: output.clone(),
            quality: Some(ctx.quality()),
        }))
        .await?;

        Ok(vec![StageArtifact::new(output, MediaFormat::Mp4)
            .with_dimensions(Some(self.spec.width), Some(self.spec.height))])
    }

    fn weight(&self) -> f32 {
        4.0
    }
}
