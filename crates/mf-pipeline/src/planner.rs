//! Planner: decompose a request into its stage list.

use mf_core::{ConversionOptions, ConversionRequest, ConversionRoute, RequestSource};

use crate::stage::Stage;
use crate::stages::{
    ComposeVideo, DecodeImage, EncodeImages, EncodeVideo, InspectDocument, OverlayText,
    RasterizePages,
};

/// Chooses the stages that carry out a request.
pub trait Planner: Send + Sync {
    fn plan(
        &self,
        request: &ConversionRequest,
        options: &ConversionOptions,
        route: ConversionRoute,
    ) -> Vec<Box<dyn Stage>>;
}

/// The standard route-to-stage mapping.
///
/// | route | stages |
/// |-------|--------|
/// | rasterize | inspect-document, rasterize-pages, overlay-text?, encode-images |
/// | image transcode | decode-image, overlay-text?, encode-images |
/// | media transcode | encode-video |
/// | compose | compose-video |
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPlanner;

impl Planner for DefaultPlanner {
    fn plan(
        &self,
        request: &ConversionRequest,
        options: &ConversionOptions,
        route: ConversionRoute,
    ) -> Vec<Box<dyn Stage>> {
        let mut stages: Vec<Box<dyn Stage>> = Vec::new();

        match route {
            ConversionRoute::Rasterize => {
                stages.push(Box::new(InspectDocument));
                stages.push(Box::new(RasterizePages));
                if options.text.is_some() {
                    stages.push(Box::new(OverlayText));
                }
                stages.push(Box::new(EncodeImages::new(true)));
            }
            ConversionRoute::ImageTranscode => {
                stages.push(Box::new(DecodeImage));
                if options.text.is_some() {
                    stages.push(Box::new(OverlayText));
                }
                stages.push(Box::new(EncodeImages::new(false)));
            }
            ConversionRoute::MediaTranscode => {
                stages.push(Box::new(EncodeVideo));
            }
            ConversionRoute::Compose => {
                if let RequestSource::Composition { spec, assets } = &request.source {
                    let names = assets
                        .iter()
                        .map(|a| a.name.clone().unwrap_or_default())
                        .collect();
                    stages.push(Box::new(ComposeVideo::new(spec.clone(), names)));
                }
            }
        }

        stages
    }
}
