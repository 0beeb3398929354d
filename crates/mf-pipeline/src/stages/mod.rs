//! Built-in pipeline stages.

pub mod compose;
pub mod decode;
pub mod encode_images;
pub mod encode_video;
pub mod inspect;
pub mod overlay;
pub mod rasterize;

pub use compose::ComposeVideo;
pub use decode::DecodeImage;
pub use encode_images::EncodeImages;
pub use encode_video::EncodeVideo;
pub use inspect::InspectDocument;
pub use overlay::OverlayText;
pub use rasterize::RasterizePages;

use crate::artifact::StageArtifact;

/// The single artifact a one-input stage works on.
fn single(stage: &str, mut input: Vec<StageArtifact>) -> mf_core::Result<StageArtifact> {
    match input.len() {
        1 => Ok(input.remove(0)),
        n => Err(mf_core::Error::Internal(format!(
            "{stage} expects one input artifact, got {n}"
        ))),
    }
}
