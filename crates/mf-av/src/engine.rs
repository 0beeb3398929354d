//! The [`Engine`] trait and the typed tasks it executes.
//!
//! Each [`EngineTask`] maps to exactly one external tool and one fixed
//! argument vector. The pipeline only ever talks to `dyn Engine`, so tests
//! can substitute a fake that never spawns a process.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use mf_core::{Error, ErrorKind, InvocationId, MediaFormat, ResourceLimits};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::tools::Tool;
use crate::{ffmpeg, fonts, magick};

/// Output bounding box in pixels; aspect ratio is always preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Fit {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Fit {
    pub fn new(width: Option<u32>, height: Option<u32>) -> Self {
        Self { width, height }
    }

    pub fn is_unbounded(&self) -> bool {
        self.width.is_none() && self.height.is_none()
    }
}

/// Text drawn by ImageMagick with an already-resolved font file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextSpec {
    pub text: String,
    pub font_file: PathBuf,
    pub size: u32,
    pub color: String,
    pub x: i32,
    pub y: i32,
}

/// Text drawn by ffmpeg's `drawtext`. The text itself lives in a workspace
/// file so it never becomes part of a filter graph string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrawText {
    pub text_file: PathBuf,
    pub font_file: PathBuf,
    pub size: u32,
    pub color: String,
    pub x: i32,
    pub y: i32,
    /// Visible interval in seconds; always visible when absent.
    pub window: Option<(f64, f64)>,
}

/// A single-input audio/video transcode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoEncode {
    pub input: PathBuf,
    pub input_format: MediaFormat,
    pub output: PathBuf,
    pub output_format: MediaFormat,
    pub fit: Fit,
    pub quality: Option<u8>,
    pub text: Option<DrawText>,
}

/// One layer of a composed video, bottom to top.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Layer {
    Image {
        path: PathBuf,
        format: MediaFormat,
        x: i32,
        y: i32,
        start_secs: f64,
        duration_secs: Option<f64>,
        /// Linear zoom from 100% to this percentage over the visible window.
        zoom_to: Option<f64>,
    },
    Video {
        path: PathBuf,
        format: MediaFormat,
        x: i32,
        y: i32,
        start_secs: f64,
    },
    Text(DrawText),
    Audio {
        path: PathBuf,
        format: MediaFormat,
        start_secs: f64,
    },
}

/// A full composition rendered to MP4 in one ffmpeg run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComposeSpec {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    pub fps: u32,
    pub layers: Vec<Layer>,
    pub output: PathBuf,
    pub quality: Option<u8>,
}

/// A typed unit of engine work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EngineTask {
    /// Print the page count of a PDF on stdout.
    CountPages { input: PathBuf },
    /// Render one zero-based page to PNG.
    RasterizePage {
        input: PathBuf,
        page: u32,
        dpi: u32,
        output: PathBuf,
    },
    TranscodeImage {
        input: PathBuf,
        from: MediaFormat,
        output: PathBuf,
        to: MediaFormat,
        fit: Fit,
        quality: Option<u8>,
    },
    CompositeText {
        input: PathBuf,
        format: MediaFormat,
        output: PathBuf,
        text: TextSpec,
    },
    EncodeVideo(VideoEncode),
    ComposeVideo(ComposeSpec),
    /// Print the font file best matching `family` on stdout.
    ResolveFont { family: String },
}

impl EngineTask {
    /// The tool this task runs on.
    pub fn tool(&self) -> Tool {
        match self {
            EngineTask::CountPages { .. }
            | EngineTask::RasterizePage { .. }
            | EngineTask::TranscodeImage { .. }
            | EngineTask::CompositeText { .. } => Tool::Magick,
            EngineTask::EncodeVideo(_) | EngineTask::ComposeVideo(_) => Tool::Ffmpeg,
            EngineTask::ResolveFont { .. } => Tool::FcMatch,
        }
    }

    /// Short operation name used in logs and invocation records.
    pub fn operation(&self) -> &'static str {
        match self {
            EngineTask::CountPages { .. } => "count-pages",
            EngineTask::RasterizePage { .. } => "rasterize-page",
            EngineTask::TranscodeImage { .. } => "transcode-image",
            EngineTask::CompositeText { .. } => "composite-text",
            EngineTask::EncodeVideo(_) => "encode-video",
            EngineTask::ComposeVideo(_) => "compose-video",
            EngineTask::ResolveFont { .. } => "resolve-font",
        }
    }

    /// The file this task writes, if it writes one.
    pub fn output(&self) -> Option<&Path> {
        match self {
            EngineTask::RasterizePage { output, .. }
            | EngineTask::TranscodeImage { output, .. }
            | EngineTask::CompositeText { output, .. } => Some(output),
            EngineTask::EncodeVideo(v) => Some(&v.output),
            EngineTask::ComposeVideo(c) => Some(&c.output),
            EngineTask::CountPages { .. } | EngineTask::ResolveFont { .. } => None,
        }
    }

    /// The argument vector for this task under `limits`.
    pub fn arguments(&self, limits: &ResourceLimits) -> Vec<String> {
        match self {
            EngineTask::CountPages { input } => magick::count_pages(input, limits),
            EngineTask::RasterizePage {
                input,
                page,
                dpi,
                output,
            } => magick::rasterize_page(input, *page, *dpi, output, limits),
            EngineTask::TranscodeImage {
                input,
                from,
                output,
                to,
                fit,
                quality,
            } => magick::transcode(input, *from, output, *to, *fit, *quality, limits),
            EngineTask::CompositeText {
                input,
                format,
                output,
                text,
            } => magick::composite_text(input, *format, output, text, limits),
            EngineTask::EncodeVideo(spec) => ffmpeg::encode(spec),
            EngineTask::ComposeVideo(spec) => ffmpeg::compose(spec),
            EngineTask::ResolveFont { family } => fonts::fc_match_args(family),
        }
    }
}

/// One engine call as issued by a pipeline stage.
#[derive(Debug, Clone)]
pub struct EngineCall {
    pub task: EngineTask,
    pub limits: ResourceLimits,
    /// Absolute deadline of the owning job attempt.
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

impl EngineCall {
    pub fn new(
        task: EngineTask,
        limits: ResourceLimits,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            task,
            limits,
            deadline,
            cancel,
        }
    }
}

/// Record of one external-tool run that reached an exit, failed or not.
#[derive(Debug, Clone, Serialize)]
pub struct EngineInvocation {
    pub id: InvocationId,
    pub engine: String,
    pub operation: &'static str,
    pub args: Vec<String>,
    pub limits: ResourceLimits,
    pub exit_code: Option<i32>,
    /// Bounded tail of stdout.
    pub stdout: String,
    /// Bounded tail of stderr.
    pub stderr: String,
    pub elapsed: Duration,
}

impl EngineInvocation {
    /// Last non-empty stdout line, trimmed.
    pub fn stdout_last_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
    }
}

/// A failed engine call.
///
/// `invocation` carries the exit status and stderr tail when the tool ran
/// to an exit. It is `None` when the tool was never started or was stopped
/// by the deadline or cancellation.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct EngineFailure {
    pub error: Error,
    pub invocation: Option<Box<EngineInvocation>>,
}

impl EngineFailure {
    /// A failure whose tool run is on record.
    pub fn ran(error: Error, invocation: EngineInvocation) -> Self {
        Self {
            error,
            invocation: Some(Box::new(invocation)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

impl From<Error> for EngineFailure {
    fn from(error: Error) -> Self {
        Self {
            error,
            invocation: None,
        }
    }
}

impl From<EngineFailure> for Error {
    fn from(failure: EngineFailure) -> Self {
        failure.error
    }
}

/// Uniform interface over the external conversion tools.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Run one task to completion.
    ///
    /// A successful return means the tool exited cleanly. Failures carry
    /// `Error::Engine` with a classified kind, or `Error::Cancelled`.
    async fn invoke(&self, call: EngineCall) -> Result<EngineInvocation, EngineFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_map_to_one_tool() {
        let count = EngineTask::CountPages {
            input: PathBuf::from("/w/in.pdf"),
        };
        assert_eq!(count.tool(), Tool::Magick);
        assert_eq!(count.operation(), "count-pages");
        assert!(count.output().is_none());

        let font = EngineTask::ResolveFont {
            family: "DejaVu Sans".into(),
        };
        assert_eq!(font.tool(), Tool::FcMatch);

        let encode = EngineTask::EncodeVideo(VideoEncode {
            input: PathBuf::from("/w/in.mkv"),
            input_format: MediaFormat::Mkv,
            output: PathBuf::from("/w/out.mp4"),
            output_format: MediaFormat::Mp4,
            fit: Fit::default(),
            quality: None,
            text: None,
        });
        assert_eq!(encode.tool(), Tool::Ffmpeg);
        assert_eq!(encode.output(), Some(Path::new("/w/out.mp4")));
    }

    #[test]
    fn stdout_last_line_skips_blank_lines() {
        let inv = EngineInvocation {
            id: InvocationId::new(),
            engine: "magick".into(),
            operation: "count-pages",
            args: vec![],
            limits: ResourceLimits::default(),
            exit_code: Some(0),
            stdout: "3\n3\n3\n\n".into(),
            stderr: String::new(),
            elapsed: Duration::from_millis(5),
        };
        assert_eq!(inv.stdout_last_line(), Some("3"));
    }

    #[test]
    fn failure_converts_to_its_error() {
        let failure = EngineFailure::from(Error::cancelled("job cancelled"));
        assert!(failure.invocation.is_none());
        assert_eq!(failure.kind(), ErrorKind::Cancelled);
        let err: Error = failure.into();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
