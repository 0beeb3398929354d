//! Conversion request and result types.
//!
//! A [`ConversionRequest`] is built by the inbound collaborator (HTTP layer or
//! CLI) and never mutated after submission. A [`ConversionOutput`] carries the
//! produced artifacts in memory so nothing outlives the job's scratch
//! directory.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ids::JobId;
use crate::media::{ConversionRoute, MediaFormat};

/// Lowest DPI the degraded option set will fall back to.
const MIN_DEGRADED_DPI: u32 = 36;
/// Lowest quality the degraded option set will fall back to.
const MIN_DEGRADED_QUALITY: u8 = 10;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Binary input plus its declared format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputMedia {
    pub format: MediaFormat,
    pub content: Bytes,
    /// Caller-supplied name. Used for composition asset lookup and logs only;
    /// never as a filesystem path.
    #[serde(default)]
    pub name: Option<String>,
}

impl InputMedia {
    pub fn new(format: MediaFormat, content: impl Into<Bytes>) -> Self {
        Self {
            format,
            content: content.into(),
            name: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Inclusive, 1-based page range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub first: u32,
    pub last: u32,
}

impl PageRange {
    pub fn new(first: u32, last: u32) -> Self {
        Self { first, last }
    }

    pub fn len(&self) -> u32 {
        self.last.saturating_sub(self.first) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }

    /// Zero-based page indices within a document of `page_count` pages.
    pub fn indices(&self, page_count: u32) -> Vec<u32> {
        let last = self.last.min(page_count);
        (self.first.max(1)..=last).map(|p| p - 1).collect()
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.last)
        }
    }
}

impl FromStr for PageRange {
    type Err = String;

    /// Parses `"3"` or `"2-5"`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| format!("invalid page number: {v:?}"))
        };
        let (first, last) = match s.split_once('-') {
            Some((a, b)) => (parse(a)?, parse(b)?),
            None => {
                let p = parse(s)?;
                (p, p)
            }
        };
        if first == 0 || last < first {
            return Err(format!("invalid page range: {s:?}"));
        }
        Ok(Self { first, last })
    }
}

/// Text drawn onto the output with a fontconfig-resolved font.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextOverlay {
    pub text: String,
    /// Font family name; the configured default font is used when absent.
    #[serde(default)]
    pub font_family: Option<String>,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
}

fn default_font_size() -> u32 {
    32
}

fn default_color() -> String {
    "white".into()
}

impl TextOverlay {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            font_family: None,
            font_size: default_font_size(),
            color: default_color(),
            x: 0,
            y: 0,
        }
    }
}

/// Per-request tuning. Unset fields fall back to pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    /// Rasterization density for document pages.
    pub dpi: Option<u32>,
    /// Pages to convert; all pages when absent.
    pub pages: Option<PageRange>,
    /// Output bounding box width in pixels (aspect ratio preserved).
    pub width: Option<u32>,
    /// Output bounding box height in pixels (aspect ratio preserved).
    pub height: Option<u32>,
    /// Encoder quality, 1-100.
    pub quality: Option<u8>,
    pub text: Option<TextOverlay>,
    /// Per-request deadline in seconds, capped by the scheduler's deadline.
    pub timeout_secs: Option<u64>,
}

impl ConversionOptions {
    /// Reduced-cost variant used for the scheduler's single retry.
    ///
    /// Halves DPI (floored at 36) and the output box, and lowers quality by
    /// 25 points (floored at 10).
    pub fn degraded(&self, default_dpi: u32, default_quality: u8) -> Self {
        let dpi = self.dpi.unwrap_or(default_dpi);
        let quality = self.quality.unwrap_or(default_quality);
        Self {
            dpi: Some((dpi / 2).max(MIN_DEGRADED_DPI)),
            width: self.width.map(|w| (w / 2).max(1)),
            height: self.height.map(|h| (h / 2).max(1)),
            quality: Some(quality.saturating_sub(25).max(MIN_DEGRADED_QUALITY)),
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// One element on a composition canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Element {
    Image {
        asset: String,
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
        #[serde(default)]
        start_secs: f64,
        /// Visible duration; until the end of the canvas when absent.
        #[serde(default)]
        duration_secs: Option<f64>,
        /// Linear zoom from 100% to this percentage over the visible duration.
        #[serde(default)]
        zoom_to: Option<f64>,
    },
    Video {
        asset: String,
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
        #[serde(default)]
        start_secs: f64,
    },
    Text {
        text: String,
        #[serde(default)]
        font_family: Option<String>,
        #[serde(default = "default_font_size")]
        font_size: u32,
        #[serde(default = "default_color")]
        color: String,
        #[serde(default)]
        x: i32,
        #[serde(default)]
        y: i32,
        #[serde(default)]
        start_secs: f64,
        #[serde(default)]
        duration_secs: Option<f64>,
    },
    Audio {
        asset: String,
        #[serde(default)]
        start_secs: f64,
    },
}

impl Element {
    /// Name of the asset this element draws from, if any.
    pub fn asset(&self) -> Option<&str> {
        match self {
            Element::Image { asset, .. }
            | Element::Video { asset, .. }
            | Element::Audio { asset, .. } => Some(asset),
            Element::Text { .. } => None,
        }
    }
}

/// A canvas plus ordered elements, rendered to a single video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    #[serde(default = "default_fps")]
    pub fps: u32,
    pub elements: Vec<Element>,
}

fn default_fps() -> u32 {
    30
}

impl Composition {
    /// Parse a composition from its JSON description.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::rejected(
                crate::RejectionKind::UnsupportedFormat,
                format!("invalid composition: {e}"),
            )
        })
    }

    /// Total frames the canvas will produce.
    pub fn frame_count(&self) -> u64 {
        (self.duration_secs.max(0.0) * f64::from(self.fps)).ceil() as u64
    }

    pub fn has_text(&self) -> bool {
        self.elements
            .iter()
            .any(|e| matches!(e, Element::Text { .. }))
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// What the request converts: a single input or a composition with assets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestSource {
    Media(InputMedia),
    Composition {
        spec: Composition,
        assets: Vec<InputMedia>,
    },
}

/// A single conversion submitted to the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub source: RequestSource,
    pub target: MediaFormat,
    #[serde(default)]
    pub options: ConversionOptions,
}

impl ConversionRequest {
    pub fn new(input: InputMedia, target: MediaFormat) -> Self {
        Self {
            source: RequestSource::Media(input),
            target,
            options: ConversionOptions::default(),
        }
    }

    /// A composition rendered to MP4.
    pub fn compose(spec: Composition, assets: Vec<InputMedia>) -> Self {
        Self {
            source: RequestSource::Composition { spec, assets },
            target: MediaFormat::Mp4,
            options: ConversionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }

    /// The single input, for non-composition requests.
    pub fn input(&self) -> Option<&InputMedia> {
        match &self.source {
            RequestSource::Media(m) => Some(m),
            RequestSource::Composition { .. } => None,
        }
    }

    /// Route implied by source and target, if the pair is convertible.
    pub fn route(&self) -> Option<ConversionRoute> {
        match &self.source {
            RequestSource::Media(m) => ConversionRoute::resolve(m.format, self.target),
            RequestSource::Composition { .. } => {
                (self.target == MediaFormat::Mp4).then_some(ConversionRoute::Compose)
            }
        }
    }

    /// Total size of all binary inputs.
    pub fn input_bytes(&self) -> u64 {
        match &self.source {
            RequestSource::Media(m) => m.len(),
            RequestSource::Composition { assets, .. } => assets.iter().map(InputMedia::len).sum(),
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One produced file, held in memory.
#[derive(Debug, Clone, Serialize)]
pub struct OutputArtifact {
    /// Suggested file name, e.g. `page-0001.png`.
    pub name: String,
    pub format: MediaFormat,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub size: u64,
    #[serde(skip)]
    pub content: Bytes,
}

/// Successful conversion outcome.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    pub job_id: JobId,
    pub format: MediaFormat,
    pub artifacts: Vec<OutputArtifact>,
    pub total_bytes: u64,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// 1 for a first-try success, 2 when the degraded retry was used.
    pub attempts: u32,
    pub degraded: bool,
    /// Number of engine invocations the successful attempt made.
    pub invocations: usize,
}

/// Either the output or a typed failure.
pub type ConversionResult = Result<ConversionOutput>;

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
