//! Media-domain enums: formats, media kinds, policy operations and routes.
//!
//! All enums serialize in lowercase (or snake_case for multi-word variants)
//! and implement `Display` manually for consistent string representation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// MediaKind
// ---------------------------------------------------------------------------

/// Broad classification of a media format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Document,
    Image,
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Document => write!(f, "document"),
            Self::Image => write!(f, "image"),
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

// ---------------------------------------------------------------------------
// MediaFormat
// ---------------------------------------------------------------------------

/// Formats the conversion core knows how to name, route and hand to an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFormat {
    Pdf,
    Png,
    Jpeg,
    Gif,
    Webp,
    Tiff,
    Bmp,
    Mp4,
    Webm,
    Mov,
    Mkv,
    Mp3,
    Wav,
    Aac,
}

impl MediaFormat {
    /// Every known format, in declaration order.
    pub const ALL: [MediaFormat; 14] = [
        Self::Pdf,
        Self::Png,
        Self::Jpeg,
        Self::Gif,
        Self::Webp,
        Self::Tiff,
        Self::Bmp,
        Self::Mp4,
        Self::Webm,
        Self::Mov,
        Self::Mkv,
        Self::Mp3,
        Self::Wav,
        Self::Aac,
    ];

    /// Broad kind of this format.
    ///
    /// GIF is classified as an image; animated GIF output from video is a
    /// [`ConversionRoute::MediaTranscode`] target.
    pub fn kind(self) -> MediaKind {
        match self {
            Self::Pdf => MediaKind::Document,
            Self::Png | Self::Jpeg | Self::Gif | Self::Webp | Self::Tiff | Self::Bmp => {
                MediaKind::Image
            }
            Self::Mp4 | Self::Webm | Self::Mov | Self::Mkv => MediaKind::Video,
            Self::Mp3 | Self::Wav | Self::Aac => MediaKind::Audio,
        }
    }

    /// Canonical file extension (without the dot).
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Gif => "gif",
            Self::Webp => "webp",
            Self::Tiff => "tiff",
            Self::Bmp => "bmp",
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mov => "mov",
            Self::Mkv => "mkv",
            Self::Mp3 => "mp3",
            Self::Wav => "wav",
            Self::Aac => "aac",
        }
    }

    /// IANA media type.
    pub fn mime(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Tiff => "image/tiff",
            Self::Bmp => "image/bmp",
            Self::Mp4 => "video/mp4",
            Self::Webm => "video/webm",
            Self::Mov => "video/quicktime",
            Self::Mkv => "video/x-matroska",
            Self::Mp3 => "audio/mpeg",
            Self::Wav => "audio/wav",
            Self::Aac => "audio/aac",
        }
    }

    /// Explicit ImageMagick coder name, for formats ImageMagick handles.
    pub fn magick_coder(self) -> Option<&'static str> {
        match self {
            Self::Pdf => Some("pdf"),
            Self::Png => Some("png"),
            Self::Jpeg => Some("jpeg"),
            Self::Gif => Some("gif"),
            Self::Webp => Some("webp"),
            Self::Tiff => Some("tiff"),
            Self::Bmp => Some("bmp"),
            _ => None,
        }
    }

    /// Whether the format stores pixels without loss.
    pub fn is_lossless(self) -> bool {
        matches!(self, Self::Png | Self::Tiff | Self::Bmp | Self::Wav)
    }

    /// Look up a format by file extension (case-insensitive, dot optional).
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(Self::Pdf),
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "gif" => Some(Self::Gif),
            "webp" => Some(Self::Webp),
            "tif" | "tiff" => Some(Self::Tiff),
            "bmp" => Some(Self::Bmp),
            "mp4" | "m4v" => Some(Self::Mp4),
            "webm" => Some(Self::Webm),
            "mov" => Some(Self::Mov),
            "mkv" => Some(Self::Mkv),
            "mp3" => Some(Self::Mp3),
            "wav" => Some(Self::Wav),
            "aac" => Some(Self::Aac),
            _ => None,
        }
    }

    /// Look up a format by declared MIME type. Parameters after `;` are ignored.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|f| f.mime() == essence).or(match essence.as_str() {
            "image/jpg" => Some(Self::Jpeg),
            "audio/x-wav" | "audio/wave" => Some(Self::Wav),
            "audio/mp3" => Some(Self::Mp3),
            _ => None,
        })
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg => write!(f, "jpeg"),
            Self::Tiff => write!(f, "tiff"),
            other => write!(f, "{}", other.extension()),
        }
    }
}

impl FromStr for MediaFormat {
    type Err = String;

    /// Accepts either a file extension (`png`, `.jpg`) or a MIME type.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('/') {
            Self::from_mime(s)
        } else {
            Self::from_extension(s)
        }
        .ok_or_else(|| format!("unknown media format: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Logical operation a policy rule grants or denies for a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Render a document page to pixels (PDF read rights).
    RasterizePage,
    /// Decode or encode a still image (for PDF: write rights).
    TranscodeImage,
    /// Draw font-rendered text onto pixels (ImageMagick LABEL rights).
    CompositeText,
    /// Decode or encode audio/video streams.
    EncodeVideo,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Self::RasterizePage,
        Self::TranscodeImage,
        Self::CompositeText,
        Self::EncodeVideo,
    ];
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RasterizePage => write!(f, "rasterize_page"),
            Self::TranscodeImage => write!(f, "transcode_image"),
            Self::CompositeText => write!(f, "composite_text"),
            Self::EncodeVideo => write!(f, "encode_video"),
        }
    }
}

// ---------------------------------------------------------------------------
// ConversionRoute
// ---------------------------------------------------------------------------

/// The shape of a conversion, which decides the pipeline stage list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionRoute {
    /// Document pages to raster images.
    Rasterize,
    /// Raster image to raster image (or to a single-page PDF).
    ImageTranscode,
    /// Video/audio to video, audio or animated GIF.
    MediaTranscode,
    /// Multi-asset composition rendered to video.
    Compose,
}

impl ConversionRoute {
    /// Resolve the route for a single-input conversion.
    pub fn resolve(source: MediaFormat, target: MediaFormat) -> Option<Self> {
        use MediaKind::*;
        match (source.kind(), target.kind()) {
            (Document, Image) => Some(Self::Rasterize),
            (Image, Image) | (Image, Document) => Some(Self::ImageTranscode),
            (Video, Video) | (Video, Audio) | (Audio, Audio) => Some(Self::MediaTranscode),
            (Video, Image) if target == MediaFormat::Gif => Some(Self::MediaTranscode),
            _ => None,
        }
    }
}

impl fmt::Display for ConversionRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rasterize => write!(f, "rasterize"),
            Self::ImageTranscode => write!(f, "image_transcode"),
            Self::MediaTranscode => write!(f, "media_transcode"),
            Self::Compose => write!(f, "compose"),
        }
    }
}
