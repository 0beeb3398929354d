//! ImageMagick argument builders.
//!
//! Every file operand carries an explicit coder prefix (`pdf:`, `png:` ...)
//! so ImageMagick never picks a coder by sniffing content or extension, and
//! every invocation starts with `-limit` settings derived from the job's
//! [`ResourceLimits`]. The same vectors work for IM7 `magick` and IM6
//! `convert`.

use std::path::Path;

use mf_core::{MediaFormat, ResourceLimits};

use crate::engine::{Fit, TextSpec};

const MIB: u64 = 1024 * 1024;

/// `-limit` settings for memory, memory map, disk and pixel dimensions.
/// Unbounded values are left to ImageMagick's own policy.
pub fn limit_args(limits: &ResourceLimits) -> Vec<String> {
    let mut args = Vec::new();
    let mut push = |resource: &str, value: String| {
        args.extend(["-limit".to_string(), resource.to_string(), value]);
    };

    if limits.memory != u64::MAX {
        let mib = (limits.memory / MIB).max(1);
        push("memory", format!("{mib}MiB"));
        push("map", format!("{mib}MiB"));
    }
    if limits.disk != u64::MAX {
        push("disk", format!("{}MiB", (limits.disk / MIB).max(1)));
    }
    if limits.max_width != u32::MAX {
        push("width", limits.max_width.to_string());
    }
    if limits.max_height != u32::MAX {
        push("height", limits.max_height.to_string());
    }
    args
}

/// `coder:path`, with the format's ImageMagick coder.
pub fn operand(format: MediaFormat, path: &Path) -> String {
    let coder = format.magick_coder().unwrap_or("png");
    format!("{coder}:{}", path.display())
}

/// `coder:path[index]`, selecting a single page or frame.
pub fn indexed_operand(format: MediaFormat, path: &Path, index: u32) -> String {
    format!("{}[{index}]", operand(format, path))
}

/// Resize geometry for a bounding box: `WxH`, `W` or `xH`.
pub fn geometry(fit: Fit) -> Option<String> {
    match (fit.width, fit.height) {
        (Some(w), Some(h)) => Some(format!("{w}x{h}")),
        (Some(w), None) => Some(w.to_string()),
        (None, Some(h)) => Some(format!("x{h}")),
        (None, None) => None,
    }
}

/// Neutralize ImageMagick's text escapes: `%` property expansion and a
/// leading `@` file indirection.
pub fn escape_text(text: &str) -> String {
    let escaped = text.replace('%', "%%");
    match escaped.strip_prefix('@') {
        Some(rest) => format!("\\@{rest}"),
        None => escaped,
    }
}

pub fn count_pages(input: &Path, limits: &ResourceLimits) -> Vec<String> {
    let mut args = limit_args(limits);
    args.extend([
        "-ping".to_string(),
        operand(MediaFormat::Pdf, input),
        "-format".to_string(),
        "%n\n".to_string(),
        "info:".to_string(),
    ]);
    args
}

pub fn rasterize_page(
    input: &Path,
    page: u32,
    dpi: u32,
    output: &Path,
    limits: &ResourceLimits,
) -> Vec<String> {
    let mut args = limit_args(limits);
    args.extend([
        "-density".to_string(),
        dpi.to_string(),
        indexed_operand(MediaFormat::Pdf, input, page),
        "-background".to_string(),
        "white".to_string(),
        "-alpha".to_string(),
        "remove".to_string(),
        "-alpha".to_string(),
        "off".to_string(),
        operand(MediaFormat::Png, output),
    ]);
    args
}

pub fn transcode(
    input: &Path,
    from: MediaFormat,
    output: &Path,
    to: MediaFormat,
    fit: Fit,
    quality: Option<u8>,
    limits: &ResourceLimits,
) -> Vec<String> {
    let mut args = limit_args(limits);
    args.push(indexed_operand(from, input, 0));
    args.push("-auto-orient".to_string());

    if let Some(g) = geometry(fit) {
        args.extend(["-resize".to_string(), g]);
    }
    if matches!(to, MediaFormat::Jpeg | MediaFormat::Bmp) {
        args.extend([
            "-background".to_string(),
            "white".to_string(),
            "-alpha".to_string(),
            "remove".to_string(),
        ]);
    }
    if let Some(q) = quality.filter(|_| !to.is_lossless()) {
        args.extend(["-quality".to_string(), q.clamp(1, 100).to_string()]);
    }

    args.push("-strip".to_string());
    args.push(operand(to, output));
    args
}

pub fn composite_text(
    input: &Path,
    format: MediaFormat,
    output: &Path,
    text: &TextSpec,
    limits: &ResourceLimits,
) -> Vec<String> {
    let mut args = limit_args(limits);
    args.extend([
        operand(format, input),
        "-font".to_string(),
        text.font_file.display().to_string(),
        "-pointsize".to_string(),
        text.size.to_string(),
        "-fill".to_string(),
        text.color.clone(),
        "-gravity".to_string(),
        "NorthWest".to_string(),
        "-annotate".to_string(),
        format!("{:+}{:+}", text.x, text.y),
        escape_text(&text.text),
        operand(format, output),
    ]);
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn small_limits() -> ResourceLimits {
        ResourceLimits {
            memory: 256 * MIB,
            disk: 1024 * MIB,
            max_width: 4000,
            max_height: 3000,
            max_pages: 10,
        }
    }

    #[test]
    fn limits_come_first() {
        let args = limit_args(&small_limits());
        assert_eq!(
            args,
            vec![
                "-limit", "memory", "256MiB", "-limit", "map", "256MiB", "-limit", "disk",
                "1024MiB", "-limit", "width", "4000", "-limit", "height", "3000",
            ]
        );
        assert!(limit_args(&ResourceLimits::unbounded()).is_empty());
    }

    #[test]
    fn count_pages_vector() {
        let args = count_pages(Path::new("/w/input.pdf"), &ResourceLimits::unbounded());
        assert_eq!(args, vec!["-ping", "pdf:/w/input.pdf", "-format", "%n\n", "info:"]);
    }

    #[test]
    fn rasterize_selects_page_with_explicit_coders() {
        let args = rasterize_page(
            Path::new("/w/input.pdf"),
            2,
            150,
            Path::new("/w/page-0003.png"),
            &small_limits(),
        );
        let tail = &args[args.len() - 10..];
        assert_eq!(tail[0], "-density");
        assert_eq!(tail[1], "150");
        assert_eq!(tail[2], "pdf:/w/input.pdf[2]");
        assert_eq!(tail[9], "png:/w/page-0003.png");
        assert_eq!(args[0], "-limit");
    }

    #[test]
    fn transcode_resizes_and_sets_quality_for_lossy_targets() {
        let args = transcode(
            Path::new("/w/in.png"),
            MediaFormat::Png,
            Path::new("/w/out.jpg"),
            MediaFormat::Jpeg,
            Fit::new(Some(800), None),
            Some(80),
            &ResourceLimits::unbounded(),
        );
        assert_eq!(
            args,
            vec![
                "png:/w/in.png[0]",
                "-auto-orient",
                "-resize",
                "800",
                "-background",
                "white",
                "-alpha",
                "remove",
                "-quality",
                "80",
                "-strip",
                "jpeg:/w/out.jpg",
            ]
        );
    }

    #[test]
    fn transcode_to_lossless_ignores_quality() {
        let args = transcode(
            Path::new("/w/in.png"),
            MediaFormat::Png,
            Path::new("/w/out.tiff"),
            MediaFormat::Tiff,
            Fit::default(),
            Some(50),
            &ResourceLimits::unbounded(),
        );
        assert_eq!(args, vec!["png:/w/in.png[0]", "-auto-orient", "-strip", "tiff:/w/out.tiff"]);
    }

    #[test]
    fn geometry_variants() {
        assert_eq!(geometry(Fit::new(Some(10), Some(20))).as_deref(), Some("10x20"));
        assert_eq!(geometry(Fit::new(None, Some(20))).as_deref(), Some("x20"));
        assert_eq!(geometry(Fit::default()), None);
    }

    #[test]
    fn text_escapes() {
        assert_eq!(escape_text("100% done"), "100%% done");
        assert_eq!(escape_text("@/etc/passwd"), "\\@/etc/passwd");
        assert_eq!(escape_text("mail@example.com"), "mail@example.com");
    }

    #[test]
    fn composite_text_vector() {
        let text = TextSpec {
            text: "Hello %w".into(),
            font_file: PathBuf::from("/fonts/DejaVuSans.ttf"),
            size: 24,
            color: "#ff0000".into(),
            x: 10,
            y: -5,
        };
        let args = composite_text(
            Path::new("/w/page.png"),
            MediaFormat::Png,
            Path::new("/w/page-text.png"),
            &text,
            &ResourceLimits::unbounded(),
        );
        assert_eq!(
            args,
            vec![
                "png:/w/page.png",
                "-font",
                "/fonts/DejaVuSans.ttf",
                "-pointsize",
                "24",
                "-fill",
                "#ff0000",
                "-gravity",
                "NorthWest",
                "-annotate",
                "+10-5",
                "Hello %%w",
                "png:/w/page-text.png",
            ]
        );
    }
}
