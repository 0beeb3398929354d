//! ffmpeg argument builders.
//!
//! Demuxers and muxers are pinned with `-f` and file operands carry the
//! `file:` protocol, so neither probing nor URL parsing can redirect a read
//! or write. Overlay text is always referenced through `textfile=` with
//! `expansion=none`, so `%` and `\` in it are drawn literally.

use mf_core::MediaFormat;

use crate::engine::{ComposeSpec, DrawText, Fit, Layer, VideoEncode};

/// CRF used when a request sets no quality.
const DEFAULT_CRF: u8 = 23;

const AUDIO_BITRATE: &str = "192k";

/// Map a 1-100 quality to an x264/VP9 CRF (higher quality, lower CRF).
pub fn crf_for_quality(quality: Option<u8>) -> u8 {
    match quality {
        Some(q) => {
            let q = u32::from(q.clamp(1, 100));
            (18 + (100 - q) * 33 / 100) as u8
        }
        None => DEFAULT_CRF,
    }
}

/// Demuxer name pinned for reading `format`.
pub fn demuxer(format: MediaFormat) -> &'static str {
    match format {
        MediaFormat::Mp4 | MediaFormat::Mov => "mov",
        MediaFormat::Webm | MediaFormat::Mkv => "matroska",
        MediaFormat::Mp3 => "mp3",
        MediaFormat::Wav => "wav",
        MediaFormat::Aac => "aac",
        MediaFormat::Gif => "gif",
        _ => "image2",
    }
}

/// Muxer name pinned for writing `format`.
pub fn muxer(format: MediaFormat) -> &'static str {
    match format {
        MediaFormat::Mp4 => "mp4",
        MediaFormat::Mov => "mov",
        MediaFormat::Webm => "webm",
        MediaFormat::Mkv => "matroska",
        MediaFormat::Gif => "gif",
        MediaFormat::Mp3 => "mp3",
        MediaFormat::Wav => "wav",
        MediaFormat::Aac => "adts",
        _ => "image2",
    }
}

fn file_operand(path: &std::path::Path) -> String {
    format!("file:{}", path.display())
}

/// Escape a value for a filter option, then for the enclosing filtergraph.
pub fn escape_filter_value(value: &str) -> String {
    let mut option = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | ':' | '\'') {
            option.push('\\');
        }
        option.push(c);
    }

    let mut graph = String::with_capacity(option.len());
    for c in option.chars() {
        if matches!(c, '\\' | '\'' | '[' | ']' | ',' | ';') {
            graph.push('\\');
        }
        graph.push(c);
    }
    graph
}

/// `scale` filter for a bounding box, keeping even dimensions for yuv420p.
pub fn scale_filter(fit: Fit) -> Option<String> {
    match (fit.width, fit.height) {
        (Some(w), Some(h)) => Some(format!(
            "scale=w={w}:h={h}:force_original_aspect_ratio=decrease:force_divisible_by=2"
        )),
        (Some(w), None) => Some(format!("scale={w}:-2")),
        (None, Some(h)) => Some(format!("scale=-2:{h}")),
        (None, None) => None,
    }
}

/// `drawtext` filter reading its text from a file, without text expansion.
pub fn drawtext_filter(text: &DrawText) -> String {
    let mut filter = format!(
        "drawtext=fontfile={}:textfile={}:expansion=none:fontsize={}:fontcolor={}:x={}:y={}",
        escape_filter_value(&text.font_file.display().to_string()),
        escape_filter_value(&text.text_file.display().to_string()),
        text.size,
        escape_filter_value(&text.color),
        text.x,
        text.y,
    );
    if let Some((start, end)) = text.window {
        filter.push_str(&format!(":enable='between(t,{start:.3},{end:.3})'"));
    }
    filter
}

fn video_codec_args(format: MediaFormat, crf: u8) -> Vec<String> {
    let args: Vec<&str> = match format {
        MediaFormat::Webm => vec!["-c:v", "libvpx-vp9", "-b:v", "0", "-c:a", "libopus"],
        MediaFormat::Gif => vec!["-an", "-loop", "0"],
        _ => vec![
            "-c:v",
            "libx264",
            "-preset",
            "medium",
            "-pix_fmt",
            "yuv420p",
            "-c:a",
            "aac",
            "-b:a",
            AUDIO_BITRATE,
        ],
    };
    let mut args: Vec<String> = args.into_iter().map(String::from).collect();
    if format != MediaFormat::Gif {
        args.extend(["-crf".to_string(), crf.to_string()]);
    }
    if matches!(format, MediaFormat::Mp4 | MediaFormat::Mov) {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }
    args
}

fn audio_codec_args(format: MediaFormat) -> Vec<String> {
    let args: &[&str] = match format {
        MediaFormat::Mp3 => &["-vn", "-c:a", "libmp3lame", "-b:a", AUDIO_BITRATE],
        MediaFormat::Wav => &["-vn", "-c:a", "pcm_s16le"],
        _ => &["-vn", "-c:a", "aac", "-b:a", AUDIO_BITRATE],
    };
    args.iter().map(|s| s.to_string()).collect()
}

fn preamble() -> Vec<String> {
    ["-hide_banner", "-nostdin", "-y", "-loglevel", "error"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Single-input transcode, with scaling and text in one filter chain.
pub fn encode(spec: &VideoEncode) -> Vec<String> {
    let mut args = preamble();
    args.extend([
        "-f".to_string(),
        demuxer(spec.input_format).to_string(),
        "-i".to_string(),
        file_operand(&spec.input),
    ]);

    let audio_only = spec.output_format.kind() == mf_core::MediaKind::Audio;
    if audio_only {
        args.extend(audio_codec_args(spec.output_format));
    } else {
        let mut filters: Vec<String> = Vec::new();
        if spec.output_format == MediaFormat::Gif {
            filters.push("fps=15".to_string());
        }
        filters.extend(scale_filter(spec.fit));
        if let Some(text) = &spec.text {
            filters.push(drawtext_filter(text));
        }
        if !filters.is_empty() {
            args.extend(["-vf".to_string(), filters.join(",")]);
        }
        args.extend(video_codec_args(
            spec.output_format,
            crf_for_quality(spec.quality),
        ));
    }

    args.extend([
        "-f".to_string(),
        muxer(spec.output_format).to_string(),
        file_operand(&spec.output),
    ]);
    args
}

/// One ffmpeg run rendering every layer of a composition onto a black canvas.
pub fn compose(spec: &ComposeSpec) -> Vec<String> {
    let duration = spec.duration_secs.max(0.0);
    let mut args = preamble();
    args.extend([
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        format!(
            "color=c=black:s={}x{}:r={}:d={duration:.3}",
            spec.width, spec.height, spec.fps
        ),
    ]);

    let mut graph: Vec<String> = Vec::new();
    let mut audio_labels: Vec<String> = Vec::new();
    let mut current = "0:v".to_string();
    let mut next_input = 1usize;

    for (i, layer) in spec.layers.iter().enumerate() {
        let out = format!("v{i}");
        match layer {
            Layer::Image {
                path,
                x,
                y,
                start_secs,
                duration_secs,
                zoom_to,
                ..
            } => {
                let visible = duration_secs.unwrap_or(duration - start_secs).max(0.0);
                args.extend([
                    "-f".to_string(),
                    "image2".to_string(),
                    "-pattern_type".to_string(),
                    "none".to_string(),
                    "-loop".to_string(),
                    "1".to_string(),
                    "-framerate".to_string(),
                    spec.fps.to_string(),
                    "-t".to_string(),
                    format!("{visible:.3}"),
                    "-i".to_string(),
                    file_operand(path),
                ]);
                let input = next_input;
                next_input += 1;

                let mut chain = String::new();
                if let Some(zoom) = zoom_to {
                    let span = if visible > 0.0 { visible } else { 1.0 };
                    chain.push_str(&format!(
                        "scale=w='iw*(1+({:.4}-1)*min(t/{span:.3},1))':h=-2:eval=frame,",
                        zoom / 100.0
                    ));
                }
                chain.push_str(&format!("setpts=PTS-STARTPTS+{start_secs:.3}/TB"));
                graph.push(format!("[{input}:v]{chain}[i{i}]"));
                graph.push(format!(
                    "[{current}][i{i}]overlay=x={x}:y={y}:eof_action=pass:enable='between(t,{start_secs:.3},{:.3})'[{out}]",
                    start_secs + visible
                ));
                current = out;
            }
            Layer::Video {
                path,
                format,
                x,
                y,
                start_secs,
            } => {
                args.extend([
                    "-f".to_string(),
                    demuxer(*format).to_string(),
                    "-i".to_string(),
                    file_operand(path),
                ]);
                let input = next_input;
                next_input += 1;

                graph.push(format!(
                    "[{input}:v]setpts=PTS-STARTPTS+{start_secs:.3}/TB[i{i}]"
                ));
                graph.push(format!(
                    "[{current}][i{i}]overlay=x={x}:y={y}:eof_action=pass:enable='gte(t,{start_secs:.3})'[{out}]"
                ));
                current = out;
            }
            Layer::Text(text) => {
                graph.push(format!("[{current}]{}[{out}]", drawtext_filter(text)));
                current = out;
            }
            Layer::Audio {
                path,
                format,
                start_secs,
            } => {
                args.extend([
                    "-f".to_string(),
                    demuxer(*format).to_string(),
                    "-i".to_string(),
                    file_operand(path),
                ]);
                let input = next_input;
                next_input += 1;

                let delay_ms = (start_secs.max(0.0) * 1000.0).round() as u64;
                let label = format!("a{i}");
                graph.push(format!("[{input}:a]adelay={delay_ms}:all=1[{label}]"));
                audio_labels.push(label);
            }
        }
    }

    graph.push(format!("[{current}]format=yuv420p[vout]"));
    let audio_out = match audio_labels.len() {
        0 => None,
        1 => Some(audio_labels[0].clone()),
        n => {
            let inputs: String = audio_labels.iter().map(|l| format!("[{l}]")).collect();
            graph.push(format!("{inputs}amix=inputs={n}:duration=longest[aout]"));
            Some("aout".to_string())
        }
    };

    args.extend([
        "-filter_complex".to_string(),
        graph.join(";"),
        "-map".to_string(),
        "[vout]".to_string(),
    ]);
    match audio_out {
        Some(label) => args.extend([
            "-map".to_string(),
            format!("[{label}]"),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            AUDIO_BITRATE.to_string(),
        ]),
        None => args.push("-an".to_string()),
    }

    args.extend([
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "medium".to_string(),
        "-crf".to_string(),
        crf_for_quality(spec.quality).to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-r".to_string(),
        spec.fps.to_string(),
        "-t".to_string(),
        format!("{duration:.3}"),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-f".to_string(),
        "mp4".to_string(),
        file_operand(&spec.output),
    ]);
    args
}
