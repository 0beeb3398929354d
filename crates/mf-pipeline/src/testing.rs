//! An in-process [`Engine`] for tests: no external tools, real files.
//!
//! Rasters are synthesized with the `image` crate so dimension checks see
//! genuine headers. Failures and hangs can be injected per operation.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use mf_av::{Engine, EngineCall, EngineFailure, EngineInvocation, EngineTask, Fit};
use mf_core::{EngineErrorKind, Error, InvocationId, MediaFormat};
use parking_lot::Mutex;
use tokio::time::Instant;

/// Encode a solid `width`x`height` PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb([200, 30, 30]));
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode png");
    buf.into_inner()
}

fn image_format(format: MediaFormat) -> Option<ImageFormat> {
    match format {
        MediaFormat::Png => Some(ImageFormat::Png),
        MediaFormat::Jpeg => Some(ImageFormat::Jpeg),
        MediaFormat::Gif => Some(ImageFormat::Gif),
        MediaFormat::Webp => Some(ImageFormat::WebP),
        MediaFormat::Tiff => Some(ImageFormat::Tiff),
        MediaFormat::Bmp => Some(ImageFormat::Bmp),
        _ => None,
    }
}

fn fitted(img: DynamicImage, fit: Fit) -> DynamicImage {
    if fit.is_unbounded() {
        return img;
    }
    img.resize(
        fit.width.unwrap_or(u32::MAX),
        fit.height.unwrap_or(u32::MAX),
        image::imageops::FilterType::Nearest,
    )
}

fn crashed(tool: &str, message: impl Into<String>) -> Error {
    Error::engine(EngineErrorKind::Crashed, tool, message)
}

fn save(img: &DynamicImage, path: &Path, format: MediaFormat) -> mf_core::Result<()> {
    match image_format(format) {
        Some(f) => DynamicImage::ImageRgb8(img.to_rgb8())
            .save_with_format(path, f)
            .map_err(|e| crashed("magick", e.to_string())),
        None => {
            std::fs::write(path, format!("fake {format}"))?;
            Ok(())
        }
    }
}

struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Deterministic stand-in for the external tools.
pub struct FakeEngine {
    pages: u32,
    /// Page size in hundredths of an inch.
    page_size: (u32, u32),
    delay: Duration,
    failures: Mutex<HashMap<&'static str, (EngineErrorKind, u32)>>,
    hangs: HashSet<&'static str>,
    calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    operations: Mutex<Vec<&'static str>>,
}

impl Default for FakeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeEngine {
    /// One-page documents, 1 x 1.5 inch pages, no delay.
    pub fn new() -> Self {
        Self {
            pages: 1,
            page_size: (100, 150),
            delay: Duration::ZERO,
            failures: Mutex::new(HashMap::new()),
            hangs: HashSet::new(),
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            operations: Mutex::new(Vec::new()),
        }
    }

    pub fn with_pages(mut self, pages: u32) -> Self {
        self.pages = pages;
        self
    }

    /// Each invocation takes at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `times` invocations of `operation` with `kind`.
    pub fn fail(self, operation: &'static str, kind: EngineErrorKind, times: u32) -> Self {
        self.failures.lock().insert(operation, (kind, times));
        self
    }

    /// Block `operation` until the deadline or cancellation.
    pub fn hang(mut self, operation: &'static str) -> Self {
        self.hangs.insert(operation);
        self
    }

    /// Total invocations, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of invocations observed in flight at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    /// Operation names in call order.
    pub fn operations(&self) -> Vec<&'static str> {
        self.operations.lock().clone()
    }

    fn injected_failure(&self, operation: &str) -> Option<EngineErrorKind> {
        let mut failures = self.failures.lock();
        let (kind, remaining) = failures.get_mut(operation)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(*kind)
    }

    async fn pause(&self, call: &EngineCall, tool: &str) -> mf_core::Result<()> {
        let hang = self.hangs.contains(call.task.operation());
        let wait = if hang {
            Duration::from_secs(3600)
        } else {
            self.delay
        };
        tokio::select! {
            biased;
            _ = call.cancel.cancelled() => Err(Error::cancelled("job cancelled")),
            _ = tokio::time::sleep_until(call.deadline) => Err(Error::engine(
                EngineErrorKind::Timeout,
                tool,
                "deadline exceeded",
            )),
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }

    fn perform(&self, task: &EngineTask) -> mf_core::Result<String> {
        match task {
            EngineTask::CountPages { .. } => {
                Ok(format!("{}\n", self.pages).repeat(self.pages as usize))
            }
            EngineTask::RasterizePage {
                page, dpi, output, ..
            } => {
                if *page >= self.pages {
                    return Err(crashed("magick", "page out of range"));
                }
                let width = self.page_size.0 * dpi / 100;
                let height = self.page_size.1 * dpi / 100;
                let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
                    width.max(1),
                    height.max(1),
                    image::Rgb([255, 255, 255]),
                ));
                save(&img, output, MediaFormat::Png)?;
                Ok(String::new())
            }
            EngineTask::TranscodeImage {
                input,
                output,
                to,
                fit,
                ..
            } => {
                let img = image::open(input).map_err(|e| crashed("magick", e.to_string()))?;
                save(&fitted(img, *fit), output, *to)?;
                Ok(String::new())
            }
            EngineTask::CompositeText { input, output, .. } => {
                std::fs::copy(input, output)?;
                Ok(String::new())
            }
            EngineTask::EncodeVideo(spec) => {
                if spec.output_format == MediaFormat::Gif {
                    let img = DynamicImage::ImageRgb8(RgbImage::new(32, 24));
                    save(&fitted(img, spec.fit), &spec.output, MediaFormat::Gif)?;
                } else {
                    std::fs::write(&spec.output, b"fake media")?;
                }
                Ok(String::new())
            }
            EngineTask::ComposeVideo(spec) => {
                std::fs::write(&spec.output, b"fake mp4")?;
                Ok(String::new())
            }
            EngineTask::ResolveFont { family } => {
                Ok(format!("/usr/share/fonts/{}.ttf\n", family.replace(' ', "")))
            }
        }
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn invoke(&self, call: EngineCall) -> Result<EngineInvocation, EngineFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.operations.lock().push(call.task.operation());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _running = Running(&self.running);

        let started = Instant::now();
        let tool = call.task.tool().name();
        self.pause(&call, tool).await?;

        let mut invocation = EngineInvocation {
            id: InvocationId::new(),
            engine: tool.to_string(),
            operation: call.task.operation(),
            args: call.task.arguments(&call.limits),
            limits: call.limits,
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            elapsed: Duration::ZERO,
        };

        if let Some(kind) = self.injected_failure(call.task.operation()) {
            invocation.exit_code = (kind == EngineErrorKind::Crashed).then_some(1);
            invocation.stderr = format!("{tool}: injected failure\n");
            invocation.elapsed = started.elapsed();
            let error = Error::engine(kind, tool, "injected failure");
            return Err(EngineFailure::ran(error, invocation));
        }
        invocation.stdout = self.perform(&call.task)?;
        invocation.elapsed = started.elapsed();
        Ok(invocation)
    }
}
