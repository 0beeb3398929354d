//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], a [`MediaService`] running on a [`FakeEngine`]
//! with its scratch directory under a private temp dir so tests can assert
//! that nothing is left behind.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mediaforge::MediaService;
use mf_core::config::Config;
use mf_core::events::EventPayload;
use mf_core::{ConversionRequest, InputMedia, JobId, MediaFormat};
use mf_pipeline::testing::{png_bytes, FakeEngine};
use tempfile::TempDir;

pub struct TestHarness {
    pub service: MediaService,
    pub engine: Arc<FakeEngine>,
    pub scratch: TempDir,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with(FakeEngine::new(), Config::default())
    }

    pub fn with_engine(engine: FakeEngine) -> Self {
        Self::with(engine, Config::default())
    }

    /// Build a harness; the config's scratch dir is always overridden.
    pub fn with(engine: FakeEngine, mut config: Config) -> Self {
        let scratch = tempfile::tempdir().expect("create scratch dir");
        config.scheduler.scratch_dir = Some(scratch.path().to_path_buf());
        let engine = Arc::new(engine);
        let service = MediaService::with_engine(config, engine.clone());
        Self {
            service,
            engine,
            scratch,
        }
    }

    /// Number of entries left in the scratch directory.
    pub fn leftover_workspaces(&self) -> usize {
        count_entries(self.scratch.path())
    }

    /// Short names of the lifecycle events recorded for `job_id`, without
    /// progress reports.
    pub fn lifecycle(&self, job_id: JobId) -> Vec<&'static str> {
        self.service
            .events()
            .events_for(job_id)
            .iter()
            .filter_map(|e| match e.payload {
                EventPayload::JobQueued { .. } => Some("queued"),
                EventPayload::JobStarted { .. } => Some("started"),
                EventPayload::JobProgress { .. } => None,
                EventPayload::JobRetrying { .. } => Some("retrying"),
                EventPayload::JobSucceeded { .. } => Some("succeeded"),
                EventPayload::JobFailed { .. } => Some("failed"),
                EventPayload::JobCancelled { .. } => Some("cancelled"),
            })
            .collect()
    }

    /// Poll until the engine has seen `calls` invocations.
    pub async fn wait_for_calls(&self, calls: usize) {
        for _ in 0..200 {
            if self.engine.calls() >= calls {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "engine saw {} calls, expected {}",
            self.engine.calls(),
            calls
        );
    }
}

fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

pub fn png_request(width: u32, height: u32, target: MediaFormat) -> ConversionRequest {
    ConversionRequest::new(
        InputMedia::new(MediaFormat::Png, png_bytes(width, height)),
        target,
    )
}

pub fn pdf_request(target: MediaFormat) -> ConversionRequest {
    ConversionRequest::new(
        InputMedia::new(MediaFormat::Pdf, b"%PDF-1.7 fake".to_vec()),
        target,
    )
}

pub fn video_request() -> ConversionRequest {
    ConversionRequest::new(
        InputMedia::new(MediaFormat::Mkv, b"fake mkv".to_vec()),
        MediaFormat::Mp4,
    )
}
