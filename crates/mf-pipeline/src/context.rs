//! Execution context shared by all stages of one job attempt.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mf_av::{Engine, EngineCall, EngineFailure, EngineInvocation, EngineTask, Fit, JobWorkspace};
use mf_core::config::PipelineConfig;
use mf_core::{
    ConversionOptions, EngineErrorKind, Error, JobId, MediaFormat, MediaKind, ResourceLimits,
};
use mf_policy::PolicyGuard;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const DEFAULT_BUDGET: Duration = Duration::from_secs(300);

/// Sender for reporting progress from within the pipeline.
///
/// Wraps a callback that receives a progress percentage (0.0 -- 100.0) and
/// the name of the stage that just completed.
pub struct ProgressSender {
    callback: Box<dyn Fn(f32, &str) + Send + Sync>,
}

impl ProgressSender {
    /// Create a new sender from the given callback.
    pub fn new(callback: impl Fn(f32, &str) + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Create a no-op sender that discards all progress reports.
    pub fn noop() -> Self {
        Self {
            callback: Box::new(|_, _| {}),
        }
    }

    /// Report progress.
    pub fn send(&self, progress: f32, stage: &str) {
        (self.callback)(progress, stage);
    }
}

impl std::fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSender").finish_non_exhaustive()
    }
}

/// Context passed to every stage of one job attempt.
pub struct StageContext {
    pub job_id: JobId,
    /// Scratch directory owned by this attempt.
    pub workspace: Arc<JobWorkspace>,
    pub engine: Arc<dyn Engine>,
    /// Effective limits from the policy admission.
    pub limits: ResourceLimits,
    /// Options in effect for this attempt (degraded on a retry).
    pub options: ConversionOptions,
    pub target: MediaFormat,
    pub settings: PipelineConfig,
    /// Absolute deadline of this attempt.
    pub deadline: Instant,
    /// Checked at every stage boundary and observed by engine calls.
    pub cancellation: CancellationToken,
    pub progress: Arc<ProgressSender>,
    invocations: Mutex<Vec<EngineInvocation>>,
    failures: Mutex<Vec<EngineInvocation>>,
    fonts: Mutex<HashMap<String, PathBuf>>,
}

impl StageContext {
    /// Create a new context with the minimum required fields.
    pub fn new(
        workspace: Arc<JobWorkspace>,
        engine: Arc<dyn Engine>,
        limits: ResourceLimits,
        target: MediaFormat,
    ) -> Self {
        Self {
            job_id: workspace.job_id(),
            workspace,
            engine,
            limits,
            options: ConversionOptions::default(),
            target,
            settings: PipelineConfig::default(),
            deadline: Instant::now() + DEFAULT_BUDGET,
            cancellation: CancellationToken::new(),
            progress: Arc::new(ProgressSender::noop()),
            invocations: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            fonts: Mutex::new(HashMap::new()),
        }
    }

    /// Builder: set the options for this attempt.
    pub fn with_options(mut self, options: ConversionOptions) -> Self {
        self.options = options;
        self
    }

    /// Builder: set pipeline defaults.
    pub fn with_settings(mut self, settings: PipelineConfig) -> Self {
        self.settings = settings;
        self
    }

    /// Builder: set the absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = deadline;
        self
    }

    /// Builder: attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Builder: attach a progress sender.
    pub fn with_progress(mut self, progress: Arc<ProgressSender>) -> Self {
        self.progress = progress;
        self
    }

    /// Run one engine task under this attempt's limits, deadline and token.
    ///
    /// Successful invocations are recorded in the context's log. A failed
    /// run that reached an exit is kept in the failure log before its error
    /// is returned.
    pub async fn invoke(&self, task: EngineTask) -> mf_core::Result<EngineInvocation> {
        if self.cancellation.is_cancelled() {
            return Err(Error::cancelled("job cancelled"));
        }
        let call = EngineCall::new(
            task,
            self.limits,
            self.deadline,
            self.cancellation.clone(),
        );
        match self.engine.invoke(call).await {
            Ok(invocation) => {
                self.invocations.lock().push(invocation.clone());
                Ok(invocation)
            }
            Err(EngineFailure { error, invocation }) => {
                if let Some(invocation) = invocation {
                    tracing::debug!(
                        job_id = %self.job_id,
                        invocation = %invocation.id,
                        operation = invocation.operation,
                        exit_code = ?invocation.exit_code,
                        "Recorded failed invocation"
                    );
                    self.failures.lock().push(*invocation);
                }
                Err(error)
            }
        }
    }

    /// Invocations recorded so far, in completion order.
    pub fn invocations(&self) -> Vec<EngineInvocation> {
        self.invocations.lock().clone()
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.lock().len()
    }

    /// Failed runs recorded so far, with their exit status and stderr tail.
    pub fn failed_invocations(&self) -> Vec<EngineInvocation> {
        self.failures.lock().clone()
    }

    /// Fail if the attempt was cancelled or its deadline has passed.
    pub fn check_boundary(&self, next: &str) -> mf_core::Result<()> {
        if self.cancellation.is_cancelled() {
            tracing::info!(job_id = %self.job_id, "Pipeline cancelled before {next}");
            return Err(Error::cancelled("job cancelled"));
        }
        if Instant::now() >= self.deadline {
            tracing::info!(job_id = %self.job_id, "Deadline expired before {next}");
            return Err(Error::cancelled("deadline expired"));
        }
        Ok(())
    }

    /// Concurrent pages/frames allowed within one stage.
    pub fn fan_out(&self) -> usize {
        self.settings.fan_out.max(1)
    }

    pub fn dpi(&self) -> u32 {
        self.options.dpi.unwrap_or(self.settings.default_dpi)
    }

    pub fn quality(&self) -> u8 {
        self.options
            .quality
            .unwrap_or(self.settings.default_quality)
            .clamp(1, 100)
    }

    /// Requested output box.
    pub fn fit(&self) -> Fit {
        Fit::new(self.options.width, self.options.height)
    }

    /// Font file for `family` (the configured default when `None`).
    ///
    /// Each family is looked up at most once per attempt.
    pub async fn resolve_font(&self, family: Option<&str>) -> mf_core::Result<PathBuf> {
        let family = family.unwrap_or(&self.settings.default_font).to_string();
        let cached = self.fonts.lock().get(&family).cloned();
        if let Some(path) = cached {
            return Ok(path);
        }

        let invocation = self
            .invoke(EngineTask::ResolveFont {
                family: family.clone(),
            })
            .await?;
        let path = mf_av::fonts::parse_font_path(&invocation.stdout)?;
        tracing::debug!(job_id = %self.job_id, %family, "Resolved font {}", path.display());

        self.fonts.lock().insert(family, path.clone());
        Ok(path)
    }

    /// Read the pixel size of a produced raster and check it against the
    /// admitted caps. Non-raster formats report no dimensions.
    pub fn measure(
        &self,
        path: &Path,
        format: MediaFormat,
        engine: &str,
    ) -> mf_core::Result<(Option<u32>, Option<u32>)> {
        if format.kind() != MediaKind::Image {
            return Ok((None, None));
        }
        let (width, height) = image::image_dimensions(path).map_err(|e| {
            tracing::warn!(job_id = %self.job_id, "Unreadable output {}: {e}", path.display());
            Error::engine(
                EngineErrorKind::Crashed,
                engine,
                format!("produced an unreadable {format} file"),
            )
        })?;
        PolicyGuard::check_output(&self.limits, width, height)?;
        Ok((Some(width), Some(height)))
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("job_id", &self.job_id)
            .field("limits", &self.limits)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeEngine;

    fn context(engine: FakeEngine, root: &Path) -> StageContext {
        let workspace = Arc::new(JobWorkspace::new(root, JobId::new()));
        StageContext::new(
            workspace,
            Arc::new(engine),
            ResourceLimits::default(),
            MediaFormat::Png,
        )
    }

    #[tokio::test]
    async fn failed_run_is_recorded_before_the_error_returns() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = context(
            FakeEngine::new().fail("count-pages", EngineErrorKind::Crashed, 1),
            tmp.path(),
        );
        let task = || EngineTask::CountPages {
            input: PathBuf::from("/w/input.pdf"),
        };

        let err = ctx.invoke(task()).await.unwrap_err();
        assert_eq!(err.kind(), mf_core::ErrorKind::EngineCrashed);
        assert_eq!(ctx.invocation_count(), 0);

        let failed = ctx.failed_invocations();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].operation, "count-pages");
        assert_eq!(failed[0].exit_code, Some(1));
        assert!(failed[0].stderr.contains("injected failure"));

        ctx.invoke(task()).await.unwrap();
        assert_eq!(ctx.invocation_count(), 1);
        assert_eq!(ctx.failed_invocations().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_call_leaves_no_record() {
        let tmp = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let ctx = context(FakeEngine::new().hang("count-pages"), tmp.path())
            .with_cancellation(token.clone());

        let call = ctx.invoke(EngineTask::CountPages {
            input: PathBuf::from("/w/input.pdf"),
        });
        token.cancel();
        let err = call.await.unwrap_err();
        assert_eq!(err.kind(), mf_core::ErrorKind::Cancelled);
        assert!(ctx.failed_invocations().is_empty());
        assert_eq!(ctx.invocation_count(), 0);
    }
}
