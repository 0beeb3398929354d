//! Job scheduler: admission, bounded concurrency, isolation and retry.
//!
//! Every submitted job is a spawned task that waits for a slot on the
//! scheduler's semaphore; holding a permit is what makes a job Running.
//! Each attempt gets a fresh [`JobWorkspace`] and a fresh deadline, and the
//! workspace is closed on every exit path.
//!
//! Records of finished jobs stay queryable until `retain_finished` newer
//! jobs have finished after them.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use mf_av::JobWorkspace;
use mf_core::config::SchedulerConfig;
use mf_core::events::{EventBus, EventPayload};
use mf_core::{ConversionOutput, ConversionRequest, ConversionResult, Error, ErrorKind, JobId};
use mf_pipeline::{ConversionPipeline, PipelineJob, PipelineRun, ProgressSender};
use parking_lot::Mutex;
use mf_policy::{Admission, PolicyGuard};
use serde::Serialize;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

struct JobRecord {
    state: JobState,
    cancel: CancellationToken,
}

struct Inner {
    guard: PolicyGuard,
    pipeline: ConversionPipeline,
    config: SchedulerConfig,
    scratch_root: PathBuf,
    slots: Arc<Semaphore>,
    queued: AtomicUsize,
    jobs: DashMap<JobId, JobRecord>,
    /// Finished job ids, oldest first.
    finished: Mutex<VecDeque<JobId>>,
    events: Arc<EventBus>,
}

/// Accepts conversion requests and runs at most `pool_size` at a time.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl JobScheduler {
    pub fn new(
        guard: PolicyGuard,
        pipeline: ConversionPipeline,
        config: SchedulerConfig,
        events: Arc<EventBus>,
    ) -> Self {
        let scratch_root = config
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        Self {
            inner: Arc::new(Inner {
                guard,
                pipeline,
                slots: Arc::new(Semaphore::new(config.pool_size)),
                config,
                scratch_root,
                queued: AtomicUsize::new(0),
                jobs: DashMap::new(),
                finished: Mutex::new(VecDeque::new()),
                events,
            }),
        }
    }

    /// Validate and enqueue a request.
    ///
    /// Policy rejections and [`Error::Overloaded`] are returned here, before
    /// any job exists. Must be called from within a Tokio runtime.
    pub fn submit(&self, request: ConversionRequest) -> mf_core::Result<JobHandle> {
        let inner = &self.inner;
        let admission = inner.guard.validate(&request)?;

        let permit = inner.slots.clone().try_acquire_owned().ok();
        if permit.is_none() {
            let backlog = inner.config.backlog;
            inner
                .queued
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |q| {
                    (q < backlog).then_some(q + 1)
                })
                .map_err(|_| {
                    tracing::warn!("Rejecting submission: backlog of {backlog} is full");
                    Error::Overloaded { backlog }
                })?;
        }

        let job_id = JobId::new();
        let cancel = CancellationToken::new();
        let state = if permit.is_some() {
            JobState::Running
        } else {
            JobState::Queued
        };
        inner.jobs.insert(
            job_id,
            JobRecord {
                state,
                cancel: cancel.clone(),
            },
        );
        inner.events.broadcast(EventPayload::JobQueued { job_id });
        tracing::info!(%job_id, route = %admission.route, "Job submitted ({state})");

        let (tx, rx) = oneshot::channel();
        let task_inner = inner.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let result = task_inner
                .run_job(job_id, Arc::new(request), admission, permit, task_cancel)
                .await;
            let _ = tx.send(result);
        });

        Ok(JobHandle {
            job_id,
            cancel,
            result: rx,
            scheduler: self.clone(),
        })
    }

    /// Request cancellation. Returns `false` for unknown or finished jobs.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.inner.jobs.get(&job_id) {
            Some(record) if !record.state.is_terminal() => {
                tracing::info!(%job_id, "Cancellation requested");
                record.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn status(&self, job_id: JobId) -> Option<JobState> {
        self.inner.jobs.get(&job_id).map(|r| r.state)
    }

    /// Number of jobs currently holding a slot.
    pub fn running(&self) -> usize {
        self.count(JobState::Running)
    }

    /// Number of jobs waiting for a slot.
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// Number of job records currently held, finished ones included.
    pub fn tracked(&self) -> usize {
        self.inner.jobs.len()
    }

    /// Drop records of finished jobs. Returns how many were removed.
    pub fn prune_finished(&self) -> usize {
        let mut finished = self.inner.finished.lock();
        finished.clear();
        let before = self.inner.jobs.len();
        self.inner.jobs.retain(|_, r| !r.state.is_terminal());
        before - self.inner.jobs.len()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    pub fn guard(&self) -> &PolicyGuard {
        &self.inner.guard
    }

    fn count(&self, state: JobState) -> usize {
        self.inner
            .jobs
            .iter()
            .filter(|r| r.value().state == state)
            .count()
    }
}

impl Inner {
    fn set_state(&self, job_id: JobId, state: JobState) {
        if let Some(mut record) = self.jobs.get_mut(&job_id) {
            record.state = state;
        }
    }

    /// Move a job to a terminal state and evict the oldest finished
    /// records beyond `retain_finished`.
    fn finish(&self, job_id: JobId, state: JobState) {
        self.set_state(job_id, state);
        let mut finished = self.finished.lock();
        finished.push_back(job_id);
        while finished.len() > self.config.retain_finished {
            if let Some(oldest) = finished.pop_front() {
                self.jobs.remove(&oldest);
            }
        }
    }

    async fn run_job(
        self: Arc<Self>,
        job_id: JobId,
        request: Arc<ConversionRequest>,
        admission: Admission,
        permit: Option<OwnedSemaphorePermit>,
        cancel: CancellationToken,
    ) -> ConversionResult {
        let started = std::time::Instant::now();

        let _permit = match permit {
            Some(permit) => permit,
            None => {
                let acquired = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    permit = self.slots.clone().acquire_owned() => permit.ok(),
                };
                self.queued.fetch_sub(1, Ordering::SeqCst);
                match acquired {
                    Some(permit) => {
                        self.set_state(job_id, JobState::Running);
                        permit
                    }
                    None => {
                        tracing::info!(%job_id, "Cancelled while queued");
                        self.finish(job_id, JobState::Cancelled);
                        self.events.broadcast(EventPayload::JobCancelled { job_id });
                        return Err(Error::cancelled("job cancelled while queued"));
                    }
                }
            }
        };

        let mut options = request.options.clone();
        let mut attempt: u32 = 1;
        loop {
            self.events
                .broadcast(EventPayload::JobStarted { job_id, attempt });
            tracing::info!(%job_id, attempt, "Job running");

            let result = self
                .attempt(job_id, &request, &admission, options.clone(), &cancel)
                .await;

            match result {
                Ok(run) => {
                    let output = ConversionOutput {
                        job_id,
                        format: request.target,
                        total_bytes: run.total_bytes(),
                        duration: started.elapsed(),
                        attempts: attempt,
                        degraded: attempt > 1,
                        invocations: run.invocations.len(),
                        artifacts: run.artifacts,
                    };
                    tracing::info!(
                        %job_id,
                        "Job succeeded: {} artifacts, {} bytes in {:?}",
                        output.artifacts.len(),
                        output.total_bytes,
                        output.duration
                    );
                    self.finish(job_id, JobState::Succeeded);
                    self.events.broadcast(EventPayload::JobSucceeded {
                        job_id,
                        artifacts: output.artifacts.len(),
                    });
                    return Ok(output);
                }
                Err(e)
                    if attempt == 1
                        && self.config.retry_degraded
                        && e.is_recoverable()
                        && !cancel.is_cancelled() =>
                {
                    tracing::warn!(%job_id, "Attempt 1 failed ({e}); retrying with degraded options");
                    self.events.broadcast(EventPayload::JobRetrying {
                        job_id,
                        error: e.public_message(),
                    });
                    let settings = self.pipeline.settings();
                    options = request
                        .options
                        .degraded(settings.default_dpi, settings.default_quality);
                    attempt += 1;
                }
                Err(e) => {
                    if e.kind() == ErrorKind::Cancelled {
                        tracing::info!(%job_id, "Job cancelled: {e}");
                        self.finish(job_id, JobState::Cancelled);
                        self.events.broadcast(EventPayload::JobCancelled { job_id });
                    } else {
                        tracing::error!(%job_id, "Job failed after {attempt} attempt(s): {e}");
                        self.finish(job_id, JobState::Failed);
                        self.events.broadcast(EventPayload::JobFailed {
                            job_id,
                            error: e.public_message(),
                        });
                    }
                    return Err(e);
                }
            }
        }
    }

    /// One attempt in a fresh workspace with a fresh deadline.
    async fn attempt(
        &self,
        job_id: JobId,
        request: &Arc<ConversionRequest>,
        admission: &Admission,
        options: mf_core::ConversionOptions,
        cancel: &CancellationToken,
    ) -> mf_core::Result<PipelineRun> {
        let timeout_secs = options
            .timeout_secs
            .filter(|&s| s > 0)
            .map_or(self.config.job_timeout_secs, |s| {
                s.min(self.config.job_timeout_secs)
            });
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);

        let workspace = Arc::new(JobWorkspace::new(&self.scratch_root, job_id));
        let events = self.events.clone();
        let progress = ProgressSender::new(move |progress, stage| {
            events.broadcast(EventPayload::JobProgress {
                job_id,
                progress,
                stage: stage.to_string(),
            });
        });

        let job = PipelineJob {
            job_id,
            request: request.clone(),
            options,
            admission: admission.clone(),
            workspace: workspace.clone(),
            deadline,
            cancellation: cancel.clone(),
            progress: Arc::new(progress),
        };
        let result = self.pipeline.run(job).await;

        let closed = workspace.close();
        if let Err(e) = &closed {
            tracing::error!(%job_id, "Failed to remove workspace: {e}");
        }
        let run = result?;
        closed?;
        Ok(run)
    }
}

/// Handle to a submitted job.
pub struct JobHandle {
    job_id: JobId,
    cancel: CancellationToken,
    result: oneshot::Receiver<ConversionResult>,
    scheduler: JobScheduler,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.job_id
    }

    /// Request cancellation of this job.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this job; usable after the handle is consumed.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> Option<JobState> {
        self.scheduler.status(self.job_id)
    }

    /// Wait for the job's terminal result.
    pub async fn wait(self) -> ConversionResult {
        self.result
            .await
            .unwrap_or_else(|_| Err(Error::Internal("job task ended without a result".into())))
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_core::config::{PipelineConfig, PolicyConfig};
    use mf_core::{InputMedia, MediaFormat};
    use mf_pipeline::testing::FakeEngine;
    use mf_policy::PolicyTable;

    fn scheduler(engine: Arc<FakeEngine>, config: SchedulerConfig) -> JobScheduler {
        let guard = PolicyGuard::new(Arc::new(PolicyTable::from_config(&PolicyConfig::default())));
        let pipeline = ConversionPipeline::new(engine, PipelineConfig::default());
        JobScheduler::new(guard, pipeline, config, Arc::new(EventBus::default()))
    }

    fn video_request() -> ConversionRequest {
        ConversionRequest::new(InputMedia::new(MediaFormat::Mkv, b"mkv".to_vec()), MediaFormat::Mp4)
    }

    #[test]
    fn job_state_terminality() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert_eq!(JobState::Failed.to_string(), "failed");
    }

    #[tokio::test]
    async fn rejection_is_synchronous() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let sched = scheduler(
            engine.clone(),
            SchedulerConfig {
                scratch_dir: Some(tmp.path().to_path_buf()),
                ..Default::default()
            },
        );
        let req = ConversionRequest::new(InputMedia::new(MediaFormat::Mp3, vec![1u8]), MediaFormat::Png);
        let err = sched.submit(req).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn backlog_overflow_is_overloaded() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new().with_delay(Duration::from_millis(200)));
        let sched = scheduler(
            engine,
            SchedulerConfig {
                pool_size: 1,
                backlog: 1,
                scratch_dir: Some(tmp.path().to_path_buf()),
                ..Default::default()
            },
        );

        let running = sched.submit(video_request()).unwrap();
        let queued = sched.submit(video_request()).unwrap();
        assert_eq!(queued.status(), Some(JobState::Queued));

        let err = sched.submit(video_request()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Overloaded);

        assert!(running.wait().await.is_ok());
        assert!(queued.wait().await.is_ok());
    }

    #[tokio::test]
    async fn cancelling_a_queued_job_never_runs_it() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new().with_delay(Duration::from_millis(200)));
        let sched = scheduler(
            engine.clone(),
            SchedulerConfig {
                pool_size: 1,
                scratch_dir: Some(tmp.path().to_path_buf()),
                ..Default::default()
            },
        );

        let first = sched.submit(video_request()).unwrap();
        let second = sched.submit(video_request()).unwrap();
        let second_id = second.id();
        assert!(sched.cancel(second_id));

        let err = second.wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(sched.status(second_id), Some(JobState::Cancelled));

        first.wait().await.unwrap();
        assert_eq!(engine.calls(), 1);
        assert_eq!(sched.queued(), 0);
        assert!(!sched.cancel(second_id));
    }

    #[tokio::test]
    async fn recoverable_failure_retries_once_degraded() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new().fail(
            "encode-video",
            mf_core::EngineErrorKind::Crashed,
            1,
        ));
        let sched = scheduler(
            engine.clone(),
            SchedulerConfig {
                scratch_dir: Some(tmp.path().to_path_buf()),
                ..Default::default()
            },
        );

        let handle = sched.submit(video_request()).unwrap();
        let job_id = handle.id();
        let output = handle.wait().await.unwrap();
        assert_eq!(output.attempts, 2);
        assert!(output.degraded);
        assert_eq!(engine.calls(), 2);

        let kinds: Vec<&str> = sched
            .events()
            .events_for(job_id)
            .iter()
            .map(|e| match e.payload {
                EventPayload::JobQueued { .. } => "queued",
                EventPayload::JobStarted { .. } => "started",
                EventPayload::JobProgress { .. } => "progress",
                EventPayload::JobRetrying { .. } => "retrying",
                EventPayload::JobSucceeded { .. } => "succeeded",
                EventPayload::JobFailed { .. } => "failed",
                EventPayload::JobCancelled { .. } => "cancelled",
            })
            .filter(|k| *k != "progress")
            .collect();
        assert_eq!(kinds, vec!["queued", "started", "retrying", "started", "succeeded"]);
    }

    #[tokio::test]
    async fn retry_can_be_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new().fail(
            "encode-video",
            mf_core::EngineErrorKind::Crashed,
            1,
        ));
        let sched = scheduler(
            engine.clone(),
            SchedulerConfig {
                retry_degraded: false,
                scratch_dir: Some(tmp.path().to_path_buf()),
                ..Default::default()
            },
        );

        let handle = sched.submit(video_request()).unwrap();
        let job_id = handle.id();
        let err = handle.wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineCrashed);
        assert_eq!(engine.calls(), 1);
        assert_eq!(sched.status(job_id), Some(JobState::Failed));
        assert_eq!(sched.prune_finished(), 1);
        assert_eq!(sched.status(job_id), None);
    }

    #[tokio::test]
    async fn finished_records_are_evicted_oldest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let sched = scheduler(
            engine,
            SchedulerConfig {
                pool_size: 4,
                backlog: 64,
                retain_finished: 8,
                scratch_dir: Some(tmp.path().to_path_buf()),
                ..Default::default()
            },
        );

        let mut ids = Vec::new();
        for _ in 0..50 {
            let handle = sched.submit(video_request()).unwrap();
            ids.push(handle.id());
            handle.wait().await.unwrap();
        }

        assert_eq!(sched.tracked(), 8);
        assert_eq!(sched.status(ids[0]), None);
        assert_eq!(sched.status(ids[41]), None);
        assert_eq!(sched.status(ids[42]), Some(JobState::Succeeded));
        assert_eq!(sched.status(ids[49]), Some(JobState::Succeeded));
    }

    #[tokio::test]
    async fn unfinished_jobs_are_never_evicted() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new().hang("encode-video"));
        let sched = scheduler(
            engine,
            SchedulerConfig {
                pool_size: 1,
                backlog: 4,
                retain_finished: 0,
                scratch_dir: Some(tmp.path().to_path_buf()),
                ..Default::default()
            },
        );

        let running = sched.submit(video_request()).unwrap();
        let queued = sched.submit(video_request()).unwrap();
        let (running_id, queued_id) = (running.id(), queued.id());
        assert_eq!(sched.tracked(), 2);

        assert!(sched.cancel(queued_id));
        queued.wait().await.unwrap_err();
        assert_eq!(sched.status(queued_id), None);
        assert_eq!(sched.status(running_id), Some(JobState::Running));

        assert!(sched.cancel(running_id));
        running.wait().await.unwrap_err();
        assert_eq!(sched.tracked(), 0);
    }
}
