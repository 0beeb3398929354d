//! [`ConversionPipeline`]: plan, execute and collect one job attempt.

use std::sync::Arc;

use bytes::Bytes;
use mf_av::{Engine, EngineInvocation, JobWorkspace};
use mf_core::config::PipelineConfig;
use mf_core::{ConversionOptions, ConversionRequest, JobId, OutputArtifact, RequestSource};
use mf_policy::Admission;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::artifact::StageArtifact;
use crate::context::{ProgressSender, StageContext};
use crate::executor::PipelineExecutor;
use crate::planner::{DefaultPlanner, Planner};

/// Everything one attempt of a job needs.
pub struct PipelineJob {
    pub job_id: JobId,
    pub request: Arc<ConversionRequest>,
    /// Options for this attempt; the degraded set on a retry.
    pub options: ConversionOptions,
    pub admission: Admission,
    pub workspace: Arc<JobWorkspace>,
    pub deadline: Instant,
    pub cancellation: CancellationToken,
    pub progress: Arc<ProgressSender>,
}

/// The outcome of a successful attempt.
#[derive(Debug)]
pub struct PipelineRun {
    pub artifacts: Vec<OutputArtifact>,
    pub invocations: Vec<EngineInvocation>,
}

impl PipelineRun {
    pub fn total_bytes(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size).sum()
    }
}

/// Runs admitted requests through their planned stages.
#[derive(Clone)]
pub struct ConversionPipeline {
    engine: Arc<dyn Engine>,
    settings: PipelineConfig,
    planner: Arc<dyn Planner>,
}

impl ConversionPipeline {
    pub fn new(engine: Arc<dyn Engine>, settings: PipelineConfig) -> Self {
        Self {
            engine,
            settings,
            planner: Arc::new(DefaultPlanner),
        }
    }

    /// Replace the route-to-stage mapping.
    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = planner;
        self
    }

    pub fn settings(&self) -> &PipelineConfig {
        &self.settings
    }

    /// Run one attempt: write the inputs into the workspace, execute the
    /// planned stages and read the final artifacts back into memory.
    ///
    /// The caller owns the workspace and closes it on every exit path.
    pub async fn run(&self, job: PipelineJob) -> mf_core::Result<PipelineRun> {
        let route = job.admission.route;
        let stages = self.planner.plan(&job.request, &job.options, route);
        let executor = PipelineExecutor::new(stages);
        tracing::info!(
            job_id = %job.job_id,
            %route,
            "Planned stages: {}",
            executor.stage_names().join(" -> ")
        );

        let inputs = materialize(&job.workspace, &job.request)?;

        let ctx = StageContext::new(
            job.workspace.clone(),
            self.engine.clone(),
            job.admission.limits,
            job.request.target,
        )
        .with_options(job.options)
        .with_settings(self.settings.clone())
        .with_deadline(job.deadline)
        .with_cancellation(job.cancellation)
        .with_progress(job.progress);

        let produced = executor.execute(&ctx, inputs).await?;

        let mut artifacts = Vec::with_capacity(produced.len());
        for artifact in produced {
            let content = Bytes::from(tokio::fs::read(&artifact.path).await?);
            artifacts.push(OutputArtifact {
                name: artifact.file_name(),
                format: artifact.format,
                width: artifact.width,
                height: artifact.height,
                size: content.len() as u64,
                content,
            });
        }

        Ok(PipelineRun {
            artifacts,
            invocations: ctx.invocations(),
        })
    }
}

impl std::fmt::Debug for ConversionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionPipeline")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Write the request's binary inputs into the workspace under names the
/// pipeline chooses. Caller-supplied names never become paths.
fn materialize(
    workspace: &JobWorkspace,
    request: &ConversionRequest,
) -> mf_core::Result<Vec<StageArtifact>> {
    match &request.source {
        RequestSource::Media(input) => {
            let path = workspace.write(
                &format!("input.{}", input.format.extension()),
                &input.content,
            )?;
            Ok(vec![StageArtifact::new(path, input.format)])
        }
        RequestSource::Composition { assets, .. } => assets
            .iter()
            .enumerate()
            .map(|(i, asset)| {
                let path = workspace.write(
                    &format!("asset-{i:02}.{}", asset.format.extension()),
                    &asset.content,
                )?;
                Ok(StageArtifact::new(path, asset.format))
            })
            .collect(),
    }
}
