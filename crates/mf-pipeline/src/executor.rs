//! Pipeline executor: runs a sequence of [`Stage`]s strictly in order with
//! progress reporting and cancellation checks at every boundary.

use crate::artifact::StageArtifact;
use crate::context::StageContext;
use crate::stage::Stage;

/// Runs stages one after another, feeding each the previous one's artifacts.
pub struct PipelineExecutor {
    stages: Vec<Box<dyn Stage>>,
}

impl PipelineExecutor {
    /// Create a new executor from a list of stages.
    pub fn new(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Compute the total weight of all stages.
    fn total_weight(&self) -> f32 {
        self.stages.iter().map(|s| s.weight()).sum()
    }

    /// Execute the pipeline, returning the last stage's artifacts.
    ///
    /// # Errors
    ///
    /// Returns the first stage error wrapped with that stage's name, or
    /// [`mf_core::Error::Cancelled`] when the token fired or the deadline
    /// passed at a stage boundary. Remaining stages are not run.
    pub async fn execute(
        &self,
        ctx: &StageContext,
        input: Vec<StageArtifact>,
    ) -> mf_core::Result<Vec<StageArtifact>> {
        if self.stages.is_empty() {
            return Err(mf_core::Error::Internal("no stages to execute".into()));
        }

        let total_weight = self.total_weight();
        let mut completed_weight: f32 = 0.0;
        let mut artifacts = input;

        for stage in &self.stages {
            ctx.check_boundary(stage.name())?;

            tracing::info!(job_id = %ctx.job_id, "Starting: {}", stage.name());
            match stage.run(ctx, artifacts).await {
                Ok(produced) => {
                    artifacts = produced;
                    completed_weight += stage.weight();
                    let pct = if total_weight > 0.0 {
                        (completed_weight / total_weight) * 100.0
                    } else {
                        100.0
                    };
                    ctx.progress.send(pct, stage.name());
                    tracing::info!(
                        job_id = %ctx.job_id,
                        "[{:.0}%] Completed: {} ({} artifacts)",
                        pct,
                        stage.name(),
                        artifacts.len()
                    );
                }
                Err(e) => {
                    tracing::error!(job_id = %ctx.job_id, "Stage {} failed: {e}", stage.name());
                    for path in ctx.workspace.list() {
                        tracing::debug!(job_id = %ctx.job_id, "Partial artifact: {}", path.display());
                    }
                    return Err(e.in_stage(stage.name()));
                }
            }
        }

        ctx.check_boundary("finalize")?;
        ctx.progress.send(100.0, "Finalizing");

        Ok(artifacts)
    }
}
