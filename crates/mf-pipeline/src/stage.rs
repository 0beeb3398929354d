//! The [`Stage`] trait defines a single pipeline step.
//!
//! A stage receives the artifacts of the previous stage (or the
//! materialized inputs, for the first stage) and returns the artifacts the
//! next stage consumes. Independent pages or frames inside a stage may run
//! concurrently up to the context's fan-out cap.

use async_trait::async_trait;

use crate::artifact::StageArtifact;
use crate::context::StageContext;

/// A single step in a conversion pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable stage name (e.g. `"rasterize-pages"`), used in errors and logs.
    fn name(&self) -> &'static str;

    /// Perform the stage.
    async fn run(
        &self,
        ctx: &StageContext,
        input: Vec<StageArtifact>,
    ) -> mf_core::Result<Vec<StageArtifact>>;

    /// Relative weight of this stage for progress reporting.
    ///
    /// Default is `1.0`.
    fn weight(&self) -> f32 {
        1.0
    }
}
