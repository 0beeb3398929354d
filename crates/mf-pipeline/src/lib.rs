//! # mf-pipeline
//!
//! Orchestration of multi-stage conversions.
//!
//! This crate provides:
//!
//! - **[`Stage`]** trait -- one step that consumes the previous stage's
//!   artifacts and writes new ones into the job workspace.
//! - **[`StageContext`]** -- per-attempt execution context (workspace,
//!   engine, effective limits, options, deadline, cancellation, progress,
//!   invocation log).
//! - **Built-in stages** ([`stages`]) -- inspect-document, rasterize-pages,
//!   overlay-text, decode-image, encode-images, encode-video, compose-video.
//! - **[`Planner`]** -- decomposes a request into its stage list by route.
//! - **[`PipelineExecutor`]** -- runs stages strictly in order, checking
//!   cancellation and the deadline at every boundary.
//! - **[`ConversionPipeline`]** -- materializes inputs, plans, executes and
//!   collects the final artifacts.

pub mod artifact;
pub mod context;
pub mod executor;
pub mod pipeline;
pub mod planner;
pub mod stage;
pub mod stages;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-export key types at the crate root.
pub use artifact::StageArtifact;
pub use context::{ProgressSender, StageContext};
pub use executor::PipelineExecutor;
pub use pipeline::{ConversionPipeline, PipelineJob, PipelineRun};
pub use planner::{DefaultPlanner, Planner};
pub use stage::Stage;
