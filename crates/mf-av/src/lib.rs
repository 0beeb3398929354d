//! # mf-av
//!
//! Engine adapter for mediaforge: a uniform, typed interface over the
//! external conversion tools.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to
//!   ImageMagick (`magick` or IM6 `convert`), ffmpeg and fc-match, with a
//!   startup health check.
//! - **Command execution** ([`ToolCommand`]) -- async builder with deadline,
//!   cancellation, OS resource limits and bounded output excerpts.
//! - **Workspaces** ([`JobWorkspace`]) -- lazily created per-job scratch
//!   directories removed exactly once.
//! - **The [`Engine`] trait** with [`EngineTask`]s mapping to fixed argument
//!   vectors ([`magick`], [`ffmpeg`], [`fonts`]) and the process-spawning
//!   [`CliEngine`].

pub mod cli_engine;
pub mod command;
pub mod engine;
pub mod ffmpeg;
pub mod fonts;
pub mod magick;
pub mod tools;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use cli_engine::CliEngine;
pub use command::{ProcessLimits, ToolCommand, ToolOutput};
pub use engine::{
    ComposeSpec, DrawText, Engine, EngineCall, EngineFailure, EngineInvocation, EngineTask, Fit,
    Layer, TextSpec, VideoEncode,
};
pub use tools::{Tool, ToolConfig, ToolInfo, ToolRegistry};
pub use workspace::JobWorkspace;
