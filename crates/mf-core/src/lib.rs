//! mf-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for all other mf-* crates,
//! providing type-safe identifiers, a unified error type, media-domain
//! enums, conversion request/result types, resource limits, process-wide
//! configuration, and a broadcast event bus for job lifecycle notifications.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod limits;
pub mod media;
pub mod request;

// Re-export the most commonly used items at the crate root.
pub use error::{EngineErrorKind, Error, ErrorKind, Rejection, RejectionKind, Result};
pub use ids::*;
pub use limits::ResourceLimits;
pub use media::*;
pub use request::*;
