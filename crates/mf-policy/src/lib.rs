//! # mf-policy
//!
//! Explicit, per-request conversion policy for mediaforge.
//!
//! Instead of relaxing a process-wide ImageMagick policy file, every request
//! is checked against data loaded once at startup:
//!
//! - [`PolicyRule`] -- whether one operation may touch one format, and the
//!   resource ceilings that apply.
//! - [`PolicyTable`] -- the read-only set of rules, shared behind an `Arc`.
//! - [`PolicyGuard`] -- validates a request and yields an [`Admission`]
//!   carrying the route and effective limits.

pub mod guard;
pub mod rule;
pub mod table;
pub mod text;

pub use guard::{requirements, Admission, PolicyGuard};
pub use rule::PolicyRule;
pub use table::PolicyTable;
