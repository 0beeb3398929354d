//! Mediaforge - policy-guarded media conversion
//!
//! This library crate exposes the service core for the CLI and for
//! integration testing.

pub mod delivery;
pub mod scheduler;
pub mod service;

pub use delivery::{DeliveryError, DeliveryReceipt, WebhookDelivery};
pub use scheduler::{JobHandle, JobScheduler, JobState};
pub use service::MediaService;
