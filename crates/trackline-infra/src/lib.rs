//! Trackline Infrastructure Library
//!
//! Shared infrastructure used by the API process and the pipeline:
//! - Per-user progress notification fan-out
//! - Telemetry initialization

pub mod notifier;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub use notifier::{Notifier, Subscription};

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};
