//! Trackline Core Library
//!
//! Domain models, the track status state machine, broker wire types, error
//! types, persistence contracts and configuration shared by every Trackline
//! component.

pub mod config;
pub mod error;
pub mod models;
pub mod stage_error;
pub mod storage_types;
pub mod store;

pub use config::{BaseConfig, Config, LogFormat, PipelineConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use stage_error::{StageError, StageResultExt};
pub use storage_types::StorageBackend;
pub use store::{ReleaseDirectory, StoreResult, TrackStore};
