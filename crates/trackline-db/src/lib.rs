//! Trackline persistence
//!
//! PostgreSQL repositories for tracks and releases, plus in-memory stores
//! used by tests and database-less local runs.

pub mod memory;
pub mod release;
pub mod track;

pub use memory::{InMemoryReleaseDirectory, InMemoryTrackStore};
pub use release::ReleaseRepository;
pub use track::TrackRepository;
