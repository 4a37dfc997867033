//! Trackline Storage Library
//!
//! Object storage abstraction for pipeline artifacts, with S3 and local
//! filesystem backends.
//!
//! # Storage key format
//!
//! Keys are track-scoped: `tracks/{release_id}/{track_id}/{artifact}`. Keys must
//! not contain `..` or a leading `/`. Key generation lives in the `keys` module
//! so all backends stay consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

pub use factory::create_storage;
pub use keys::{artifact_key, staging_path, track_prefix, Artifact};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use trackline_core::StorageBackend;
pub use traits::{Storage, StorageError, StorageResult};
