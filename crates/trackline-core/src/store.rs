//! Persistence contracts for pipeline state.
//!
//! Track status is only ever changed through compare-and-set operations: an
//! update succeeds only when the stored status is a legal predecessor of the
//! requested one, so concurrent or replayed stages cannot move a track
//! backwards.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{ArtifactUpdate, Release, Track, TrackStatus};

pub type StoreResult<T> = Result<T, AppError>;

#[async_trait]
pub trait TrackStore: Send + Sync {
    async fn get(&self, track_id: Uuid) -> StoreResult<Option<Track>>;

    /// Tracks of a release ordered by position.
    async fn list_by_release(&self, release_id: Uuid) -> StoreResult<Vec<Track>>;

    async fn insert(&self, track: &Track) -> StoreResult<()>;

    /// Move a track to `to`.
    ///
    /// Fails with [`AppError::InvalidStatusTransition`] when the stored status
    /// cannot reach `to`, and [`AppError::NotFound`] when the track is gone.
    async fn transition(&self, track_id: Uuid, to: TrackStatus) -> StoreResult<Track>;

    /// Move a track to `to` and record the artifacts that justify it in the same write.
    async fn complete(
        &self,
        track_id: Uuid,
        to: TrackStatus,
        update: &ArtifactUpdate,
    ) -> StoreResult<Track>;

    /// Start a fresh pipeline run: status `uploading`, prior artifacts cleared,
    /// staging path recorded.
    async fn begin_upload(&self, track_id: Uuid, staging_path: &str) -> StoreResult<Track>;

    /// Record artifacts that do not change the status (the download copy).
    async fn record_artifacts(&self, track_id: Uuid, update: &ArtifactUpdate) -> StoreResult<()>;

    async fn clear_staging_path(&self, track_id: Uuid) -> StoreResult<()>;

    /// Remove the track record. Removing a missing track is not an error.
    async fn remove(&self, track_id: Uuid) -> StoreResult<()>;
}

/// Read access to the release catalogue owned by the release CRUD service.
#[async_trait]
pub trait ReleaseDirectory: Send + Sync {
    async fn get_release(&self, release_id: Uuid) -> StoreResult<Option<Release>>;
}

/// Resolve the error for a compare-and-set update that matched no row.
pub fn transition_conflict(current: Option<TrackStatus>, track_id: Uuid, to: TrackStatus) -> AppError {
    match current {
        Some(from) => AppError::InvalidStatusTransition { from, to },
        None => AppError::NotFound(format!("Track {} not found", track_id)),
    }
}
