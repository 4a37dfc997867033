//! Request-independent flows behind the handlers.

pub mod ingestion;
pub mod track_lifecycle;

use trackline_core::models::{Release, Track};
use trackline_core::{AppError, ReleaseDirectory, TrackStore};
use uuid::Uuid;

/// Load a release and make sure `caller` owns it.
pub async fn owned_release(
    releases: &dyn ReleaseDirectory,
    release_id: Uuid,
    caller: Uuid,
) -> Result<Release, AppError> {
    let release = releases
        .get_release(release_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Release {} not found", release_id)))?;

    if !release.is_owned_by(caller) {
        return Err(AppError::Forbidden(format!(
            "Release {} belongs to another user",
            release_id
        )));
    }
    Ok(release)
}

/// Load a track that belongs to `release_id`.
pub async fn release_track(
    tracks: &dyn TrackStore,
    release_id: Uuid,
    track_id: Uuid,
) -> Result<Track, AppError> {
    tracks
        .get(track_id)
        .await?
        .filter(|t| t.release_id == release_id)
        .ok_or_else(|| AppError::NotFound(format!("Track {} not found", track_id)))
}
