//! Track deletion and release download requests.

use trackline_core::models::{JobMessage, ProgressEvent, StageKind, TrackStatus};
use trackline_core::AppError;
use trackline_storage::{staging_path, track_prefix};
use uuid::Uuid;

use super::{owned_release, release_track};
use crate::state::AppState;

pub struct TrackLifecycleService;

impl TrackLifecycleService {
    /// Tombstone the track, then remove its artifacts, staged upload and record.
    ///
    /// A job already running for the track is left to finish; it sees the
    /// tombstone (or the missing record) and discards its output.
    #[tracing::instrument(skip(state), fields(release_id = %release_id, track_id = %track_id))]
    pub async fn delete_track(
        state: &AppState,
        caller: Uuid,
        release_id: Uuid,
        track_id: Uuid,
    ) -> Result<(), AppError> {
        owned_release(state.releases.as_ref(), release_id, caller).await?;
        release_track(state.tracks.as_ref(), release_id, track_id).await?;

        state.tracks.transition(track_id, TrackStatus::Deleting).await?;
        state.notifier.send(
            caller,
            ProgressEvent::status(caller, release_id, track_id, TrackStatus::Deleting),
        );

        match state.storage.delete_prefix(&track_prefix(release_id, track_id)).await {
            Ok(removed) => tracing::debug!(removed, "Track artifacts deleted"),
            Err(e) => tracing::warn!(error = %e, "Failed to delete track artifacts"),
        }

        let staged = staging_path(&state.uploads.staging_dir, release_id, track_id);
        if let Err(e) = tokio::fs::remove_file(&staged).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %staged.display(), error = %e, "Failed to remove staged upload");
            }
        }

        state.tracks.remove(track_id).await?;
        tracing::info!("Track deleted");
        Ok(())
    }

    /// Queue the download-copy encode for every stored track of the release.
    #[tracing::instrument(skip(state), fields(release_id = %release_id))]
    pub async fn request_download(
        state: &AppState,
        caller: Uuid,
        release_id: Uuid,
    ) -> Result<(), AppError> {
        owned_release(state.releases.as_ref(), release_id, caller).await?;

        let job = JobMessage::for_release(StageKind::EncodeDownload, release_id, caller);
        state.publisher.publish_job(&job).await?;
        tracing::info!("Release download queued");
        Ok(())
    }
}
