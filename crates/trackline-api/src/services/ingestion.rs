//! Raw upload ingestion.
//!
//! Streams the request body to the track's staging path, flips the track to
//! `uploading` and publishes the source-store job. The caller gets its answer
//! once the job is handed to the publisher, long before any encoding happens.

use std::path::Path;

use anyhow::Context;
use axum::body::Body;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use trackline_core::models::{JobMessage, ProgressEvent, StageKind, Track, TrackStatus};
use trackline_core::AppError;
use trackline_storage::staging_path;
use uuid::Uuid;

use super::{owned_release, release_track};
use crate::state::AppState;

pub struct IngestionService<'a> {
    state: &'a AppState,
}

impl<'a> IngestionService<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    #[tracing::instrument(skip(self, body), fields(release_id = %release_id, track_id = %track_id))]
    pub async fn ingest(
        &self,
        caller: Uuid,
        release_id: Uuid,
        track_id: Uuid,
        body: Body,
    ) -> Result<Track, AppError> {
        let state = self.state;
        owned_release(state.releases.as_ref(), release_id, caller).await?;
        let track = release_track(state.tracks.as_ref(), release_id, track_id).await?;

        // Refuse before reading the body if the track cannot accept an upload.
        if !track.status.can_transition_to(TrackStatus::Uploading) {
            return Err(AppError::InvalidStatusTransition {
                from: track.status,
                to: TrackStatus::Uploading,
            });
        }

        let final_path = staging_path(&state.uploads.staging_dir, release_id, track_id);
        let part_path = final_path.with_extension(format!("part-{}", Uuid::new_v4()));
        let written = match write_body(body, &part_path, state.uploads.max_upload_size_bytes).await {
            Ok(written) => written,
            Err(e) => {
                remove_quietly(&part_path).await;
                return Err(e);
            }
        };

        let staged = final_path.to_string_lossy().to_string();
        let track = match state.tracks.begin_upload(track_id, &staged).await {
            Ok(track) => track,
            Err(e) => {
                remove_quietly(&part_path).await;
                return Err(e);
            }
        };
        if let Err(e) = tokio::fs::rename(&part_path, &final_path).await {
            self.abandon(track_id).await;
            remove_quietly(&part_path).await;
            return Err(anyhow::Error::new(e)
                .context("Failed to move upload into staging")
                .into());
        }

        state.notifier.send(
            caller,
            ProgressEvent::status(caller, release_id, track_id, TrackStatus::Uploading),
        );

        let job = JobMessage::for_track(
            StageKind::StoreSource,
            release_id,
            track_id,
            caller,
            Some(track.title.clone()),
            Some(staged),
        );
        if let Err(e) = state.publisher.publish_job(&job).await {
            tracing::error!(error = %e, "Failed to enqueue source upload");
            self.abandon(track_id).await;
            remove_quietly(&final_path).await;
            return Err(e.into());
        }

        tracing::info!(bytes = written, "Upload staged and queued");
        Ok(track)
    }

    /// Move a track stuck in `uploading` to `error` so it can be re-uploaded.
    async fn abandon(&self, track_id: Uuid) {
        if let Err(e) = self.state.tracks.transition(track_id, TrackStatus::Error).await {
            tracing::warn!(error = %e, "Could not mark track as failed");
        }
    }
}

/// Stream `body` into `path`, refusing empty or oversized uploads.
async fn write_body(body: Body, path: &Path, max_bytes: usize) -> Result<u64, AppError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create staging directory")?;
    }
    let mut file = tokio::fs::File::create(path)
        .await
        .context("Failed to create staging file")?;

    let mut stream = body.into_data_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::InvalidInput(format!("Upload interrupted: {}", e)))?;
        written += chunk.len() as u64;
        if written > max_bytes as u64 {
            return Err(AppError::PayloadTooLarge(format!(
                "Upload exceeds {} bytes",
                max_bytes
            )));
        }
        file.write_all(&chunk)
            .await
            .context("Failed to write staging file")?;
    }

    if written == 0 {
        return Err(AppError::InvalidInput("Upload body is empty".to_string()));
    }
    file.flush().await.context("Failed to flush staging file")?;
    Ok(written)
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove staging file");
        }
    }
}
