//! Release-wide download encoding.

use std::path::Path;

use anyhow::Context;
use trackline_core::models::{ArtifactUpdate, Progress, TrackStatus};
use trackline_core::TrackStore;
use trackline_storage::{artifact_key, Artifact, Storage};
use uuid::Uuid;

use crate::transcoder::Transcoder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadArtifact {
    pub track_id: Uuid,
    pub key: String,
}

/// Encode the download copy of every stored track of a release.
///
/// Tracks are processed one at a time. A track deleted while its copy is being
/// produced is skipped and any object already written for it is removed.
#[tracing::instrument(skip_all, fields(release_id = %release_id))]
pub async fn encode_download_format(
    transcoder: &dyn Transcoder,
    storage: &dyn Storage,
    store: &dyn TrackStore,
    release_id: Uuid,
    work_dir: &Path,
    on_progress: &(dyn Fn(Uuid, Progress) + Send + Sync),
) -> anyhow::Result<Vec<DownloadArtifact>> {
    let tracks: Vec<_> = store
        .list_by_release(release_id)
        .await?
        .into_iter()
        .filter(|t| t.status == TrackStatus::Stored && t.artifacts.lossless_key.is_some())
        .collect();

    let total = tracks.len();
    let mut produced = Vec::with_capacity(total);

    for (i, track) in tracks.into_iter().enumerate() {
        let Some(lossless_key) = track.artifacts.lossless_key.as_deref() else {
            continue;
        };
        on_progress(
            track.id,
            Progress::text(format!("Encoding download {}/{}: {}", i + 1, total, track.title)),
        );

        let src = work_dir.join(format!("{}.flac", track.id));
        let out = work_dir.join(format!("{}.mp3", track.id));
        storage
            .download_to_file(lossless_key, &src)
            .await
            .with_context(|| format!("Failed to fetch lossless source {}", lossless_key))?;

        let track_id = track.id;
        let forward = |p: crate::progress::EncodeProgress| on_progress(track_id, p.to_progress(track_id));
        transcoder
            .encode_download(&src, &out, track.duration_secs, &forward)
            .await
            .with_context(|| format!("Download encode failed for track {}", track.id))?;

        if !is_live(store, track.id).await? {
            tracing::info!(track_id = %track.id, "Track deleted during download encode, discarding");
            remove_quietly(&src, &out).await;
            continue;
        }

        let key = artifact_key(release_id, track.id, Artifact::Download);
        storage
            .upload_file(&key, &out, Artifact::Download.content_type())
            .await
            .with_context(|| format!("Failed to store download copy {}", key))?;

        if !is_live(store, track.id).await? {
            tracing::info!(track_id = %track.id, key = %key, "Track deleted after upload, removing download copy");
            storage.delete(&key).await?;
            remove_quietly(&src, &out).await;
            continue;
        }

        store
            .record_artifacts(
                track.id,
                &ArtifactUpdate {
                    download_key: Some(key.clone()),
                    ..Default::default()
                },
            )
            .await?;
        remove_quietly(&src, &out).await;

        tracing::info!(track_id = %track.id, key = %key, "Download copy stored");
        produced.push(DownloadArtifact {
            track_id: track.id,
            key,
        });
    }

    Ok(produced)
}

async fn is_live(store: &dyn TrackStore, track_id: Uuid) -> anyhow::Result<bool> {
    Ok(matches!(
        store.get(track_id).await?,
        Some(track) if track.status != TrackStatus::Deleting
    ))
}

async fn remove_quietly(src: &Path, out: &Path) {
    for path in [src, out] {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::debug!(path = %path.display(), error = %e, "Temp file cleanup skipped");
        }
    }
}
