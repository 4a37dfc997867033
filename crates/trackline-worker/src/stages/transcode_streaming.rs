use anyhow::{anyhow, Context};
use async_trait::async_trait;
use trackline_core::models::{ArtifactUpdate, JobMessage, Progress, StageKind, TrackStatus};
use trackline_core::{StageError, StageResultExt};
use trackline_processing::build_manifest;
use trackline_processing::manifest::{MANIFEST_JSON, MANIFEST_MPD};
use trackline_storage::{artifact_key, Artifact};

use super::guard::{self, GuardDecision};
use super::{
    encoder_progress, enter, fetch_failure, finish, job_dir, track_id_of, transcode_failure,
};
use crate::pool::OutcomeSender;
use crate::registry::{StageContext, StageHandler};

/// Produces the fragmented streaming copy and its byte-range manifests.
pub struct TranscodeStreamingStage;

#[async_trait]
impl StageHandler for TranscodeStreamingStage {
    fn kind(&self) -> StageKind {
        StageKind::TranscodeStreaming
    }

    #[tracing::instrument(skip_all, fields(track_id = ?job.track_id, release_id = %job.release_id))]
    async fn run(
        &self,
        ctx: &StageContext,
        job: &JobMessage,
        outcomes: &OutcomeSender,
    ) -> Result<(), StageError> {
        let track_id = track_id_of(job)?;

        let track = match guard::check(ctx.store.as_ref(), self.kind(), track_id).await? {
            GuardDecision::Run(track) => track,
            GuardDecision::Reemit(_) => return Ok(()),
            GuardDecision::Skip(reason) => {
                tracing::info!(reason, "Skipping streaming transcode");
                return Ok(());
            }
        };

        if !enter(ctx, outcomes, track_id, TrackStatus::Transcoding).await? {
            return Ok(());
        }

        let lossless_key = job
            .source_ref
            .clone()
            .or(track.artifacts.lossless_key.clone())
            .ok_or_else(|| StageError::unrecoverable(anyhow!("Track {} has no lossless copy", track_id)))?;

        let dir = job_dir(ctx).await?;
        let src = dir.path().join(Artifact::Lossless.file_name());
        let media = dir.path().join(Artifact::Stream.file_name());

        ctx.storage
            .download_to_file(&lossless_key, &src)
            .await
            .map_err(|e| fetch_failure(&lossless_key, e))?;

        let forward = encoder_progress(outcomes, track_id);
        ctx.transcoder
            .encode_streaming_fragment(&src, &media, track.duration_secs, &forward)
            .await
            .map_err(|e| transcode_failure("Streaming encode failed", e))?;

        let manifest = {
            let media = media.clone();
            let out_dir = dir.path().to_path_buf();
            tokio::task::spawn_blocking(move || build_manifest(&media, track_id, &out_dir))
                .await
                .context("Manifest builder task failed")
                .recoverable()?
                .map_err(|e| transcode_failure("Streaming file has no usable fragments", e))?
        };
        outcomes.progress(Progress {
            track_id: Some(track_id),
            message: Some(format!("Manifest built: {} segments", manifest.segments.len())),
            ..Default::default()
        });

        if !guard::is_live(ctx.store.as_ref(), track_id).await? {
            tracing::info!("Track deleted during streaming transcode, discarding output");
            return Ok(());
        }

        let uploads = [
            (Artifact::Stream, media.clone()),
            (Artifact::ManifestJson, dir.path().join(MANIFEST_JSON)),
            (Artifact::ManifestMpd, dir.path().join(MANIFEST_MPD)),
        ];
        let mut written = Vec::with_capacity(uploads.len());
        for (artifact, path) in &uploads {
            let key = artifact_key(job.release_id, track_id, *artifact);
            ctx.storage
                .upload_file(&key, path, artifact.content_type())
                .await
                .recoverable()?;
            written.push(key);
        }

        let update = ArtifactUpdate {
            stream_key: Some(written[0].clone()),
            manifest_key: Some(written[1].clone()),
            mpd_key: Some(written[2].clone()),
            ..Default::default()
        };
        if !finish(ctx, outcomes, track_id, TrackStatus::Stored, &update, &written).await? {
            return Ok(());
        }

        tracing::info!(
            stream_key = %written[0],
            segments = manifest.segments.len(),
            duration_secs = manifest.duration_secs,
            "Streaming copy stored"
        );
        Ok(())
    }
}
