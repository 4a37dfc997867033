use anyhow::anyhow;
use async_trait::async_trait;
use trackline_core::models::{ArtifactUpdate, JobMessage, Progress, StageKind, TrackStatus};
use trackline_core::{StageError, StageResultExt};
use trackline_storage::{artifact_key, Artifact};

use super::guard::{self, GuardDecision};
use super::{
    encoder_progress, enter, fetch_failure, finish, job_dir, track_id_of, transcode_failure,
};
use crate::pool::OutcomeSender;
use crate::registry::{StageContext, StageHandler};

/// Probes the stored source and produces the lossless archival copy.
pub struct EncodeLosslessStage;

#[async_trait]
impl StageHandler for EncodeLosslessStage {
    fn kind(&self) -> StageKind {
        StageKind::EncodeLossless
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
            GuardDecision::Reemit(track) => {
                if let Some(next) = track.artifacts.lossless_key.and_then(|k| job.next_stage(k)) {
                    outcomes.enqueue_next(next);
                }
                return Ok(());
            }
            GuardDecision::Skip(reason) => {
                tracing::info!(reason, "Skipping lossless encode");
                return Ok(());
            }
        };

        if !enter(ctx, outcomes, track_id, TrackStatus::Encoding).await? {
            return Ok(());
        }

        let source_key = job
            .source_ref
            .clone()
            .or(track.artifacts.source_key.clone())
            .ok_or_else(|| StageError::unrecoverable(anyhow!("Track {} has no stored source", track_id)))?;

        let dir = job_dir(ctx).await?;
        let src = dir.path().join("source");
        let out = dir.path().join(Artifact::Lossless.file_name());

        ctx.storage
            .download_to_file(&source_key, &src)
            .await
            .map_err(|e| fetch_failure(&source_key, e))?;

        let metadata = ctx
            .transcoder
            .probe_duration(&src)
            .await
            .map_err(|e| transcode_failure("Source is not readable audio", e))?;
        outcomes.progress(Progress {
            track_id: Some(track_id),
            message: Some(format!(
                "Probed source: {} ({:.1}s)",
                metadata.codec.as_deref().unwrap_or("unknown codec"),
                metadata.duration.unwrap_or_default()
            )),
            ..Default::default()
        });

        let forward = encoder_progress(outcomes, track_id);
        ctx.transcoder
            .encode_lossless(&src, &out, metadata.duration, &forward)
            .await
            .map_err(|e| transcode_failure("Lossless encode failed", e))?;

        if !guard::is_live(ctx.store.as_ref(), track_id).await? {
            tracing::info!("Track deleted during lossless encode, discarding output");
            return Ok(());
        }

        let key = artifact_key(job.release_id, track_id, Artifact::Lossless);
        ctx.storage
            .upload_file(&key, &out, Artifact::Lossless.content_type())
            .await
            .recoverable()?;

        let update = ArtifactUpdate {
            lossless_key: Some(key.clone()),
            duration_secs: metadata.duration,
            ..Default::default()
        };
        if !finish(ctx, outcomes, track_id, TrackStatus::Encoded, &update, &[key.clone()]).await? {
            return Ok(());
        }

        tracing::info!(key = %key, duration = ?metadata.duration, "Lossless copy stored");
        if let Some(next) = job.next_stage(key) {
            outcomes.enqueue_next(next);
        }
        Ok(())
    }
}
