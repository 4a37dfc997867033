use std::path::PathBuf;

use anyhow::anyhow;
use async_trait::async_trait;
use trackline_core::models::{ArtifactUpdate, JobMessage, StageKind, TrackStatus};
use trackline_core::{StageError, StageResultExt};
use trackline_storage::{artifact_key, Artifact};

use super::guard::{self, GuardDecision};
use super::{finish, track_id_of};
use crate::pool::OutcomeSender;
use crate::registry::{StageContext, StageHandler};

/// Copies a staged upload into object storage.
pub struct StoreSourceStage;

#[async_trait]
impl StageHandler for StoreSourceStage {
    fn kind(&self) -> StageKind {
        StageKind::StoreSource
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
                if let Some(next) = track.artifacts.source_key.and_then(|k| job.next_stage(k)) {
                    outcomes.enqueue_next(next);
                }
                return Ok(());
            }
            GuardDecision::Skip(reason) => {
                tracing::info!(reason, "Skipping source upload");
                if let Some(staged) = &job.source_ref {
                    if !guard::is_live(ctx.store.as_ref(), track_id).await? {
                        remove_staged(std::path::Path::new(staged)).await;
                    }
                }
                return Ok(());
            }
        };

        let staged = job
            .source_ref
            .clone()
            .or(track.staging_path.clone())
            .map(PathBuf::from)
            .ok_or_else(|| StageError::unrecoverable(anyhow!("Track {} has no staged upload", track_id)))?;

        if !tokio::fs::try_exists(&staged).await.recoverable()? {
            return Err(StageError::unrecoverable(anyhow!(
                "Staged upload {} is missing",
                staged.display()
            )));
        }

        if !guard::is_live(ctx.store.as_ref(), track_id).await? {
            remove_staged(&staged).await;
            return Ok(());
        }

        let key = artifact_key(job.release_id, track_id, Artifact::Source);
        ctx.storage
            .upload_file(&key, &staged, Artifact::Source.content_type())
            .await
            .recoverable()?;

        let update = ArtifactUpdate {
            source_key: Some(key.clone()),
            ..Default::default()
        };
        if !finish(ctx, outcomes, track_id, TrackStatus::Uploaded, &update, &[key.clone()]).await? {
            remove_staged(&staged).await;
            return Ok(());
        }

        remove_staged(&staged).await;
        if let Err(e) = ctx.store.clear_staging_path(track_id).await {
            tracing::warn!(error = %e, "Failed to clear staging path");
        }

        tracing::info!(key = %key, "Source stored");
        if let Some(next) = job.next_stage(key) {
            outcomes.enqueue_next(next);
        }
        Ok(())
    }
}

async fn remove_staged(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        tracing::debug!(path = %path.display(), error = %e, "Staged upload already removed");
    }
}
