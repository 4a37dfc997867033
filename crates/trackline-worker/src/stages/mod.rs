//! Pipeline stage handlers.

mod encode_download;
mod encode_lossless;
pub mod guard;
mod store_source;
mod transcode_streaming;

pub use encode_download::EncodeDownloadStage;
pub use encode_lossless::EncodeLosslessStage;
pub use store_source::StoreSourceStage;
pub use transcode_streaming::TranscodeStreamingStage;

use anyhow::anyhow;
use tempfile::TempDir;
use trackline_core::models::{ArtifactUpdate, JobMessage, Progress, TrackStatus};
use trackline_core::StageError;
use trackline_processing::{EncodeProgress, TranscodeError};
use trackline_storage::StorageError;
use uuid::Uuid;

use crate::pool::OutcomeSender;
use crate::registry::StageContext;

fn track_id_of(job: &JobMessage) -> Result<Uuid, StageError> {
    job.track_id
        .ok_or_else(|| StageError::unrecoverable(anyhow!("Job {} has no trackId", job.job)))
}

/// Scratch directory for one job, removed on drop.
async fn job_dir(ctx: &StageContext) -> Result<TempDir, StageError> {
    tokio::fs::create_dir_all(&ctx.work_dir)
        .await
        .map_err(StageError::recoverable)?;
    TempDir::new_in(&ctx.work_dir).map_err(StageError::recoverable)
}

fn transcode_failure(context: &str, err: TranscodeError) -> StageError {
    let input_error = err.is_input_error();
    let err = anyhow::Error::new(err).context(context.to_string());
    if input_error {
        StageError::unrecoverable(err)
    } else {
        StageError::recoverable(err)
    }
}

fn fetch_failure(key: &str, err: StorageError) -> StageError {
    let missing = matches!(err, StorageError::NotFound(_));
    let err = anyhow::Error::new(err).context(format!("Failed to fetch {}", key));
    if missing {
        StageError::unrecoverable(err)
    } else {
        StageError::recoverable(err)
    }
}

fn encoder_progress(outcomes: &OutcomeSender, track_id: Uuid) -> impl Fn(EncodeProgress) + Send + Sync + '_ {
    move |p: EncodeProgress| outcomes.progress(p.to_progress(track_id))
}

/// Move the track into a stage's in-progress status.
///
/// Returns `false` when the track was deleted in the meantime.
async fn enter(
    ctx: &StageContext,
    outcomes: &OutcomeSender,
    track_id: Uuid,
    status: TrackStatus,
) -> Result<bool, StageError> {
    match ctx.store.transition(track_id, status).await {
        Ok(_) => {
            outcomes.progress(Progress::status(track_id, status));
            Ok(true)
        }
        Err(e) if guard::is_tombstoned(&e) => {
            tracing::info!(track_id = %track_id, "Track deleted before stage started");
            Ok(false)
        }
        Err(e) => Err(StageError::recoverable(e)),
    }
}

/// Record the stage's artifacts together with its completion status.
///
/// When the track was deleted while the stage ran, every key in `written` is
/// removed and `false` is returned.
async fn finish(
    ctx: &StageContext,
    outcomes: &OutcomeSender,
    track_id: Uuid,
    status: TrackStatus,
    update: &ArtifactUpdate,
    written: &[String],
) -> Result<bool, StageError> {
    if !guard::is_live(ctx.store.as_ref(), track_id).await? {
        discard(ctx, track_id, written).await;
        return Ok(false);
    }

    match ctx.store.complete(track_id, status, update).await {
        Ok(_) => {
            outcomes.progress(Progress::status(track_id, status));
            Ok(true)
        }
        Err(e) if guard::is_tombstoned(&e) => {
            discard(ctx, track_id, written).await;
            Ok(false)
        }
        Err(e) => Err(StageError::recoverable(e)),
    }
}

async fn discard(ctx: &StageContext, track_id: Uuid, keys: &[String]) {
    tracing::info!(track_id = %track_id, objects = keys.len(), "Track deleted mid-stage, discarding output");
    for key in keys {
        if let Err(e) = ctx.storage.delete(key).await {
            tracing::warn!(key = %key, error = %e, "Failed to delete discarded artifact");
        }
    }
}
