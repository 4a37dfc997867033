//! Status guards that make stage redelivery idempotent.

use trackline_core::models::{StageKind, Track, TrackStatus};
use trackline_core::{AppError, StageError, TrackStore};
use uuid::Uuid;

#[derive(Debug)]
pub enum GuardDecision {
    /// Track is at the stage's entry or in-progress status.
    Run(Track),
    /// Track is exactly at the stage's completion status: the work is stored but
    /// the next job may not have been published.
    Reemit(Track),
    /// Track is further along, failed, deleted or gone.
    Skip(&'static str),
}

pub fn evaluate(stage: StageKind, track: Option<Track>) -> GuardDecision {
    let Some(statuses) = stage.statuses() else {
        return GuardDecision::Skip("stage is not track scoped");
    };
    let Some(track) = track else {
        return GuardDecision::Skip("track no longer exists");
    };

    match track.status {
        s if s == statuses.entry || s == statuses.in_progress => GuardDecision::Run(track),
        s if s == statuses.complete => GuardDecision::Reemit(track),
        TrackStatus::Deleting => GuardDecision::Skip("track is being deleted"),
        TrackStatus::Error => GuardDecision::Skip("track is in error"),
        _ => GuardDecision::Skip("track is past this stage"),
    }
}

pub async fn check(
    store: &dyn TrackStore,
    stage: StageKind,
    track_id: Uuid,
) -> Result<GuardDecision, StageError> {
    let track = store.get(track_id).await.map_err(StageError::recoverable)?;
    Ok(evaluate(stage, track))
}

/// Whether the track still exists and has not been marked for deletion.
pub async fn is_live(store: &dyn TrackStore, track_id: Uuid) -> Result<bool, StageError> {
    let track = store.get(track_id).await.map_err(StageError::recoverable)?;
    Ok(matches!(track, Some(t) if t.status != TrackStatus::Deleting))
}

/// Whether a failed status write means the track was deleted underneath the stage.
pub fn is_tombstoned(err: &AppError) -> bool {
    matches!(
        err,
        AppError::NotFound(_)
            | AppError::InvalidStatusTransition {
                from: TrackStatus::Deleting,
                ..
            }
    )
}
