use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::job::{JobMessage, StageKind};
use super::outcome::Progress;
use super::track::TrackStatus;

pub const TRACK_PROGRESS: &str = "track.progress";
pub const TRACK_STATUS: &str = "track.status";
pub const TRACK_ERROR: &str = "track.error";
pub const RELEASE_DOWNLOAD: &str = "release.download";

/// Ephemeral notification delivered to a user's live sessions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl ProgressEvent {
    pub fn new(user_id: Uuid, event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            user_id,
            event_type: event_type.into(),
            payload,
        }
    }

    pub fn status(user_id: Uuid, release_id: Uuid, track_id: Uuid, status: TrackStatus) -> Self {
        Self::new(
            user_id,
            TRACK_STATUS,
            json!({ "trackId": track_id, "releaseId": release_id, "status": status }),
        )
    }

    pub fn error(user_id: Uuid, release_id: Uuid, track_id: Uuid, message: &str) -> Self {
        Self::new(
            user_id,
            TRACK_ERROR,
            json!({ "trackId": track_id, "releaseId": release_id, "message": message }),
        )
    }

    /// Event for a worker progress update on `job`.
    pub fn from_progress(job: &JobMessage, progress: &Progress) -> Self {
        let track_id = progress.track_id.or(job.track_id);

        if let (Some(status), Some(track_id)) = (progress.status, track_id) {
            return Self::status(job.user_id, job.release_id, track_id, status);
        }

        let mut payload = serde_json::to_value(progress).unwrap_or_else(|_| json!({}));
        if let Some(map) = payload.as_object_mut() {
            map.insert("releaseId".to_string(), json!(job.release_id));
            map.insert("stage".to_string(), json!(job.job));
            if let Some(track_id) = track_id {
                map.insert("trackId".to_string(), json!(track_id));
            }
            if let Some(name) = &job.track_name {
                map.insert("trackName".to_string(), json!(name));
            }
        }

        let event_type = match job.job {
            StageKind::EncodeDownload => RELEASE_DOWNLOAD,
            _ => TRACK_PROGRESS,
        };
        Self::new(job.user_id, event_type, payload)
    }
}
