use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status of a track as it moves through the ingest pipeline.
///
/// The happy path is strictly forward:
/// `pending → uploading → uploaded → encoding → encoded → transcoding → stored`.
/// `error` can only be entered from an in-progress status and left only by a
/// re-upload. `deleting` can be entered from anywhere and is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    Pending,
    Uploading,
    Uploaded,
    Encoding,
    Encoded,
    Transcoding,
    Stored,
    Error,
    Deleting,
}

impl TrackStatus {
    pub const ALL: [TrackStatus; 9] = [
        TrackStatus::Pending,
        TrackStatus::Uploading,
        TrackStatus::Uploaded,
        TrackStatus::Encoding,
        TrackStatus::Encoded,
        TrackStatus::Transcoding,
        TrackStatus::Stored,
        TrackStatus::Error,
        TrackStatus::Deleting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Pending => "pending",
            TrackStatus::Uploading => "uploading",
            TrackStatus::Uploaded => "uploaded",
            TrackStatus::Encoding => "encoding",
            TrackStatus::Encoded => "encoded",
            TrackStatus::Transcoding => "transcoding",
            TrackStatus::Stored => "stored",
            TrackStatus::Error => "error",
            TrackStatus::Deleting => "deleting",
        }
    }

    /// Statuses during which a pipeline stage is actively working on the track.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            TrackStatus::Uploading | TrackStatus::Encoding | TrackStatus::Transcoding
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TrackStatus::Deleting)
    }

    /// Whether a persisted track may move from `self` to `next`.
    ///
    /// In-progress statuses may be re-entered so a redelivered job can restart
    /// its own stage.
    pub fn can_transition_to(&self, next: TrackStatus) -> bool {
        use TrackStatus::*;

        match (*self, next) {
            (_, Deleting) => true,
            (Deleting, _) => false,
            (Pending | Error, Uploading) => true,
            (Uploading, Uploaded) => true,
            (Uploaded | Encoding, Encoding) => true,
            (Encoding, Encoded) => true,
            (Encoded | Transcoding, Transcoding) => true,
            (Transcoding, Stored) => true,
            (Uploading | Encoding | Transcoding, Error) => true,
            _ => false,
        }
    }

    /// Every status from which `next` is reachable in a single step.
    pub fn predecessors_of(next: TrackStatus) -> Vec<TrackStatus> {
        TrackStatus::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl Display for TrackStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrackStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Invalid track status: {}", s))
    }
}

/// Object storage references to the artifacts derived from a track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrackArtifacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lossless_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpd_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_key: Option<String>,
}

impl TrackArtifacts {
    pub fn is_empty(&self) -> bool {
        *self == TrackArtifacts::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub release_id: Uuid,
    pub title: String,
    pub position: i32,
    pub status: TrackStatus,
    pub duration_secs: Option<f64>,
    pub artifacts: TrackArtifacts,
    /// Local path of the raw upload while it waits for the source-store stage.
    pub staging_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Track {
    pub fn new(release_id: Uuid, title: impl Into<String>, position: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            release_id,
            title: title.into(),
            position,
            status: TrackStatus::Pending,
            duration_secs: None,
            artifacts: TrackArtifacts::default(),
            staging_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_view(&self) -> TrackView {
        TrackView::from(self)
    }
}

/// Fields of a track that are exposed outside the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TrackView {
    pub id: Uuid,
    pub release_id: Uuid,
    pub title: String,
    pub position: i32,
    pub status: TrackStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    pub artifacts: TrackArtifacts,
    pub updated_at: DateTime<Utc>,
}

impl From<&Track> for TrackView {
    fn from(track: &Track) -> Self {
        Self {
            id: track.id,
            release_id: track.release_id,
            title: track.title.clone(),
            position: track.position,
            status: track.status,
            duration_secs: track.duration_secs,
            artifacts: track.artifacts.clone(),
            updated_at: track.updated_at,
        }
    }
}

/// Artifact fields written together with a stage's completion status.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct ArtifactUpdate {
    pub source_key: Option<String>,
    pub lossless_key: Option<String>,
    pub stream_key: Option<String>,
    pub manifest_key: Option<String>,
    pub mpd_key: Option<String>,
    pub download_key: Option<String>,
    pub duration_secs: Option<f64>,
}

impl ArtifactUpdate {
    pub fn apply(&self, track: &mut Track) {
        fn set(slot: &mut Option<String>, value: &Option<String>) {
            if let Some(v) = value {
                *slot = Some(v.clone());
            }
        }

        set(&mut track.artifacts.source_key, &self.source_key);
        set(&mut track.artifacts.lossless_key, &self.lossless_key);
        set(&mut track.artifacts.stream_key, &self.stream_key);
        set(&mut track.artifacts.manifest_key, &self.manifest_key);
        set(&mut track.artifacts.mpd_key, &self.mpd_key);
        set(&mut track.artifacts.download_key, &self.download_key);
        if self.duration_secs.is_some() {
            track.duration_secs = self.duration_secs;
        }
    }
}
