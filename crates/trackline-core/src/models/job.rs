use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use super::track::TrackStatus;

/// Closed set of pipeline stages. Each stage owns exactly one queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    StoreSource,
    EncodeLossless,
    TranscodeStreaming,
    EncodeDownload,
}

/// Status checkpoints a per-track stage moves a track through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageStatuses {
    /// Status the previous stage leaves behind.
    pub entry: TrackStatus,
    /// Status held while this stage works.
    pub in_progress: TrackStatus,
    /// Status written once this stage's artifact is stored.
    pub complete: TrackStatus,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::StoreSource,
        StageKind::EncodeLossless,
        StageKind::TranscodeStreaming,
        StageKind::EncodeDownload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::StoreSource => "store_source",
            StageKind::EncodeLossless => "encode_lossless",
            StageKind::TranscodeStreaming => "transcode_streaming",
            StageKind::EncodeDownload => "encode_download",
        }
    }

    /// Queue name, also used as the routing key.
    pub fn queue(&self) -> &'static str {
        match self {
            StageKind::StoreSource => "track.store_source",
            StageKind::EncodeLossless => "track.encode_lossless",
            StageKind::TranscodeStreaming => "track.transcode_streaming",
            StageKind::EncodeDownload => "release.encode_download",
        }
    }

    /// The stage published after this one completes for the same track.
    pub fn next(&self) -> Option<StageKind> {
        match self {
            StageKind::StoreSource => Some(StageKind::EncodeLossless),
            StageKind::EncodeLossless => Some(StageKind::TranscodeStreaming),
            StageKind::TranscodeStreaming | StageKind::EncodeDownload => None,
        }
    }

    /// CPU-bound stages run with the heavy-queue prefetch.
    pub fn is_heavy(&self) -> bool {
        !matches!(self, StageKind::StoreSource)
    }

    pub fn is_track_scoped(&self) -> bool {
        !matches!(self, StageKind::EncodeDownload)
    }

    pub fn statuses(&self) -> Option<StageStatuses> {
        match self {
            StageKind::StoreSource => Some(StageStatuses {
                entry: TrackStatus::Uploading,
                in_progress: TrackStatus::Uploading,
                complete: TrackStatus::Uploaded,
            }),
            StageKind::EncodeLossless => Some(StageStatuses {
                entry: TrackStatus::Uploaded,
                in_progress: TrackStatus::Encoding,
                complete: TrackStatus::Encoded,
            }),
            StageKind::TranscodeStreaming => Some(StageStatuses {
                entry: TrackStatus::Encoded,
                in_progress: TrackStatus::Transcoding,
                complete: TrackStatus::Stored,
            }),
            StageKind::EncodeDownload => None,
        }
    }
}

impl Display for StageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("Unknown job type: {}", s))
    }
}

/// A unit of pipeline work as it travels through the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMessage {
    pub job: StageKind,
    pub release_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<Uuid>,
    pub user_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_name: Option<String>,
    /// Staging path for the first stage, object key of the stage input afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ref: Option<String>,
}

/// Why a delivery could not be turned into a [`JobMessage`].
#[derive(Debug, thiserror::Error)]
pub enum JobDecodeError {
    #[error("Malformed job payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Job payload has no job type")]
    MissingJobType,

    #[error("Unknown job type: {0}")]
    UnknownJob(String),

    #[error("Job {0} requires a trackId")]
    MissingTrackId(StageKind),
}

impl JobMessage {
    pub fn for_track(
        job: StageKind,
        release_id: Uuid,
        track_id: Uuid,
        user_id: Uuid,
        track_name: Option<String>,
        source_ref: Option<String>,
    ) -> Self {
        Self {
            job,
            release_id,
            track_id: Some(track_id),
            user_id,
            track_name,
            source_ref,
        }
    }

    pub fn for_release(job: StageKind, release_id: Uuid, user_id: Uuid) -> Self {
        Self {
            job,
            release_id,
            track_id: None,
            user_id,
            track_name: None,
            source_ref: None,
        }
    }

    /// Job for the stage after this one, carrying the stored artifact as input.
    pub fn next_stage(&self, source_ref: impl Into<String>) -> Option<JobMessage> {
        let next = self.job.next()?;
        Some(JobMessage {
            job: next,
            source_ref: Some(source_ref.into()),
            ..self.clone()
        })
    }

    /// Decode a broker payload.
    ///
    /// The job type is resolved before the rest of the body so an unknown stage
    /// can be told apart from a malformed message.
    pub fn decode(payload: &[u8]) -> Result<JobMessage, JobDecodeError> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        let job = value
            .get("job")
            .and_then(|v| v.as_str())
            .ok_or(JobDecodeError::MissingJobType)?;
        if job.parse::<StageKind>().is_err() {
            return Err(JobDecodeError::UnknownJob(job.to_string()));
        }

        let message: JobMessage = serde_json::from_value(value)?;
        if message.job.is_track_scoped() && message.track_id.is_none() {
            return Err(JobDecodeError::MissingTrackId(message.job));
        }
        Ok(message)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format_is_camel_case() {
        let msg = JobMessage::for_track(
            StageKind::EncodeLossless,
            Uuid::nil(),
            Uuid::nil(),
            Uuid::nil(),
            Some("Intro".to_string()),
            None,
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["job"], "encode_lossless");
        assert!(value.get("releaseId").is_some());
        assert!(value.get("trackId").is_some());
        assert_eq!(value["trackName"], "Intro");
        assert!(value.get("sourceRef").is_none());
    }

    #[test]
    fn test_decode_unknown_job_is_distinguished() {
        let payload = json!({
            "job": "make_coffee",
            "releaseId": Uuid::nil(),
            "userId": Uuid::nil(),
        });
        let err = JobMessage::decode(payload.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, JobDecodeError::UnknownJob(ref j) if j == "make_coffee"));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            JobMessage::decode(b"not json"),
            Err(JobDecodeError::Malformed(_))
        ));
        assert!(matches!(
            JobMessage::decode(br#"{"releaseId": "x"}"#),
            Err(JobDecodeError::MissingJobType)
        ));
        let bad_ids = json!({"job": "store_source", "releaseId": "nope", "userId": "nope"});
        assert!(matches!(
            JobMessage::decode(bad_ids.to_string().as_bytes()),
            Err(JobDecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_requires_track_for_track_stages() {
        let payload = json!({
            "job": "transcode_streaming",
            "releaseId": Uuid::new_v4(),
            "userId": Uuid::new_v4(),
        });
        assert!(matches!(
            JobMessage::decode(payload.to_string().as_bytes()),
            Err(JobDecodeError::MissingTrackId(StageKind::TranscodeStreaming))
        ));

        let download = json!({
            "job": "encode_download",
            "releaseId": Uuid::new_v4(),
            "userId": Uuid::new_v4(),
        });
        let msg = JobMessage::decode(download.to_string().as_bytes()).unwrap();
        assert_eq!(msg.job, StageKind::EncodeDownload);
        assert!(msg.track_id.is_none());
    }

    #[test]
    fn test_next_stage_chain() {
        let track_id = Uuid::new_v4();
        let first = JobMessage::for_track(
            StageKind::StoreSource,
            Uuid::new_v4(),
            track_id,
            Uuid::new_v4(),
            None,
            Some("/staging/a.upload".to_string()),
        );

        let second = first.next_stage("tracks/r/t/source").unwrap();
        assert_eq!(second.job, StageKind::EncodeLossless);
        assert_eq!(second.track_id, Some(track_id));
        assert_eq!(second.source_ref.as_deref(), Some("tracks/r/t/source"));

        let third = second.next_stage("tracks/r/t/lossless.flac").unwrap();
        assert_eq!(third.job, StageKind::TranscodeStreaming);
        assert!(third.next_stage("x").is_none());
    }

    #[test]
    fn test_stage_statuses_chain_together() {
        let kinds = [
            StageKind::StoreSource,
            StageKind::EncodeLossless,
            StageKind::TranscodeStreaming,
        ];
        for pair in kinds.windows(2) {
            let a = pair[0].statuses().unwrap();
            let b = pair[1].statuses().unwrap();
            assert_eq!(a.complete, b.entry);
        }
        assert!(StageKind::EncodeDownload.statuses().is_none());
    }

    #[test]
    fn test_queue_names_are_unique() {
        let mut queues: Vec<_> = StageKind::ALL.iter().map(|k| k.queue()).collect();
        queues.sort();
        queues.dedup();
        assert_eq!(queues.len(), StageKind::ALL.len());
    }
}
