use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::{JobMessage, StageKind};
use super::track::TrackStatus;

/// Progress reported by a running stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timecode_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Set when the update announces a persisted status change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TrackStatus>,
}

impl Progress {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn status(track_id: Uuid, status: TrackStatus) -> Self {
        Self {
            track_id: Some(track_id),
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Message a worker sends back to its orchestrator.
///
/// A worker emits any number of `Progress` and `EnqueueNext` messages followed
/// by exactly one terminal `StageComplete` or `StageError`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerOutcome {
    Progress(Progress),
    StageComplete {
        stage: StageKind,
    },
    StageError {
        stage: StageKind,
        message: String,
        #[serde(default)]
        recoverable: bool,
    },
    EnqueueNextStage {
        job: JobMessage,
    },
}

impl WorkerOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerOutcome::StageComplete { .. } | WorkerOutcome::StageError { .. }
        )
    }

    /// Decode an outcome from its JSON form.
    ///
    /// A bare string, or an object without a `type` field, is a plain
    /// human-readable progress message.
    pub fn decode(value: serde_json::Value) -> Result<WorkerOutcome, serde_json::Error> {
        match value {
            serde_json::Value::String(text) => Ok(WorkerOutcome::Progress(Progress::text(text))),
            serde_json::Value::Object(ref map) if !map.contains_key("type") => {
                let text = map
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string());
                Ok(WorkerOutcome::Progress(Progress::text(text)))
            }
            other => serde_json::from_value(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_untyped_payloads_decode_as_progress() {
        let outcome = WorkerOutcome::decode(json!("Encoding 40%")).unwrap();
        assert_eq!(outcome, WorkerOutcome::Progress(Progress::text("Encoding 40%")));

        let outcome = WorkerOutcome::decode(json!({"message": "halfway"})).unwrap();
        assert_eq!(outcome, WorkerOutcome::Progress(Progress::text("halfway")));
        assert!(!outcome.is_terminal());
    }

    #[test]
    fn test_typed_payloads_decode_to_variants() {
        let outcome = WorkerOutcome::decode(json!({
            "type": "stage-error",
            "stage": "encode_lossless",
            "message": "ffmpeg exited with status 1",
        }))
        .unwrap();
        assert!(outcome.is_terminal());
        assert!(matches!(
            outcome,
            WorkerOutcome::StageError { stage: StageKind::EncodeLossless, recoverable: false, .. }
        ));

        let outcome = WorkerOutcome::decode(json!({
            "type": "progress",
            "percent": 50.0,
        }))
        .unwrap();
        assert!(matches!(outcome, WorkerOutcome::Progress(p) if p.percent == Some(50.0)));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(WorkerOutcome::decode(json!({"type": "explode"})).is_err());
    }
}
