use thiserror::Error;
use trackline_core::AppError;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("Failed to run {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{binary} exited with {status}: {stderr_tail}")]
    Failed {
        binary: String,
        status: String,
        stderr_tail: String,
    },

    #[error("Unreadable probe output: {0}")]
    Probe(String),

    #[error("No audio stream found in {0}")]
    NoAudioStream(String),

    #[error("Invalid media: {0}")]
    InvalidMedia(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TranscodeError {
    /// Whether the failure comes from the input itself, so running again cannot help.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            TranscodeError::Failed { .. }
                | TranscodeError::Probe(_)
                | TranscodeError::NoAudioStream(_)
                | TranscodeError::InvalidMedia(_)
        )
    }
}

impl From<TranscodeError> for AppError {
    fn from(err: TranscodeError) -> Self {
        AppError::Transcode(err.to_string())
    }
}
