use std::path::Path;

use async_trait::async_trait;

use crate::error::TranscodeError;
use crate::metadata::AudioMetadata;
use crate::progress::EncodeProgress;

pub type ProgressFn<'a> = &'a (dyn Fn(EncodeProgress) + Send + Sync);

/// Audio transcoding primitives used by the pipeline stages.
///
/// `total_duration` only feeds the progress percentage.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn probe_duration(&self, src: &Path) -> Result<AudioMetadata, TranscodeError>;

    /// Lossless archival copy (FLAC).
    async fn encode_lossless(
        &self,
        src: &Path,
        out: &Path,
        total_duration: Option<f64>,
        on_progress: ProgressFn<'_>,
    ) -> Result<(), TranscodeError>;

    /// Fragmented MP4 (AAC) with fixed-duration fragments for byte-range streaming.
    async fn encode_streaming_fragment(
        &self,
        src: &Path,
        out: &Path,
        total_duration: Option<f64>,
        on_progress: ProgressFn<'_>,
    ) -> Result<(), TranscodeError>;

    /// Lossy download copy (MP3).
    async fn encode_download(
        &self,
        src: &Path,
        out: &Path,
        total_duration: Option<f64>,
        on_progress: ProgressFn<'_>,
    ) -> Result<(), TranscodeError>;
}
