//! Trackline audio processing
//!
//! FFmpeg-backed transcoding primitives, ffprobe metadata, FFmpeg progress
//! parsing, fragmented-MP4 manifest generation and the release download
//! encoder.

pub mod download;
pub mod error;
pub mod ffmpeg;
pub mod manifest;
pub mod metadata;
pub mod progress;
pub mod transcoder;

mod boxes;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use download::{encode_download_format, DownloadArtifact};
pub use error::TranscodeError;
pub use ffmpeg::FfmpegService;
pub use manifest::{build_manifest, ByteRange, ManifestSegment, StreamingManifest};
pub use metadata::AudioMetadata;
pub use progress::{parse_progress, EncodeProgress};
pub use transcoder::{ProgressFn, Transcoder};
