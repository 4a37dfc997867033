//! Shared key layout for storage backends.
//!
//! Every artifact of a track lives under `tracks/{release_id}/{track_id}/`, so
//! concurrent work on different tracks never shares a key and deleting a track
//! is a single prefix delete. Re-running a stage writes the same key again.

use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    /// The raw upload as received
    Source,
    Lossless,
    Stream,
    ManifestJson,
    ManifestMpd,
    Download,
}

impl Artifact {
    pub fn file_name(&self) -> &'static str {
        match self {
            Artifact::Source => "source",
            Artifact::Lossless => "lossless.flac",
            Artifact::Stream => "stream.mp4",
            Artifact::ManifestJson => "manifest.json",
            Artifact::ManifestMpd => "manifest.mpd",
            Artifact::Download => "download.mp3",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Artifact::Source => "application/octet-stream",
            Artifact::Lossless => "audio/flac",
            Artifact::Stream => "audio/mp4",
            Artifact::ManifestJson => "application/json",
            Artifact::ManifestMpd => "application/dash+xml",
            Artifact::Download => "audio/mpeg",
        }
    }
}

/// Prefix holding every artifact of one track, with a trailing slash.
pub fn track_prefix(release_id: Uuid, track_id: Uuid) -> String {
    format!("tracks/{}/{}/", release_id, track_id)
}

pub fn artifact_key(release_id: Uuid, track_id: Uuid, artifact: Artifact) -> String {
    format!("{}{}", track_prefix(release_id, track_id), artifact.file_name())
}

/// Local staging path for a raw upload awaiting the source-store stage.
pub fn staging_path(staging_dir: &Path, release_id: Uuid, track_id: Uuid) -> PathBuf {
    staging_dir
        .join(release_id.to_string())
        .join(format!("{}.upload", track_id))
}
