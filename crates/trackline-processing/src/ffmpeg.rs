//! FFmpeg-backed [`Transcoder`].

use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::error::TranscodeError;
use crate::metadata::{parse_probe_output, AudioMetadata};
use crate::progress::parse_progress;
use crate::transcoder::{ProgressFn, Transcoder};

pub const LOSSLESS_CHANNELS: u32 = 2;
pub const LOSSLESS_COMPRESSION_LEVEL: u32 = 8;
pub const LOSSLESS_SAMPLE_RATE: u32 = 48_000;

pub const STREAM_BITRATE: &str = "128k";
pub const STREAM_CHANNELS: u32 = 2;
pub const STREAM_SAMPLE_RATE: u32 = 44_100;
/// Target fragment length of the streaming file.
pub const FRAGMENT_DURATION_SECS: u64 = 15;

pub const DOWNLOAD_BITRATE: &str = "320k";
pub const DOWNLOAD_CHANNELS: u32 = 2;

/// Non-progress stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

pub struct FfmpegService {
    ffmpeg_path: String,
    ffprobe_path: String,
}

impl FfmpegService {
    pub fn new(ffmpeg_path: impl Into<String>, ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            ffprobe_path: ffprobe_path.into(),
        }
    }

    fn base_args(src: &Path) -> Vec<String> {
        vec![
            "-hide_banner".to_string(),
            "-nostdin".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            src.to_string_lossy().to_string(),
            "-vn".to_string(),
            "-map_metadata".to_string(),
            "-1".to_string(),
        ]
    }

    pub fn lossless_args(src: &Path, out: &Path) -> Vec<String> {
        let mut args = Self::base_args(src);
        args.extend_from_slice(&[
            "-c:a".to_string(),
            "flac".to_string(),
            "-compression_level".to_string(),
            LOSSLESS_COMPRESSION_LEVEL.to_string(),
            "-ac".to_string(),
            LOSSLESS_CHANNELS.to_string(),
            "-ar".to_string(),
            LOSSLESS_SAMPLE_RATE.to_string(),
            "-f".to_string(),
            "flac".to_string(),
            out.to_string_lossy().to_string(),
        ]);
        args
    }

    pub fn streaming_args(src: &Path, out: &Path) -> Vec<String> {
        let mut args = Self::base_args(src);
        args.extend_from_slice(&[
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            STREAM_BITRATE.to_string(),
            "-ac".to_string(),
            STREAM_CHANNELS.to_string(),
            "-ar".to_string(),
            STREAM_SAMPLE_RATE.to_string(),
            "-movflags".to_string(),
            "empty_moov+default_base_moof+frag_keyframe".to_string(),
            "-frag_duration".to_string(),
            (FRAGMENT_DURATION_SECS * 1_000_000).to_string(),
            "-f".to_string(),
            "mp4".to_string(),
            out.to_string_lossy().to_string(),
        ]);
        args
    }

    pub fn download_args(src: &Path, out: &Path) -> Vec<String> {
        let mut args = Self::base_args(src);
        args.extend_from_slice(&[
            "-c:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            DOWNLOAD_BITRATE.to_string(),
            "-ac".to_string(),
            DOWNLOAD_CHANNELS.to_string(),
            "-f".to_string(),
            "mp3".to_string(),
            out.to_string_lossy().to_string(),
        ]);
        args
    }

    /// Run FFmpeg, forwarding progress lines and keeping the tail of everything else.
    #[tracing::instrument(skip(self, args, on_progress), fields(output = %out.display()))]
    async fn run_ffmpeg(
        &self,
        args: Vec<String>,
        out: &Path,
        total_duration: Option<f64>,
        on_progress: ProgressFn<'_>,
    ) -> Result<(), TranscodeError> {
        if let Some(parent) = out.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let start = std::time::Instant::now();
        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                binary: self.ffmpeg_path.clone(),
                source,
            })?;

        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        if let Some(mut stderr) = child.stderr.take() {
            let mut chunk = [0u8; 4096];
            let mut pending: Vec<u8> = Vec::new();
            loop {
                let n = stderr.read(&mut chunk).await?;
                if n == 0 {
                    break;
                }
                pending.extend_from_slice(&chunk[..n]);

                // Progress lines end in '\r', log lines in '\n'
                while let Some(pos) = pending.iter().position(|b| *b == b'\r' || *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    handle_stderr_line(&line, total_duration, on_progress, &mut tail);
                }
            }
            if !pending.is_empty() {
                handle_stderr_line(&pending, total_duration, on_progress, &mut tail);
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            let stderr_tail = tail.into_iter().collect::<Vec<_>>().join("\n");
            tracing::error!(
                status = %status,
                stderr = %stderr_tail,
                "FFmpeg failed"
            );
            return Err(TranscodeError::Failed {
                binary: self.ffmpeg_path.clone(),
                status: status.to_string(),
                stderr_tail,
            });
        }

        tracing::info!(
            duration_ms = start.elapsed().as_millis() as u64,
            "FFmpeg finished"
        );
        Ok(())
    }
}

fn handle_stderr_line(
    raw: &[u8],
    total_duration: Option<f64>,
    on_progress: ProgressFn<'_>,
    tail: &mut VecDeque<String>,
) {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    if let Some(progress) = parse_progress(line, total_duration) {
        on_progress(progress);
        return;
    }

    if tail.len() == STDERR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line.to_string());
}

#[async_trait]
impl Transcoder for FfmpegService {
    #[tracing::instrument(skip(self), fields(src = %src.display()))]
    async fn probe_duration(&self, src: &Path) -> Result<AudioMetadata, TranscodeError> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error", "-show_format", "-show_streams", "-of", "json"])
            .arg(src)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| TranscodeError::Spawn {
                binary: self.ffprobe_path.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::warn!(stderr = %stderr, "ffprobe rejected input");
            return Err(TranscodeError::Failed {
                binary: self.ffprobe_path.clone(),
                status: output.status.to_string(),
                stderr_tail: stderr,
            });
        }

        let metadata = parse_probe_output(&output.stdout, &src.display().to_string())?;
        tracing::debug!(
            duration = ?metadata.duration,
            codec = ?metadata.codec,
            "Probed audio source"
        );
        Ok(metadata)
    }

    async fn encode_lossless(
        &self,
        src: &Path,
        out: &Path,
        total_duration: Option<f64>,
        on_progress: ProgressFn<'_>,
    ) -> Result<(), TranscodeError> {
        self.run_ffmpeg(Self::lossless_args(src, out), out, total_duration, on_progress)
            .await
    }

    async fn encode_streaming_fragment(
        &self,
        src: &Path,
        out: &Path,
        total_duration: Option<f64>,
        on_progress: ProgressFn<'_>,
    ) -> Result<(), TranscodeError> {
        self.run_ffmpeg(Self::streaming_args(src, out), out, total_duration, on_progress)
            .await
    }

    async fn encode_download(
        &self,
        src: &Path,
        out: &Path,
        total_duration: Option<f64>,
        on_progress: ProgressFn<'_>,
    ) -> Result<(), TranscodeError> {
        self.run_ffmpeg(Self::download_args(src, out), out, total_duration, on_progress)
            .await
    }
}
