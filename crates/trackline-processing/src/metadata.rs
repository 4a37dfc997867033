//! Audio metadata from `ffprobe -show_format -show_streams -of json`.

use serde::{Deserialize, Serialize};

use crate::error::TranscodeError;

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    streams: Option<Vec<FfprobeStream>>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    format_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMetadata {
    pub duration: Option<f64>,
    pub bitrate: Option<u64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    pub codec: Option<String>,
    pub format_name: Option<String>,
}

/// Interpret ffprobe JSON output. A file without an audio stream is rejected.
pub fn parse_probe_output(stdout: &[u8], source: &str) -> Result<AudioMetadata, TranscodeError> {
    let output: FfprobeOutput =
        serde_json::from_slice(stdout).map_err(|e| TranscodeError::Probe(e.to_string()))?;

    let audio = output
        .streams
        .unwrap_or_default()
        .into_iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .ok_or_else(|| TranscodeError::NoAudioStream(source.to_string()))?;

    let format = output.format;
    let duration = format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(audio.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok());

    Ok(AudioMetadata {
        duration,
        bitrate: format
            .as_ref()
            .and_then(|f| f.bit_rate.as_deref())
            .and_then(|b| b.parse().ok()),
        sample_rate: audio.sample_rate.as_deref().and_then(|s| s.parse().ok()),
        channels: audio.channels,
        codec: audio.codec_name,
        format_name: format.and_then(|f| f.format_name),
    })
}
