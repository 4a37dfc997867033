//! Byte-range streaming manifest for a fragmented MP4.
//!
//! The initialisation range covers everything before the first `moof`; each
//! `moof` together with its `mdat` is one independently fetchable segment.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::boxes::{self, BoxView};
use crate::error::TranscodeError;
use crate::ffmpeg::{FRAGMENT_DURATION_SECS, STREAM_SAMPLE_RATE};

pub const MANIFEST_JSON: &str = "manifest.json";
pub const MANIFEST_MPD: &str = "manifest.mpd";
pub const STREAM_MIME_TYPE: &str = "audio/mp4";
pub const STREAM_CODECS: &str = "mp4a.40.2";
pub const STREAM_BANDWIDTH: u32 = 128_000;

/// Inclusive byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    fn from_bounds(start: usize, end_exclusive: usize) -> Self {
        Self {
            start: start as u64,
            end: end_exclusive.saturating_sub(1) as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSegment {
    pub index: u32,
    pub start: u64,
    pub end: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingManifest {
    pub track_id: Uuid,
    pub mime_type: String,
    pub codecs: String,
    pub duration_secs: f64,
    pub bandwidth: u32,
    pub init_range: ByteRange,
    pub segments: Vec<ManifestSegment>,
}

impl StreamingManifest {
    /// MPEG-DASH rendering addressing `media_url` by byte range.
    pub fn to_mpd(&self, media_url: &str) -> String {
        let mut segments = String::new();
        for segment in &self.segments {
            segments.push_str(&format!(
                "          <SegmentURL mediaRange=\"{}-{}\"/>\n",
                segment.start, segment.end
            ));
        }

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" profiles="urn:mpeg:dash:profile:isoff-on-demand:2011" type="static" mediaPresentationDuration="PT{duration:.3}S" minBufferTime="PT2S">
  <Period id="0" start="PT0S">
    <AdaptationSet id="0" contentType="audio" mimeType="{mime}" segmentAlignment="true">
      <Representation id="{track}" codecs="{codecs}" bandwidth="{bandwidth}" audioSamplingRate="{rate}">
        <BaseURL>{url}</BaseURL>
        <SegmentList timescale="1000" duration="{seg_ms}">
          <Initialization range="{init_start}-{init_end}"/>
{segments}        </SegmentList>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>
"#,
            duration = self.duration_secs,
            mime = self.mime_type,
            track = self.track_id,
            codecs = self.codecs,
            bandwidth = self.bandwidth,
            rate = STREAM_SAMPLE_RATE,
            url = media_url,
            seg_ms = FRAGMENT_DURATION_SECS * 1000,
            init_start = self.init_range.start,
            init_end = self.init_range.end,
            segments = segments,
        )
    }
}

struct FragmentTiming {
    decode_time: Option<u64>,
    duration_ticks: Option<u64>,
}

/// Derive the manifest of `media_file` and write `manifest.json` and
/// `manifest.mpd` into `out_dir`.
pub fn build_manifest(
    media_file: &Path,
    track_id: Uuid,
    out_dir: &Path,
) -> Result<StreamingManifest, TranscodeError> {
    let data = std::fs::read(media_file)?;
    let manifest = manifest_from_bytes(&data, track_id)?;

    std::fs::create_dir_all(out_dir)?;
    std::fs::write(
        out_dir.join(MANIFEST_JSON),
        serde_json::to_vec_pretty(&manifest)?,
    )?;
    let media_url = media_file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "stream.mp4".to_string());
    std::fs::write(out_dir.join(MANIFEST_MPD), manifest.to_mpd(&media_url))?;

    tracing::debug!(
        track_id = %track_id,
        segments = manifest.segments.len(),
        duration_secs = manifest.duration_secs,
        "Streaming manifest built"
    );
    Ok(manifest)
}

pub fn manifest_from_bytes(data: &[u8], track_id: Uuid) -> Result<StreamingManifest, TranscodeError> {
    let top = boxes::children(data, 0, data.len()).map_err(|boxes::BoxError::Truncated { offset }| {
        TranscodeError::InvalidMedia(format!("truncated box at offset {}", offset))
    })?;

    let first_moof = top
        .iter()
        .position(|b| &b.fourcc == b"moof")
        .ok_or_else(|| TranscodeError::InvalidMedia("no movie fragments (moof) found".to_string()))?;
    let init_range = ByteRange::from_bounds(0, top[first_moof].start);

    let (timescale, media_duration_ticks) = media_header(data);
    let default_duration = trex_default_duration(data);

    let mut fragments: Vec<(BoxView, BoxView)> = Vec::new();
    let mut i = first_moof;
    while i < top.len() {
        let moof = top[i];
        if &moof.fourcc != b"moof" {
            i += 1;
            continue;
        }
        let mdat = top[i + 1..]
            .iter()
            .take_while(|b| &b.fourcc != b"moof")
            .find(|b| &b.fourcc == b"mdat")
            .copied()
            .ok_or_else(|| {
                TranscodeError::InvalidMedia(format!(
                    "fragment at offset {} has no mdat",
                    moof.start
                ))
            })?;
        fragments.push((moof, mdat));
        i += 1;
    }

    let timings: Vec<FragmentTiming> = fragments
        .iter()
        .map(|(moof, _)| fragment_timing(data, moof, default_duration))
        .collect();

    let mut segments = Vec::with_capacity(fragments.len());
    for (index, ((moof, mdat), timing)) in fragments.iter().zip(&timings).enumerate() {
        let from_samples = timing.duration_ticks.zip(timescale).map(ticks_to_secs);
        let from_next = timing
            .decode_time
            .zip(timings.get(index + 1).and_then(|t| t.decode_time))
            .zip(timescale)
            .map(|((this, next), scale)| ticks_to_secs((next.saturating_sub(this), scale)));
        let duration = from_samples
            .or(from_next)
            .unwrap_or(FRAGMENT_DURATION_SECS as f64);

        let range = ByteRange::from_bounds(moof.start, mdat.end);
        segments.push(ManifestSegment {
            index: index as u32,
            start: range.start,
            end: range.end,
            duration_secs: Some(duration),
        });
    }

    let duration_secs = media_duration_ticks
        .filter(|ticks| *ticks > 0)
        .zip(timescale)
        .map(ticks_to_secs)
        .unwrap_or_else(|| segments.iter().filter_map(|s| s.duration_secs).sum());

    Ok(StreamingManifest {
        track_id,
        mime_type: STREAM_MIME_TYPE.to_string(),
        codecs: STREAM_CODECS.to_string(),
        duration_secs,
        bandwidth: STREAM_BANDWIDTH,
        init_range,
        segments,
    })
}

fn ticks_to_secs((ticks, timescale): (u64, u32)) -> f64 {
    ticks as f64 / timescale as f64
}

/// Timescale and duration from the first track's `mdhd`.
fn media_header(data: &[u8]) -> (Option<u32>, Option<u64>) {
    let Some(mdhd) = boxes::find_path(data, 0, data.len(), &[b"moov", b"trak", b"mdia", b"mdhd"])
    else {
        return (None, None);
    };
    let body = mdhd.body_start;
    match boxes::full_box_header(data, body) {
        Some((1, _)) => (
            boxes::read_u32(data, body + 20).filter(|t| *t > 0),
            boxes::read_u64(data, body + 24),
        ),
        Some(_) => (
            boxes::read_u32(data, body + 12).filter(|t| *t > 0),
            boxes::read_u32(data, body + 16).map(u64::from),
        ),
        None => (None, None),
    }
}

fn trex_default_duration(data: &[u8]) -> Option<u32> {
    let trex = boxes::find_path(data, 0, data.len(), &[b"moov", b"mvex", b"trex"])?;
    boxes::read_u32(data, trex.body_start + 12).filter(|d| *d > 0)
}

fn fragment_timing(data: &[u8], moof: &BoxView, trex_default: Option<u32>) -> FragmentTiming {
    let Some(traf) = boxes::find_path(data, moof.body_start, moof.body_end, &[b"traf"]) else {
        return FragmentTiming {
            decode_time: None,
            duration_ticks: None,
        };
    };

    let parts = boxes::children(data, traf.body_start, traf.body_end).unwrap_or_default();

    let decode_time = parts.iter().find(|b| &b.fourcc == b"tfdt").and_then(|tfdt| {
        match boxes::full_box_header(data, tfdt.body_start)? {
            (1, _) => boxes::read_u64(data, tfdt.body_start + 4),
            _ => boxes::read_u32(data, tfdt.body_start + 4).map(u64::from),
        }
    });

    let default_duration = parts
        .iter()
        .find(|b| &b.fourcc == b"tfhd")
        .and_then(|tfhd| tfhd_default_duration(data, tfhd))
        .or(trex_default);

    let mut total: Option<u64> = None;
    for trun in parts.iter().filter(|b| &b.fourcc == b"trun") {
        match trun_duration(data, trun, default_duration) {
            Some(ticks) => total = Some(total.unwrap_or(0) + ticks),
            None => {
                total = None;
                break;
            }
        }
    }

    FragmentTiming {
        decode_time,
        duration_ticks: total,
    }
}

fn tfhd_default_duration(data: &[u8], tfhd: &BoxView) -> Option<u32> {
    let (_, flags) = boxes::full_box_header(data, tfhd.body_start)?;
    if flags & 0x08 == 0 {
        return None;
    }
    let mut offset = tfhd.body_start + 8;
    if flags & 0x01 != 0 {
        offset += 8;
    }
    if flags & 0x02 != 0 {
        offset += 4;
    }
    boxes::read_u32(data, offset)
}

fn trun_duration(data: &[u8], trun: &BoxView, default_duration: Option<u32>) -> Option<u64> {
    let (_, flags) = boxes::full_box_header(data, trun.body_start)?;
    let sample_count = boxes::read_u32(data, trun.body_start + 4)? as usize;

    if flags & 0x100 == 0 {
        return default_duration.map(|d| d as u64 * sample_count as u64);
    }

    let mut offset = trun.body_start + 8;
    if flags & 0x001 != 0 {
        offset += 4;
    }
    if flags & 0x004 != 0 {
        offset += 4;
    }
    let record = [0x100, 0x200, 0x400, 0x800]
        .iter()
        .filter(|bit| flags & **bit != 0)
        .count()
        * 4;

    let mut total = 0u64;
    for n in 0..sample_count {
        let sample_offset = offset + n * record;
        if sample_offset + 4 > trun.body_end {
            tracing::warn!(
                fourcc = %boxes::fourcc_to_string(&trun.fourcc),
                "Sample table runs past its box"
            );
            return None;
        }
        total += boxes::read_u32(data, sample_offset)? as u64;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{fragmented_mp4, make_box, FragmentSpec};
    use tempfile::TempDir;

    const TIMESCALE: u32 = 44_100;

    fn spec(samples: u32) -> FragmentSpec {
        FragmentSpec {
            samples,
            sample_duration: 1024,
            payload_len: 64,
        }
    }

    #[test]
    fn test_segments_cover_moof_and_mdat() {
        let data = fragmented_mp4(TIMESCALE, &[spec(645), spec(645), spec(100)]);
        let manifest = manifest_from_bytes(&data, Uuid::nil()).unwrap();

        assert_eq!(manifest.segments.len(), 3);
        assert_eq!(manifest.init_range.start, 0);
        assert_eq!(manifest.segments[0].start, manifest.init_range.end + 1);
        for pair in manifest.segments.windows(2) {
            assert_eq!(pair[1].start, pair[0].end + 1);
        }
        assert_eq!(
            manifest.segments.last().unwrap().end,
            data.len() as u64 - 1
        );
    }

    #[test]
    fn test_segment_durations_from_sample_tables() {
        let data = fragmented_mp4(TIMESCALE, &[spec(645), spec(100)]);
        let manifest = manifest_from_bytes(&data, Uuid::nil()).unwrap();

        let first = manifest.segments[0].duration_secs.unwrap();
        assert!((first - 645.0 * 1024.0 / TIMESCALE as f64).abs() < 1e-9);
        let total: f64 = manifest.segments.iter().filter_map(|s| s.duration_secs).sum();
        assert!((manifest.duration_secs - total).abs() < 1e-9);
    }

    #[test]
    fn test_file_without_fragments_is_rejected() {
        let mut data = make_box(b"ftyp", b"isomiso6");
        data.extend(make_box(b"moov", &[]));
        data.extend(make_box(b"mdat", &[0u8; 32]));
        let err = manifest_from_bytes(&data, Uuid::nil()).unwrap_err();
        assert!(matches!(err, TranscodeError::InvalidMedia(_)));
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let mut data = fragmented_mp4(TIMESCALE, &[spec(10)]);
        data.truncate(data.len() - 5);
        let err = manifest_from_bytes(&data, Uuid::nil()).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_build_manifest_writes_json_and_mpd() {
        let dir = TempDir::new().unwrap();
        let media = dir.path().join("stream.mp4");
        std::fs::write(&media, fragmented_mp4(TIMESCALE, &[spec(645), spec(645)])).unwrap();

        let track_id = Uuid::new_v4();
        let manifest = build_manifest(&media, track_id, dir.path()).unwrap();

        let json: StreamingManifest =
            serde_json::from_slice(&std::fs::read(dir.path().join(MANIFEST_JSON)).unwrap()).unwrap();
        assert_eq!(json, manifest);

        let mpd = std::fs::read_to_string(dir.path().join(MANIFEST_MPD)).unwrap();
        assert!(mpd.contains("<BaseURL>stream.mp4</BaseURL>"));
        assert!(mpd.contains(&format!(
            "<Initialization range=\"0-{}\"/>",
            manifest.init_range.end
        )));
        assert_eq!(mpd.matches("<SegmentURL").count(), 2);
    }

    #[test]
    fn test_manifest_json_is_camel_case() {
        let data = fragmented_mp4(TIMESCALE, &[spec(1)]);
        let manifest = manifest_from_bytes(&data, Uuid::nil()).unwrap();
        let value = serde_json::to_value(&manifest).unwrap();
        assert!(value.get("initRange").is_some());
        assert!(value.get("mimeType").is_some());
        assert!(value["segments"][0].get("durationSecs").is_some());
    }
}
