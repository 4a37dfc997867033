//! FFmpeg stderr progress parsing.
//!
//! FFmpeg reports progress as `size=  1024KiB time=00:01:30.50 bitrate=... speed=2.1x`.

use serde::{Deserialize, Serialize};
use trackline_core::models::Progress;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EncodeProgress {
    pub timecode_secs: f64,
    pub size_bytes: u64,
    pub speed: Option<f64>,
    /// Share of the source encoded so far, when the source duration is known.
    pub percent: Option<f64>,
}

impl EncodeProgress {
    pub fn to_progress(&self, track_id: Uuid) -> Progress {
        Progress {
            track_id: Some(track_id),
            percent: self.percent,
            timecode_secs: Some(self.timecode_secs),
            size_bytes: Some(self.size_bytes),
            ..Default::default()
        }
    }
}

/// Parse `HH:MM:SS.ms` into seconds.
pub fn parse_time(time_str: &str) -> Option<f64> {
    let parts: Vec<&str> = time_str.split(':').collect();
    if parts.len() != 3 {
        return None;
    }

    let hours: f64 = parts[0].parse().ok()?;
    let minutes: f64 = parts[1].parse().ok()?;
    let seconds: f64 = parts[2].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Parse the `size=` field (`kB` or `KiB`) into bytes.
pub fn parse_size(line: &str) -> Option<u64> {
    let size_start = line.find("size=")?;
    let size_str = line[size_start + 5..].trim_start();
    let end = size_str.find(['k', 'K'])?;
    let size: u64 = size_str[..end].trim().parse().ok()?;
    Some(size * 1024)
}

pub fn parse_speed(line: &str) -> Option<f64> {
    let speed_start = line.find("speed=")?;
    let speed_str = line[speed_start + 6..].trim_start();
    let end = speed_str.find('x')?;
    speed_str[..end].trim().parse().ok()
}

pub fn parse_time_field(line: &str) -> Option<f64> {
    let time_start = line.find("time=")?;
    let time_str = &line[time_start + 5..];
    let end = time_str.find(' ').unwrap_or(time_str.len());
    parse_time(&time_str[..end])
}

/// Parse one FFmpeg progress line.
///
/// Requires `time=` plus `size=` or `frame=` so unrelated log lines are ignored.
pub fn parse_progress(line: &str, total_duration: Option<f64>) -> Option<EncodeProgress> {
    if !line.contains("time=") || !(line.contains("size=") || line.contains("frame=")) {
        return None;
    }

    let timecode_secs = parse_time_field(line)?;
    let percent = total_duration
        .filter(|total| *total > 0.0)
        .map(|total| (timecode_secs / total * 100.0).clamp(0.0, 100.0));

    Some(EncodeProgress {
        timecode_secs,
        size_bytes: parse_size(line).unwrap_or(0),
        speed: parse_speed(line),
        percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("00:00:10.50"), Some(10.5));
        assert_eq!(parse_time("01:30:00.00"), Some(5400.0));
        assert_eq!(parse_time("00:00"), None);
        assert_eq!(parse_time("garbage"), None);
    }

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("size=    1024kB time=00:00:04.00"), Some(1024 * 1024));
        assert_eq!(parse_size("size=     256KiB time=00:00:04.00"), Some(256 * 1024));
        assert_eq!(parse_size("size=N/A time=00:00:04.00"), None);
    }

    #[test]
    fn test_parse_progress_line_with_percent() {
        let line = "size=    2048KiB time=00:01:30.00 bitrate= 186.4kbits/s speed=45.2x";
        let progress = parse_progress(line, Some(180.0)).unwrap();
        assert_eq!(progress.timecode_secs, 90.0);
        assert_eq!(progress.size_bytes, 2048 * 1024);
        assert_eq!(progress.speed, Some(45.2));
        assert_eq!(progress.percent, Some(50.0));
    }

    #[test]
    fn test_percent_is_clamped_and_optional() {
        let line = "size=1kB time=00:03:10.00 speed=1x";
        assert_eq!(parse_progress(line, Some(180.0)).unwrap().percent, Some(100.0));
        assert_eq!(parse_progress(line, None).unwrap().percent, None);
        assert_eq!(parse_progress(line, Some(0.0)).unwrap().percent, None);
    }

    #[test]
    fn test_non_progress_lines_are_ignored() {
        assert!(parse_progress("Input #0, wav, from 'in.wav':", None).is_none());
        assert!(parse_progress("  Duration: 00:03:00.00, start: 0.000000", None).is_none());
    }
}
