//! Media file probing to get metadata without full decode.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;
use vbt_core::{FrameRate, Result, VbtError};

/// Information about the primary video stream of a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaProbe {
    pub path: String,
    /// Duration in seconds. `None` when the container reports zero,
    /// nothing, or a non-finite value.
    pub duration: Option<f64>,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<FrameRate>,
    pub codec: String,
}

/// ffprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
}

impl MediaProbe {
    /// Probe a media file with `ffprobe`.
    pub fn probe<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VbtError::Decode(format!(
                "File not found: {}",
                path.display()
            )));
        }

        which::which("ffprobe")
            .map_err(|_| VbtError::Decode("ffprobe not found in PATH".to_string()))?;

        let output = Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;

        if !output.status.success() {
            return Err(VbtError::Decode(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let probe = Self::from_ffprobe_json(&output.stdout, &path.to_string_lossy())?;
        debug!(
            path = %probe.path,
            duration = ?probe.duration,
            width = probe.width,
            height = probe.height,
            "Probed media"
        );
        Ok(probe)
    }

    /// Parse ffprobe's `-print_format json` output.
    pub fn from_ffprobe_json(json: &[u8], path: &str) -> Result<Self> {
        let probe: FfprobeOutput = serde_json::from_slice(json)?;

        let video = probe
            .streams
            .iter()
            .find(|s| s.codec_type == "video")
            .ok_or_else(|| VbtError::Decode("No video stream found".to_string()))?;

        // The stream duration is used when the container has none.
        let duration = parse_duration(probe.format.duration.as_deref())
            .or_else(|| parse_duration(video.duration.as_deref()));

        let frame_rate = video
            .avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate));

        Ok(Self {
            path: path.to_string(),
            duration,
            width: video.width.unwrap_or(0),
            height: video.height.unwrap_or(0),
            frame_rate,
            codec: video.codec_name.clone().unwrap_or_default(),
        })
    }
}

fn parse_duration(s: Option<&str>) -> Option<f64> {
    s.and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Parse a frame rate string (e.g., "30000/1001" or "30").
fn parse_frame_rate(s: &str) -> Option<FrameRate> {
    let rate = match s.split_once('/') {
        Some((num, den)) => FrameRate::new(num.trim().parse().ok()?, den.trim().parse().ok()?),
        None => FrameRate::new(s.trim().parse().ok()?, 1),
    };
    rate.is_valid().then_some(rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30000/1001"), Some(FrameRate::FPS_29_97));
        assert_eq!(parse_frame_rate("60"), Some(FrameRate::FPS_60));
        assert_eq!(parse_frame_rate("0/0"), None);
    }

    #[test]
    fn test_zero_duration_is_none() {
        let json = br#"{
            "format": {"duration": "0.000000"},
            "streams": [{"codec_type": "video", "codec_name": "h264",
                         "width": 1280, "height": 720, "avg_frame_rate": "30/1"}]
        }"#;
        let probe = MediaProbe::from_ffprobe_json(json, "clip.webm").unwrap();
        assert_eq!(probe.duration, None);
        assert_eq!(probe.width, 1280);
        assert_eq!(probe.frame_rate, Some(FrameRate::FPS_30));
    }

    #[test]
    fn test_stream_duration_fallback() {
        let json = br#"{
            "format": {},
            "streams": [{"codec_type": "audio"},
                        {"codec_type": "video", "duration": "3.5", "r_frame_rate": "24/1"}]
        }"#;
        let probe = MediaProbe::from_ffprobe_json(json, "clip.mp4").unwrap();
        assert_eq!(probe.duration, Some(3.5));
        assert_eq!(probe.frame_rate, Some(FrameRate::FPS_24));
    }

    #[test]
    fn test_no_video_stream() {
        let json = br#"{"format": {}, "streams": [{"codec_type": "audio"}]}"#;
        let err = MediaProbe::from_ffprobe_json(json, "a.m4a").unwrap_err();
        assert!(matches!(err, VbtError::Decode(_)));
    }
}
