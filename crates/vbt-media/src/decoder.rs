//! Video decoder using FFmpeg via ffmpeg-sidecar.

use crate::probe::MediaProbe;
use crate::source::{DecodedFrame, FrameSource};
use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::command::{ffmpeg_is_installed, FfmpegCommand};
use ffmpeg_sidecar::event::{FfmpegEvent, LogLevel};
use ffmpeg_sidecar::iter::FfmpegIterator;
use std::path::Path;
use tracing::{debug, info, warn};
use vbt_core::{Result, VbtError};

/// Streams RGBA frames out of an FFmpeg subprocess.
///
/// Uses ffmpeg-sidecar to spawn FFmpeg as a subprocess for decoding.
/// This approach works without system FFmpeg development headers.
pub struct FfmpegSource {
    child: FfmpegChild,
    events: FfmpegIterator,
    duration: Option<f64>,
    frames_read: usize,
    last_error: Option<String>,
    finished: bool,
}

impl FfmpegSource {
    /// Open a video file for decoding.
    ///
    /// Probing is best-effort: a failed probe leaves the duration unknown
    /// and decoding proceeds to end of stream.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(VbtError::Decode(format!(
                "File not found: {}",
                path.display()
            )));
        }
        if !ffmpeg_is_installed() {
            return Err(VbtError::Decode("ffmpeg not found in PATH".to_string()));
        }

        let duration = match MediaProbe::probe(path) {
            Ok(probe) => probe.duration,
            Err(e) => {
                warn!(error = %e, "Probe failed, sampling to end of stream");
                None
            }
        };

        info!(path = %path.display(), duration = ?duration, "Opening video file");

        let mut child = FfmpegCommand::new()
            .hide_banner()
            .input(path.to_string_lossy().as_ref())
            .args(["-an", "-f", "rawvideo", "-pix_fmt", "rgba", "-"])
            .spawn()
            .map_err(|e| VbtError::Decode(format!("failed to spawn ffmpeg: {e}")))?;

        let events = child
            .iter()
            .map_err(|e| VbtError::Decode(e.to_string()))?;

        Ok(Self {
            child,
            events,
            duration,
            frames_read: 0,
            last_error: None,
            finished: false,
        })
    }
}

impl FrameSource for FfmpegSource {
    fn reported_duration(&self) -> Option<f64> {
        self.duration
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        if self.finished {
            return Ok(None);
        }

        for event in self.events.by_ref() {
            match event {
                FfmpegEvent::OutputFrame(frame) => {
                    self.frames_read += 1;
                    return Ok(Some(DecodedFrame {
                        rgba: frame.data,
                        width: frame.width,
                        height: frame.height,
                        pts: frame.timestamp as f64,
                    }));
                }
                FfmpegEvent::ParsedDuration(parsed) => {
                    if self.duration.is_none() && parsed.duration.is_finite() && parsed.duration > 0.0 {
                        self.duration = Some(parsed.duration);
                    }
                }
                FfmpegEvent::Error(msg) | FfmpegEvent::Log(LogLevel::Error | LogLevel::Fatal, msg) => {
                    debug!(error = %msg, "ffmpeg reported an error");
                    self.last_error = Some(msg);
                }
                _ => {}
            }
        }

        self.finished = true;
        debug!(frames = self.frames_read, "ffmpeg stream ended");
        match (self.frames_read, self.last_error.take()) {
            (0, Some(msg)) => Err(VbtError::Decode(msg)),
            _ => Ok(None),
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if !self.finished {
            // Stop the subprocess when sampling ends before end of stream.
            let _ = self.child.kill();
        }
        let _ = self.child.wait();
    }
}
