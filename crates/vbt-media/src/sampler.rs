//! Fixed-rate frame sampling.
//!
//! The sampler turns whatever a [`FrameSource`] yields into a finite sequence
//! of frames at exactly `n / rate` seconds. The frame used for target time `t`
//! is the one a player would show at `t`: the last decoded frame whose
//! presentation time is not after `t`. Container duration is never trusted
//! to bound the loop; the stream is read until it ends or the frame budget
//! is spent.

use crate::source::{DecodedFrame, FrameSource};
use tracing::{debug, info, warn};
use vbt_core::{FrameRate, RasterFrame, RationalTime, Result, SamplingConfig, VbtError};

/// Timestamps closer than this (seconds) are treated as equal.
const PTS_TOLERANCE: f64 = 1e-3;

/// Output of a sampling pass.
#[derive(Debug, Clone)]
pub struct SampledVideo {
    pub frames: Vec<RasterFrame>,
    pub rate: FrameRate,
    /// Factor applied to source coordinates by the working-size downscale.
    pub source_scale: f32,
    /// Width and height of the decoded source before downscaling.
    pub source_size: (u32, u32),
    /// Duration reported by the source, if it was usable.
    pub reported_duration: Option<f64>,
    /// Sampling stopped at `max_frames` before the stream ended.
    pub truncated: bool,
}

impl SampledVideo {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Duration covered by the sampled frames, in seconds.
    pub fn sampled_duration(&self) -> f64 {
        RationalTime::from_frames(self.frames.len() as i64, self.rate).to_seconds_f64()
    }
}

/// The frame a player would be showing. Its pixels are converted to working
/// size on first use; every later target shares that raster.
struct Shown {
    pts: f64,
    decoded: Option<DecodedFrame>,
    raster: Option<RasterFrame>,
}

impl Shown {
    fn new(decoded: DecodedFrame) -> Self {
        Self {
            pts: decoded.pts,
            decoded: Some(decoded),
            raster: None,
        }
    }
}

/// Samples a frame source at the configured analysis rate.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    config: SamplingConfig,
}

impl FrameSampler {
    pub fn new(config: SamplingConfig) -> Self {
        Self { config }
    }

    pub fn rate(&self) -> FrameRate {
        self.config.rate
    }

    /// Expected number of sampled frames, when the duration can be trusted.
    pub fn expected_frames(&self, duration: Option<f64>) -> Option<usize> {
        let duration = duration.filter(|d| d.is_finite() && *d > 0.0)?;
        let count = (duration * self.config.rate.to_fps_f64()).floor() as usize + 1;
        Some(count.min(self.config.max_frames))
    }

    fn target_seconds(&self, index: usize) -> f64 {
        RationalTime::from_frames(index as i64, self.config.rate).to_seconds_f64()
    }

    /// Decode and sample the whole source.
    pub fn sample(&self, source: &mut dyn FrameSource) -> Result<SampledVideo> {
        let reported_duration = source
            .reported_duration()
            .filter(|d| d.is_finite() && *d > 0.0);
        if reported_duration.is_none() {
            info!("Source reports no usable duration, sampling to end of stream");
        }

        let mut out = SampledVideo {
            frames: Vec::with_capacity(self.expected_frames(reported_duration).unwrap_or(64)),
            rate: self.config.rate,
            source_scale: 1.0,
            source_size: (0, 0),
            reported_duration,
            truncated: false,
        };

        let mut current: Option<Shown> = None;
        let mut decoded = 0usize;

        while let Some(next) = source.next_frame()? {
            if !next.pts.is_finite() {
                debug!(decoded, "Skipping frame without a usable timestamp");
                continue;
            }
            decoded += 1;

            let Some(mut shown) = current.take() else {
                current = Some(Shown::new(next));
                continue;
            };

            // Every target strictly before `next` is displayed by `shown`.
            while self.target_seconds(out.frames.len()) < next.pts - PTS_TOLERANCE {
                if out.frames.len() >= self.config.max_frames {
                    out.truncated = true;
                    break;
                }
                self.emit(&mut shown, &mut out)?;
            }
            if out.truncated {
                break;
            }
            current = Some(Shown::new(next));
        }

        // The final frame covers targets up to its own timestamp.
        if let Some(mut last) = current.filter(|_| !out.truncated) {
            while out.frames.len() < self.config.max_frames
                && (out.frames.is_empty()
                    || self.target_seconds(out.frames.len()) <= last.pts + PTS_TOLERANCE)
            {
                self.emit(&mut last, &mut out)?;
            }
        }

        if out.frames.is_empty() {
            return Err(VbtError::Decode(
                "no frames could be decoded from the video".to_string(),
            ));
        }

        if let Some(expected) = self.expected_frames(reported_duration) {
            if out.frames.len() + 1 < expected {
                warn!(
                    expected,
                    sampled = out.frames.len(),
                    "Source ended early, continuing with decoded frames"
                );
            }
        }
        info!(
            decoded,
            sampled = out.frames.len(),
            rate = %self.config.rate,
            truncated = out.truncated,
            "Sampled video"
        );
        Ok(out)
    }

    fn emit(&self, shown: &mut Shown, out: &mut SampledVideo) -> Result<()> {
        if let Some(decoded) = shown.decoded.take() {
            shown.raster = Some(self.prepare(decoded, out)?);
        }
        let raster = shown
            .raster
            .as_ref()
            .ok_or_else(|| VbtError::Decode("frame pixels already released".to_string()))?;
        let index = out.frames.len();
        let timestamp_ms =
            RationalTime::from_frames(index as i64, self.config.rate).to_millis_f64();
        out.frames.push(raster.with_timing(timestamp_ms, index as u32));
        Ok(())
    }

    /// Working-size raster for a decoded frame. Takes the pixel buffer.
    fn prepare(&self, decoded: DecodedFrame, out: &mut SampledVideo) -> Result<RasterFrame> {
        let (width, height) = (decoded.width, decoded.height);
        let frame = RasterFrame::from_rgba(decoded.rgba, width, height, 0.0, 0)
            .map_err(|e| VbtError::Decode(format!("malformed decoded frame: {e}")))?;

        let (frame, scale) =
            frame.downscale_to_fit(self.config.max_width, self.config.max_height);
        if out.frames.is_empty() {
            out.source_scale = scale;
            out.source_size = (width, height);
        }
        Ok(frame)
    }
}
