//! Frame source abstraction.

use std::collections::VecDeque;
use vbt_core::Result;

/// A frame as it comes out of a decoder, before sampling.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// RGBA8, `width * height * 4` bytes
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp in seconds
    pub pts: f64,
}

/// Anything that yields decoded frames in presentation order.
pub trait FrameSource {
    /// Duration as reported by container metadata. May be missing, zero, or
    /// nonsense for freshly recorded clips; samplers must not rely on it.
    fn reported_duration(&self) -> Option<f64>;

    /// Decode the next frame. `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<DecodedFrame>>;
}

/// In-memory frame source for tests and hosts that decode themselves.
#[derive(Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<DecodedFrame>,
    duration: Option<f64>,
}

impl MemorySource {
    pub fn new(frames: Vec<DecodedFrame>, reported_duration: Option<f64>) -> Self {
        Self {
            frames: frames.into(),
            duration: reported_duration,
        }
    }

    /// Build `count` frames at `fps`, letting `paint` fill each RGBA buffer.
    pub fn generate(
        width: u32,
        height: u32,
        fps: f64,
        count: usize,
        reported_duration: Option<f64>,
        mut paint: impl FnMut(usize, &mut [u8]),
    ) -> Self {
        let frames = (0..count)
            .map(|i| {
                let mut rgba = vec![0u8; width as usize * height as usize * 4];
                paint(i, &mut rgba);
                DecodedFrame {
                    rgba,
                    width,
                    height,
                    pts: i as f64 / fps,
                }
            })
            .collect();
        Self::new(frames, reported_duration)
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MemorySource {
    fn reported_duration(&self) -> Option<f64> {
        self.duration
    }

    fn next_frame(&mut self) -> Result<Option<DecodedFrame>> {
        Ok(self.frames.pop_front())
    }
}
