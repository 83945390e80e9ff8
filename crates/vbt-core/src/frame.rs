//! Raster frames produced by the sampler.
//!
//! A frame is immutable once built. Pixel storage is reference counted so a
//! frame can be handed to calibration and region localization at the same
//! time without copying.

use crate::error::{Result, VbtError};
use std::sync::Arc;

/// An 8-bit RGBA frame in CPU memory.
#[derive(Debug, Clone)]
pub struct RasterFrame {
    pixels: Arc<[u8]>,
    width: u32,
    height: u32,
    timestamp_ms: f64,
    frame_index: u32,
}

/// Shared, read-only handle to a frame.
pub type SharedFrame = Arc<RasterFrame>;

impl RasterFrame {
    /// Wrap an RGBA buffer. The buffer must hold exactly `width * height * 4` bytes.
    pub fn from_rgba(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        timestamp_ms: f64,
        frame_index: u32,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(VbtError::InvalidParameter(format!(
                "frame dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(VbtError::InvalidParameter(format!(
                "RGBA buffer holds {} bytes, expected {expected} for {width}x{height}",
                pixels.len()
            )));
        }
        Ok(Self {
            pixels: pixels.into(),
            width,
            height,
            timestamp_ms,
            frame_index,
        })
    }

    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn timestamp_ms(&self) -> f64 {
        self.timestamp_ms
    }

    #[inline]
    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// RGBA value at `(x, y)`, clamped to the frame edge.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let x = x.min(self.width - 1) as usize;
        let y = y.min(self.height - 1) as usize;
        let idx = (y * self.width as usize + x) * 4;
        [
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ]
    }

    /// Same pixels, new position in the sampled sequence.
    pub fn with_timing(&self, timestamp_ms: f64, frame_index: u32) -> Self {
        Self {
            pixels: Arc::clone(&self.pixels),
            width: self.width,
            height: self.height,
            timestamp_ms,
            frame_index,
        }
    }

    /// Downscale (never upscale) to fit inside `max_width` x `max_height`,
    /// preserving aspect ratio.
    ///
    /// Returns the scaled frame and the factor applied to coordinates
    /// (`scaled = source * factor`). A frame that already fits is returned
    /// as a cheap clone with factor 1.
    pub fn downscale_to_fit(&self, max_width: u32, max_height: u32) -> (Self, f32) {
        let sx = max_width as f32 / self.width as f32;
        let sy = max_height as f32 / self.height as f32;
        let scale = sx.min(sy);
        if scale >= 1.0 || max_width == 0 || max_height == 0 {
            return (self.clone(), 1.0);
        }

        let nw = ((self.width as f32 * scale).round() as u32).max(1);
        let nh = ((self.height as f32 * scale).round() as u32).max(1);
        (self.resample(nw, nh), scale)
    }

    /// Box-filter resample to the given size.
    fn resample(&self, nw: u32, nh: u32) -> Self {
        let fx = self.width as f32 / nw as f32;
        let fy = self.height as f32 / nh as f32;
        let mut out = vec![0u8; nw as usize * nh as usize * 4];

        for y in 0..nh {
            let y0 = (y as f32 * fy).floor() as u32;
            let y1 = (((y + 1) as f32 * fy).ceil() as u32).clamp(y0 + 1, self.height);
            for x in 0..nw {
                let x0 = (x as f32 * fx).floor() as u32;
                let x1 = (((x + 1) as f32 * fx).ceil() as u32).clamp(x0 + 1, self.width);

                let mut acc = [0u32; 4];
                let mut count = 0u32;
                for sy in y0..y1 {
                    for sx in x0..x1 {
                        for (a, v) in acc.iter_mut().zip(self.pixel(sx, sy)) {
                            *a += v as u32;
                        }
                        count += 1;
                    }
                }
                let idx = (y as usize * nw as usize + x as usize) * 4;
                for (c, a) in acc.iter().enumerate() {
                    out[idx + c] = (a / count.max(1)) as u8;
                }
            }
        }

        Self {
            pixels: out.into(),
            width: nw,
            height: nh,
            timestamp_ms: self.timestamp_ms,
            frame_index: self.frame_index,
        }
    }
}
