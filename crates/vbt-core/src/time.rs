//! Time representation for frame sampling.
//!
//! Sample times are rational so that frame `n` of a 15 fps analysis lands on
//! exactly `n/15` seconds no matter how long the clip is.

use num_rational::Rational64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// A rational time value in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RationalTime {
    value: Rational64,
}

impl RationalTime {
    /// Create a new RationalTime of `numerator / denominator` seconds.
    #[inline]
    pub fn new(numerator: i64, denominator: i64) -> Self {
        Self {
            value: Rational64::new(numerator, denominator),
        }
    }

    /// Create a RationalTime from a frame number and frame rate.
    #[inline]
    pub fn from_frames(frames: i64, rate: FrameRate) -> Self {
        Self {
            value: Rational64::new(frames * rate.denominator as i64, rate.numerator as i64),
        }
    }

    /// Convert to seconds as f64.
    #[inline]
    pub fn to_seconds_f64(self) -> f64 {
        *self.value.numer() as f64 / *self.value.denom() as f64
    }

    /// Convert to milliseconds as f64.
    #[inline]
    pub fn to_millis_f64(self) -> f64 {
        self.to_seconds_f64() * 1000.0
    }

    /// Convert to frame number at the given frame rate (floored).
    #[inline]
    pub fn to_frames(self, rate: FrameRate) -> i64 {
        let frames = self.value * Rational64::new(rate.numerator as i64, rate.denominator as i64);
        frames.floor().to_integer()
    }

    /// Zero time constant.
    pub const ZERO: Self = Self {
        value: Rational64::new_raw(0, 1),
    };
}

impl Default for RationalTime {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for RationalTime {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self {
            value: self.value + rhs.value,
        }
    }
}

impl fmt::Display for RationalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.to_seconds_f64())
    }
}

/// Frame rate as a rational number (e.g., 30000/1001 for 29.97 fps).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    #[inline]
    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Convert to frames per second as f64.
    #[inline]
    pub fn to_fps_f64(self) -> f64 {
        if self.denominator == 0 {
            return 0.0;
        }
        self.numerator as f64 / self.denominator as f64
    }

    /// Duration of a single frame.
    #[inline]
    pub fn frame_duration(self) -> RationalTime {
        RationalTime::new(self.denominator as i64, self.numerator as i64)
    }

    /// Whether the rate can be used for sampling (non-zero on both sides).
    pub fn is_valid(self) -> bool {
        self.numerator > 0 && self.denominator > 0
    }

    /// The rate the tracking pipeline samples at.
    pub const ANALYSIS: Self = Self::new(15, 1);
    pub const FPS_24: Self = Self::new(24, 1);
    pub const FPS_29_97: Self = Self::new(30000, 1001);
    pub const FPS_30: Self = Self::new(30, 1);
    pub const FPS_60: Self = Self::new(60, 1);
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::ANALYSIS
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fps = self.to_fps_f64();
        if (fps - fps.round()).abs() < 0.001 {
            write!(f, "{} fps", fps.round() as u32)
        } else {
            write!(f, "{:.3} fps", fps)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_rate_frames() {
        let rate = FrameRate::ANALYSIS;
        let time = RationalTime::from_frames(45, rate);
        assert_eq!(time.to_seconds_f64(), 3.0);
        assert_eq!(time.to_frames(rate), 45);
    }

    #[test]
    fn test_no_drift_over_long_clip() {
        let rate = FrameRate::ANALYSIS;
        let mut t = RationalTime::ZERO;
        for _ in 0..9000 {
            t = t + rate.frame_duration();
        }
        assert_eq!(t, RationalTime::new(600, 1));
    }

    #[test]
    fn test_frame_rate_29_97() {
        let fps = FrameRate::FPS_29_97.to_fps_f64();
        assert!((fps - 29.97).abs() < 0.001);
        assert_eq!(FrameRate::FPS_29_97.to_string(), "29.970 fps");
        assert_eq!(FrameRate::ANALYSIS.to_string(), "15 fps");
    }

    #[test]
    fn test_invalid_rate() {
        assert!(!FrameRate::new(0, 1).is_valid());
        assert_eq!(FrameRate::new(30, 0).to_fps_f64(), 0.0);
    }
}
