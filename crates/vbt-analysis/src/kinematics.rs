//! Bar-path kinematics.
//!
//! Velocities are in m/s, path deviation and range of motion in cm. Image
//! y grows downward, so lifting "up" means decreasing y. Every quantity
//! degrades to zero instead of NaN when the path or the scale is empty.

use serde::{Deserialize, Serialize};
use tracing::debug;
use vbt_core::{FrameRate, KinematicsConfig, LiftDirection, PowerZone};
use vbt_tracking::PathPoint;

/// Instantaneous, smoothed and summary velocities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VelocitySeries {
    /// One entry per path point; the first is always 0.
    pub instant: Vec<f64>,
    pub smoothed: Vec<f64>,
    pub mean: f64,
    pub peak: f64,
    /// Last instantaneous value.
    pub current: f64,
}

/// Inclusive range of path indices identified as the lift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcentricPhase {
    pub start_frame: usize,
    pub end_frame: usize,
}

/// Everything derived from one path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KinematicsReport {
    pub velocity: VelocitySeries,
    pub concentric: Option<ConcentricPhase>,
    pub rep_duration_s: f64,
    pub concentric_duration_s: f64,
    pub path_deviation_cm: f64,
    pub range_of_motion_cm: f64,
    pub power_zone: PowerZone,
    pub timestamps_ms: Vec<f64>,
}

/// Turns a path and a scale into velocities and summary metrics.
#[derive(Debug, Clone)]
pub struct KinematicsCalculator {
    config: KinematicsConfig,
    rate: FrameRate,
}

impl KinematicsCalculator {
    pub fn new(config: KinematicsConfig, rate: FrameRate) -> Self {
        Self { config, rate }
    }

    fn fps(&self) -> f64 {
        let fps = self.rate.to_fps_f64();
        if fps.is_finite() && fps > 0.0 {
            fps
        } else {
            FrameRate::ANALYSIS.to_fps_f64()
        }
    }

    /// Seconds between two path points.
    fn interval(&self, a: &PathPoint, b: &PathPoint) -> f64 {
        let dt = (b.timestamp_ms - a.timestamp_ms) / 1000.0;
        if dt > 0.0 && dt <= 1.0 {
            dt
        } else {
            b.frame_index.saturating_sub(a.frame_index).max(1) as f64 / self.fps()
        }
    }

    /// Instantaneous speed per path point, in m/s.
    pub fn instant_velocities(&self, path: &[PathPoint], pixels_per_mm: f64) -> Vec<f64> {
        let mut out = vec![0.0; path.len()];
        if !usable_scale(pixels_per_mm) {
            return out;
        }
        for (i, w) in path.windows(2).enumerate() {
            let mm = w[0].position().distance(w[1].position()) as f64 / pixels_per_mm;
            let v = mm / self.interval(&w[0], &w[1]) / 1000.0;
            out[i + 1] = if v.is_finite() {
                v.min(self.config.max_velocity)
            } else {
                0.0
            };
        }
        out
    }

    /// The vertical sign that counts as lifting: -1 for up, +1 for down.
    fn lift_sign(&self, path: &[PathPoint]) -> f64 {
        match self.config.direction {
            LiftDirection::Up => -1.0,
            LiftDirection::Down => 1.0,
            LiftDirection::Auto => match (path.first(), path.last()) {
                (Some(a), Some(b)) if b.y > a.y => 1.0,
                _ => -1.0,
            },
        }
    }

    /// Locate the concentric phase: the run of lifting steps (vertical
    /// travel in the lift direction above the noise floor) with the most
    /// travel. Runs tolerate `max_gap_frames` non-lifting steps inside.
    pub fn concentric_phase(&self, path: &[PathPoint], pixels_per_mm: f64) -> Option<ConcentricPhase> {
        if path.len() < 2 || !usable_scale(pixels_per_mm) {
            return None;
        }
        let sign = self.lift_sign(path);
        let travel = |a: &PathPoint, b: &PathPoint| sign * (b.y - a.y) as f64 / pixels_per_mm;

        let mut best: Option<(ConcentricPhase, f64)> = None;
        let mut run: Option<(usize, usize)> = None;
        let mut gap = 0usize;

        let close = |run: (usize, usize), best: &mut Option<(ConcentricPhase, f64)>| {
            let phase = ConcentricPhase {
                start_frame: run.0 - 1,
                end_frame: run.1,
            };
            let total = travel(&path[phase.start_frame], &path[phase.end_frame]);
            if best.as_ref().map_or(true, |(_, t)| total > *t) {
                *best = Some((phase, total));
            }
        };

        for i in 1..path.len() {
            if travel(&path[i - 1], &path[i]) > self.config.noise_floor_mm {
                run = Some(match run {
                    Some((start, _)) => (start, i),
                    None => (i, i),
                });
                gap = 0;
            } else if let Some(open) = run {
                gap += 1;
                if gap > self.config.max_gap_frames {
                    close(open, &mut best);
                    run = None;
                }
            }
        }
        if let Some(open) = run {
            close(open, &mut best);
        }

        best.map(|(phase, total)| {
            debug!(
                start = phase.start_frame,
                end = phase.end_frame,
                travel_mm = total,
                "Concentric phase"
            );
            phase
        })
    }

    /// RMS of frame-to-frame horizontal displacement, in mm.
    pub fn path_deviation_mm(&self, path: &[PathPoint], pixels_per_mm: f64) -> f64 {
        if path.len() < 2 || !usable_scale(pixels_per_mm) {
            return 0.0;
        }
        let sum_sq: f64 = path
            .windows(2)
            .map(|w| ((w[1].x - w[0].x) as f64 / pixels_per_mm).powi(2))
            .sum();
        (sum_sq / (path.len() - 1) as f64).sqrt()
    }

    /// Vertical distance between the first and last path point, in mm.
    pub fn range_of_motion_mm(&self, path: &[PathPoint], pixels_per_mm: f64) -> f64 {
        match (path.first(), path.last()) {
            (Some(a), Some(b)) if usable_scale(pixels_per_mm) => {
                (b.y - a.y).abs() as f64 / pixels_per_mm
            }
            _ => 0.0,
        }
    }

    pub fn compute(&self, path: &[PathPoint], pixels_per_mm: f64) -> KinematicsReport {
        let instant = self.instant_velocities(path, pixels_per_mm);
        let concentric = self.concentric_phase(path, pixels_per_mm);

        // Statistics cover the steps inside the phase, or the whole clip
        // when no lifting was found.
        let window = match concentric {
            Some(phase) => &instant[phase.start_frame + 1..=phase.end_frame],
            None if instant.len() > 1 => &instant[1..],
            None => &[][..],
        };
        let mean = if window.is_empty() {
            0.0
        } else {
            window.iter().sum::<f64>() / window.len() as f64
        };
        let peak = window.iter().copied().fold(0.0, f64::max);

        let fps = self.fps();
        let frames_between = |a: usize, b: usize| {
            path[b].frame_index.saturating_sub(path[a].frame_index) as f64
        };
        let concentric_duration_s = concentric
            .map(|p| frames_between(p.start_frame, p.end_frame) / fps)
            .unwrap_or(0.0);
        let rep_duration_s = if path.is_empty() {
            0.0
        } else {
            (frames_between(0, path.len() - 1) + 1.0) / fps
        };

        let velocity = VelocitySeries {
            smoothed: smooth(&instant, self.config.smoothing_window),
            current: instant.last().copied().unwrap_or(0.0),
            instant,
            mean,
            peak,
        };

        KinematicsReport {
            power_zone: self.config.power_zones.classify(mean),
            velocity,
            concentric,
            rep_duration_s,
            concentric_duration_s,
            path_deviation_cm: self.path_deviation_mm(path, pixels_per_mm) / 10.0,
            range_of_motion_cm: self.range_of_motion_mm(path, pixels_per_mm) / 10.0,
            timestamps_ms: path.iter().map(|p| p.timestamp_ms).collect(),
        }
    }
}

fn usable_scale(pixels_per_mm: f64) -> bool {
    pixels_per_mm.is_finite() && pixels_per_mm > 0.0
}

/// Centred moving average. The window shrinks at the ends.
pub fn smooth(series: &[f64], window: usize) -> Vec<f64> {
    let half = window / 2;
    if half == 0 {
        return series.to_vec();
    }
    (0..series.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half).min(series.len() - 1);
            let slice = &series[lo..=hi];
            slice.iter().sum::<f64>() / slice.len() as f64
        })
        .collect()
}
