//! Collapse many tracked points per frame into one bar-path point.
//!
//! Each frame's points are treated as noisy samples of the bar centre.
//! A point is an outlier when its motion since the previous frame (matched
//! by id) disagrees with the median motion, or when it sits far from the
//! median position of the frame. Both gates are median-absolute-deviation
//! based with a floor of `min_gate_px`. The inlier centroid is the frame's
//! estimate; large jumps are damped toward the previous estimate.

use crate::point_table::PointId;
use crate::point_tracker::TrackedPoint;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use vbt_core::{ReconstructionConfig, Vec2};

/// Per-frame point sets rarely exceed the default corner budget.
type FramePoints<'a> = SmallVec<[&'a TrackedPoint; 32]>;

/// Scale from MAD to a standard-deviation estimate for normal data.
const MAD_TO_SIGMA: f32 = 1.4826;

/// One bar-path sample per frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub frame_index: u32,
    pub x: f32,
    pub y: f32,
    pub timestamp_ms: f64,
}

impl PathPoint {
    #[inline]
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

/// Streaming reconstructor. Feed frames in order with [`push_frame`].
///
/// [`push_frame`]: PathReconstructor::push_frame
#[derive(Debug, Clone)]
pub struct PathReconstructor {
    config: ReconstructionConfig,
    previous: HashMap<PointId, Vec2>,
    path: Vec<PathPoint>,
}

impl PathReconstructor {
    pub fn new(config: ReconstructionConfig) -> Self {
        Self {
            config,
            previous: HashMap::new(),
            path: Vec::new(),
        }
    }

    pub fn path(&self) -> &[PathPoint] {
        &self.path
    }

    pub fn into_path(self) -> Vec<PathPoint> {
        self.path
    }

    /// Add one frame's points. Returns the new path point, or `None` when the
    /// frame had no points or is not newer than the last path point.
    pub fn push_frame(&mut self, points: &[TrackedPoint]) -> Option<PathPoint> {
        let first = points.first()?;
        let (frame_index, timestamp_ms) = (first.frame_index, first.timestamp_ms);
        if self.path.last().is_some_and(|last| last.frame_index >= frame_index) {
            return None;
        }

        let inliers = self.inliers(points);
        let sum: Vec2 = inliers.iter().map(|p| p.position()).sum();
        let mut center = sum / inliers.len() as f32;

        if let Some(last) = self.path.last() {
            let prev = last.position();
            if prev.distance(center) > self.config.jump_threshold_px {
                debug!(frame = frame_index, jump = prev.distance(center), "Damping path jump");
                center = prev + (center - prev) * self.config.jump_damping;
            }
        }

        self.previous = points.iter().map(|p| (p.point_id, p.position())).collect();
        let point = PathPoint {
            frame_index,
            x: center.x,
            y: center.y,
            timestamp_ms,
        };
        self.path.push(point);
        Some(point)
    }

    fn inliers<'a>(&self, points: &'a [TrackedPoint]) -> FramePoints<'a> {
        if points.len() < 3 {
            return points.iter().collect();
        }

        // Spatial gate around the frame's median position.
        let median_pos = Vec2::new(
            median(points.iter().map(|p| p.x).collect()),
            median(points.iter().map(|p| p.y).collect()),
        );
        let spread: Vec<f32> = points.iter().map(|p| p.position().distance(median_pos)).collect();
        let spatial_gate = self.gate(&spread);

        // Motion gate against the median displacement of matched points.
        let motions: Vec<(usize, Vec2)> = points
            .iter()
            .enumerate()
            .filter_map(|(i, p)| self.previous.get(&p.point_id).map(|prev| (i, p.position() - *prev)))
            .collect();
        let motion_outlier = if motions.len() >= 3 {
            let median_motion = Vec2::new(
                median(motions.iter().map(|(_, d)| d.x).collect()),
                median(motions.iter().map(|(_, d)| d.y).collect()),
            );
            let deviations: Vec<f32> = motions.iter().map(|(_, d)| d.distance(median_motion)).collect();
            let gate = self.gate(&deviations);
            let mut flags = vec![false; points.len()];
            for ((i, _), dev) in motions.iter().zip(&deviations) {
                flags[*i] = *dev > gate;
            }
            flags
        } else {
            vec![false; points.len()]
        };

        let inliers: FramePoints<'a> = points
            .iter()
            .zip(spread)
            .zip(motion_outlier)
            .filter(|((_, s), outlier)| *s <= spatial_gate && !outlier)
            .map(|((p, _), _)| p)
            .collect();

        if inliers.is_empty() {
            points.iter().collect()
        } else {
            inliers
        }
    }

    fn gate(&self, deviations: &[f32]) -> f32 {
        let mad = median(deviations.to_vec());
        (self.config.mad_factor * MAD_TO_SIGMA * mad).max(self.config.min_gate_px)
    }
}

/// Batch reconstruction over a complete tracker output.
///
/// Runs the streaming pass frame by frame, then replaces single-frame spikes
/// with the midpoint of their neighbours.
pub fn reconstruct(points: &[TrackedPoint], config: &ReconstructionConfig) -> Vec<PathPoint> {
    let mut frames: BTreeMap<u32, Vec<TrackedPoint>> = BTreeMap::new();
    for p in points {
        frames.entry(p.frame_index).or_default().push(*p);
    }

    let mut reconstructor = PathReconstructor::new(config.clone());
    for frame_points in frames.values() {
        reconstructor.push_frame(frame_points);
    }
    let mut path = reconstructor.into_path();
    let replaced = suppress_spikes(&mut path, config.spike_threshold_px);
    if replaced > 0 {
        debug!(replaced, "Suppressed path spikes");
    }
    path
}

/// Replace points that deviate from their neighbours' midpoint by more than
/// `threshold` pixels. Neighbours are read from the unmodified path.
pub fn suppress_spikes(path: &mut [PathPoint], threshold: f32) -> usize {
    if path.len() < 3 {
        return 0;
    }
    let original: Vec<Vec2> = path.iter().map(PathPoint::position).collect();
    let mut replaced = 0;
    for i in 1..path.len() - 1 {
        let mid = (original[i - 1] + original[i + 1]) * 0.5;
        if original[i].distance(mid) > threshold {
            path[i].x = mid.x;
            path[i].y = mid.y;
            replaced += 1;
        }
    }
    replaced
}

fn median(mut values: Vec<f32>) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) * 0.5
    } else {
        values[mid]
    }
}
