//! Pyramidal Lucas-Kanade point tracker.
//!
//! One tracker serves one analysis run:
//!
//! ```text
//! Uninitialized --first frame with corners--> Seeded --next frame--> Tracking --finish--> Done
//! ```
//!
//! Points are held in a [`PointTable`]. A point is dropped when its flow
//! cannot be solved, its residual or confidence is out of bounds, or it
//! leaves the frame. When fewer than `min_live_points` remain, new corners
//! are seeded around the live centroid. Faults such as total point loss are
//! sent on a channel instead of aborting the frame loop.

use crate::features::{good_features_to_track, CornerParams};
use crate::point_table::{PointId, PointTable};
use crate::pyramid::ImagePyramid;
use crossbeam_channel::{Receiver, Sender};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};
use vbt_core::{RasterFrame, Rect, Result, TrackerConfig, VbtError, Vec2};

/// A point position emitted for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedPoint {
    pub point_id: PointId,
    pub frame_index: u32,
    pub x: f32,
    pub y: f32,
    pub timestamp_ms: f64,
    pub confidence: f32,
}

impl TrackedPoint {
    #[inline]
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

/// Lifecycle of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackerState {
    Uninitialized,
    Seeded,
    Tracking,
    Done,
}

/// Non-fatal tracking problems, delivered on the fault channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrackingFault {
    /// No trackable corners in the search region.
    NoFeatures { frame_index: u32 },
    /// Every live point was dropped on this frame.
    AllPointsLost { frame_index: u32, dropped: usize },
    /// Frame size changed mid-run; all points were re-seeded.
    FrameSizeChanged { frame_index: u32 },
}

impl TrackingFault {
    pub fn frame_index(&self) -> u32 {
        match self {
            Self::NoFeatures { frame_index }
            | Self::AllPointsLost { frame_index, .. }
            | Self::FrameSizeChanged { frame_index } => *frame_index,
        }
    }
}

impl fmt::Display for TrackingFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFeatures { frame_index } => {
                write!(f, "no trackable features at frame {frame_index}")
            }
            Self::AllPointsLost {
                frame_index,
                dropped,
            } => write!(f, "all {dropped} points lost at frame {frame_index}"),
            Self::FrameSizeChanged { frame_index } => {
                write!(f, "frame size changed at frame {frame_index}")
            }
        }
    }
}

/// What happened on one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameStats {
    pub frame_index: u32,
    /// Points propagated from the previous frame.
    pub tracked: usize,
    pub dropped: usize,
    pub reseeded: usize,
    /// Points alive after this frame.
    pub live: usize,
}

/// Result of following one point between two pyramids.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowResult {
    pub position: Vec2,
    /// Mean absolute intensity difference over the window at full resolution.
    pub residual: f32,
    /// Smallest eigenvalue of the normalised structure tensor at full resolution.
    pub min_eigenvalue: f32,
    pub converged: bool,
}

impl FlowResult {
    /// Confidence in [0, 1]. Falls with the residual, with weak texture near
    /// the eigenvalue floor, and when iteration did not converge.
    pub fn confidence(&self, min_eigenvalue: f32) -> f32 {
        let fit = (1.0 - self.residual).clamp(0.0, 1.0);
        let texture = if min_eigenvalue > 0.0 {
            (self.min_eigenvalue / (4.0 * min_eigenvalue)).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let convergence = if self.converged { 1.0 } else { 0.75 };
        fit * texture * convergence
    }
}

/// Lucas-Kanade parameters derived from the tracker configuration.
#[derive(Debug, Clone, Copy)]
pub struct FlowParams {
    pub window_size: u32,
    pub max_iterations: u32,
    pub epsilon: f32,
    pub min_eigenvalue: f32,
}

impl FlowParams {
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            window_size: config.window_size,
            max_iterations: config.max_iterations,
            epsilon: config.epsilon,
            min_eigenvalue: config.min_eigenvalue,
        }
    }
}

/// Follow `position` from `prev` to `curr`, coarse to fine.
///
/// Returns `None` when the structure tensor at full resolution is too weak
/// to solve.
pub fn track_point(
    prev: &ImagePyramid,
    curr: &ImagePyramid,
    position: Vec2,
    params: &FlowParams,
) -> Option<FlowResult> {
    let levels = prev.levels.len().min(curr.levels.len());
    let half = (params.window_size / 2) as i32;
    let count = ((2 * half + 1) * (2 * half + 1)) as f32;

    let mut flow = Vec2::ZERO;
    let mut converged = false;
    let mut base_eigen = 0.0f32;
    let mut window: Vec<(f32, f32, f32)> = Vec::with_capacity(count as usize);

    for level in (0..levels).rev() {
        let scale = 1.0 / (1u32 << level) as f32;
        let p = position * scale;
        let prev_level = &prev.levels[level];
        let curr_img = &curr.levels[level].image;

        // Template intensities and gradients are fixed per level.
        window.clear();
        let (mut g11, mut g12, mut g22) = (0.0f32, 0.0f32, 0.0f32);
        for wy in -half..=half {
            for wx in -half..=half {
                let sx = p.x + wx as f32;
                let sy = p.y + wy as f32;
                let ix = prev_level.grad_x.sample(sx, sy);
                let iy = prev_level.grad_y.sample(sx, sy);
                g11 += ix * ix;
                g12 += ix * iy;
                g22 += iy * iy;
                window.push((prev_level.image.sample(sx, sy), ix, iy));
            }
        }

        let half_trace = (g11 + g22) * 0.5;
        let half_diff = (g11 - g22) * 0.5;
        let min_eig = (half_trace - (half_diff * half_diff + g12 * g12).sqrt()) / count;
        let det = g11 * g22 - g12 * g12;

        if min_eig < params.min_eigenvalue || det.abs() < f32::EPSILON {
            if level == 0 {
                return None;
            }
            flow *= 2.0;
            continue;
        }
        let inv_det = 1.0 / det;

        converged = false;
        for _ in 0..params.max_iterations {
            let (mut bx, mut by) = (0.0f32, 0.0f32);
            let mut idx = 0;
            for wy in -half..=half {
                for wx in -half..=half {
                    let (i0, ix, iy) = window[idx];
                    idx += 1;
                    let it = curr_img.sample(p.x + flow.x + wx as f32, p.y + flow.y + wy as f32) - i0;
                    bx += ix * it;
                    by += iy * it;
                }
            }
            let delta = Vec2::new(
                inv_det * (g22 * bx - g12 * by),
                inv_det * (-g12 * bx + g11 * by),
            );
            flow -= delta;
            if !flow.is_finite() {
                return None;
            }
            if delta.length_squared() < params.epsilon * params.epsilon {
                converged = true;
                break;
            }
        }

        if level > 0 {
            flow *= 2.0;
        } else {
            base_eigen = min_eig;
        }
    }

    // Residual at full resolution.
    let base_prev = &prev.levels[0];
    let base_curr = &curr.levels[0].image;
    let mut err = 0.0f32;
    for wy in -half..=half {
        for wx in -half..=half {
            let sx = position.x + wx as f32;
            let sy = position.y + wy as f32;
            let i0 = base_prev.image.sample(sx, sy);
            let i1 = base_curr.sample(sx + flow.x, sy + flow.y);
            err += (i1 - i0).abs();
        }
    }

    Some(FlowResult {
        position: position + flow,
        residual: err / count,
        min_eigenvalue: base_eigen,
        converged,
    })
}

/// Multi-point optical-flow tracker for one analysis run.
pub struct PointTracker {
    config: TrackerConfig,
    corner_params: CornerParams,
    flow_params: FlowParams,
    state: TrackerState,
    table: PointTable,
    prev: Option<ImagePyramid>,
    initial_region: Option<Rect>,
    search_region: Option<Rect>,
    history: Vec<TrackedPoint>,
    frame_start: usize,
    faults: Sender<TrackingFault>,
    starved: bool,
}

impl PointTracker {
    /// Create a tracker restricted to `region` (whole frame when `None`).
    /// Returns the receiving end of the fault channel.
    pub fn new(config: TrackerConfig, region: Option<Rect>) -> (Self, Receiver<TrackingFault>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let tracker = Self {
            corner_params: CornerParams::from_config(&config),
            flow_params: FlowParams::from_config(&config),
            table: PointTable::with_capacity(config.max_corners * 2),
            config,
            state: TrackerState::Uninitialized,
            prev: None,
            initial_region: region.filter(|r| !r.is_degenerate()),
            search_region: None,
            history: Vec::new(),
            frame_start: 0,
            faults: tx,
            starved: false,
        };
        (tracker, rx)
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn live_count(&self) -> usize {
        self.table.len()
    }

    /// Live points after the last processed frame.
    pub fn live_points(&self) -> impl Iterator<Item = (PointId, Vec2)> + '_ {
        self.table.iter().map(|(id, p)| (id, p.position))
    }

    /// Points emitted for the most recent frame.
    pub fn last_frame_points(&self) -> &[TrackedPoint] {
        &self.history[self.frame_start..]
    }

    /// Every point emitted so far.
    pub fn points(&self) -> &[TrackedPoint] {
        &self.history
    }

    /// Current search region, if tracking is restricted.
    pub fn search_region(&self) -> Option<Rect> {
        self.search_region
    }

    /// Seed or propagate points on the next frame.
    pub fn process_frame(&mut self, frame: &RasterFrame) -> Result<FrameStats> {
        if self.state == TrackerState::Done {
            return Err(VbtError::Tracking(
                "tracker already finished; create a new one per run".to_string(),
            ));
        }

        let frame_index = frame.frame_index();
        let pyramid = ImagePyramid::from_frame(frame, self.config.pyramid_levels);
        let (w, h) = pyramid.dimensions();
        let mut stats = FrameStats {
            frame_index,
            ..FrameStats::default()
        };

        let mut prev = self.prev.take();
        let size_changed = prev.as_ref().is_some_and(|p| p.dimensions() != (w, h));
        if size_changed {
            warn!(frame = frame_index, width = w, height = h, "Frame size changed, re-seeding");
            stats.dropped = self.table.len();
            self.table.clear();
            self.search_region = None;
            self.emit_fault(TrackingFault::FrameSizeChanged { frame_index });
            prev = None;
        }

        if let Some(prev) = prev.as_ref().filter(|_| !self.table.is_empty()) {
            let (tracked, dropped) = self.propagate(prev, &pyramid, w, h);
            stats.tracked = tracked;
            stats.dropped += dropped;
            self.state = TrackerState::Tracking;

            if self.table.is_empty() {
                warn!(frame = frame_index, dropped, "All tracked points lost");
                self.emit_fault(TrackingFault::AllPointsLost {
                    frame_index,
                    dropped,
                });
                self.starved = true;
            }
        }

        if self.table.len() < self.config.min_live_points {
            stats.reseeded = self.seed(&pyramid, w, h, frame_index);
            if self.table.is_empty() {
                if !self.starved {
                    warn!(frame = frame_index, "No trackable features in search region");
                    self.emit_fault(TrackingFault::NoFeatures { frame_index });
                    self.starved = true;
                }
            } else {
                self.starved = false;
                if self.state == TrackerState::Uninitialized {
                    self.state = TrackerState::Seeded;
                }
            }
        }

        self.follow_centroid(w, h);
        self.record(frame);
        stats.live = self.table.len();
        self.prev = Some(pyramid);

        debug!(
            frame = frame_index,
            tracked = stats.tracked,
            dropped = stats.dropped,
            reseeded = stats.reseeded,
            live = stats.live,
            "Tracked frame"
        );
        Ok(stats)
    }

    /// End the run and hand over every emitted point. Releases all per-point state.
    pub fn finish(&mut self) -> Vec<TrackedPoint> {
        self.state = TrackerState::Done;
        self.table.clear();
        self.prev = None;
        self.frame_start = 0;
        std::mem::take(&mut self.history)
    }

    /// Returns (points attempted, points dropped).
    fn propagate(&mut self, prev: &ImagePyramid, curr: &ImagePyramid, w: u32, h: u32) -> (usize, usize) {
        let live: Vec<(PointId, Vec2)> = self.live_points().collect();
        let params = self.flow_params;
        let results: Vec<(PointId, Option<FlowResult>)> = live
            .par_iter()
            .map(|&(id, pos)| (id, track_point(prev, curr, pos, &params)))
            .collect();

        let margin = self.config.edge_margin;
        let max_x = w as f32 - 1.0 - margin;
        let max_y = h as f32 - 1.0 - margin;
        let mut dropped = 0;

        for (id, result) in results {
            let keep = result.and_then(|r| {
                let confidence = r.confidence(self.config.min_eigenvalue);
                let inside = r.position.x >= margin
                    && r.position.y >= margin
                    && r.position.x <= max_x
                    && r.position.y <= max_y;
                (inside && r.residual <= self.config.max_residual && confidence >= self.config.min_confidence)
                    .then_some((r.position, confidence))
            });
            match keep {
                Some((position, confidence)) => {
                    if let Some(point) = self.table.get_mut(id) {
                        point.position = position;
                        point.confidence = confidence;
                        point.age += 1;
                    }
                }
                None => {
                    self.table.remove(id);
                    dropped += 1;
                }
            }
        }
        (live.len(), dropped)
    }

    /// Seed new corners up to `max_corners`. Returns how many were added.
    ///
    /// A search region without features gives way to the full frame, and the
    /// region is dropped for the rest of the run once that finds any.
    fn seed(&mut self, pyramid: &ImagePyramid, w: u32, h: u32, frame_index: u32) -> usize {
        let full = Rect::full_frame(w, h);
        let region = self
            .search_region
            .or(self.initial_region)
            .map(|r| r.expand(self.config.region_padding))
            .and_then(|r| r.clamp_to_frame(w, h))
            .unwrap_or(full);

        let occupied = self.table.positions();
        let limit = self.config.max_corners.saturating_sub(occupied.len());
        let mut corners = good_features_to_track(pyramid.base(), region, &self.corner_params, &occupied, limit);
        if corners.is_empty() && region != full {
            corners = good_features_to_track(pyramid.base(), full, &self.corner_params, &occupied, limit);
            if !corners.is_empty() {
                warn!(frame = frame_index, ?region, "No features in search region, tracking the full frame");
                self.initial_region = None;
                self.search_region = None;
            }
        }
        for corner in &corners {
            self.table.insert(corner.position);
        }
        if !corners.is_empty() {
            debug!(added = corners.len(), live = self.table.len(), "Seeded points");
        }
        corners.len()
    }

    /// Keep the search region centred on the live points.
    fn follow_centroid(&mut self, w: u32, h: u32) {
        let Some(base) = self.initial_region else {
            return;
        };
        if let Some(centroid) = self.table.centroid() {
            let size = self.search_region.unwrap_or(base).size();
            self.search_region = Rect::from_center_size(centroid, size).clamp_to_frame(w, h);
        }
    }

    fn record(&mut self, frame: &RasterFrame) {
        self.frame_start = self.history.len();
        let frame_index = frame.frame_index();
        let timestamp_ms = frame.timestamp_ms();
        self.history.extend(self.table.iter().map(|(id, p)| TrackedPoint {
            point_id: id,
            frame_index,
            x: p.position.x,
            y: p.position.y,
            timestamp_ms,
            confidence: p.confidence,
        }));
    }

    fn emit_fault(&self, fault: TrackingFault) {
        // The receiver may already be gone; faults are advisory.
        let _ = self.faults.send(fault);
    }
}
