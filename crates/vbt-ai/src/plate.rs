//! Deterministic plate detection.
//!
//! Weight plates show up as the dominant circle in a side-on lifting video.
//! Edge pixels vote for centres along their gradient direction (both ways,
//! so dark-on-light and light-on-dark plates both work); the radius is then
//! the one with the best edge support around the winning centre.

use rayon::prelude::*;
use tracing::debug;
use vbt_core::{RasterFrame, Vec2};
use vbt_tracking::{compute_gradients, GrayImage};

/// Confidence given to a frame-proportion estimate.
pub const FRAME_ESTIMATE_CONFIDENCE: f64 = 0.3;

/// Fewer edge pixels than this cannot outline a circle.
const MIN_EDGE_PIXELS: usize = 16;

/// A circle found in the frame, in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlateCircle {
    pub center: Vec2,
    pub radius: f32,
    /// Aligned edge pixels per unit of circumference.
    pub support: f32,
}

impl PlateCircle {
    pub fn confidence(&self) -> f64 {
        (self.support as f64 / 2.0).min(1.0)
    }

    /// Scale implied by a plate of `diameter_mm`.
    pub fn pixels_per_mm(&self, diameter_mm: f64) -> f64 {
        if diameter_mm <= 0.0 {
            return 0.0;
        }
        2.0 * self.radius as f64 / diameter_mm
    }
}

/// Gradient-voting circle detector.
#[derive(Debug, Clone)]
pub struct PlateDetector {
    /// Frames are reduced so their longest side is at most this.
    pub max_side: u32,
    /// Radius search range as fractions of the shorter frame side.
    pub min_radius_frac: f32,
    pub max_radius_frac: f32,
    /// Minimum aligned edge support for a circle to count.
    pub min_support: f32,
    /// Edge magnitude floor, relative to the strongest edge.
    pub relative_edge_threshold: f32,
    pub absolute_edge_threshold: f32,
}

impl Default for PlateDetector {
    fn default() -> Self {
        Self {
            max_side: 320,
            min_radius_frac: 0.04,
            max_radius_frac: 0.45,
            min_support: 0.6,
            relative_edge_threshold: 0.3,
            absolute_edge_threshold: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    x: f32,
    y: f32,
    /// Unit gradient direction.
    dir: Vec2,
}

impl PlateDetector {
    /// Find the most strongly supported circle in the frame.
    pub fn detect(&self, frame: &RasterFrame) -> Option<PlateCircle> {
        let (small, scale) = frame.downscale_to_fit(self.max_side, self.max_side);
        let gray = GrayImage::from_frame(&small);
        let (w, h) = gray.dimensions();
        let short_side = w.min(h) as f32;
        let r_min = (short_side * self.min_radius_frac).max(3.0).round() as i32;
        let r_max = (short_side * self.max_radius_frac).round() as i32;
        if r_max <= r_min {
            return None;
        }

        // Central differences on a hard edge only point in 45 degree steps.
        let edges = self.edges(&box_blur(&box_blur(&gray)));
        if edges.len() < MIN_EDGE_PIXELS {
            debug!(edges = edges.len(), "Too few edge pixels for plate detection");
            return None;
        }

        let votes = vote(&edges, w, h, r_min, r_max);
        let center = best_center(&votes, w, h)?;
        let (radius, support) = best_radius(&edges, center, r_min, r_max)?;
        debug!(
            cx = center.x,
            cy = center.y,
            radius,
            support,
            "Plate candidate"
        );
        if support < self.min_support {
            return None;
        }

        Some(PlateCircle {
            center: center / scale,
            radius: radius / scale,
            support,
        })
    }

    fn edges(&self, gray: &GrayImage) -> Vec<Edge> {
        let (gx, gy) = compute_gradients(gray);
        let max_mag = gx
            .data
            .par_iter()
            .zip(gy.data.par_iter())
            .map(|(x, y)| x.hypot(*y))
            .reduce(|| 0.0, f32::max);
        let threshold = (max_mag * self.relative_edge_threshold).max(self.absolute_edge_threshold);

        let w = gray.width as usize;
        gx.data
            .iter()
            .zip(&gy.data)
            .enumerate()
            .filter_map(|(i, (&dx, &dy))| {
                let mag = dx.hypot(dy);
                (mag >= threshold).then(|| Edge {
                    x: (i % w) as f32,
                    y: (i / w) as f32,
                    dir: Vec2::new(dx, dy) / mag,
                })
            })
            .collect()
    }
}

fn vote(edges: &[Edge], w: u32, h: u32, r_min: i32, r_max: i32) -> Vec<u32> {
    let (wi, hi) = (w as i32, h as i32);
    let len = w as usize * h as usize;
    edges
        .par_iter()
        .fold(
            || vec![0u32; len],
            |mut acc, e| {
                for r in r_min..=r_max {
                    let offset = e.dir * r as f32;
                    for c in [Vec2::new(e.x, e.y) + offset, Vec2::new(e.x, e.y) - offset] {
                        let (cx, cy) = (c.x.round() as i32, c.y.round() as i32);
                        if cx >= 0 && cy >= 0 && cx < wi && cy < hi {
                            acc[(cy * wi + cx) as usize] += 1;
                        }
                    }
                }
                acc
            },
        )
        .reduce(
            || vec![0u32; len],
            |mut a, b| {
                a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                a
            },
        )
}

/// Separable 3x3 mean filter.
fn box_blur(img: &GrayImage) -> GrayImage {
    let (w, h) = img.dimensions();
    let pass = |src: &GrayImage, step: (i32, i32)| {
        let mut out = GrayImage::new(w, h);
        out.data
            .par_chunks_mut(w as usize)
            .enumerate()
            .for_each(|(y, row)| {
                let y = y as i32;
                for (x, v) in row.iter_mut().enumerate() {
                    let x = x as i32;
                    *v = (src.get(x - step.0, y - step.1)
                        + src.get(x, y)
                        + src.get(x + step.0, y + step.1))
                        / 3.0;
                }
            });
        out
    };
    pass(&pass(img, (1, 0)), (0, 1))
}

/// Vote-weighted centroid of the 3x3 window with the largest vote sum.
/// Ties keep the first window in raster order.
fn best_center(votes: &[u32], w: u32, h: u32) -> Option<Vec2> {
    let (w, h) = (w as usize, h as usize);
    let mut best: Option<(u32, usize, usize)> = None;
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let sum: u32 = (y - 1..=y + 1)
                .flat_map(|yy| votes[yy * w + x - 1..=yy * w + x + 1].iter())
                .sum();
            if sum > 0 && best.map_or(true, |(b, _, _)| sum > b) {
                best = Some((sum, x, y));
            }
        }
    }
    let (total, x, y) = best?;
    let mut weighted = Vec2::ZERO;
    for yy in y - 1..=y + 1 {
        for xx in x - 1..=x + 1 {
            weighted += Vec2::new(xx as f32, yy as f32) * votes[yy * w + xx] as f32;
        }
    }
    Some(weighted / total as f32)
}

/// Radius with the most radially aligned edge pixels per unit circumference.
fn best_radius(edges: &[Edge], center: Vec2, r_min: i32, r_max: i32) -> Option<(f32, f32)> {
    let mut hist = vec![0u32; r_max as usize + 2];
    for e in edges {
        let rel = Vec2::new(e.x, e.y) - center;
        let d = rel.length();
        if d < 1.0 {
            continue;
        }
        if (e.dir.dot(rel) / d).abs() <= 0.8 {
            continue;
        }
        let bin = d.round() as usize;
        if bin < hist.len() {
            hist[bin] += 1;
        }
    }

    (r_min..=r_max)
        .map(|r| {
            let r = r as usize;
            let count = hist[r - 1] + hist[r] + hist[r + 1];
            let support = count as f32 / (std::f32::consts::TAU * r as f32);
            (r as f32, support)
        })
        .fold(None, |best: Option<(f32, f32)>, cand| match best {
            Some(b) if b.1 >= cand.1 => Some(b),
            _ => Some(cand),
        })
}

/// Fallback scale from typical framing: a full-size plate fills about 40%
/// of the frame width, smaller discs much less.
pub fn estimate_from_frame_width(frame_width: u32, diameter_mm: f64) -> f64 {
    if diameter_mm <= 0.0 {
        return 0.0;
    }
    let fraction = if diameter_mm >= 400.0 {
        0.40
    } else if diameter_mm >= 300.0 {
        0.11
    } else {
        0.08
    };
    (frame_width as f64 * fraction).max(50.0) / diameter_mm
}
