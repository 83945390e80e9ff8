//! Shi-Tomasi corner selection.
//!
//! Corner strength is the smaller eigenvalue of the gradient structure
//! tensor summed over a `block_size` neighbourhood. A candidate must beat
//! `quality_level` times the strongest response in the search region, be a
//! 3x3 local maximum, and keep `min_distance` from every corner accepted
//! before it (strongest first).

use crate::pyramid::{GrayImage, PyramidLevel};
use rayon::prelude::*;
use vbt_core::{Rect, TrackerConfig, Vec2};

/// A selected corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corner {
    pub position: Vec2,
    pub strength: f32,
}

/// Corner selection parameters.
#[derive(Debug, Clone, Copy)]
pub struct CornerParams {
    pub max_corners: usize,
    pub quality_level: f32,
    pub min_distance: f32,
    pub block_size: u32,
    /// Corners closer than this to the image border are not considered.
    pub border: u32,
}

impl CornerParams {
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            max_corners: config.max_corners,
            quality_level: config.quality_level,
            min_distance: config.min_distance,
            block_size: config.block_size,
            border: config.edge_margin.ceil().max(1.0) as u32,
        }
    }
}

/// Minimum-eigenvalue map of the structure tensor, restricted to `x0..x1, y0..y1`.
/// Entries outside the window stay zero.
pub fn min_eigen_map(
    level: &PyramidLevel,
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
    block_size: u32,
) -> GrayImage {
    let (w, h) = level.image.dimensions();
    let mut map = GrayImage::new(w, h);
    let r = (block_size / 2) as i32;

    map.data
        .par_chunks_mut(w as usize)
        .enumerate()
        .filter(|(y, _)| (*y as u32) >= y0 && (*y as u32) < y1)
        .for_each(|(y, row)| {
            let y = y as i32;
            for x in x0..x1 {
                let (mut a, mut b, mut c) = (0.0f32, 0.0f32, 0.0f32);
                for dy in -r..=r {
                    for dx in -r..=r {
                        let gx = level.grad_x.get(x as i32 + dx, y + dy);
                        let gy = level.grad_y.get(x as i32 + dx, y + dy);
                        a += gx * gx;
                        b += gx * gy;
                        c += gy * gy;
                    }
                }
                let half_trace = (a + c) * 0.5;
                let half_diff = (a - c) * 0.5;
                row[x as usize] = half_trace - (half_diff * half_diff + b * b).sqrt();
            }
        });
    map
}

/// Select up to `limit` corners inside `region`, keeping `min_distance`
/// from each other and from every position in `occupied`.
pub fn good_features_to_track(
    level: &PyramidLevel,
    region: Rect,
    params: &CornerParams,
    occupied: &[Vec2],
    limit: usize,
) -> Vec<Corner> {
    let (w, h) = level.image.dimensions();
    let limit = limit.min(params.max_corners);
    if limit == 0 || w <= 2 * params.border + 2 || h <= 2 * params.border + 2 {
        return Vec::new();
    }

    // Clip the region to the usable interior.
    let x0 = (region.x.floor().max(0.0) as u32).max(params.border);
    let y0 = (region.y.floor().max(0.0) as u32).max(params.border);
    let x1 = (((region.x + region.width).ceil().max(0.0)) as u32).min(w - params.border);
    let y1 = (((region.y + region.height).ceil().max(0.0)) as u32).min(h - params.border);
    if x0 >= x1 || y0 >= y1 {
        return Vec::new();
    }

    let map = min_eigen_map(level, x0, y0, x1, y1, params.block_size.max(1));

    let max_strength = (y0..y1)
        .flat_map(|y| (x0..x1).map(move |x| (x, y)))
        .map(|(x, y)| map.get(x as i32, y as i32))
        .fold(0.0f32, f32::max);
    if max_strength <= 0.0 {
        return Vec::new();
    }
    let threshold = max_strength * params.quality_level;

    let mut candidates: Vec<Corner> = (y0..y1)
        .into_par_iter()
        .flat_map_iter(|y| {
            let map = &map;
            (x0..x1).filter_map(move |x| {
                let v = map.get(x as i32, y as i32);
                if v <= threshold || !is_local_max(map, x as i32, y as i32, v, x0, y0, x1, y1) {
                    return None;
                }
                Some(Corner {
                    position: Vec2::new(x as f32, y as f32),
                    strength: v,
                })
            })
        })
        .collect();

    // Strongest first; ties broken by raster order so selection is deterministic.
    candidates.sort_by(|a, b| {
        b.strength
            .total_cmp(&a.strength)
            .then(a.position.y.total_cmp(&b.position.y))
            .then(a.position.x.total_cmp(&b.position.x))
    });

    let min_dist_sq = params.min_distance * params.min_distance;
    let mut accepted: Vec<Corner> = Vec::with_capacity(limit);
    for candidate in candidates {
        let far_enough = |p: &Vec2| p.distance_squared(candidate.position) >= min_dist_sq;
        if occupied.iter().all(far_enough) && accepted.iter().all(|c| far_enough(&c.position)) {
            accepted.push(candidate);
            if accepted.len() == limit {
                break;
            }
        }
    }
    accepted
}

#[allow(clippy::too_many_arguments)]
fn is_local_max(map: &GrayImage, x: i32, y: i32, v: f32, x0: u32, y0: u32, x1: u32, y1: u32) -> bool {
    for dy in -1..=1 {
        for dx in -1..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let nx = x + dx;
            let ny = y + dy;
            if nx < x0 as i32 || ny < y0 as i32 || nx >= x1 as i32 || ny >= y1 as i32 {
                continue;
            }
            let n = map.get(nx, ny);
            // Plateaus keep only their first pixel in raster order.
            if n > v || (n == v && (dy < 0 || (dy == 0 && dx < 0))) {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pyramid::ImagePyramid;

    fn squares(w: u32, h: u32, squares: &[(u32, u32, u32)]) -> ImagePyramid {
        let mut img = GrayImage::new(w, h);
        for &(sx, sy, size) in squares {
            for y in sy..sy + size {
                for x in sx..sx + size {
                    img.set(x, y, 1.0);
                }
            }
        }
        ImagePyramid::build(img, 1)
    }

    fn params() -> CornerParams {
        CornerParams::from_config(&TrackerConfig::default())
    }

    #[test]
    fn test_finds_square_corners() {
        let pyr = squares(64, 64, &[(20, 20, 20)]);
        let corners = good_features_to_track(pyr.base(), Rect::full_frame(64, 64), &params(), &[], 25);
        assert!(corners.len() >= 4, "found {}", corners.len());
        // Every corner sits near one of the square's four corners.
        let expected = [
            Vec2::new(20.0, 20.0),
            Vec2::new(39.0, 20.0),
            Vec2::new(20.0, 39.0),
            Vec2::new(39.0, 39.0),
        ];
        for c in &corners[..4] {
            assert!(expected.iter().any(|e| e.distance(c.position) < 3.0), "{:?}", c.position);
        }
    }

    #[test]
    fn test_flat_image_has_no_corners() {
        let pyr = squares(32, 32, &[]);
        assert!(good_features_to_track(pyr.base(), Rect::full_frame(32, 32), &params(), &[], 25).is_empty());
    }

    #[test]
    fn test_region_restricts_selection() {
        let pyr = squares(96, 64, &[(10, 20, 12), (60, 20, 12)]);
        let region = Rect::new(50.0, 0.0, 46.0, 64.0);
        let corners = good_features_to_track(pyr.base(), region, &params(), &[], 25);
        assert!(!corners.is_empty());
        assert!(corners.iter().all(|c| c.position.x >= 50.0));
    }

    #[test]
    fn test_min_distance_and_limit() {
        let pyr = squares(96, 96, &[(10, 10, 10), (40, 10, 10), (10, 50, 10), (50, 50, 10)]);
        let p = params();
        let corners = good_features_to_track(pyr.base(), Rect::full_frame(96, 96), &p, &[], 6);
        assert_eq!(corners.len(), 6);
        for (i, a) in corners.iter().enumerate() {
            for b in &corners[i + 1..] {
                assert!(a.position.distance(b.position) >= p.min_distance);
            }
        }
    }

    #[test]
    fn test_occupied_positions_are_avoided() {
        let pyr = squares(64, 64, &[(20, 20, 20)]);
        let occupied = [Vec2::new(20.0, 20.0)];
        let corners = good_features_to_track(pyr.base(), Rect::full_frame(64, 64), &params(), &occupied, 25);
        assert!(corners.iter().all(|c| c.position.distance(occupied[0]) >= 8.0));
    }
}
