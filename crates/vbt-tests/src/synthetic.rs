//! Synthetic lift videos.
//!
//! A dark plate on a light background with a textured hub at its centre,
//! moved by a per-frame trajectory. The hub gives the tracker corners; the
//! plate rim gives the calibration detector a circle.

use std::sync::Arc;
use vbt_ai::{
    AiServices, ImplementDetector, ObjectDetection, PoseDetection, PoseEstimator, ScaleEstimate,
    ScaleEstimator,
};
use vbt_core::{AnalysisConfig, CalibrationSource, RasterFrame, Rect};
use vbt_media::MemorySource;

pub const WIDTH: u32 = 240;
pub const HEIGHT: u32 = 420;
pub const FPS: f64 = 15.0;
pub const PLATE_RADIUS: f32 = 50.0;
pub const PLATE_DIAMETER_MM: f64 = 450.0;

const BACKGROUND: u8 = 200;
const PLATE: u8 = 50;
const HUB_HALF: i32 = 16;
const CELL: i32 = 5;

/// Plate centre for each frame, in frame pixels.
pub type Trajectory = dyn Fn(usize) -> Option<(f32, f32)>;

fn cell_value(cx: i32, cy: i32) -> u8 {
    let mut h = (cx as u32).wrapping_mul(73_856_093) ^ (cy as u32).wrapping_mul(19_349_663);
    h ^= h >> 13;
    h = h.wrapping_mul(0x5bd1_e995);
    h ^= h >> 15;
    60 + (h % 100) as u8
}

fn paint(center: Option<(f32, f32)>, px: &mut [u8]) {
    px.chunks_exact_mut(4)
        .for_each(|p| p.copy_from_slice(&[BACKGROUND, BACKGROUND, BACKGROUND, 255]));
    let Some((cx, cy)) = center else {
        return;
    };
    let (ox, oy) = (cx.round() as i32, cy.round() as i32);
    let r = PLATE_RADIUS as i32;
    for y in (oy - r).max(0)..(oy + r + 1).min(HEIGHT as i32) {
        for x in (ox - r).max(0)..(ox + r + 1).min(WIDTH as i32) {
            let (dx, dy) = (x - ox, y - oy);
            if dx * dx + dy * dy > r * r {
                continue;
            }
            let v = if dx.abs() < HUB_HALF && dy.abs() < HUB_HALF {
                cell_value((dx + HUB_HALF) / CELL, (dy + HUB_HALF) / CELL)
            } else {
                PLATE
            };
            let o = ((y * WIDTH as i32 + x) * 4) as usize;
            px[o..o + 4].copy_from_slice(&[v, v, v, 255]);
        }
    }
}

/// Render `frames` frames following `trajectory`.
pub fn video(frames: usize, reported_duration: Option<f64>, trajectory: &Trajectory) -> MemorySource {
    MemorySource::generate(WIDTH, HEIGHT, FPS, frames, reported_duration, |i, px| {
        paint(trajectory(i), px)
    })
}

/// The plate's first frame as a raster, for direct calibration tests.
pub fn still(center: (f32, f32)) -> RasterFrame {
    let mut px = vec![0u8; (WIDTH * HEIGHT * 4) as usize];
    paint(Some(center), &mut px);
    RasterFrame::from_rgba(px, WIDTH, HEIGHT, 0.0, 0).expect("valid synthetic frame")
}

/// 300 px rise over `rise_frames`, then held at the top.
pub fn rise_then_hold(rise_frames: usize) -> impl Fn(usize) -> Option<(f32, f32)> {
    move |i| {
        let t = i.min(rise_frames) as f32 / rise_frames as f32;
        Some((WIDTH as f32 / 2.0, 360.0 - 300.0 * t))
    }
}

/// The standard lift: 45 frames up, 45 frames held.
pub fn standard_lift() -> MemorySource {
    video(90, Some(6.0), &rise_then_hold(45))
}

pub fn manual_config(pixels_per_mm: f64) -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.calibration.source = CalibrationSource::Manual { pixels_per_mm };
    config
}

pub fn plate_config() -> AnalysisConfig {
    let mut config = AnalysisConfig::default();
    config.calibration.source = CalibrationSource::PlateDiameter {
        diameter_mm: PLATE_DIAMETER_MM,
    };
    config
}

// ── Service doubles ─────────────────────────────────────────────

/// Returns the same scale answer for every frame.
pub struct FixedScale(pub ScaleEstimate);

impl ScaleEstimator for FixedScale {
    fn estimate_scale(&self, _frame: &RasterFrame, _reference_mm: f64) -> vbt_ai::AiResult<ScaleEstimate> {
        Ok(self.0.clone())
    }
}

/// Reports a fixed box, given in full frame coordinates.
pub struct FixedBox(pub Rect);

impl FixedBox {
    /// Boxes the plate at its rendered start position.
    pub fn plate() -> Self {
        FixedBox(Rect::new(
            WIDTH as f32 / 2.0 - PLATE_RADIUS,
            360.0 - PLATE_RADIUS,
            2.0 * PLATE_RADIUS,
            2.0 * PLATE_RADIUS,
        ))
    }
}

impl ImplementDetector for FixedBox {
    fn detect(&self, frame: &RasterFrame) -> vbt_ai::AiResult<ObjectDetection> {
        // Services see a downscaled frame; answer in its coordinates.
        let k = frame.height() as f32 / HEIGHT as f32;
        Ok(ObjectDetection {
            found: true,
            bounding_box: Some(self.0.scaled(k)),
            confidence: Some(0.9),
            description: Some("barbell plate".to_string()),
        })
    }
}

/// Every call fails the way an offline service does.
pub struct Offline;

impl ScaleEstimator for Offline {
    fn estimate_scale(&self, _frame: &RasterFrame, _reference_mm: f64) -> vbt_ai::AiResult<ScaleEstimate> {
        Err(vbt_ai::AiError::Unavailable("connection refused".to_string()))
    }
}

impl ImplementDetector for Offline {
    fn detect(&self, _frame: &RasterFrame) -> vbt_ai::AiResult<ObjectDetection> {
        Err(vbt_ai::AiError::Unavailable("connection refused".to_string()))
    }
}

impl PoseEstimator for Offline {
    fn estimate_pose(&self, _frame: &RasterFrame) -> vbt_ai::AiResult<PoseDetection> {
        Err(vbt_ai::AiError::Unavailable("connection refused".to_string()))
    }
}

/// Every call panics.
pub struct Broken;

impl ScaleEstimator for Broken {
    fn estimate_scale(&self, _frame: &RasterFrame, _reference_mm: f64) -> vbt_ai::AiResult<ScaleEstimate> {
        panic!("scale service crashed")
    }
}

impl ImplementDetector for Broken {
    fn detect(&self, _frame: &RasterFrame) -> vbt_ai::AiResult<ObjectDetection> {
        panic!("detector crashed")
    }
}

impl PoseEstimator for Broken {
    fn estimate_pose(&self, _frame: &RasterFrame) -> vbt_ai::AiResult<PoseDetection> {
        panic!("pose service crashed")
    }
}

pub fn offline_services() -> AiServices {
    let offline = Arc::new(Offline);
    AiServices {
        scale: Some(offline.clone()),
        detector: Some(offline.clone()),
        pose: Some(offline),
    }
}

pub fn broken_services() -> AiServices {
    let broken = Arc::new(Broken);
    AiServices {
        scale: Some(broken.clone()),
        detector: Some(broken.clone()),
        pose: Some(broken),
    }
}
