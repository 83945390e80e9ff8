//! Contracts of the external AI services.
//!
//! The core only knows the request/response shapes. Implementations must be
//! `Send + Sync` because calibration and region localization may query
//! their services at the same time.

use crate::error::{AiError, AiResult};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use vbt_core::{RasterFrame, Rect};

/// Response of the scene-scale estimator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScaleEstimate {
    pub found: bool,
    pub pixels_per_mm: Option<f64>,
    pub confidence: Option<f64>,
    pub description: Option<String>,
}

/// Response of the implement (barbell) detector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectDetection {
    pub found: bool,
    pub bounding_box: Option<Rect>,
    pub confidence: Option<f64>,
    pub description: Option<String>,
}

/// A named body keypoint, e.g. `left_wrist`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseKeypoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
    pub name: String,
}

/// Response of the pose estimator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoseDetection {
    pub found: bool,
    pub keypoints: Vec<PoseKeypoint>,
    pub main_person_bounds: Option<Rect>,
    pub confidence: Option<f64>,
    pub description: Option<String>,
}

fn clamp_confidence(c: Option<f64>) -> Option<f64> {
    c.map(|c| if c.is_finite() { c.clamp(0.0, 1.0) } else { 0.0 })
}

/// Clamp each component into the frame, the way responses are sanitised
/// before use.
fn clamp_rect(r: Rect, width: u32, height: u32) -> Rect {
    let (w, h) = (width as f32, height as f32);
    let fix = |v: f32, max: f32| if v.is_finite() { v.clamp(0.0, max) } else { 0.0 };
    Rect::new(fix(r.x, w), fix(r.y, h), fix(r.width, w), fix(r.height, h))
}

impl ScaleEstimate {
    pub fn normalized(mut self) -> Self {
        self.confidence = clamp_confidence(self.confidence);
        self
    }
}

impl ObjectDetection {
    pub fn normalized(mut self, width: u32, height: u32) -> Self {
        self.confidence = clamp_confidence(self.confidence);
        self.bounding_box = self.bounding_box.map(|b| clamp_rect(b, width, height));
        self
    }
}

impl PoseDetection {
    pub fn normalized(mut self, width: u32, height: u32) -> Self {
        self.confidence = clamp_confidence(self.confidence);
        self.main_person_bounds = self.main_person_bounds.map(|b| clamp_rect(b, width, height));
        self.keypoints.retain(|k| k.x.is_finite() && k.y.is_finite());
        self
    }
}

/// Estimates pixels-per-millimetre from scene content.
pub trait ScaleEstimator: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    /// `reference_size_mm` is the physical size of the calibration object.
    fn estimate_scale(&self, frame: &RasterFrame, reference_size_mm: f64) -> AiResult<ScaleEstimate>;
}

/// Detects the tracked implement directly.
pub trait ImplementDetector: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    fn detect(&self, frame: &RasterFrame) -> AiResult<ObjectDetection>;
}

/// Estimates the lifter's pose.
pub trait PoseEstimator: Send + Sync {
    fn is_available(&self) -> bool {
        true
    }

    fn estimate_pose(&self, frame: &RasterFrame) -> AiResult<PoseDetection>;
}

/// The set of services wired into a run. Any of them may be absent.
#[derive(Clone, Default)]
pub struct AiServices {
    pub scale: Option<Arc<dyn ScaleEstimator>>,
    pub detector: Option<Arc<dyn ImplementDetector>>,
    pub pose: Option<Arc<dyn PoseEstimator>>,
}

impl AiServices {
    /// No services; every stage takes its traditional path.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.scale.is_none() && self.detector.is_none() && self.pose.is_none()
    }
}

impl std::fmt::Debug for AiServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiServices")
            .field("scale", &self.scale.is_some())
            .field("detector", &self.detector.is_some())
            .field("pose", &self.pose.is_some())
            .finish()
    }
}

/// Run a service call, turning a panic inside the adapter into an error.
pub(crate) fn guarded<T>(call: impl FnOnce() -> AiResult<T>) -> AiResult<T> {
    catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|_| Err(AiError::Unavailable("service panicked".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_estimate_json_contract() {
        let json = r#"{"found": true, "pixelsPerMm": 1.8, "confidence": 1.7, "description": "plate"}"#;
        let est: ScaleEstimate = serde_json::from_str(json).unwrap();
        let est = est.normalized();
        assert!(est.found);
        assert_eq!(est.pixels_per_mm, Some(1.8));
        assert_eq!(est.confidence, Some(1.0));
    }

    #[test]
    fn test_detection_is_clamped_to_frame() {
        let json = r#"{"found": true, "boundingBox": {"x": -10, "y": 20, "width": 900, "height": 40}}"#;
        let det: ObjectDetection = serde_json::from_str(json).unwrap();
        let det = det.normalized(640, 480);
        assert_eq!(det.bounding_box, Some(Rect::new(0.0, 20.0, 640.0, 40.0)));
        assert_eq!(det.confidence, None);
    }

    #[test]
    fn test_missing_fields_default() {
        let pose: PoseDetection = serde_json::from_str(r#"{"found": false}"#).unwrap();
        assert!(!pose.found);
        assert!(pose.keypoints.is_empty());
    }

    #[test]
    fn test_guarded_catches_panic() {
        let result: AiResult<()> = guarded(|| panic!("adapter bug"));
        assert!(matches!(result, Err(AiError::Unavailable(_))));
        assert_eq!(guarded(|| Ok(3)).unwrap(), 3);
    }
}
