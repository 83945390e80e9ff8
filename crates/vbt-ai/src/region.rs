//! Region-of-interest localization.
//!
//! Three tiers: the implement detector's box, a box derived from the
//! lifter's pose, or nothing (full-frame tracking). Every service failure
//! lands on the next tier; nothing here can fail a run.

use crate::services::{
    guarded, ImplementDetector, ObjectDetection, PoseDetection, PoseEstimator, PoseKeypoint,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use vbt_core::{AiConfig, RasterFrame, Rect, Vec2};

/// Which tier produced the tracking region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegionOutcome {
    DetectorResolved { region: Rect, confidence: Option<f64> },
    PoseResolved { region: Rect },
    None,
}

impl RegionOutcome {
    pub fn region(&self) -> Option<Rect> {
        match self {
            Self::DetectorResolved { region, .. } | Self::PoseResolved { region } => Some(*region),
            Self::None => None,
        }
    }

    pub fn ai_assisted(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub fn status(&self) -> String {
        match self {
            Self::DetectorResolved { region, .. } => format!(
                "Barbell detected at {:.0}x{:.0}+{:.0}+{:.0}",
                region.width, region.height, region.x, region.y
            ),
            Self::PoseResolved { region } => format!(
                "Barbell region estimated from pose at {:.0}x{:.0}+{:.0}+{:.0}",
                region.width, region.height, region.x, region.y
            ),
            Self::None => "Tracking the full frame".to_string(),
        }
    }
}

const SHOULDER_FALLBACK_PX: f32 = 150.0;

/// Barbell region implied by a pose, in the pose's pixel coordinates.
///
/// The bar sits at the wrists when both are visible, otherwise the elbows,
/// otherwise the shoulders. Its extent follows shoulder width. Without a
/// confident shoulder the main person's bounds are used as-is.
pub fn region_from_pose(
    pose: &PoseDetection,
    image_width: u32,
    image_height: u32,
    min_confidence: f32,
) -> Option<Rect> {
    if !pose.found || pose.keypoints.is_empty() {
        return None;
    }
    let joints = |part: &str| -> Vec<Vec2> {
        confident(pose, part, min_confidence)
            .map(|k| Vec2::new(k.x, k.y))
            .collect()
    };
    let shoulders = joints("shoulder");
    if shoulders.is_empty() {
        return pose.main_person_bounds;
    }
    // One point per side; services may repeat a joint.
    let side = |name: &str| confident(pose, "shoulder", min_confidence).find(|k| k.name.contains(name));
    let shoulder_pair = match (side("left"), side("right")) {
        (Some(l), Some(r)) => Some((l.x - r.x).abs()),
        _ if shoulders.len() >= 2 => {
            let (lo, hi) = shoulders
                .iter()
                .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), p| (lo.min(p.x), hi.max(p.x)));
            Some(hi - lo)
        }
        _ => None,
    };
    let wrists = joints("wrist");
    let elbows = joints("elbow");

    let mean = |pts: &[Vec2]| pts.iter().copied().sum::<Vec2>() / pts.len() as f32;
    let center = if wrists.len() >= 2 {
        mean(&wrists)
    } else if elbows.len() >= 2 {
        mean(&elbows)
    } else {
        mean(&shoulders)
    };

    let (iw, ih) = (image_width as f32, image_height as f32);
    let shoulder_width = shoulder_pair.unwrap_or((iw * 0.2).min(SHOULDER_FALLBACK_PX));
    let width = (shoulder_width * 1.5).max(100.0);
    let height = (shoulder_width * 0.3).max(50.0);

    Some(Rect::new(
        (center.x - width / 2.0).max(0.0),
        (center.y - height / 2.0).max(0.0),
        width.min(iw),
        height.min(ih),
    ))
}

fn confident<'a>(
    pose: &'a PoseDetection,
    part: &'a str,
    min_confidence: f32,
) -> impl Iterator<Item = &'a PoseKeypoint> + 'a {
    pose.keypoints
        .iter()
        .filter(move |k| k.name.contains(part) && k.confidence > min_confidence)
}

/// The region fallback policy. `detection` and `pose` are `None` when the
/// corresponding service was not consulted or failed.
pub fn select_region(
    detection: Option<&ObjectDetection>,
    pose: impl FnOnce() -> Option<Rect>,
) -> RegionOutcome {
    if let Some(det) = detection.filter(|d| d.found) {
        if let Some(region) = det.bounding_box.filter(|b| !b.is_degenerate()) {
            return RegionOutcome::DetectorResolved {
                region,
                confidence: det.confidence,
            };
        }
    }
    match pose().filter(|r| !r.is_degenerate()) {
        Some(region) => RegionOutcome::PoseResolved { region },
        None => RegionOutcome::None,
    }
}

/// Finds the tracking region for one run.
pub struct RegionLocalizer<'a> {
    ai: &'a AiConfig,
    detector: Option<&'a dyn ImplementDetector>,
    pose: Option<&'a dyn PoseEstimator>,
}

impl<'a> RegionLocalizer<'a> {
    pub fn new(ai: &'a AiConfig) -> Self {
        Self {
            ai,
            detector: None,
            pose: None,
        }
    }

    pub fn with_detector(mut self, detector: Option<&'a dyn ImplementDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_pose(mut self, pose: Option<&'a dyn PoseEstimator>) -> Self {
        self.pose = pose;
        self
    }

    /// Localize in `frame` coordinates. Regions are reported as found; the
    /// tracker adds its margin when seeding.
    pub fn localize(&self, frame: &RasterFrame) -> RegionOutcome {
        if !self.ai.enabled {
            debug!("AI assistance disabled, tracking the full frame");
            return RegionOutcome::None;
        }

        let (small, scale) = frame.downscale_to_fit(self.ai.max_width, self.ai.max_height);
        let (fw, fh) = (frame.width(), frame.height());
        let to_frame = |r: Rect| r.scaled(1.0 / scale);

        let detection = self.detect(&small);
        let outcome = select_region(detection.as_ref(), || {
            let pose = self.estimate_pose(&small)?;
            let region = region_from_pose(
                &pose,
                small.width(),
                small.height(),
                self.ai.min_keypoint_confidence as f32,
            );
            if region.is_none() {
                info!("Pose found no usable barbell region");
            }
            region
        });

        let outcome = match outcome {
            RegionOutcome::DetectorResolved { region, confidence } => {
                match to_frame(region).clamp_to_frame(fw, fh) {
                    Some(region) => RegionOutcome::DetectorResolved { region, confidence },
                    None => RegionOutcome::None,
                }
            }
            RegionOutcome::PoseResolved { region } => {
                match to_frame(region).clamp_to_frame(fw, fh) {
                    Some(region) => RegionOutcome::PoseResolved { region },
                    None => RegionOutcome::None,
                }
            }
            RegionOutcome::None => RegionOutcome::None,
        };
        info!(ai_assisted = outcome.ai_assisted(), "{}", outcome.status());
        outcome
    }

    fn detect(&self, frame: &RasterFrame) -> Option<ObjectDetection> {
        let detector = self.detector.filter(|d| d.is_available())?;
        match guarded(|| detector.detect(frame)) {
            Ok(det) => {
                let det = det.normalized(frame.width(), frame.height());
                if !det.found {
                    info!("Barbell detector found nothing, trying pose");
                }
                Some(det)
            }
            Err(err) => {
                warn!(error = %err, "Barbell detection failed, trying pose");
                None
            }
        }
    }

    fn estimate_pose(&self, frame: &RasterFrame) -> Option<PoseDetection> {
        let estimator = self.pose.filter(|p| p.is_available())?;
        match guarded(|| estimator.estimate_pose(frame)) {
            Ok(pose) => Some(pose.normalized(frame.width(), frame.height())),
            Err(err) => {
                warn!(error = %err, "Pose estimation failed, tracking the full frame");
                None
            }
        }
    }
}
