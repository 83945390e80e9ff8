//! Pixels-per-millimetre calibration.
//!
//! [`select_calibration`] is the fallback policy on its own: given the
//! outcome of the AI attempt and a way to run the plate method, it decides
//! which one stands. [`CalibrationResolver`] wires that policy to the
//! configured services and the frame.
//!
//! All scales are in working-frame pixels, the frames the tracker sees.

use crate::error::AiError;
use crate::plate::{estimate_from_frame_width, PlateDetector, FRAME_ESTIMATE_CONFIDENCE};
use crate::services::{guarded, ScaleEstimate, ScaleEstimator};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};
use vbt_core::{AiConfig, CalibrationConfig, CalibrationSource, RasterFrame, Result, VbtError};

/// Scales outside this range are almost certainly wrong, but are kept.
pub const PLAUSIBLE_PIXELS_PER_MM: (f64, f64) = (0.1, 10.0);

/// Which method produced a calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    Plate,
    Ai,
    Manual,
    ReferenceLine,
}

impl CalibrationMethod {
    pub fn label(self) -> &'static str {
        match self {
            Self::Plate => "plate",
            Self::Ai => "ai",
            Self::Manual => "manual",
            Self::ReferenceLine => "reference line",
        }
    }
}

/// A validated scale. `pixels_per_mm` is always positive and finite.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationResult {
    pixels_per_mm: f64,
    method: CalibrationMethod,
    confidence: f64,
}

impl CalibrationResult {
    pub fn new(pixels_per_mm: f64, method: CalibrationMethod, confidence: f64) -> Result<Self> {
        if !(pixels_per_mm.is_finite() && pixels_per_mm > 0.0) {
            return Err(VbtError::Calibration(format!(
                "{} calibration produced an unusable scale of {pixels_per_mm} px/mm",
                method.label()
            )));
        }
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Ok(Self {
            pixels_per_mm,
            method,
            confidence,
        })
    }

    pub fn pixels_per_mm(&self) -> f64 {
        self.pixels_per_mm
    }

    pub fn method(&self) -> CalibrationMethod {
        self.method
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn is_plausible(&self) -> bool {
        let (lo, hi) = PLAUSIBLE_PIXELS_PER_MM;
        (lo..=hi).contains(&self.pixels_per_mm)
    }
}

/// Why an AI scale estimate was not used.
#[derive(Debug, Clone, PartialEq)]
pub enum AiRejection {
    /// Assistance is turned off in the configuration.
    Disabled,
    /// No estimator is wired, or it reports itself unavailable.
    Unavailable,
    /// The call failed.
    Failed(String),
    NotFound,
    LowConfidence { confidence: f64, required: f64 },
    InvalidScale(f64),
}

impl fmt::Display for AiRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "AI assistance disabled"),
            Self::Unavailable => write!(f, "AI service unavailable"),
            Self::Failed(reason) => write!(f, "AI service failed: {reason}"),
            Self::NotFound => write!(f, "AI found no reference object"),
            Self::LowConfidence {
                confidence,
                required,
            } => write!(
                f,
                "AI confidence {confidence:.2} not above {required:.2}"
            ),
            Self::InvalidScale(ppm) => write!(f, "AI returned an invalid scale of {ppm} px/mm"),
        }
    }
}

impl From<AiError> for AiRejection {
    fn from(err: AiError) -> Self {
        match err {
            AiError::Unavailable(_) => Self::Unavailable,
            other => Self::Failed(other.to_string()),
        }
    }
}

/// Which calibration branch stood.
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationOutcome {
    AiResolved(CalibrationResult),
    PlateResolved {
        result: CalibrationResult,
        /// The AI attempt that was passed over.
        ai: AiRejection,
        /// No circle was found; the frame-proportion estimate stood in.
        estimated: bool,
    },
    /// Manual or reference-line scale; neither AI nor the plate method ran.
    Configured(CalibrationResult),
}

impl CalibrationOutcome {
    pub fn result(&self) -> CalibrationResult {
        match self {
            Self::AiResolved(result)
            | Self::PlateResolved { result, .. }
            | Self::Configured(result) => *result,
        }
    }

    pub fn ai_assisted(&self) -> bool {
        matches!(self, Self::AiResolved(_))
    }

    /// Human-readable description of the branch taken.
    pub fn status(&self) -> String {
        let r = self.result();
        match self {
            Self::AiResolved(_) => format!(
                "AI calibration: {:.3} px/mm ({:.0}% confidence)",
                r.pixels_per_mm,
                r.confidence * 100.0
            ),
            Self::PlateResolved { ai, estimated, .. } => {
                let what = if *estimated {
                    "Estimated plate calibration"
                } else {
                    "Plate calibration"
                };
                format!("{what}: {:.3} px/mm ({ai})", r.pixels_per_mm)
            }
            Self::Configured(_) => format!(
                "{} calibration: {:.3} px/mm",
                capitalize(r.method.label()),
                r.pixels_per_mm
            ),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars
        .next()
        .map(|c| c.to_uppercase().chain(chars).collect())
        .unwrap_or_default()
}

/// Judge an AI scale estimate. Accepted only when it reports a find,
/// a confidence strictly above `min_confidence`, and a positive scale.
pub fn judge_scale_estimate(
    estimate: &ScaleEstimate,
    min_confidence: f64,
) -> std::result::Result<(f64, f64), AiRejection> {
    if !estimate.found {
        return Err(AiRejection::NotFound);
    }
    let confidence = estimate.confidence.unwrap_or(0.0);
    if confidence <= min_confidence {
        return Err(AiRejection::LowConfidence {
            confidence,
            required: min_confidence,
        });
    }
    match estimate.pixels_per_mm {
        Some(ppm) if ppm.is_finite() && ppm > 0.0 => Ok((ppm, confidence)),
        other => Err(AiRejection::InvalidScale(other.unwrap_or(0.0))),
    }
}

/// The calibration fallback policy: an accepted AI result stands, anything
/// else falls through to the plate method.
pub fn select_calibration(
    ai: std::result::Result<CalibrationResult, AiRejection>,
    plate: impl FnOnce() -> Result<(CalibrationResult, bool)>,
) -> Result<CalibrationOutcome> {
    match ai {
        Ok(result) => Ok(CalibrationOutcome::AiResolved(result)),
        Err(rejection) => {
            let (result, estimated) = plate()?;
            Ok(CalibrationOutcome::PlateResolved {
                result,
                ai: rejection,
                estimated,
            })
        }
    }
}

/// Resolves the scale for one run.
pub struct CalibrationResolver<'a> {
    config: &'a CalibrationConfig,
    ai: &'a AiConfig,
    estimator: Option<&'a dyn ScaleEstimator>,
    detector: PlateDetector,
    source_scale: f32,
}

impl<'a> CalibrationResolver<'a> {
    pub fn new(config: &'a CalibrationConfig, ai: &'a AiConfig) -> Self {
        Self {
            config,
            ai,
            estimator: None,
            detector: PlateDetector::default(),
            source_scale: 1.0,
        }
    }

    pub fn with_estimator(mut self, estimator: Option<&'a dyn ScaleEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Factor from source-video pixels to working-frame pixels, applied to
    /// configured scales and reference lines.
    pub fn with_source_scale(mut self, source_scale: f32) -> Self {
        self.source_scale = source_scale;
        self
    }

    pub fn resolve(&self, frame: &RasterFrame) -> Result<CalibrationOutcome> {
        let source_scale = self.source_scale as f64;
        let outcome = match &self.config.source {
            CalibrationSource::Manual { pixels_per_mm } => CalibrationOutcome::Configured(
                CalibrationResult::new(pixels_per_mm * source_scale, CalibrationMethod::Manual, 1.0)?,
            ),
            CalibrationSource::ReferenceLine {
                start,
                end,
                length_mm,
            } => {
                let px = ((end[0] - start[0]) as f64).hypot((end[1] - start[1]) as f64);
                let ppm = if *length_mm > 0.0 {
                    px * source_scale / length_mm
                } else {
                    0.0
                };
                CalibrationOutcome::Configured(CalibrationResult::new(
                    ppm,
                    CalibrationMethod::ReferenceLine,
                    0.9,
                )?)
            }
            CalibrationSource::PlateDiameter { diameter_mm } => {
                let diameter_mm = *diameter_mm;
                select_calibration(self.try_ai(frame, diameter_mm), || {
                    self.plate(frame, diameter_mm)
                })?
            }
        };

        let result = outcome.result();
        if !result.is_plausible() {
            warn!(
                pixels_per_mm = result.pixels_per_mm(),
                method = result.method().label(),
                "Calibration outside the plausible range"
            );
        }
        info!(
            pixels_per_mm = result.pixels_per_mm(),
            method = result.method().label(),
            confidence = result.confidence(),
            "{}",
            outcome.status()
        );
        Ok(outcome)
    }

    fn try_ai(
        &self,
        frame: &RasterFrame,
        reference_mm: f64,
    ) -> std::result::Result<CalibrationResult, AiRejection> {
        if !self.ai.enabled {
            return Err(AiRejection::Disabled);
        }
        let estimator = self
            .estimator
            .filter(|e| e.is_available())
            .ok_or(AiRejection::Unavailable)?;

        let (small, scale) = frame.downscale_to_fit(self.ai.max_width, self.ai.max_height);
        let estimate = guarded(|| estimator.estimate_scale(&small, reference_mm))
            .map(ScaleEstimate::normalized)
            .map_err(|err| {
                warn!(error = %err, "AI scale estimation failed");
                AiRejection::from(err)
            })?;
        debug!(?estimate, "AI scale estimate");

        let (ppm, confidence) =
            judge_scale_estimate(&estimate, self.ai.min_calibration_confidence).map_err(|r| {
                info!(reason = %r, "AI calibration rejected");
                r
            })?;
        CalibrationResult::new(ppm / scale as f64, CalibrationMethod::Ai, confidence)
            .map_err(|_| AiRejection::InvalidScale(ppm))
    }

    fn plate(&self, frame: &RasterFrame, diameter_mm: f64) -> Result<(CalibrationResult, bool)> {
        if let Some(circle) = self.detector.detect(frame) {
            let result = CalibrationResult::new(
                circle.pixels_per_mm(diameter_mm),
                CalibrationMethod::Plate,
                circle.confidence(),
            )?;
            return Ok((result, false));
        }
        if !self.config.allow_estimate {
            return Err(VbtError::Calibration(
                "no weight plate could be located in the frame".to_string(),
            ));
        }
        info!(diameter_mm, "No plate found, estimating scale from frame width");
        let result = CalibrationResult::new(
            estimate_from_frame_width(frame.width(), diameter_mm),
            CalibrationMethod::Plate,
            FRAME_ESTIMATE_CONFIDENCE,
        )?;
        Ok((result, true))
    }
}
