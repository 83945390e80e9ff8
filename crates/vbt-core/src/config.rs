//! Analysis configuration.
//!
//! Every section carries `#[serde(default)]`, so a JSON file only needs the
//! keys it wants to change.

use crate::error::{Result, VbtError};
use crate::time::FrameRate;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete configuration for one analysis run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub sampling: SamplingConfig,
    pub calibration: CalibrationConfig,
    pub ai: AiConfig,
    pub tracker: TrackerConfig,
    pub reconstruction: ReconstructionConfig,
    pub kinematics: KinematicsConfig,
}

impl AnalysisConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values that would make a stage meaningless.
    pub fn validate(&self) -> Result<()> {
        self.sampling.validate()?;
        self.calibration.validate()?;
        self.ai.validate()?;
        self.tracker.validate()?;
        self.reconstruction.validate()?;
        self.kinematics.validate()
    }
}

fn invalid(msg: impl Into<String>) -> VbtError {
    VbtError::InvalidParameter(msg.into())
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be positive and finite, got {value}")))
    }
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be within [0, 1], got {value}")))
    }
}

// ── Sampling ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Fixed analysis rate, independent of the source's native rate.
    pub rate: FrameRate,
    /// Upper bound on sampled frames (60 s at 15 fps).
    pub max_frames: usize,
    /// Frames larger than this are downscaled before tracking.
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            rate: FrameRate::ANALYSIS,
            max_frames: 900,
            max_width: 720,
            max_height: 540,
        }
    }
}

impl SamplingConfig {
    fn validate(&self) -> Result<()> {
        if !self.rate.is_valid() {
            return Err(invalid(format!("sampling rate {}/{} is invalid", self.rate.numerator, self.rate.denominator)));
        }
        if self.max_frames == 0 {
            return Err(invalid("max_frames must be at least 1"));
        }
        if self.max_width == 0 || self.max_height == 0 {
            return Err(invalid("maximum working size must be non-zero"));
        }
        Ok(())
    }
}

// ── Calibration ─────────────────────────────────────────────────

/// How the pixels-per-millimetre scale is obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CalibrationSource {
    /// Locate a plate of known diameter in the frame.
    PlateDiameter { diameter_mm: f64 },
    /// Use a scale measured elsewhere.
    Manual { pixels_per_mm: f64 },
    /// Two points in source-frame pixels a known distance apart.
    ReferenceLine {
        start: [f32; 2],
        end: [f32; 2],
        length_mm: f64,
    },
}

impl Default for CalibrationSource {
    fn default() -> Self {
        Self::PlateDiameter { diameter_mm: 450.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub source: CalibrationSource,
    /// Let a frame-proportion estimate stand in when no plate is found.
    pub allow_estimate: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            source: CalibrationSource::default(),
            allow_estimate: true,
        }
    }
}

impl CalibrationConfig {
    /// Physical reference size handed to the AI scale estimator.
    pub fn reference_size_mm(&self) -> f64 {
        match self.source {
            CalibrationSource::PlateDiameter { diameter_mm } => diameter_mm,
            CalibrationSource::ReferenceLine { length_mm, .. } => length_mm,
            CalibrationSource::Manual { .. } => 450.0,
        }
    }

    fn validate(&self) -> Result<()> {
        match &self.source {
            CalibrationSource::PlateDiameter { diameter_mm } => {
                check_positive("plate diameter_mm", *diameter_mm)
            }
            CalibrationSource::Manual { pixels_per_mm } => {
                check_positive("manual pixels_per_mm", *pixels_per_mm)
            }
            CalibrationSource::ReferenceLine {
                start,
                end,
                length_mm,
            } => {
                check_positive("reference line length_mm", *length_mm)?;
                let dx = (end[0] - start[0]) as f64;
                let dy = (end[1] - start[1]) as f64;
                check_positive("reference line pixel length", dx.hypot(dy))
            }
        }
    }
}

// ── AI assistance ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub enabled: bool,
    /// Frames sent to services are downscaled to fit this size.
    pub max_width: u32,
    pub max_height: u32,
    /// AI calibration is accepted only strictly above this confidence.
    pub min_calibration_confidence: f64,
    /// Pose keypoints below this score are ignored.
    pub min_keypoint_confidence: f64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_width: 800,
            max_height: 600,
            min_calibration_confidence: 0.4,
            min_keypoint_confidence: 0.3,
        }
    }
}

impl AiConfig {
    fn validate(&self) -> Result<()> {
        if self.max_width == 0 || self.max_height == 0 {
            return Err(invalid("AI downscale bound must be non-zero"));
        }
        check_unit("min_calibration_confidence", self.min_calibration_confidence)?;
        check_unit("min_keypoint_confidence", self.min_keypoint_confidence)
    }
}

// ── Tracker ─────────────────────────────────────────────────────

/// Corner detection and Lucas-Kanade parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Maximum number of corners selected when seeding.
    pub max_corners: usize,
    /// Minimum corner strength relative to the strongest corner in the region.
    pub quality_level: f32,
    /// Minimum spacing between accepted corners, in pixels.
    pub min_distance: f32,
    /// Neighbourhood used for the structure tensor.
    pub block_size: u32,
    /// Lucas-Kanade window size (odd).
    pub window_size: u32,
    pub pyramid_levels: u32,
    pub max_iterations: u32,
    /// Sub-pixel convergence threshold.
    pub epsilon: f32,
    /// Points whose window has a smaller minimum eigenvalue are dropped.
    pub min_eigenvalue: f32,
    /// Mean absolute intensity residual above which a point is dropped.
    pub max_residual: f32,
    pub min_confidence: f32,
    /// Re-seed when fewer points than this are alive.
    pub min_live_points: usize,
    /// Margin added around the search region when seeding.
    pub region_padding: f32,
    /// Points closer than this to the frame border are dropped.
    pub edge_margin: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_corners: 25,
            quality_level: 0.01,
            min_distance: 8.0,
            block_size: 3,
            window_size: 21,
            pyramid_levels: 3,
            max_iterations: 20,
            epsilon: 0.01,
            min_eigenvalue: 1e-4,
            max_residual: 0.12,
            min_confidence: 0.4,
            min_live_points: 5,
            region_padding: 20.0,
            edge_margin: 4.0,
        }
    }
}

impl TrackerConfig {
    fn validate(&self) -> Result<()> {
        if self.max_corners == 0 {
            return Err(invalid("max_corners must be at least 1"));
        }
        if !(self.quality_level > 0.0 && self.quality_level <= 1.0) {
            return Err(invalid(format!("quality_level must be within (0, 1], got {}", self.quality_level)));
        }
        if self.min_distance < 0.0 || !self.min_distance.is_finite() {
            return Err(invalid("min_distance must be non-negative"));
        }
        if self.block_size == 0 {
            return Err(invalid("block_size must be at least 1"));
        }
        if self.window_size < 3 || self.window_size % 2 == 0 {
            return Err(invalid(format!("window_size must be odd and >= 3, got {}", self.window_size)));
        }
        if !(1..=6).contains(&self.pyramid_levels) {
            return Err(invalid(format!("pyramid_levels must be within 1..=6, got {}", self.pyramid_levels)));
        }
        if self.max_iterations == 0 {
            return Err(invalid("max_iterations must be at least 1"));
        }
        check_positive("epsilon", self.epsilon as f64)?;
        check_unit("min_confidence", self.min_confidence as f64)?;
        check_positive("max_residual", self.max_residual as f64)?;
        if self.min_live_points > self.max_corners {
            return Err(invalid("min_live_points cannot exceed max_corners"));
        }
        Ok(())
    }
}

// ── Reconstruction ──────────────────────────────────────────────

/// Robust per-frame centre estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Samples further than this many MADs from the median are outliers.
    pub mad_factor: f32,
    /// Lower bound on the outlier gate, in pixels.
    pub min_gate_px: f32,
    /// Single-frame deviations above this are replaced by the neighbour midpoint.
    pub spike_threshold_px: f32,
    /// Frame-to-frame moves above this are damped.
    pub jump_threshold_px: f32,
    /// Weight of the new position when a jump is damped.
    pub jump_damping: f32,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            mad_factor: 3.0,
            min_gate_px: 6.0,
            spike_threshold_px: 40.0,
            jump_threshold_px: 150.0,
            jump_damping: 0.7,
        }
    }
}

impl ReconstructionConfig {
    fn validate(&self) -> Result<()> {
        check_positive("mad_factor", self.mad_factor as f64)?;
        check_positive("min_gate_px", self.min_gate_px as f64)?;
        check_positive("spike_threshold_px", self.spike_threshold_px as f64)?;
        check_positive("jump_threshold_px", self.jump_threshold_px as f64)?;
        check_unit("jump_damping", self.jump_damping as f64)
    }
}

// ── Kinematics ──────────────────────────────────────────────────

/// Which vertical direction counts as lifting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiftDirection {
    /// Bar moves toward the top of the frame (squat, bench, press).
    #[default]
    Up,
    Down,
    /// Follow the sign of the net vertical displacement.
    Auto,
}

/// Discrete velocity band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerZone {
    Strength,
    Power,
    Speed,
}

impl PowerZone {
    pub fn label(self) -> &'static str {
        match self {
            Self::Strength => "Strength",
            Self::Power => "Power",
            Self::Speed => "Speed",
        }
    }
}

/// Mean-velocity cutoffs in m/s. Tunable, not physiological law.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerZoneTable {
    pub strength_below: f64,
    pub power_below: f64,
}

impl Default for PowerZoneTable {
    fn default() -> Self {
        Self {
            strength_below: 0.5,
            power_below: 1.0,
        }
    }
}

impl PowerZoneTable {
    pub fn classify(&self, mean_velocity: f64) -> PowerZone {
        if mean_velocity < self.strength_below {
            PowerZone::Strength
        } else if mean_velocity < self.power_below {
            PowerZone::Power
        } else {
            PowerZone::Speed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KinematicsConfig {
    /// Minimum vertical travel per frame for a step to count as lifting.
    pub noise_floor_mm: f64,
    /// Non-lifting frames tolerated inside one concentric run.
    pub max_gap_frames: usize,
    /// Instantaneous velocities are capped here, in m/s.
    pub max_velocity: f64,
    /// Centred moving-average window for the smoothed series.
    pub smoothing_window: usize,
    pub direction: LiftDirection,
    pub power_zones: PowerZoneTable,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            noise_floor_mm: 1.5,
            max_gap_frames: 1,
            max_velocity: 10.0,
            smoothing_window: 3,
            direction: LiftDirection::Up,
            power_zones: PowerZoneTable::default(),
        }
    }
}

impl KinematicsConfig {
    fn validate(&self) -> Result<()> {
        if !(self.noise_floor_mm >= 0.0 && self.noise_floor_mm.is_finite()) {
            return Err(invalid("noise_floor_mm must be non-negative"));
        }
        check_positive("max_velocity", self.max_velocity)?;
        if self.smoothing_window == 0 {
            return Err(invalid("smoothing_window must be at least 1"));
        }
        let zones = &self.power_zones;
        if !(zones.strength_below > 0.0 && zones.strength_below < zones.power_below) {
            return Err(invalid(format!(
                "power zone cutoffs must be increasing, got {} and {}",
                zones.strength_below, zones.power_below
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = AnalysisConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sampling.rate, FrameRate::new(15, 1));
        assert_eq!(config.tracker.max_corners, 25);
        assert!(!config.ai.enabled);
        assert_eq!(config.calibration.reference_size_mm(), 450.0);
    }

    #[test]
    fn test_partial_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"ai": {{"enabled": true}}, "calibration": {{"source": {{"kind": "manual", "pixels_per_mm": 2.5}}}}}}"#
        )
        .unwrap();

        let config = AnalysisConfig::from_json_file(file.path()).unwrap();
        assert!(config.ai.enabled);
        assert_eq!(config.ai.max_width, 800);
        assert_eq!(
            config.calibration.source,
            CalibrationSource::Manual { pixels_per_mm: 2.5 }
        );
        assert_eq!(config.tracker, TrackerConfig::default());
    }

    #[test]
    fn test_file_round_trip() {
        let mut config = AnalysisConfig::default();
        config.kinematics.direction = LiftDirection::Auto;
        config.tracker.quality_level = 0.05;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, config.to_json_string().unwrap()).unwrap();
        assert_eq!(AnalysisConfig::from_json_file(&path).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AnalysisConfig::default();
        config.calibration.source = CalibrationSource::Manual { pixels_per_mm: 0.0 };
        assert!(matches!(config.validate(), Err(VbtError::InvalidParameter(_))));

        let mut config = AnalysisConfig::default();
        config.tracker.window_size = 20;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.kinematics.power_zones.power_below = 0.3;
        assert!(config.validate().is_err());

        let mut config = AnalysisConfig::default();
        config.calibration.source = CalibrationSource::ReferenceLine {
            start: [10.0, 10.0],
            end: [10.0, 10.0],
            length_mm: 100.0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = AnalysisConfig::from_json_file("/nonexistent/vbt.json").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }

    #[test]
    fn test_power_zone_table() {
        let table = PowerZoneTable::default();
        assert_eq!(table.classify(0.3), PowerZone::Strength);
        assert_eq!(table.classify(0.5), PowerZone::Power);
        assert_eq!(table.classify(0.99), PowerZone::Power);
        assert_eq!(table.classify(1.0), PowerZone::Speed);
    }
}
