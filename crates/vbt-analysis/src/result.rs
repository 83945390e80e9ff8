//! The terminal record of a completed run.

use crate::kinematics::{ConcentricPhase, KinematicsReport, VelocitySeries};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vbt_ai::{CalibrationResult, RegionOutcome};
use vbt_core::PowerZone;
use vbt_tracking::PathPoint;

/// Metrics and provenance of one analysed lift. Read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub run_id: Uuid,
    /// m/s over the concentric phase.
    pub mean_velocity: f64,
    pub peak_velocity: f64,
    pub rep_duration_s: f64,
    pub concentric_duration_s: f64,
    pub path_deviation_cm: f64,
    pub range_of_motion_cm: f64,
    pub power_zone: PowerZone,
    pub path: Vec<PathPoint>,
    pub velocity: VelocitySeries,
    pub concentric: Option<ConcentricPhase>,
    pub calibration: CalibrationResult,
    pub calibration_status: String,
    pub region: RegionOutcome,
    /// Either calibration or region came from an AI service.
    pub ai_assisted: bool,
    pub frames_analyzed: usize,
    pub tracked_points: usize,
    pub tracking_faults: usize,
}

impl AnalysisResult {
    pub(crate) fn from_report(
        run_id: Uuid,
        report: KinematicsReport,
        path: Vec<PathPoint>,
        provenance: Provenance,
    ) -> Self {
        Self {
            run_id,
            mean_velocity: report.velocity.mean,
            peak_velocity: report.velocity.peak,
            rep_duration_s: report.rep_duration_s,
            concentric_duration_s: report.concentric_duration_s,
            path_deviation_cm: report.path_deviation_cm,
            range_of_motion_cm: report.range_of_motion_cm,
            power_zone: report.power_zone,
            path,
            velocity: report.velocity,
            concentric: report.concentric,
            ai_assisted: provenance.calibration_ai || provenance.region.ai_assisted(),
            calibration: provenance.calibration,
            calibration_status: provenance.calibration_status,
            region: provenance.region,
            frames_analyzed: provenance.frames_analyzed,
            tracked_points: provenance.tracked_points,
            tracking_faults: provenance.tracking_faults,
        }
    }

    pub fn to_json_pretty(&self) -> vbt_core::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// How a result was produced.
#[derive(Debug, Clone)]
pub(crate) struct Provenance {
    pub calibration: CalibrationResult,
    pub calibration_ai: bool,
    pub calibration_status: String,
    pub region: RegionOutcome,
    pub frames_analyzed: usize,
    pub tracked_points: usize,
    pub tracking_faults: usize,
}
