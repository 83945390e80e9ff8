//! VBT Analysis - From video to velocity metrics
//!
//! - Kinematics: velocities, concentric phase, path deviation, power zone
//! - Progress records for hosts
//! - The analysis result record
//! - The pipeline that sequences sampling, calibration, localization,
//!   tracking, reconstruction and kinematics as an iterator of steps

pub mod kinematics;
pub mod pipeline;
pub mod progress;
pub mod result;

pub use kinematics::{smooth, ConcentricPhase, KinematicsCalculator, KinematicsReport, VelocitySeries};
pub use pipeline::{AnalysisCancel, AnalysisPipeline, AnalysisRun, RunEvent};
pub use progress::{milestone, tracking_percent, Progress};
pub use result::AnalysisResult;
