//! VBT AI - Calibration and region localization with fallbacks
//!
//! Each stage tries the external AI services first and degrades to a
//! deterministic method:
//! - Calibration: AI scale estimate, else plate detection, else a
//!   frame-proportion estimate
//! - Region: implement detector, else pose-derived box, else full frame
//!
//! Services are plain traits; an HTTP adapter is available behind the
//! `http` feature.

pub mod calibration;
pub mod error;
pub mod plate;
pub mod region;
pub mod services;

#[cfg(feature = "http")]
pub mod http;

pub use calibration::{
    judge_scale_estimate, select_calibration, AiRejection, CalibrationMethod, CalibrationOutcome,
    CalibrationResolver, CalibrationResult,
};
pub use error::{AiError, AiResult};
pub use plate::{estimate_from_frame_width, PlateCircle, PlateDetector};
pub use region::{region_from_pose, select_region, RegionLocalizer, RegionOutcome};
pub use services::{
    AiServices, ImplementDetector, ObjectDetection, PoseDetection, PoseEstimator, PoseKeypoint,
    ScaleEstimate, ScaleEstimator,
};

#[cfg(feature = "http")]
pub use http::{HttpServiceConfig, HttpServices};
