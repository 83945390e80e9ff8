//! VBT Core - Foundation types for barbell velocity analysis
//!
//! This crate provides the types shared by every stage of the pipeline:
//! - Error taxonomy (VbtError, ErrorKind)
//! - Raster frames produced by the sampler
//! - Geometric primitives in source-frame pixels
//! - Time representation (RationalTime, FrameRate)
//! - Analysis configuration

pub mod config;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod time;

pub use config::{
    AiConfig, AnalysisConfig, CalibrationConfig, CalibrationSource, KinematicsConfig,
    LiftDirection, PowerZone, PowerZoneTable, ReconstructionConfig, SamplingConfig,
    TrackerConfig,
};
pub use error::{ErrorKind, Result, VbtError};
pub use frame::{RasterFrame, SharedFrame};
pub use geometry::{Rect, Vec2};
pub use time::{FrameRate, RationalTime};
