//! Error types for barbell velocity analysis.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for analysis operations.
///
/// Every fatal condition of a run ends in exactly one of these. AI service
/// failures are not represented here: they resolve to a fallback inside the
/// AI crate and never abort a run.
#[derive(Error, Debug)]
pub enum VbtError {
    /// No usable frames could be decoded from the source.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The deterministic calibration fallback could not locate its reference object.
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// Tracking produced zero points across the whole run.
    #[error("Tracking error: {0}")]
    Tracking(String),

    /// Reconstruction produced an empty bar path.
    #[error("No tracking points detected: {0}")]
    NoTrackingPoints(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The host cancelled the run between frames.
    #[error("Analysis cancelled")]
    Cancelled,
}

/// Machine-checkable classification of a [`VbtError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Decode,
    Calibration,
    Tracking,
    NoTrackingPoints,
    InvalidParameter,
    Io,
    Serialization,
    Cancelled,
}

impl VbtError {
    /// The kind of this error, for hosts that branch on failure class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Decode(_) => ErrorKind::Decode,
            Self::Calibration(_) => ErrorKind::Calibration,
            Self::Tracking(_) => ErrorKind::Tracking,
            Self::NoTrackingPoints(_) => ErrorKind::NoTrackingPoints,
            Self::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// A corrective hint for the user, where one exists.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Decode(_) => Some("Check that the file is a playable video."),
            Self::Calibration(_) => {
                Some("Make sure a full plate is visible, or configure a manual scale.")
            }
            Self::Tracking(_) | Self::NoTrackingPoints(_) => {
                Some("Ensure the barbell is visible in the video.")
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for VbtError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for analysis operations.
pub type Result<T> = std::result::Result<T, VbtError>;
