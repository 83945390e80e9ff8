//! Progress records emitted while a run advances.

use serde::{Deserialize, Serialize};

/// Milestones, in percent.
pub mod milestone {
    pub const SAMPLED: f64 = 5.0;
    pub const CALIBRATED: f64 = 10.0;
    pub const REGION: f64 = 15.0;
    pub const TRACKING_START: f64 = 25.0;
    pub const TRACKING_END: f64 = 90.0;
    pub const METRICS: f64 = 95.0;
    pub const DONE: f64 = 100.0;
}

/// One progress update for the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    /// 0 to 100.
    pub progress_percent: f64,
    pub current_step_description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Sampled frame this update refers to, during tracking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_index: Option<u32>,
    /// Streaming-path velocity of the latest frame, in m/s.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preliminary_velocity: Option<f64>,
}

impl Progress {
    pub fn new(progress_percent: f64, step: impl Into<String>) -> Self {
        Self {
            progress_percent: progress_percent.clamp(0.0, 100.0),
            current_step_description: step.into(),
            error: None,
            frame_index: None,
            preliminary_velocity: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_frame(mut self, frame_index: u32, preliminary_velocity: Option<f64>) -> Self {
        self.frame_index = Some(frame_index);
        self.preliminary_velocity = preliminary_velocity;
        self
    }
}

/// Percent reached after `done` of `total` frames have been tracked.
pub fn tracking_percent(done: usize, total: usize) -> f64 {
    if total == 0 {
        return milestone::TRACKING_END;
    }
    let span = milestone::TRACKING_END - milestone::TRACKING_START;
    milestone::TRACKING_START + span * done.min(total) as f64 / total as f64
}
