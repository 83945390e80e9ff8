//! VBT Tracking - Multi-point optical-flow tracking of the bar.
//!
//! - Image pyramids with precomputed gradients
//! - Shi-Tomasi corner selection
//! - Point table with stable ids
//! - Pyramidal Lucas-Kanade tracker with a fault channel
//! - Robust reconstruction of one bar-path point per frame

pub mod features;
pub mod path;
pub mod point_table;
pub mod point_tracker;
pub mod pyramid;

pub use features::{good_features_to_track, Corner, CornerParams};
pub use path::{reconstruct, suppress_spikes, PathPoint, PathReconstructor};
pub use point_table::{LivePoint, PointId, PointTable};
pub use point_tracker::{
    track_point, FlowParams, FlowResult, FrameStats, PointTracker, TrackedPoint, TrackerState,
    TrackingFault,
};
pub use pyramid::{compute_gradients, rgba_to_gray, GrayImage, ImagePyramid, PyramidLevel};
