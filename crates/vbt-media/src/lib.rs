//! VBT Media - decoding and sampling of input clips
//!
//! This crate handles:
//! - The frame source abstraction (FFmpeg-backed or in-memory)
//! - Media file probing with ffprobe
//! - Fixed-rate sampling into timestamped raster frames

pub mod decoder;
pub mod probe;
pub mod sampler;
pub mod source;

pub use decoder::FfmpegSource;
pub use probe::MediaProbe;
pub use sampler::{FrameSampler, SampledVideo};
pub use source::{DecodedFrame, FrameSource, MemorySource};
