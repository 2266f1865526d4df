#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Interfaces of the stereo matcher and object detector collaborators.
pub mod collaborators;

/// Pipeline configuration.
pub mod config;

/// Frame-level error types.
pub mod error;

/// The per-frame orchestrator.
pub mod pipeline;

pub use crate::collaborators::{
    DetectorError, MatcherError, ObjectDetector, RawDisparity, StereoMatcher,
};
pub use crate::config::{ConfigError, PipelineConfig};
pub use crate::error::PipelineError;
pub use crate::pipeline::{FrameOptions, FrameResult, StageTimings, StereoPipeline};
