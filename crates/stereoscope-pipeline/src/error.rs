use std::time::Duration;

use stereoscope_3d::{CalibrationError, DisparityError, PointCloudError};
use stereoscope_image::{ImageError, ImageSize};

use crate::{
    collaborators::{DetectorError, MatcherError},
    config::ConfigError,
};

/// Errors aborting a frame or preventing the pipeline from being built.
///
/// A frame that fails yields exactly one of these and no partial result. Per-object
/// localization problems are not errors, see [`stereoscope_3d::LocalizationStatus`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid calibration
    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The stereo pair is not consistent with itself or with the calibration
    #[error("Invalid stereo pair: left {left}, right {right}, calibrated {calibrated}")]
    InputShape {
        /// Size of the left view.
        left: ImageSize,
        /// Size of the right view.
        right: ImageSize,
        /// Resolution of the calibration.
        calibrated: ImageSize,
    },

    /// The stereo matcher produced no usable disparity
    #[error("Matching failure: {0}")]
    MatchingFailure(#[from] MatcherError),

    /// The object detector failed
    #[error("Detection failure: {0}")]
    DetectionFailure(#[from] DetectorError),

    /// The frame took longer than the configured deadline
    #[error("Frame deadline of {deadline:?} exceeded after {stage} ({elapsed:?})")]
    DeadlineExceeded {
        /// The last completed stage.
        stage: &'static str,
        /// Time spent on the frame so far.
        elapsed: Duration,
        /// The configured deadline.
        deadline: Duration,
    },

    /// Error decoding the disparity
    #[error(transparent)]
    Disparity(#[from] DisparityError),

    /// Error building an image
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Error building the point cloud
    #[error(transparent)]
    PointCloud(#[from] PointCloudError),
}
