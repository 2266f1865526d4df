use std::path::Path;

use serde::{Deserialize, Serialize};
use stereoscope_3d::{
    DepthRange, DisparityEncoding, DisparityError, LocalizerConfig, PointCloudConfig, VoxelGrid,
    VoxelGridError,
};

/// Error types for the pipeline configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Error reading the configuration file
    #[error("error reading configuration file")]
    Io(#[from] std::io::Error),

    /// Error deserializing the configuration
    #[error("failed to deserialize configuration")]
    Json(#[from] serde_json::Error),

    /// Invalid disparity encoding
    #[error(transparent)]
    Disparity(#[from] DisparityError),

    /// The depth range is empty or not strictly positive
    #[error("Invalid depth range [{0}, {1}]")]
    InvalidDepthRange(f64, f64),

    /// The localizer fractions are outside (0, 1]
    #[error("Invalid localizer fractions (inner {0}, min valid {1})")]
    InvalidLocalizer(f32, f32),

    /// Invalid voxel grid parameters
    #[error(transparent)]
    VoxelGrid(#[from] VoxelGridError),
}

/// Tunable parameters of the stereo pipeline.
///
/// Every field has a default, so a JSON file only needs the values that differ:
///
/// ```
/// use stereoscope_pipeline::PipelineConfig;
///
/// let config = PipelineConfig::from_json_str(r#"{ "depth_range": { "max": 20.0 } }"#).unwrap();
/// assert_eq!(config.depth_range.min, 0.5);
/// assert_eq!(config.depth_range.max, 20.0);
/// assert_eq!(config.point_cloud.max_points, 10_000);
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Encoding of the raw disparity returned by the stereo matcher.
    pub disparity: DisparityEncoding,
    /// Range of trusted depths in meters.
    pub depth_range: DepthRange,
    /// Parameters of the 3D localizer.
    pub localization: LocalizerConfig,
    /// Parameters of the point cloud synthesis.
    pub point_cloud: PointCloudConfig,
    /// Abort frames taking longer than this many milliseconds.
    pub frame_deadline_ms: Option<u64>,
}

impl PipelineConfig {
    /// Parse and validate a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check every parameter group.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.disparity.validate()?;

        if !self.depth_range.is_valid() {
            return Err(ConfigError::InvalidDepthRange(
                self.depth_range.min,
                self.depth_range.max,
            ));
        }

        if !self.localization.is_valid() {
            return Err(ConfigError::InvalidLocalizer(
                self.localization.inner_fraction,
                self.localization.min_valid_fraction,
            ));
        }

        VoxelGrid::from_config(&self.point_cloud)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() -> Result<(), ConfigError> {
        let config = PipelineConfig::default();
        config.validate()?;
        assert_eq!(config.disparity.scale, 16.0);
        assert_eq!(config.disparity.invalid_value, Some(-16.0));
        assert_eq!(config.localization.inner_fraction, 0.5);
        assert_eq!(config.point_cloud.voxel_size, 0.05);
        assert_eq!(config.frame_deadline_ms, None);
        Ok(())
    }

    #[test]
    fn test_from_json_file() -> Result<(), ConfigError> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{
                "disparity": {{ "scale": 1.0, "invalid_value": null }},
                "point_cloud": {{ "max_points": 500 }},
                "frame_deadline_ms": 250
            }}"#
        )?;

        let config = PipelineConfig::from_json_file(file.path())?;
        assert_eq!(config.disparity, DisparityEncoding::float());
        assert_eq!(config.point_cloud.max_points, 500);
        assert_eq!(config.point_cloud.max_coarsening_steps, 8);
        assert_eq!(config.frame_deadline_ms, Some(250));
        Ok(())
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let res = PipelineConfig::from_json_str(
            r#"{ "depth_range": { "min": 10.0, "max": 1.0 } }"#,
        );
        assert!(matches!(res, Err(ConfigError::InvalidDepthRange(_, _))));

        let res = PipelineConfig::from_json_str(
            r#"{ "localization": { "inner_fraction": 0.0 } }"#,
        );
        assert!(matches!(res, Err(ConfigError::InvalidLocalizer(_, _))));

        let res = PipelineConfig::from_json_str(r#"{ "point_cloud": { "voxel_size": -1.0 } }"#);
        assert!(matches!(res, Err(ConfigError::VoxelGrid(_))));

        let res = PipelineConfig::from_json_str(r#"{ "disparity": { "scale": 0.0 } }"#);
        assert!(matches!(res, Err(ConfigError::Disparity(_))));

        let res = PipelineConfig::from_json_str("not json");
        assert!(matches!(res, Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_json_round_trip() -> Result<(), ConfigError> {
        let config = PipelineConfig {
            frame_deadline_ms: Some(100),
            ..Default::default()
        };
        let json = serde_json::to_string(&config)?;
        assert_eq!(PipelineConfig::from_json_str(&json)?, config);
        Ok(())
    }
}
