use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};
use stereoscope_image::ImageSize;

/// Error types for the calibration module.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    /// Error reading the calibration file
    #[error("error reading calibration file")]
    Io(#[from] std::io::Error),

    /// Error deserializing the calibration file
    #[error("failed to deserialize calibration")]
    Json(#[from] serde_json::Error),

    /// The focal length is missing, zero, negative or not finite
    #[error("Invalid focal length ({0}, {1})")]
    InvalidFocalLength(f64, f64),

    /// The baseline is missing, zero, negative or not finite
    #[error("Invalid baseline {0}")]
    InvalidBaseline(f64),

    /// The principal point is not finite
    #[error("Invalid principal point ({0}, {1})")]
    InvalidPrincipalPoint(f64, f64),

    /// The image resolution has a zero dimension
    #[error("Invalid image size {0}")]
    InvalidImageSize(ImageSize),

    /// A required key is missing from the calibration file
    #[error("Missing calibration key {0}")]
    MissingKey(String),

    /// A key has an unexpected number of values
    #[error("Key {key} expects {expected} values, found {found}")]
    InvalidNumValues {
        /// The offending key.
        key: String,
        /// The expected number of values.
        expected: usize,
        /// The number of values found.
        found: usize,
    },
}

/// Intrinsics and baseline of a rectified stereo pair.
///
/// The intrinsics are the ones of the left (reference) camera. Depth and 3D points are
/// expressed in the left camera frame: X right, Y down, Z forward.
///
/// The parameters are immutable once validated and are meant to be shared read-only,
/// e.g. behind an `Arc`, by every stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameters {
    /// Focal length along x in pixels.
    pub fx: f64,
    /// Focal length along y in pixels.
    pub fy: f64,
    /// Principal point x coordinate in pixels.
    pub cx: f64,
    /// Principal point y coordinate in pixels.
    pub cy: f64,
    /// Distance between the two camera centers in meters.
    pub baseline: f64,
    /// Resolution of the rectified images.
    pub image_size: ImageSize,
}

impl CalibrationParameters {
    /// Create and validate a new set of calibration parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the parameters is invalid, see [`Self::validate`].
    ///
    /// # Example
    ///
    /// ```
    /// use stereoscope_3d::CalibrationParameters;
    ///
    /// let calib = CalibrationParameters::new(700.0, 700.0, 320.0, 240.0, 0.12, [640, 480].into())
    ///     .unwrap();
    /// assert!((calib.focal_baseline() - 84.0).abs() < 1e-9);
    /// ```
    pub fn new(
        fx: f64,
        fy: f64,
        cx: f64,
        cy: f64,
        baseline: f64,
        image_size: ImageSize,
    ) -> Result<Self, CalibrationError> {
        let calibration = Self {
            fx,
            fy,
            cx,
            cy,
            baseline,
            image_size,
        };
        calibration.validate()?;
        Ok(calibration)
    }

    /// Check that focal lengths and baseline are strictly positive and finite, the
    /// principal point is finite and the resolution is non-empty.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        let positive = |v: f64| v.is_finite() && v > 0.0;

        if !positive(self.fx) || !positive(self.fy) {
            return Err(CalibrationError::InvalidFocalLength(self.fx, self.fy));
        }

        if !positive(self.baseline) {
            return Err(CalibrationError::InvalidBaseline(self.baseline));
        }

        if !self.cx.is_finite() || !self.cy.is_finite() {
            return Err(CalibrationError::InvalidPrincipalPoint(self.cx, self.cy));
        }

        if self.image_size.num_pixels() == 0 {
            return Err(CalibrationError::InvalidImageSize(self.image_size));
        }

        Ok(())
    }

    /// The product `fx * baseline`, i.e. the depth of a point with one pixel disparity.
    #[inline]
    pub fn focal_baseline(&self) -> f64 {
        self.fx * self.baseline
    }

    /// Back-project the pixel `(u, v)` at `depth` into the camera frame with the pinhole model.
    ///
    /// # Example
    ///
    /// ```
    /// use stereoscope_3d::CalibrationParameters;
    ///
    /// let calib = CalibrationParameters::new(500.0, 500.0, 320.0, 240.0, 0.1, [640, 480].into())
    ///     .unwrap();
    /// let p = calib.backproject(420.0, 240.0, 5.0);
    /// assert_eq!(p, [1.0, 0.0, 5.0]);
    /// ```
    #[inline]
    pub fn backproject(&self, u: f64, v: f64, depth: f64) -> [f64; 3] {
        [
            (u - self.cx) * depth / self.fx,
            (v - self.cy) * depth / self.fy,
            depth,
        ]
    }

    /// Parse calibration parameters from a JSON string and validate them.
    pub fn from_json_str(json: &str) -> Result<Self, CalibrationError> {
        let calibration: Self = serde_json::from_str(json)?;
        calibration.validate()?;
        Ok(calibration)
    }

    /// Read calibration parameters from a JSON file and validate them.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Parse the contents of a KITTI `calib_cam_to_cam.txt` file.
    ///
    /// The rectified projection matrices of cameras 02 (left color) and 03 (right color)
    /// provide the intrinsics and the baseline:
    ///
    /// * `fx, fy, cx, cy` from `P_rect_02`,
    /// * `baseline = (P_rect_02[0, 3] - P_rect_03[0, 3]) / fx`,
    /// * the resolution from `S_rect_02`.
    ///
    /// Lines whose values are not all numeric (e.g. `calib_time`) are ignored.
    pub fn from_kitti_str(contents: &str) -> Result<Self, CalibrationError> {
        let entries = parse_kitti_entries(contents);

        let p_left = kitti_values(&entries, "P_rect_02", 12)?;
        let p_right = kitti_values(&entries, "P_rect_03", 12)?;
        let size = kitti_values(&entries, "S_rect_02", 2)?;

        let fx = p_left[0];
        let baseline = (p_left[3] - p_right[3]) / fx;

        Self::new(
            fx,
            p_left[5],
            p_left[2],
            p_left[6],
            baseline,
            ImageSize {
                width: size[0].round() as usize,
                height: size[1].round() as usize,
            },
        )
    }

    /// Read a KITTI `calib_cam_to_cam.txt` file, see [`Self::from_kitti_str`].
    pub fn from_kitti_file(path: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_kitti_str(&contents)
    }
}

fn parse_kitti_entries(contents: &str) -> HashMap<&str, Vec<f64>> {
    contents
        .lines()
        .filter_map(|line| {
            let (key, values) = line.split_once(':')?;
            let values = values
                .split_whitespace()
                .map(|v| v.parse::<f64>())
                .collect::<Result<Vec<_>, _>>()
                .ok()?;
            Some((key.trim(), values))
        })
        .collect()
}

fn kitti_values<'a>(
    entries: &'a HashMap<&str, Vec<f64>>,
    key: &str,
    expected: usize,
) -> Result<&'a [f64], CalibrationError> {
    let values = entries
        .get(key)
        .ok_or_else(|| CalibrationError::MissingKey(key.to_string()))?;

    if values.len() != expected {
        return Err(CalibrationError::InvalidNumValues {
            key: key.to_string(),
            expected,
            found: values.len(),
        });
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;

    const KITTI_CALIB: &str = "calib_time: 09-Jan-2012 13:57:47
corner_dist: 9.950000e-02
S_02: 1.392000e+03 5.120000e+02
K_02: 9.597910e+02 0.000000e+00 6.960217e+02 0.000000e+00 9.569251e+02 2.241806e+02 0.000000e+00 0.000000e+00 1.000000e+00
S_rect_02: 1.242000e+03 3.750000e+02
P_rect_02: 7.215377e+02 0.000000e+00 6.095593e+02 4.485728e+01 0.000000e+00 7.215377e+02 1.728540e+02 2.163791e-01 0.000000e+00 0.000000e+00 1.000000e+00 2.745884e-03
S_rect_03: 1.242000e+03 3.750000e+02
P_rect_03: 7.215377e+02 0.000000e+00 6.095593e+02 -3.395242e+02 0.000000e+00 7.215377e+02 1.728540e+02 2.199936e+00 0.000000e+00 0.000000e+00 1.000000e+00 2.729905e-03
";

    #[test]
    fn test_new_valid() -> Result<(), CalibrationError> {
        let calib = CalibrationParameters::new(700.0, 700.0, 320.0, 240.0, 0.12, [640, 480].into())?;
        assert_relative_eq!(calib.focal_baseline(), 84.0);
        Ok(())
    }

    #[test]
    fn test_invalid_parameters() {
        let size: ImageSize = [640, 480].into();
        assert!(matches!(
            CalibrationParameters::new(0.0, 700.0, 320.0, 240.0, 0.12, size),
            Err(CalibrationError::InvalidFocalLength(..))
        ));
        assert!(matches!(
            CalibrationParameters::new(700.0, 700.0, 320.0, 240.0, -0.12, size),
            Err(CalibrationError::InvalidBaseline(..))
        ));
        assert!(matches!(
            CalibrationParameters::new(700.0, 700.0, f64::NAN, 240.0, 0.12, size),
            Err(CalibrationError::InvalidPrincipalPoint(..))
        ));
        assert!(matches!(
            CalibrationParameters::new(700.0, 700.0, 320.0, 240.0, 0.12, [0, 480].into()),
            Err(CalibrationError::InvalidImageSize(..))
        ));
    }

    #[test]
    fn test_backproject() -> Result<(), CalibrationError> {
        let calib = CalibrationParameters::new(700.0, 700.0, 320.0, 240.0, 0.12, [640, 480].into())?;
        let p = calib.backproject(390.0, 170.0, 10.0);
        assert_relative_eq!(p[0], 1.0);
        assert_relative_eq!(p[1], -1.0);
        assert_relative_eq!(p[2], 10.0);
        Ok(())
    }

    #[test]
    fn test_json_roundtrip_and_missing_field() -> Result<(), CalibrationError> {
        let calib = CalibrationParameters::new(700.0, 700.0, 320.0, 240.0, 0.12, [640, 480].into())?;
        let json = serde_json::to_string(&calib)?;
        assert_eq!(CalibrationParameters::from_json_str(&json)?, calib);

        let missing_baseline = r#"{"fx": 700.0, "fy": 700.0, "cx": 320.0, "cy": 240.0,
            "image_size": {"width": 640, "height": 480}}"#;
        assert!(matches!(
            CalibrationParameters::from_json_str(missing_baseline),
            Err(CalibrationError::Json(_))
        ));
        Ok(())
    }

    #[test]
    fn test_kitti_file() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(KITTI_CALIB.as_bytes())?;

        let calib = CalibrationParameters::from_kitti_file(file.path())?;
        assert_relative_eq!(calib.fx, 721.5377);
        assert_relative_eq!(calib.fy, 721.5377);
        assert_relative_eq!(calib.cx, 609.5593);
        assert_relative_eq!(calib.cy, 172.854);
        assert_relative_eq!(calib.baseline, 0.532725, epsilon = 1e-5);
        assert_eq!(calib.image_size, [1242, 375].into());
        Ok(())
    }

    #[test]
    fn test_kitti_missing_key() {
        let contents = "S_rect_02: 1.242000e+03 3.750000e+02\n";
        assert!(matches!(
            CalibrationParameters::from_kitti_str(contents),
            Err(CalibrationError::MissingKey(key)) if key == "P_rect_02"
        ));
    }
}
