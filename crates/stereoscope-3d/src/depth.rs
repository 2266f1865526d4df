use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use stereoscope_image::{Image, ImageError, ImageSize};

use crate::{calibration::CalibrationParameters, disparity::DisparityMap, utils};

/// Range of depths in meters considered trustworthy.
///
/// Depths outside `[min, max]` are rejected rather than clamped: tiny disparities turn
/// quantization noise into arbitrarily large depths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthRange {
    /// Minimum valid depth in meters.
    pub min: f64,
    /// Maximum valid depth in meters.
    pub max: f64,
}

impl Default for DepthRange {
    fn default() -> Self {
        Self {
            min: 0.5,
            max: 50.0,
        }
    }
}

impl DepthRange {
    /// Whether `depth` lies within the range, bounds included.
    #[inline]
    pub fn contains(&self, depth: f64) -> bool {
        depth >= self.min && depth <= self.max
    }

    /// Whether the range is non-empty with a strictly positive lower bound.
    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min > 0.0 && self.min < self.max
    }
}

/// Per-pixel depth in meters with an explicit validity mask.
///
/// Every valid pixel has a strictly positive depth within the [`DepthRange`] used to build
/// the map.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    depth: Image<f32, 1>,
    mask: Image<bool, 1>,
    num_rejected: usize,
}

impl DepthMap {
    /// Create a depth map from metric depths, marking as valid every finite value within
    /// `range`.
    pub fn from_depth(depth: Image<f32, 1>, range: &DepthRange) -> Result<Self, ImageError> {
        let mut num_rejected = 0;
        let mask = depth
            .as_slice()
            .iter()
            .map(|&z| {
                let z = z as f64;
                let valid = z.is_finite() && z > 0.0 && range.contains(z);
                if z.is_finite() && z > 0.0 && !valid {
                    num_rejected += 1;
                }
                valid
            })
            .collect::<Vec<_>>();
        let mask = Image::new(depth.size(), mask)?;

        Ok(Self {
            depth,
            mask,
            num_rejected,
        })
    }

    /// Size of the map in pixels.
    pub fn size(&self) -> ImageSize {
        self.depth.size()
    }

    /// The depth buffer, including the placeholder values of invalid pixels.
    pub fn depth(&self) -> &Image<f32, 1> {
        &self.depth
    }

    /// The validity mask.
    pub fn mask(&self) -> &Image<bool, 1> {
        &self.mask
    }

    /// The depth at column `x` and row `y`, or `None` if the pixel is invalid or outside
    /// the map.
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if !self.size().contains(x, y) {
            return None;
        }
        let idx = y * self.size().width + x;
        self.mask.as_slice()[idx].then(|| self.depth.as_slice()[idx])
    }

    /// Number of valid pixels.
    pub fn num_valid(&self) -> usize {
        self.mask.as_slice().iter().filter(|&&v| v).count()
    }

    /// Number of pixels with a valid disparity whose depth fell outside the range.
    pub fn num_rejected(&self) -> usize {
        self.num_rejected
    }
}

/// Convert a disparity map into a depth map with `Z = fx * baseline / d`.
///
/// Pixels with an invalid disparity stay invalid. Pixels whose depth falls outside `range`
/// are marked invalid and counted in [`DepthMap::num_rejected`]. Rows are processed in
/// parallel; the result does not depend on scheduling.
///
/// # Example
///
/// ```
/// use stereoscope_3d::{compute_depth_map, CalibrationParameters, DepthRange, DisparityMap};
/// use stereoscope_image::Image;
///
/// let calib = CalibrationParameters::new(700.0, 700.0, 1.0, 0.5, 0.12, [2, 1].into()).unwrap();
/// let disparity = DisparityMap::from_disparity(
///     Image::new([2, 1].into(), vec![16.8, 0.0]).unwrap(),
/// ).unwrap();
///
/// let depth = compute_depth_map(&disparity, &calib, &DepthRange::default()).unwrap();
/// assert!((depth.get(0, 0).unwrap() - 5.0).abs() < 1e-4);
/// assert_eq!(depth.get(1, 0), None);
/// ```
pub fn compute_depth_map(
    disparity: &DisparityMap,
    calibration: &CalibrationParameters,
    range: &DepthRange,
) -> Result<DepthMap, ImageError> {
    let size = disparity.size();
    let mut depth = Image::from_size_val(size, 0.0f32)?;
    let mut mask = Image::from_size_val(size, false)?;

    if size.num_pixels() == 0 {
        return Ok(DepthMap {
            depth,
            mask,
            num_rejected: 0,
        });
    }

    let focal_baseline = calibration.focal_baseline();
    let cols = size.width;

    let num_rejected = disparity
        .disparity()
        .as_slice()
        .par_chunks_exact(cols)
        .zip(disparity.mask().as_slice().par_chunks_exact(cols))
        .zip(depth.as_slice_mut().par_chunks_exact_mut(cols))
        .zip(mask.as_slice_mut().par_chunks_exact_mut(cols))
        .map(|(((disp_row, valid_row), depth_row), mask_row)| {
            let mut rejected = 0;
            for (((&d, &valid), z_out), m_out) in disp_row
                .iter()
                .zip(valid_row)
                .zip(depth_row.iter_mut())
                .zip(mask_row.iter_mut())
            {
                if !valid || d <= 0.0 {
                    continue;
                }
                let z = focal_baseline / d as f64;
                if range.contains(z) {
                    *z_out = z as f32;
                    *m_out = true;
                } else {
                    rejected += 1;
                }
            }
            rejected
        })
        .sum::<usize>();

    if num_rejected > 0 {
        log::debug!("depth range rejected {} pixels", num_rejected);
    }

    Ok(DepthMap {
        depth,
        mask,
        num_rejected,
    })
}

/// Summary statistics of the valid pixels of a depth map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthStatistics {
    /// Number of valid pixels.
    pub valid_pixels: usize,
    /// Total number of pixels.
    pub total_pixels: usize,
    /// Share of valid pixels in percent.
    pub valid_percentage: f64,
    /// Pixels rejected by the depth range.
    pub rejected_pixels: usize,
    /// Minimum valid depth in meters.
    pub min_depth: Option<f32>,
    /// Maximum valid depth in meters.
    pub max_depth: Option<f32>,
    /// Mean valid depth in meters.
    pub mean_depth: Option<f32>,
    /// Median valid depth in meters.
    pub median_depth: Option<f32>,
}

impl DepthStatistics {
    /// Compute the statistics of `depth_map`. All depth fields are `None` when no pixel is
    /// valid.
    pub fn from_depth_map(depth_map: &DepthMap) -> Self {
        let mut valid = depth_map
            .depth
            .as_slice()
            .iter()
            .zip(depth_map.mask.as_slice())
            .filter_map(|(&z, &m)| m.then_some(z))
            .collect::<Vec<_>>();

        let total_pixels = depth_map.size().num_pixels();
        let valid_pixels = valid.len();
        let valid_percentage = if total_pixels > 0 {
            100.0 * valid_pixels as f64 / total_pixels as f64
        } else {
            0.0
        };

        let (min_depth, max_depth, mean_depth) = if valid.is_empty() {
            (None, None, None)
        } else {
            let min = valid.iter().copied().fold(f32::INFINITY, f32::min);
            let max = valid.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mean = valid.iter().map(|&z| z as f64).sum::<f64>() / valid_pixels as f64;
            (Some(min), Some(max), Some(mean as f32))
        };

        Self {
            valid_pixels,
            total_pixels,
            valid_percentage,
            rejected_pixels: depth_map.num_rejected,
            min_depth,
            max_depth,
            mean_depth,
            median_depth: utils::median(&mut valid),
        }
    }
}

/// Render a depth map for display: near pixels bright, far pixels dark.
///
/// Depths are clipped to `max_display_depth` and mapped to `255 - z / max * 255`; invalid
/// pixels are black.
pub fn depth_to_display(
    depth_map: &DepthMap,
    max_display_depth: f32,
) -> Result<Image<u8, 1>, ImageError> {
    let data = depth_map
        .depth
        .as_slice()
        .iter()
        .zip(depth_map.mask.as_slice())
        .map(|(&z, &m)| {
            if !m || max_display_depth <= 0.0 {
                return 0;
            }
            let z = z.clamp(0.0, max_display_depth);
            (255.0 - z / max_display_depth * 255.0).round() as u8
        })
        .collect();

    Image::new(depth_map.size(), data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disparity::{normalize_disparity, DisparityEncoding};
    use approx::assert_abs_diff_eq;

    fn calibration(size: ImageSize) -> CalibrationParameters {
        CalibrationParameters {
            fx: 700.0,
            fy: 700.0,
            cx: size.width as f64 / 2.0,
            cy: size.height as f64 / 2.0,
            baseline: 0.12,
            image_size: size,
        }
    }

    fn disparity_map(size: ImageSize, values: Vec<f32>) -> DisparityMap {
        let image = Image::new(size, values).expect("valid test image");
        DisparityMap::from_disparity(image).expect("valid disparity")
    }

    #[test]
    fn test_planar_scene_depth() -> Result<(), ImageError> {
        // 700 px * 0.12 m / 5.0 m = 16.8 px
        let size = ImageSize {
            width: 8,
            height: 4,
        };
        let disparity = disparity_map(size, vec![16.8; 32]);
        let depth = compute_depth_map(&disparity, &calibration(size), &DepthRange::default())?;

        assert_eq!(depth.num_valid(), 32);
        for y in 0..size.height {
            for x in 0..size.width {
                let z = depth.get(x, y).unwrap_or_default();
                assert_abs_diff_eq!(z, 5.0, epsilon = 0.01);
            }
        }

        Ok(())
    }

    #[test]
    fn test_fixed_point_disparity_depth() -> Result<(), Box<dyn std::error::Error>> {
        // 16.8 px quantized to 1/16 px
        let raw = Image::<i16, 1>::from_size_val([4, 4].into(), 269)?;
        let disparity = normalize_disparity(&raw, &DisparityEncoding::default())?;
        let depth = compute_depth_map(
            &disparity,
            &calibration(raw.size()),
            &DepthRange::default(),
        )?;
        assert_abs_diff_eq!(depth.get(1, 1).unwrap_or_default(), 5.0, epsilon = 0.01);
        Ok(())
    }

    #[test]
    fn test_range_rejection() -> Result<(), ImageError> {
        // 84 / 0.5 = 168 m (too far), 84 / 200 = 0.42 m (too close), 84 / 8.4 = 10 m
        let size = ImageSize {
            width: 4,
            height: 1,
        };
        let disparity = disparity_map(size, vec![0.5, 200.0, 8.4, 0.0]);
        let depth = compute_depth_map(&disparity, &calibration(size), &DepthRange::default())?;

        assert_eq!(depth.get(0, 0), None);
        assert_eq!(depth.get(1, 0), None);
        assert_abs_diff_eq!(depth.get(2, 0).unwrap_or_default(), 10.0, epsilon = 1e-4);
        assert_eq!(depth.get(3, 0), None);
        assert_eq!(depth.num_valid(), 1);
        assert_eq!(depth.num_rejected(), 2);

        Ok(())
    }

    #[test]
    fn test_valid_depth_is_positive_and_in_range() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 64,
            height: 8,
        };
        let values = (0..size.num_pixels())
            .map(|i| i as f32 * 0.37 - 20.0)
            .collect::<Vec<_>>();
        let range = DepthRange::default();
        let depth = compute_depth_map(&disparity_map(size, values), &calibration(size), &range)?;

        for (&z, &m) in depth.depth().as_slice().iter().zip(depth.mask().as_slice()) {
            if m {
                assert!(z > 0.0);
                assert!(range.contains(z as f64));
            }
            assert!(z.is_finite());
        }

        Ok(())
    }

    #[test]
    fn test_depth_is_deterministic() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 33,
            height: 17,
        };
        let values = (0..size.num_pixels())
            .map(|i| (i % 97) as f32 * 0.5)
            .collect::<Vec<_>>();
        let disparity = disparity_map(size, values);
        let calib = calibration(size);

        let first = compute_depth_map(&disparity, &calib, &DepthRange::default())?;
        let second = compute_depth_map(&disparity, &calib, &DepthRange::default())?;
        assert_eq!(first, second);

        Ok(())
    }

    #[test]
    fn test_zero_disparity_is_invalid() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 5,
            height: 5,
        };
        let depth = compute_depth_map(
            &disparity_map(size, vec![0.0; 25]),
            &calibration(size),
            &DepthRange::default(),
        )?;
        assert_eq!(depth.num_valid(), 0);
        assert_eq!(depth.num_rejected(), 0);
        Ok(())
    }

    #[test]
    fn test_empty_map() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 0,
            height: 0,
        };
        let depth = compute_depth_map(
            &disparity_map(size, vec![]),
            &calibration([1, 1].into()),
            &DepthRange::default(),
        )?;
        assert_eq!(depth.num_valid(), 0);
        Ok(())
    }

    #[test]
    fn test_depth_statistics() -> Result<(), ImageError> {
        let depth = Image::new([5, 1].into(), vec![1.0, 2.0, 0.0, 6.0, 100.0])?;
        let depth_map = DepthMap::from_depth(depth, &DepthRange::default())?;
        let stats = DepthStatistics::from_depth_map(&depth_map);

        assert_eq!(stats.valid_pixels, 3);
        assert_eq!(stats.total_pixels, 5);
        assert_abs_diff_eq!(stats.valid_percentage, 60.0);
        assert_eq!(stats.rejected_pixels, 1);
        assert_eq!(stats.min_depth, Some(1.0));
        assert_eq!(stats.max_depth, Some(6.0));
        assert_eq!(stats.mean_depth, Some(3.0));
        assert_eq!(stats.median_depth, Some(2.0));

        Ok(())
    }

    #[test]
    fn test_depth_statistics_empty() -> Result<(), ImageError> {
        let depth_map = DepthMap::from_depth(
            Image::from_size_val([3, 3].into(), 0.0)?,
            &DepthRange::default(),
        )?;
        let stats = DepthStatistics::from_depth_map(&depth_map);
        assert_eq!(stats.valid_pixels, 0);
        assert_eq!(stats.median_depth, None);
        assert_eq!(stats.mean_depth, None);
        Ok(())
    }

    #[test]
    fn test_depth_to_display() -> Result<(), ImageError> {
        let depth = Image::new([4, 1].into(), vec![0.0, 6.0, 15.0, 45.0])?;
        let depth_map = DepthMap::from_depth(depth, &DepthRange::default())?;
        let display = depth_to_display(&depth_map, 30.0)?;
        assert_eq!(display.as_slice(), &[0, 204, 128, 0]);
        Ok(())
    }
}
