use rayon::prelude::*;
use stereoscope_image::Image;

use crate::{calibration::CalibrationParameters, depth::DepthMap, localization::Localized3DObject};

/// Error types for the point cloud module.
#[derive(Debug, thiserror::Error)]
pub enum PointCloudError {
    /// The color image does not match the depth map size
    #[error("Color image size ({0}x{1}) does not match the depth map size ({2}x{3})")]
    ColorSizeMismatch(usize, usize, usize, usize),
}

/// A point cloud with points and optional colors.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointCloud {
    // The points in the point cloud.
    points: Vec<[f64; 3]>,
    // The colors of the points.
    colors: Option<Vec<[u8; 3]>>,
}

impl PointCloud {
    /// Create a new point cloud from points and colors (optional).
    pub fn new(points: Vec<[f64; 3]>, colors: Option<Vec<[u8; 3]>>) -> Self {
        Self { points, colors }
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &Vec<[f64; 3]> {
        &self.points
    }

    /// Get as reference the colors of the points in the point cloud.
    pub fn colors(&self) -> Option<&Vec<[u8; 3]>> {
        self.colors.as_ref()
    }

    /// Build a new point cloud with the points at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        let points = indices.iter().map(|&i| self.points[i]).collect();
        let colors = self
            .colors
            .as_ref()
            .map(|colors| indices.iter().map(|&i| colors[i]).collect());
        Self { points, colors }
    }

    /// Get the axis-aligned bounds `(min, max)` of the point cloud, `None` if empty.
    pub fn bounds(&self) -> Option<([f64; 3], [f64; 3])> {
        let first = *self.points.first()?;
        Some(self.points.iter().fold((first, first), |(mut lo, mut hi), p| {
            for i in 0..3 {
                lo[i] = lo[i].min(p[i]);
                hi[i] = hi[i].max(p[i]);
            }
            (lo, hi)
        }))
    }
}

/// Back-project every valid depth pixel into the camera frame.
///
/// Pixel `(u, v)` with depth `Z` maps to `((u - cx) Z / fx, (v - cy) Z / fy, Z)`, the same
/// model used by the 3D localizer. Points follow the raster order of the depth map. When
/// `color` is given each point takes the color of its pixel.
///
/// # Errors
///
/// Returns an error if the color image and the depth map differ in size.
pub fn depth_to_pointcloud(
    depth_map: &DepthMap,
    calibration: &CalibrationParameters,
    color: Option<&Image<u8, 3>>,
) -> Result<PointCloud, PointCloudError> {
    let size = depth_map.size();
    if let Some(color) = color {
        if color.size() != size {
            return Err(PointCloudError::ColorSizeMismatch(
                color.width(),
                color.height(),
                size.width,
                size.height,
            ));
        }
    }

    if size.num_pixels() == 0 {
        return Ok(PointCloud::new(Vec::new(), color.map(|_| Vec::new())));
    }

    let cols = size.width;

    // each row is back-projected independently and the rows are concatenated in order
    let rows = depth_map
        .depth()
        .as_slice()
        .par_chunks_exact(cols)
        .zip(depth_map.mask().as_slice().par_chunks_exact(cols))
        .enumerate()
        .map(|(v, (depth_row, mask_row))| {
            let mut points = Vec::new();
            let mut colors = Vec::new();
            for (u, (&z, &valid)) in depth_row.iter().zip(mask_row).enumerate() {
                if !valid {
                    continue;
                }
                points.push(calibration.backproject(u as f64, v as f64, z as f64));
                if let Some(color) = color {
                    let rgb = color.pixel_unchecked(u, v);
                    colors.push([rgb[0], rgb[1], rgb[2]]);
                }
            }
            (points, colors)
        })
        .collect::<Vec<_>>();

    let num_points = rows.iter().map(|(points, _)| points.len()).sum();
    let mut points = Vec::with_capacity(num_points);
    let mut colors = color.map(|_| Vec::with_capacity(num_points));
    for (row_points, row_colors) in rows {
        points.extend(row_points);
        if let Some(colors) = colors.as_mut() {
            colors.extend(row_colors);
        }
    }

    Ok(PointCloud::new(points, colors))
}

/// The points of a cloud around one localized object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectCloud {
    /// Index of the object in the input slice.
    pub object_index: usize,
    /// Class label of the object.
    pub class_name: String,
    /// The points within the margin of the object position.
    pub cloud: PointCloud,
}

/// Extract, for every valid object, the points closer than `margin` meters to its position.
///
/// Invalid objects and objects without nearby points are skipped.
pub fn crop_around_objects(
    cloud: &PointCloud,
    objects: &[Localized3DObject],
    margin: f64,
) -> Vec<ObjectCloud> {
    let margin_sq = margin * margin;

    objects
        .iter()
        .enumerate()
        .filter_map(|(object_index, object)| {
            let center = object.position()?;
            let indices = cloud
                .points()
                .iter()
                .enumerate()
                .filter(|(_, p)| {
                    let d = [p[0] - center[0], p[1] - center[1], p[2] - center[2]];
                    d[0] * d[0] + d[1] * d[1] + d[2] * d[2] < margin_sq
                })
                .map(|(i, _)| i)
                .collect::<Vec<_>>();

            (!indices.is_empty()).then(|| ObjectCloud {
                object_index,
                class_name: object.detection().class_name.clone(),
                cloud: cloud.select(&indices),
            })
        })
        .collect()
}
