use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::pointcloud::PointCloud;

/// Error types for the voxel grid module.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VoxelGridError {
    /// The leaf size must be strictly positive and finite
    #[error("Leaf size must be positive, got {0}")]
    InvalidLeafSize(f64),
}

/// Parameters of the point cloud synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointCloudConfig {
    /// Edge length of the voxels in meters.
    pub voxel_size: f64,
    /// Maximum number of points of the output cloud.
    pub max_points: usize,
    /// How many times the voxel size may double while the occupied voxels exceed the budget.
    pub max_coarsening_steps: u32,
}

impl Default for PointCloudConfig {
    fn default() -> Self {
        Self {
            voxel_size: 0.05,
            max_points: 10_000,
            max_coarsening_steps: 8,
        }
    }
}

/// A uniform 3D voxel grid for downsampling point clouds to a point budget.
///
/// Each occupied voxel keeps the first point that falls in it, in the order of the input
/// cloud. For clouds produced by [`crate::pointcloud::depth_to_pointcloud`] this is the
/// first pixel in raster order, which makes the output reproducible.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelGrid {
    /// The edge length of the voxel (leaf).
    leaf_size: f64,
    /// Maximum number of output points.
    max_points: usize,
    /// Maximum number of leaf size doublings.
    max_coarsening_steps: u32,
}

impl VoxelGrid {
    /// Creates a new `VoxelGrid` with the specified leaf size and point budget.
    ///
    /// # Errors
    ///
    /// Returns an error if `leaf_size` is not strictly positive and finite.
    pub fn new(leaf_size: f64, max_points: usize) -> Result<Self, VoxelGridError> {
        if !leaf_size.is_finite() || leaf_size <= 0.0 {
            return Err(VoxelGridError::InvalidLeafSize(leaf_size));
        }

        Ok(VoxelGrid {
            leaf_size,
            max_points,
            max_coarsening_steps: 0,
        })
    }

    /// Creates a `VoxelGrid` from a [`PointCloudConfig`].
    pub fn from_config(config: &PointCloudConfig) -> Result<Self, VoxelGridError> {
        Ok(Self::new(config.voxel_size, config.max_points)?
            .with_max_coarsening_steps(config.max_coarsening_steps))
    }

    /// Allow the leaf size to double up to `steps` times while the number of occupied voxels
    /// exceeds the budget.
    pub fn with_max_coarsening_steps(mut self, steps: u32) -> Self {
        self.max_coarsening_steps = steps;
        self
    }

    /// Gets the voxel grid leaf size.
    pub fn leaf_size(&self) -> f64 {
        self.leaf_size
    }

    /// Gets the point budget.
    pub fn max_points(&self) -> usize {
        self.max_points
    }

    /// Computes the voxel index of `point` for the given leaf size.
    pub fn voxel_index(point: &[f64; 3], leaf_size: f64) -> (i64, i64, i64) {
        (
            (point[0] / leaf_size).floor() as i64,
            (point[1] / leaf_size).floor() as i64,
            (point[2] / leaf_size).floor() as i64,
        )
    }

    /// Downsample `point_cloud` to at most `max_points` points.
    ///
    /// Clouds already within budget are returned unchanged. Otherwise one point per occupied
    /// voxel is kept; if the occupied voxels still exceed the budget the leaf size doubles, up
    /// to the configured number of steps, and the first `max_points` representatives are
    /// kept.
    ///
    /// # Example
    ///
    /// ```
    /// use stereoscope_3d::{PointCloud, VoxelGrid};
    ///
    /// let cloud = PointCloud::new(
    ///     vec![[0.0, 0.0, 1.0], [0.01, 0.0, 1.0], [0.5, 0.0, 1.0]],
    ///     None,
    /// );
    /// let grid = VoxelGrid::new(0.1, 2).unwrap();
    /// let downsampled = grid.downsample(&cloud);
    ///
    /// assert_eq!(downsampled.points(), &vec![[0.0, 0.0, 1.0], [0.5, 0.0, 1.0]]);
    /// ```
    pub fn downsample(&self, point_cloud: &PointCloud) -> PointCloud {
        if point_cloud.len() <= self.max_points {
            return point_cloud.clone();
        }

        let mut leaf_size = self.leaf_size;
        let mut representatives = first_per_voxel(point_cloud, leaf_size);
        let mut step = 0;
        while representatives.len() > self.max_points && step < self.max_coarsening_steps {
            leaf_size *= 2.0;
            step += 1;
            representatives = first_per_voxel(point_cloud, leaf_size);
        }

        log::debug!(
            "voxel grid: {} points -> {} voxels with leaf size {} (budget {})",
            point_cloud.len(),
            representatives.len(),
            leaf_size,
            self.max_points
        );

        representatives.truncate(self.max_points);
        point_cloud.select(&representatives)
    }
}

/// Indices of the first point of every occupied voxel, in input order.
fn first_per_voxel(point_cloud: &PointCloud, leaf_size: f64) -> Vec<usize> {
    let mut occupied = HashMap::new();
    let mut representatives = Vec::new();

    for (i, point) in point_cloud.points().iter().enumerate() {
        let key = VoxelGrid::voxel_index(point, leaf_size);
        occupied.entry(key).or_insert_with(|| {
            representatives.push(i);
        });
    }

    representatives
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_cloud(n: usize, spacing: f64) -> PointCloud {
        let points = (0..n)
            .flat_map(|y| (0..n).map(move |x| [x as f64 * spacing, y as f64 * spacing, 1.0]))
            .collect();
        PointCloud::new(points, None)
    }

    #[test]
    fn test_new_voxel_grid() -> Result<(), VoxelGridError> {
        let voxel_grid = VoxelGrid::new(1.0, 10)?;
        assert_eq!(voxel_grid.leaf_size(), 1.0);
        assert_eq!(voxel_grid.max_points(), 10);
        Ok(())
    }

    #[test]
    fn test_invalid_leaf_size() {
        assert_eq!(
            VoxelGrid::new(0.0, 10),
            Err(VoxelGridError::InvalidLeafSize(0.0))
        );
        assert!(VoxelGrid::new(f64::NAN, 10).is_err());
        assert!(VoxelGrid::new(-1.0, 10).is_err());
    }

    #[test]
    fn test_within_budget_is_unchanged() -> Result<(), VoxelGridError> {
        // all points share one voxel but the cloud already fits the budget
        let cloud = grid_cloud(3, 0.001);
        let downsampled = VoxelGrid::new(1.0, 9)?.downsample(&cloud);
        assert_eq!(downsampled, cloud);
        Ok(())
    }

    #[test]
    fn test_first_point_per_voxel() -> Result<(), VoxelGridError> {
        let cloud = PointCloud::new(
            vec![
                [0.9, 0.1, 0.1],
                [0.1, 0.1, 0.1],
                [1.5, 0.1, 0.1],
                [0.5, 0.5, 0.5],
                [1.1, 0.9, 0.2],
            ],
            Some(vec![[1, 1, 1], [2, 2, 2], [3, 3, 3], [4, 4, 4], [5, 5, 5]]),
        );
        let downsampled = VoxelGrid::new(1.0, 4)?.downsample(&cloud);

        assert_eq!(
            downsampled.points(),
            &vec![[0.9, 0.1, 0.1], [1.5, 0.1, 0.1]]
        );
        assert_eq!(downsampled.colors(), Some(&vec![[1, 1, 1], [3, 3, 3]]));
        Ok(())
    }

    #[test]
    fn test_budget_is_respected() -> Result<(), VoxelGridError> {
        let cloud = grid_cloud(100, 0.01);
        for budget in [0, 1, 7, 100, 2500, 9999] {
            let grid = VoxelGrid::new(0.01, budget)?.with_max_coarsening_steps(3);
            assert!(grid.downsample(&cloud).len() <= budget);
        }
        Ok(())
    }

    #[test]
    fn test_coarsening_keeps_coverage() -> Result<(), VoxelGridError> {
        // 100x100 points at 1 cm, budget 100: 10 cm voxels give exactly 10x10 representatives
        let cloud = grid_cloud(100, 0.01);
        let grid = VoxelGrid::new(0.0125, 100)?.with_max_coarsening_steps(4);
        let downsampled = grid.downsample(&cloud);

        assert!(downsampled.len() <= 100);
        let (lo, hi) = downsampled.bounds().unwrap_or_default();
        // the representatives still span the whole cloud, not only its first rows
        assert!(lo[1] < 0.05);
        assert!(hi[1] > 0.85);
        assert!(hi[0] > 0.85);
        Ok(())
    }

    #[test]
    fn test_downsample_is_deterministic() -> Result<(), VoxelGridError> {
        let cloud = grid_cloud(50, 0.013);
        let grid = VoxelGrid::new(0.05, 200)?.with_max_coarsening_steps(2);
        assert_eq!(grid.downsample(&cloud), grid.downsample(&cloud));
        Ok(())
    }
}
