#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Stereo rig calibration parameters.
pub mod calibration;

/// Depth reconstruction from disparity.
pub mod depth;

/// Raw disparity decoding.
pub mod disparity;

/// I/O utilities for writing 3D data.
pub mod io;

/// 3D localization of 2D detections.
pub mod localization;

/// Point cloud types and dense back-projection.
pub mod pointcloud;

/// Voxel grid downsampling.
pub mod voxel_grid;

mod utils;

pub use crate::calibration::{CalibrationError, CalibrationParameters};
pub use crate::depth::{compute_depth_map, DepthMap, DepthRange, DepthStatistics};
pub use crate::disparity::{normalize_disparity, DisparityEncoding, DisparityError, DisparityMap};
pub use crate::localization::{
    localize_object, localize_objects, BoundingBox, Detection2D, LocalizationStatus,
    Localized3DObject, LocalizerConfig,
};
pub use crate::pointcloud::{depth_to_pointcloud, PointCloud, PointCloudError};
pub use crate::voxel_grid::{PointCloudConfig, VoxelGrid, VoxelGridError};
