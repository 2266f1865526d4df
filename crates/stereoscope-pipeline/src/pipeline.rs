use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use stereoscope_3d::{
    compute_depth_map, depth_to_pointcloud, localize_objects, CalibrationParameters, DepthMap,
    DepthStatistics, Localized3DObject, PointCloud, VoxelGrid,
};
use stereoscope_image::Image;

use crate::{
    collaborators::{MatcherError, ObjectDetector, StereoMatcher},
    config::PipelineConfig,
    error::PipelineError,
};

/// Per-frame processing options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOptions {
    /// Build the downsampled point cloud of the scene.
    pub point_cloud: bool,
    /// Color the point cloud from the left image.
    pub colored: bool,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            point_cloud: false,
            colored: true,
        }
    }
}

/// Wall-clock time spent in each stage of a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTimings {
    /// The stereo matcher call.
    pub matching: Duration,
    /// Disparity decoding and depth reconstruction.
    pub depth: Duration,
    /// The detector call.
    pub detection: Duration,
    /// 3D localization of all detections.
    pub localization: Duration,
    /// Point cloud synthesis and downsampling, when requested.
    pub point_cloud: Option<Duration>,
    /// The whole frame.
    pub total: Duration,
}

/// The outcome of one frame.
#[derive(Debug, Clone)]
pub struct FrameResult {
    frame_id: u64,
    timestamp: SystemTime,
    depth_map: DepthMap,
    depth_stats: DepthStatistics,
    objects: Vec<Localized3DObject>,
    point_cloud: Option<PointCloud>,
    timings: StageTimings,
}

impl FrameResult {
    /// The caller supplied frame identifier.
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// When the frame processing started.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// The depth map of the left view.
    pub fn depth_map(&self) -> &DepthMap {
        &self.depth_map
    }

    /// Summary statistics of the depth map.
    pub fn depth_stats(&self) -> &DepthStatistics {
        &self.depth_stats
    }

    /// One entry per detection, in detector order, valid or not.
    pub fn objects(&self) -> &[Localized3DObject] {
        &self.objects
    }

    /// Iterate the objects with a valid 3D position.
    pub fn valid_objects(&self) -> impl Iterator<Item = &Localized3DObject> {
        self.objects.iter().filter(|o| o.is_valid())
    }

    /// The downsampled point cloud, if it was requested.
    pub fn point_cloud(&self) -> Option<&PointCloud> {
        self.point_cloud.as_ref()
    }

    /// Time spent in each stage.
    pub fn timings(&self) -> &StageTimings {
        &self.timings
    }
}

/// Runs the stereo perception stages on one frame at a time.
///
/// The pipeline holds no per-frame state: `process_frame` takes `&self`, so a single
/// instance can be shared across threads to process independent frames concurrently.
pub struct StereoPipeline {
    calibration: Arc<CalibrationParameters>,
    matcher: Box<dyn StereoMatcher>,
    detector: Box<dyn ObjectDetector>,
    config: PipelineConfig,
    voxel_grid: VoxelGrid,
}

impl StereoPipeline {
    /// Create a new pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the calibration or the configuration is invalid.
    pub fn new(
        calibration: Arc<CalibrationParameters>,
        matcher: Box<dyn StereoMatcher>,
        detector: Box<dyn ObjectDetector>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        calibration.validate()?;
        config.validate()?;
        let voxel_grid = VoxelGrid::from_config(&config.point_cloud)
            .map_err(|e| PipelineError::Config(e.into()))?;

        log::info!(
            "stereo pipeline ready: {} fx={} baseline={}m depth range [{}, {}]m",
            calibration.image_size,
            calibration.fx,
            calibration.baseline,
            config.depth_range.min,
            config.depth_range.max
        );

        Ok(Self {
            calibration,
            matcher,
            detector,
            config,
            voxel_grid,
        })
    }

    /// The shared calibration.
    pub fn calibration(&self) -> &Arc<CalibrationParameters> {
        &self.calibration
    }

    /// The pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process a rectified stereo pair.
    ///
    /// Runs the matcher, decodes the disparity into depth, detects and localizes objects and,
    /// if requested, builds the point cloud. Any frame-level failure aborts the whole frame.
    ///
    /// # Arguments
    ///
    /// * `frame_id` - Identifier copied into the result.
    /// * `left` - The left (reference) rectified view.
    /// * `right` - The right rectified view.
    /// * `options` - Per-frame options.
    pub fn process_frame(
        &self,
        frame_id: u64,
        left: &Image<u8, 3>,
        right: &Image<u8, 3>,
        options: &FrameOptions,
    ) -> Result<FrameResult, PipelineError> {
        self.run_frame(frame_id, left, right, options)
            .inspect_err(|e| log::warn!("frame {frame_id} aborted: {e}"))
    }

    fn run_frame(
        &self,
        frame_id: u64,
        left: &Image<u8, 3>,
        right: &Image<u8, 3>,
        options: &FrameOptions,
    ) -> Result<FrameResult, PipelineError> {
        let timestamp = SystemTime::now();
        let start = Instant::now();
        let mut timings = StageTimings::default();

        let calibrated = self.calibration.image_size;
        if left.size() != right.size() || left.size() != calibrated {
            return Err(PipelineError::InputShape {
                left: left.size(),
                right: right.size(),
                calibrated,
            });
        }

        // stereo matching
        let now = Instant::now();
        let raw_disparity = self.matcher.compute(left, right)?;
        if raw_disparity.size() != left.size() {
            return Err(MatcherError::UnexpectedSize {
                expected: left.size(),
                found: raw_disparity.size(),
            }
            .into());
        }
        timings.matching = now.elapsed();
        self.check_deadline(start, "matching")?;

        // depth reconstruction
        let now = Instant::now();
        let disparity = raw_disparity.normalize(&self.config.disparity)?;
        let depth_map = compute_depth_map(&disparity, &self.calibration, &self.config.depth_range)?;
        let depth_stats = DepthStatistics::from_depth_map(&depth_map);
        timings.depth = now.elapsed();
        self.check_deadline(start, "depth")?;

        // detection
        let now = Instant::now();
        let detections = self.detector.detect(left)?;
        timings.detection = now.elapsed();
        self.check_deadline(start, "detection")?;

        // 3d localization
        let now = Instant::now();
        let objects = localize_objects(
            &detections,
            &depth_map,
            &self.calibration,
            &self.config.localization,
        );
        timings.localization = now.elapsed();
        self.check_deadline(start, "localization")?;

        // point cloud
        let point_cloud = if options.point_cloud {
            let now = Instant::now();
            let color = options.colored.then_some(left);
            let dense = depth_to_pointcloud(&depth_map, &self.calibration, color)?;
            let cloud = self.voxel_grid.downsample(&dense);
            timings.point_cloud = Some(now.elapsed());
            self.check_deadline(start, "point cloud")?;
            Some(cloud)
        } else {
            None
        };

        timings.total = start.elapsed();

        log::debug!(
            "frame {}: {:.1}% valid depth, {}/{} objects localized, timings {:?}",
            frame_id,
            depth_stats.valid_percentage,
            objects.iter().filter(|o| o.is_valid()).count(),
            objects.len(),
            timings
        );

        Ok(FrameResult {
            frame_id,
            timestamp,
            depth_map,
            depth_stats,
            objects,
            point_cloud,
            timings,
        })
    }

    fn check_deadline(&self, start: Instant, stage: &'static str) -> Result<(), PipelineError> {
        let Some(deadline_ms) = self.config.frame_deadline_ms else {
            return Ok(());
        };

        let deadline = Duration::from_millis(deadline_ms);
        let elapsed = start.elapsed();
        if elapsed > deadline {
            return Err(PipelineError::DeadlineExceeded {
                stage,
                elapsed,
                deadline,
            });
        }

        Ok(())
    }
}
