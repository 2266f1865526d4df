use std::ops::Range;

use serde::{Deserialize, Serialize};
use stereoscope_image::ImageSize;

use crate::{calibration::CalibrationParameters, depth::DepthMap, utils};

/// Axis-aligned bounding box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Left edge.
    pub x_min: f32,
    /// Top edge.
    pub y_min: f32,
    /// Right edge.
    pub x_max: f32,
    /// Bottom edge.
    pub y_max: f32,
}

impl BoundingBox {
    /// Create a box from its corners.
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    /// Height in pixels.
    #[inline]
    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    /// Area in square pixels.
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// Center of the box as `(u, v)`.
    pub fn center(&self) -> (f32, f32) {
        (
            0.5 * (self.x_min + self.x_max),
            0.5 * (self.y_min + self.y_max),
        )
    }

    /// Whether the box has non-finite corners or no positive area.
    pub fn is_degenerate(&self) -> bool {
        let finite = [self.x_min, self.y_min, self.x_max, self.y_max]
            .iter()
            .all(|v| v.is_finite());
        !finite || self.width() <= 0.0 || self.height() <= 0.0
    }

    /// The box scaled by `fraction` around its center.
    pub fn scaled(&self, fraction: f32) -> Self {
        let (u, v) = self.center();
        let half_w = 0.5 * self.width() * fraction;
        let half_h = 0.5 * self.height() * fraction;
        Self::new(u - half_w, v - half_h, u + half_w, v + half_h)
    }

    /// Pixel column and row ranges covered by the box, clipped to the image.
    ///
    /// A pixel `(x, y)` covers `[x, x + 1) x [y, y + 1)`; every pixel overlapped by the box is
    /// included. Returns `None` when the box does not overlap the image.
    pub fn pixel_ranges(&self, size: ImageSize) -> Option<(Range<usize>, Range<usize>)> {
        let clip = |lo: f32, hi: f32, len: usize| -> Option<Range<usize>> {
            let start = lo.floor().max(0.0);
            let end = hi.ceil().min(len as f32);
            (end > start).then(|| start as usize..end as usize)
        };

        let cols = clip(self.x_min, self.x_max, size.width)?;
        let rows = clip(self.y_min, self.y_max, size.height)?;
        Some((cols, rows))
    }
}

/// A 2D detection from the object detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection2D {
    /// The bounding box in pixels.
    pub bbox: BoundingBox,
    /// The class index of the detector model.
    pub class_id: u32,
    /// The human readable class label.
    pub class_name: String,
    /// The detection confidence in `[0, 1]`.
    pub confidence: f32,
}

/// Parameters of the 3D localizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizerConfig {
    /// Linear fraction of the box, centered, sampled for depth. Edges of the box mostly
    /// see background.
    pub inner_fraction: f32,
    /// Minimum fraction of valid depth pixels in the sampled region.
    pub min_valid_fraction: f32,
}

impl Default for LocalizerConfig {
    fn default() -> Self {
        Self {
            inner_fraction: 0.5,
            min_valid_fraction: 0.05,
        }
    }
}

impl LocalizerConfig {
    /// Whether both fractions lie in `(0, 1]`.
    pub fn is_valid(&self) -> bool {
        let unit = |v: f32| v > 0.0 && v <= 1.0;
        unit(self.inner_fraction) && unit(self.min_valid_fraction)
    }
}

/// Outcome of localizing one detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalizationStatus {
    /// A position was estimated.
    Valid,
    /// The box has no positive area or non-finite corners.
    DegenerateBox,
    /// The sampled region lies outside the image.
    OutOfBounds,
    /// Too few valid depth pixels in the sampled region.
    InsufficientDepth {
        /// Valid depth pixels found.
        valid_samples: usize,
        /// Valid depth pixels required.
        required: usize,
    },
}

/// A detection annotated with its position in the camera frame.
///
/// The position is `None` unless the status is [`LocalizationStatus::Valid`]; an invalid
/// object never reports a position, not even the origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Localized3DObject {
    detection: Detection2D,
    position: Option<[f64; 3]>,
    depth: Option<f32>,
    num_samples: usize,
    status: LocalizationStatus,
}

impl Localized3DObject {
    fn invalid(detection: &Detection2D, status: LocalizationStatus, num_samples: usize) -> Self {
        Self {
            detection: detection.clone(),
            position: None,
            depth: None,
            num_samples,
            status,
        }
    }

    /// The source detection.
    pub fn detection(&self) -> &Detection2D {
        &self.detection
    }

    /// The `(X, Y, Z)` position in meters, camera frame (X right, Y down, Z forward).
    pub fn position(&self) -> Option<[f64; 3]> {
        self.position
    }

    /// The representative (median) depth in meters.
    pub fn depth(&self) -> Option<f32> {
        self.depth
    }

    /// Number of valid depth samples found in the sampled region.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// The localization outcome.
    pub fn status(&self) -> LocalizationStatus {
        self.status
    }

    /// Whether a position was estimated.
    pub fn is_valid(&self) -> bool {
        self.status == LocalizationStatus::Valid
    }

    /// Euclidean distance from the camera center in meters.
    pub fn distance(&self) -> Option<f64> {
        self.position
            .map(|[x, y, z]| (x * x + y * y + z * z).sqrt())
    }
}

/// Estimate the 3D position of a detection from the depth map.
///
/// Depth is sampled in the central region of the box (see
/// [`LocalizerConfig::inner_fraction`]) and summarized by its median, which is robust to
/// background bleed and mismatches. The box center is then back-projected at that depth.
///
/// Boxes that are degenerate, outside the image or without enough valid depth yield an
/// object without position and with the corresponding [`LocalizationStatus`].
///
/// # Example
///
/// ```
/// use stereoscope_3d::{
///     localize_object, BoundingBox, CalibrationParameters, DepthMap, DepthRange, Detection2D,
///     LocalizerConfig,
/// };
/// use stereoscope_image::Image;
///
/// let calib = CalibrationParameters::new(100.0, 100.0, 8.0, 8.0, 0.1, [16, 16].into()).unwrap();
/// let depth = DepthMap::from_depth(
///     Image::from_size_val([16, 16].into(), 2.0).unwrap(),
///     &DepthRange::default(),
/// ).unwrap();
/// let detection = Detection2D {
///     bbox: BoundingBox::new(8.0, 4.0, 16.0, 12.0),
///     class_id: 0,
///     class_name: "person".to_string(),
///     confidence: 0.9,
/// };
///
/// let object = localize_object(&detection, &depth, &calib, &LocalizerConfig::default());
/// assert_eq!(object.position(), Some([0.08, 0.0, 2.0]));
/// ```
pub fn localize_object(
    detection: &Detection2D,
    depth_map: &DepthMap,
    calibration: &CalibrationParameters,
    config: &LocalizerConfig,
) -> Localized3DObject {
    let bbox = &detection.bbox;
    if bbox.is_degenerate() {
        return Localized3DObject::invalid(detection, LocalizationStatus::DegenerateBox, 0);
    }

    let size = depth_map.size();
    let Some((cols, rows)) = bbox.scaled(config.inner_fraction).pixel_ranges(size) else {
        return Localized3DObject::invalid(detection, LocalizationStatus::OutOfBounds, 0);
    };

    let region_pixels = cols.len() * rows.len();
    let mut samples = Vec::with_capacity(region_pixels);
    for y in rows {
        let depth_row = &depth_map.depth().row(y)[cols.clone()];
        let mask_row = &depth_map.mask().row(y)[cols.clone()];
        samples.extend(
            depth_row
                .iter()
                .zip(mask_row)
                .filter_map(|(&z, &valid)| valid.then_some(z)),
        );
    }

    let num_samples = samples.len();
    let required = ((config.min_valid_fraction * region_pixels as f32).ceil() as usize).max(1);
    if num_samples < required {
        return Localized3DObject::invalid(
            detection,
            LocalizationStatus::InsufficientDepth {
                valid_samples: num_samples,
                required,
            },
            num_samples,
        );
    }

    let Some(depth) = utils::median(&mut samples) else {
        return Localized3DObject::invalid(
            detection,
            LocalizationStatus::InsufficientDepth {
                valid_samples: 0,
                required,
            },
            0,
        );
    };

    let (u, v) = bbox.center();
    let position = calibration.backproject(u as f64, v as f64, depth as f64);

    Localized3DObject {
        detection: detection.clone(),
        position: Some(position),
        depth: Some(depth),
        num_samples,
        status: LocalizationStatus::Valid,
    }
}

/// Localize every detection of a frame, preserving the detection order.
pub fn localize_objects(
    detections: &[Detection2D],
    depth_map: &DepthMap,
    calibration: &CalibrationParameters,
    config: &LocalizerConfig,
) -> Vec<Localized3DObject> {
    let objects = detections
        .iter()
        .map(|detection| localize_object(detection, depth_map, calibration, config))
        .collect::<Vec<_>>();

    let num_valid = objects.iter().filter(|o| o.is_valid()).count();
    log::debug!("localized {}/{} detections", num_valid, objects.len());

    objects
}
