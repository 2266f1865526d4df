use stereoscope_3d::{
    normalize_disparity, Detection2D, DisparityEncoding, DisparityError, DisparityMap,
};
use stereoscope_image::{Image, ImageSize};

/// Error reported by a stereo matcher.
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    /// The two views differ in size
    #[error("Left and right images differ in size ({0} vs {1})")]
    SizeMismatch(ImageSize, ImageSize),

    /// The disparity does not have the size of the input views
    #[error("Disparity size {found} does not match the input size {expected}")]
    UnexpectedSize {
        /// Size of the input views.
        expected: ImageSize,
        /// Size of the returned disparity.
        found: ImageSize,
    },

    /// The matcher backend failed
    #[error("Stereo matcher failed: {0}")]
    Backend(String),
}

/// Error reported by an object detector.
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    /// The detector backend failed
    #[error("Object detector failed: {0}")]
    Backend(String),
}

/// Raw disparity as produced by a stereo matcher, in the matcher's native numeric type.
#[derive(Debug, Clone, PartialEq)]
pub enum RawDisparity {
    /// Signed 16-bit disparity, typically fixed point.
    I16(Image<i16, 1>),
    /// Unsigned 16-bit disparity.
    U16(Image<u16, 1>),
    /// Floating point disparity.
    F32(Image<f32, 1>),
}

impl RawDisparity {
    /// Size of the disparity map.
    pub fn size(&self) -> ImageSize {
        match self {
            RawDisparity::I16(image) => image.size(),
            RawDisparity::U16(image) => image.size(),
            RawDisparity::F32(image) => image.size(),
        }
    }

    /// Decode into a [`DisparityMap`] with the given encoding.
    pub fn normalize(&self, encoding: &DisparityEncoding) -> Result<DisparityMap, DisparityError> {
        match self {
            RawDisparity::I16(image) => normalize_disparity(image, encoding),
            RawDisparity::U16(image) => normalize_disparity(image, encoding),
            RawDisparity::F32(image) => normalize_disparity(image, encoding),
        }
    }
}

/// Computes a disparity map from a rectified stereo pair.
///
/// Implementations wrap the actual matching algorithm. The pipeline only relies on the
/// output being aligned with the left view and encoded as configured in
/// [`crate::PipelineConfig::disparity`].
pub trait StereoMatcher: Send + Sync {
    /// Compute the disparity of `left` with respect to `right`.
    fn compute(
        &self,
        left: &Image<u8, 3>,
        right: &Image<u8, 3>,
    ) -> Result<RawDisparity, MatcherError>;
}

/// Detects objects in a color image.
pub trait ObjectDetector: Send + Sync {
    /// Detect the objects of `image`. Finding nothing is not an error and yields an empty list.
    fn detect(&self, image: &Image<u8, 3>) -> Result<Vec<Detection2D>, DetectorError>;
}
