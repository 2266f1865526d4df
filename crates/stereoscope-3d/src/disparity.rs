use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use stereoscope_image::{Image, ImageError, ImageSize};

/// Error types for the disparity module.
#[derive(Debug, thiserror::Error)]
pub enum DisparityError {
    /// The fixed-point scale must be strictly positive and finite
    #[error("Invalid disparity scale {0}")]
    InvalidScale(f32),

    /// Error building the output images
    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Numeric encoding of the raw disparity produced by a stereo matcher.
///
/// Raw values are decoded as `raw / scale`. The default matches the 16-bit fixed-point
/// output of semi-global block matchers: four fractional bits and `-16` for pixels
/// without a match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisparityEncoding {
    /// Divisor applied to raw values to obtain disparities in pixels.
    pub scale: f32,
    /// Raw value flagging a pixel without a match, if the matcher uses one.
    pub invalid_value: Option<f64>,
}

impl Default for DisparityEncoding {
    fn default() -> Self {
        Self {
            scale: 16.0,
            invalid_value: Some(-16.0),
        }
    }
}

impl DisparityEncoding {
    /// Encoding for matchers that output floating point disparities in pixels.
    pub fn float() -> Self {
        Self {
            scale: 1.0,
            invalid_value: None,
        }
    }

    /// Check that the scale is usable.
    pub fn validate(&self) -> Result<(), DisparityError> {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(DisparityError::InvalidScale(self.scale));
        }
        Ok(())
    }
}

/// Floating point disparity in pixels with an explicit validity mask.
///
/// Invalid pixels hold `0.0` in the disparity buffer but must only be read through
/// [`DisparityMap::get`] or together with the mask.
#[derive(Debug, Clone, PartialEq)]
pub struct DisparityMap {
    disparity: Image<f32, 1>,
    mask: Image<bool, 1>,
}

impl DisparityMap {
    /// Create a disparity map from floating point disparities, marking as valid every
    /// finite value strictly greater than zero.
    pub fn from_disparity(disparity: Image<f32, 1>) -> Result<Self, DisparityError> {
        let mask = disparity
            .as_slice()
            .iter()
            .map(|&d| d.is_finite() && d > 0.0)
            .collect::<Vec<_>>();
        let mask = Image::new(disparity.size(), mask)?;

        Ok(Self { disparity, mask })
    }

    /// Size of the map in pixels.
    pub fn size(&self) -> ImageSize {
        self.disparity.size()
    }

    /// The disparity buffer, including the placeholder values of invalid pixels.
    pub fn disparity(&self) -> &Image<f32, 1> {
        &self.disparity
    }

    /// The validity mask.
    pub fn mask(&self) -> &Image<bool, 1> {
        &self.mask
    }

    /// The disparity at column `x` and row `y`, or `None` if the pixel is invalid or
    /// outside the map.
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if !self.size().contains(x, y) {
            return None;
        }
        let idx = y * self.size().width + x;
        self.mask.as_slice()[idx].then(|| self.disparity.as_slice()[idx])
    }

    /// Number of valid pixels.
    pub fn num_valid(&self) -> usize {
        self.mask.as_slice().iter().filter(|&&v| v).count()
    }
}

/// Decode a raw disparity map into pixels with a validity mask.
///
/// A pixel is valid iff its raw value differs from the encoding sentinel and the decoded
/// disparity is finite and strictly positive. Invalid pixels never carry a usable value.
///
/// # Arguments
///
/// * `raw` - The raw disparity from the stereo matcher, in any numeric type.
/// * `encoding` - The scale and sentinel of the raw values.
///
/// # Example
///
/// ```
/// use stereoscope_3d::{normalize_disparity, DisparityEncoding};
/// use stereoscope_image::Image;
///
/// let raw = Image::<i16, 1>::new([3, 1].into(), vec![-16, 0, 269]).unwrap();
/// let disparity = normalize_disparity(&raw, &DisparityEncoding::default()).unwrap();
///
/// assert_eq!(disparity.get(0, 0), None);
/// assert_eq!(disparity.get(1, 0), None);
/// assert_eq!(disparity.get(2, 0), Some(16.8125));
/// ```
pub fn normalize_disparity<T>(
    raw: &Image<T, 1>,
    encoding: &DisparityEncoding,
) -> Result<DisparityMap, DisparityError>
where
    T: ToPrimitive + Copy,
{
    encoding.validate()?;

    let num_pixels = raw.size().num_pixels();
    let mut disparity = Vec::with_capacity(num_pixels);
    let mut mask = Vec::with_capacity(num_pixels);

    for value in raw.as_slice() {
        let decoded = value.to_f64().and_then(|v| {
            if encoding.invalid_value == Some(v) {
                return None;
            }
            let d = (v / encoding.scale as f64) as f32;
            (d.is_finite() && d > 0.0).then_some(d)
        });

        disparity.push(decoded.unwrap_or(0.0));
        mask.push(decoded.is_some());
    }

    Ok(DisparityMap {
        disparity: Image::new(raw.size(), disparity)?,
        mask: Image::new(raw.size(), mask)?,
    })
}

/// Map the valid disparities linearly from their min..max span to 0..255 for display.
///
/// Invalid pixels are black. A map with a single distinct valid value renders it at 255.
pub fn disparity_to_display(disparity: &DisparityMap) -> Result<Image<u8, 1>, DisparityError> {
    let valid = || {
        disparity
            .disparity
            .as_slice()
            .iter()
            .zip(disparity.mask.as_slice())
            .filter_map(|(&d, &m)| m.then_some(d))
    };

    let (min, max) = valid().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), d| {
        (lo.min(d), hi.max(d))
    });
    let span = max - min;

    let data = disparity
        .disparity
        .as_slice()
        .iter()
        .zip(disparity.mask.as_slice())
        .map(|(&d, &m)| match m {
            false => 0,
            true if span > 0.0 => ((d - min) / span * 255.0).round() as u8,
            true => 255,
        })
        .collect();

    Ok(Image::new(disparity.size(), data)?)
}
