//! Bounded-resolution resampling.
//!
//! Two bounds are applied to every source: the working canvas is
//! limited to `working_resolution` on its longest axis, and the palette
//! sample is a further reduction of the canvas limited to
//! `palette_resolution`. Both keep worst-case cost independent of the
//! source size.
//!
//! Images already at or below the target resolution are returned
//! unchanged.

use std::fmt;

use image::RgbaImage;
use image::imageops::{self, FilterType};
use serde::{Deserialize, Serialize};

/// Resampling filter used when downsampling.
///
/// Ordered from fastest/lowest-quality to slowest/highest-quality,
/// with a `Disabled` variant to skip downsampling entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DownsampleFilter {
    /// Skip downsampling regardless of image size.
    Disabled,
    /// Nearest-neighbor: fastest, keeps hard color edges.
    Nearest,
    /// Bilinear interpolation: fast, decent quality.
    #[default]
    Triangle,
    /// Bicubic (Catmull-Rom): moderate speed, good quality.
    CatmullRom,
    /// Gaussian: moderate speed, smooth output.
    Gaussian,
    /// Lanczos with 3 lobes: slowest, sharpest.
    Lanczos3,
}

impl DownsampleFilter {
    /// Convert to the `image` crate's `FilterType`.
    ///
    /// Returns `None` for [`DownsampleFilter::Disabled`].
    const fn to_image_filter(self) -> Option<FilterType> {
        match self {
            Self::Disabled => None,
            Self::Nearest => Some(FilterType::Nearest),
            Self::Triangle => Some(FilterType::Triangle),
            Self::CatmullRom => Some(FilterType::CatmullRom),
            Self::Gaussian => Some(FilterType::Gaussian),
            Self::Lanczos3 => Some(FilterType::Lanczos3),
        }
    }
}

impl fmt::Display for DownsampleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("Disabled"),
            Self::Nearest => f.write_str("Nearest"),
            Self::Triangle => f.write_str("Triangle"),
            Self::CatmullRom => f.write_str("CatmullRom"),
            Self::Gaussian => f.write_str("Gaussian"),
            Self::Lanczos3 => f.write_str("Lanczos3"),
        }
    }
}

/// Downsample so the longest axis is at most `max_dimension` pixels.
///
/// Returns the (possibly unchanged) image and whether resampling was
/// actually applied. Aspect ratio is preserved; neither axis drops
/// below one pixel.
#[must_use]
pub fn downsample(
    image: &RgbaImage,
    max_dimension: u32,
    filter: DownsampleFilter,
) -> (RgbaImage, bool) {
    let Some(image_filter) = filter.to_image_filter() else {
        return (image.clone(), false);
    };

    let (w, h) = image.dimensions();
    let long_axis = w.max(h);
    let max_dimension = max_dimension.max(1);

    if long_axis <= max_dimension {
        return (image.clone(), false);
    }

    let (new_w, new_h) = scaled_dimensions(w, h, max_dimension);
    (imageops::resize(image, new_w, new_h, image_filter), true)
}

/// Aspect-preserving target size whose longest axis equals `max_dimension`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scaled_dimensions(w: u32, h: u32, max_dimension: u32) -> (u32, u32) {
    let scale = f64::from(max_dimension) / f64::from(w.max(h));
    let sw = (f64::from(w) * scale).round().max(1.0) as u32;
    let sh = (f64::from(h) * scale).round().max(1.0) as u32;
    (sw.min(max_dimension), sh.min(max_dimension))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_image(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, image::Rgba([128, 128, 128, 255]))
    }

    #[test]
    fn default_filter_is_triangle() {
        assert_eq!(DownsampleFilter::default(), DownsampleFilter::Triangle);
    }

    #[test]
    fn no_downsample_when_already_small() {
        let (result, applied) = downsample(&test_image(100, 80), 256, DownsampleFilter::Triangle);
        assert!(!applied);
        assert_eq!(result.dimensions(), (100, 80));
    }

    #[test]
    fn downsample_landscape() {
        let (result, applied) =
            downsample(&test_image(1024, 768), 256, DownsampleFilter::Triangle);
        assert!(applied);
        assert_eq!(result.dimensions(), (256, 192));
    }

    #[test]
    fn downsample_portrait() {
        let (result, applied) = downsample(&test_image(600, 1200), 256, DownsampleFilter::Nearest);
        assert!(applied);
        assert_eq!(result.dimensions(), (128, 256));
    }

    #[test]
    fn extreme_aspect_keeps_one_pixel() {
        let (result, applied) = downsample(&test_image(4000, 2), 100, DownsampleFilter::Triangle);
        assert!(applied);
        assert_eq!(result.dimensions(), (100, 1));
    }

    #[test]
    fn disabled_filter_skips_even_large_image() {
        let (result, applied) =
            downsample(&test_image(1024, 768), 256, DownsampleFilter::Disabled);
        assert!(!applied);
        assert_eq!(result.dimensions(), (1024, 768));
    }

    #[test]
    fn display_names() {
        assert_eq!(DownsampleFilter::CatmullRom.to_string(), "CatmullRom");
        assert_eq!(DownsampleFilter::Disabled.to_string(), "Disabled");
    }
}
