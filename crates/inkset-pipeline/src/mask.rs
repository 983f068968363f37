//! Per-color binary occupancy masks.
//!
//! A pixel belongs to the mask of palette color `C` when it is opaque
//! enough (alpha at or above the floor) and its perceptual distance to
//! `C` is within the tolerance for `C`. Masks of different colors may
//! overlap; anti-aliased fringe pixels are deliberately captured by more
//! than one ink.

use image::{GrayImage, Luma, RgbaImage};

use crate::color::{Color, perceptual_distance};
use crate::config::{PipelineConfig, ToleranceMode};
use crate::palette::PaletteEntry;
use crate::types::Dimensions;

/// Byte value of a foreground pixel.
pub const FOREGROUND: u8 = 255;

/// Byte value of a background pixel.
pub const BACKGROUND: u8 = 0;

/// Binary occupancy bitmap, one byte per pixel (0 or 255).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    image: GrayImage,
    pixel_count: u64,
}

impl Mask {
    /// Wrap a grayscale image, treating every non-zero byte as foreground.
    #[must_use]
    pub fn from_image(mut image: GrayImage) -> Self {
        let mut pixel_count = 0;
        for px in image.pixels_mut() {
            if px.0[0] == BACKGROUND {
                continue;
            }
            px.0[0] = FOREGROUND;
            pixel_count += 1;
        }
        Self { image, pixel_count }
    }

    /// Build a mask from a predicate over pixel coordinates.
    #[must_use]
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        Self::from_image(GrayImage::from_fn(width, height, |x, y| {
            Luma([if f(x, y) { FOREGROUND } else { BACKGROUND }])
        }))
    }

    /// An all-background mask.
    #[must_use]
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            image: GrayImage::new(width, height),
            pixel_count: 0,
        }
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Mask dimensions.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width(),
            height: self.height(),
        }
    }

    /// Whether `(x, y)` is foreground. Out-of-bounds reads are background.
    #[must_use]
    pub fn is_set(&self, x: i64, y: i64) -> bool {
        match (u32::try_from(x), u32::try_from(y)) {
            (Ok(x), Ok(y)) if x < self.width() && y < self.height() => {
                self.image.get_pixel(x, y).0[0] != BACKGROUND
            }
            _ => false,
        }
    }

    /// Number of foreground pixels.
    #[must_use]
    pub const fn pixel_count(&self) -> u64 {
        self.pixel_count
    }

    /// `true` when no pixel is foreground.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pixel_count == 0
    }

    /// Fraction of the canvas that is foreground, in `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coverage(&self) -> f64 {
        let area = self.dimensions().area();
        if area == 0 {
            0.0
        } else {
            self.pixel_count as f64 / area as f64
        }
    }

    /// Underlying 0/255 bitmap.
    #[must_use]
    pub const fn as_image(&self) -> &GrayImage {
        &self.image
    }

    /// Raw row-major bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.image.as_raw()
    }
}

/// Result of building one color's mask.
#[derive(Debug, Clone, PartialEq)]
pub enum MaskDecision {
    /// The mask is significant enough to trace.
    Kept(Mask),
    /// Coverage fell below the significance threshold.
    Rejected {
        /// Foreground pixels found.
        pixel_count: u64,
        /// Fraction of the canvas covered.
        coverage: f64,
        /// Coverage that would have been required.
        required: f64,
    },
}

/// Perceptual tolerance for one palette color.
///
/// In adaptive mode the base tolerance widens by up to 50% for dark
/// colors and up to 25% for colors whose saturation is near 0 or 1.
#[must_use]
pub fn tolerance_for(color: Color, config: &PipelineConfig) -> f64 {
    let base = config.color_tolerance;
    match config.color_tolerance_mode {
        ToleranceMode::Fixed => base,
        ToleranceMode::Adaptive => {
            let darkness = 1.0 - color.brightness() / 255.0;
            let extremity = 2.0f64.mul_add(color.saturation(), -1.0).abs();
            (base * 0.5f64.mul_add(darkness, 1.0) * 0.25f64.mul_add(extremity, 1.0)).min(255.0)
        }
    }
}

/// Threshold `canvas` against one palette entry.
///
/// Reserved and extreme-contrast entries are always kept, even when
/// their mask is empty.
#[must_use]
pub fn build_mask(canvas: &RgbaImage, entry: &PaletteEntry, config: &PipelineConfig) -> MaskDecision {
    let tolerance = tolerance_for(entry.color, config);
    let floor = config.alpha_floor.max(1);

    let mask = Mask::from_image(GrayImage::from_fn(canvas.width(), canvas.height(), |x, y| {
        let px = canvas.get_pixel(x, y);
        let inside = px.0[3] >= floor && perceptual_distance(Color::from(*px), entry.color) <= tolerance;
        Luma([if inside { FOREGROUND } else { BACKGROUND }])
    }));

    if entry.reserved || entry.color.is_extreme() {
        return MaskDecision::Kept(mask);
    }

    let required = entry.weight * config.mask_significance;
    let coverage = mask.coverage();
    if mask.pixel_count() < u64::from(config.minimum_area) || coverage < required {
        return MaskDecision::Rejected {
            pixel_count: mask.pixel_count(),
            coverage,
            required,
        };
    }

    MaskDecision::Kept(mask)
}
