//! Monochrome safety net.
//!
//! A global Otsu threshold on luma splits the canvas into ink (the dark
//! side) and paper. The ink mask goes through the same refine, trace and
//! fit steps as a color layer and is filled with the mean color of the
//! ink pixels. Pixels below the alpha floor count as paper.
//!
//! When even that yields nothing, [`canvas_rectangle`] gives a single
//! outline of the whole canvas in the image's mean color.

use image::{GrayImage, Luma, RgbaImage};
use imageproc::contrast::otsu_level;

use crate::color::Color;
use crate::config::PipelineConfig;
use crate::diagnostics::Clock;
use crate::fit::VectorPath;
use crate::layer::{ColorLayer, MaskVectorization, vectorize_mask};
use crate::mask::Mask;
use crate::types::Point;

/// Result of the thresholded trace.
#[derive(Debug, Clone)]
pub struct MonochromeTrace {
    /// Ink color and paths (possibly empty).
    pub layer: ColorLayer,
    /// Otsu level on luma; ink is at or below it.
    pub threshold: u8,
    /// Refine, trace and fit details.
    pub vectorization: MaskVectorization,
}

/// Threshold, refine, trace and fit the canvas as one ink.
pub fn monochrome<C: Clock>(canvas: &RgbaImage, config: &PipelineConfig, clock: &C) -> MonochromeTrace {
    let floor = config.alpha_floor.max(1);
    let luma = GrayImage::from_fn(canvas.width(), canvas.height(), |x, y| {
        let px = canvas.get_pixel(x, y);
        if px.0[3] < floor {
            Luma([u8::MAX])
        } else {
            Luma([luma_of(Color::from(*px))])
        }
    });
    let threshold = otsu_level(&luma);

    let mask = Mask::from_fn(canvas.width(), canvas.height(), |x, y| {
        canvas.get_pixel(x, y).0[3] >= floor && luma.get_pixel(x, y).0[0] <= threshold
    });
    let ink = mean_color(canvas, floor, |x, y| mask.is_set(i64::from(x), i64::from(y)))
        .unwrap_or(Color::BLACK);

    tracing::debug!(
        threshold,
        ink_pixels = mask.pixel_count(),
        ink = %ink,
        "monochrome threshold"
    );

    let vectorization = vectorize_mask(mask, config, clock);
    MonochromeTrace {
        layer: ColorLayer {
            color: ink,
            index: 0,
            paths: vectorization.paths.clone(),
        },
        threshold,
        vectorization,
    }
}

/// One closed outline of the whole canvas in the mean opaque color.
#[must_use]
pub fn canvas_rectangle(canvas: &RgbaImage, config: &PipelineConfig) -> ColorLayer {
    let floor = config.alpha_floor.max(1);
    let color = mean_color(canvas, floor, |_, _| true).unwrap_or(Color::BLACK);
    let (w, h) = (f64::from(canvas.width()), f64::from(canvas.height()));
    let paths = VectorPath::polygon(&[
        Point::new(0.0, 0.0),
        Point::new(w, 0.0),
        Point::new(w, h),
        Point::new(0.0, h),
    ])
    .into_iter()
    .collect();
    ColorLayer {
        color,
        index: 0,
        paths,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn luma_of(color: Color) -> u8 {
    color.brightness().round().clamp(0.0, 255.0) as u8
}

/// Mean color of opaque pixels selected by `include`, or `None` if none are.
#[allow(clippy::cast_precision_loss)]
fn mean_color(canvas: &RgbaImage, floor: u8, include: impl Fn(u32, u32) -> bool) -> Option<Color> {
    let (sum, count) = canvas
        .enumerate_pixels()
        .filter(|(x, y, px)| px.0[3] >= floor && include(*x, *y))
        .fold(([0u64; 3], 0u64), |(mut sum, count), (_, _, px)| {
            for (s, c) in sum.iter_mut().zip(px.0) {
                *s += u64::from(c);
            }
            (sum, count + 1)
        });
    (count > 0).then(|| {
        let n = count as f64;
        Color::from_f64(sum.map(|s| s as f64 / n))
    })
}
