//! Mask refinement by morphological opening.
//!
//! Opening (erosion, then dilation) with a 3x3 square element removes
//! regions thinner than three pixels while leaving larger shapes intact.
//! Pixels outside the mask are background in both passes; a mask that
//! fills the canvas therefore loses its border on erosion and regains
//! it on dilation.
//!
//! Rows are processed in parallel with rayon. Inside a [`crate::workers::WorkerPool`]
//! this runs on the pool's own threads.

use image::GrayImage;
use rayon::prelude::*;

use crate::mask::{BACKGROUND, FOREGROUND, Mask};

/// Erode `mask` with a 3x3 element: a pixel survives only if all of its
/// eight neighbors are foreground.
#[must_use]
pub fn erode(mask: &Mask) -> Mask {
    apply(mask, |mask, x, y| {
        neighborhood(x, y).all(|(nx, ny)| mask.is_set(nx, ny))
    })
}

/// Dilate `mask` with a 3x3 element: a pixel becomes foreground if any
/// pixel in its neighborhood is.
#[must_use]
pub fn dilate(mask: &Mask) -> Mask {
    apply(mask, |mask, x, y| {
        neighborhood(x, y).any(|(nx, ny)| mask.is_set(nx, ny))
    })
}

/// Morphological opening with a `(2k+1)x(2k+1)` square element,
/// built from `k = iterations` erosions followed by as many dilations.
///
/// `iterations == 0` returns the mask unchanged.
#[must_use]
pub fn open(mask: Mask, iterations: u32) -> Mask {
    if iterations == 0 || mask.is_empty() {
        return mask;
    }
    let mut current = mask;
    for _ in 0..iterations {
        current = erode(&current);
        if current.is_empty() {
            return current;
        }
    }
    for _ in 0..iterations {
        current = dilate(&current);
    }
    current
}

/// The 3x3 neighborhood of `(x, y)`, center included.
fn neighborhood(x: i64, y: i64) -> impl Iterator<Item = (i64, i64)> {
    (-1..=1).flat_map(move |dy| (-1..=1).map(move |dx| (x + dx, y + dy)))
}

fn apply(mask: &Mask, keep: impl Fn(&Mask, i64, i64) -> bool + Sync) -> Mask {
    let (width, height) = (mask.width(), mask.height());
    let mut out = GrayImage::new(width, height);
    let row_len = usize::try_from(width).unwrap_or(usize::MAX).max(1);

    out.par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(y, row)| {
            let y = i64::try_from(y).unwrap_or(i64::MAX);
            for (x, px) in row.iter_mut().enumerate() {
                let x = i64::try_from(x).unwrap_or(i64::MAX);
                *px = if keep(mask, x, y) { FOREGROUND } else { BACKGROUND };
            }
        });

    Mask::from_image(out)
}
