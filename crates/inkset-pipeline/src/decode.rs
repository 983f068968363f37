//! Source validation: turn a caller-supplied [`PixelBuffer`] into the
//! RGBA canvas the rest of the pipeline reads from.
//!
//! This is the only stage allowed to fail a run. Anything it accepts is
//! guaranteed to have non-zero dimensions and at least one pixel whose
//! alpha reaches the configured floor.

use image::RgbaImage;

use crate::types::{PipelineError, PixelBuffer, PixelLayout};

/// Normalize a pixel buffer to RGBA.
///
/// RGB input is treated as fully opaque.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if the buffer has no bytes,
/// [`PipelineError::ZeroDimensions`] if either axis is zero,
/// [`PipelineError::BufferSizeMismatch`] if the byte count does not
/// match the declared dimensions and layout, and
/// [`PipelineError::FullyTransparent`] if no pixel has alpha at or above
/// `alpha_floor`.
pub fn to_rgba(buffer: &PixelBuffer, alpha_floor: u8) -> Result<RgbaImage, PipelineError> {
    if buffer.bytes().is_empty() {
        return Err(PipelineError::EmptyInput);
    }
    let (width, height) = (buffer.width(), buffer.height());
    if width == 0 || height == 0 {
        return Err(PipelineError::ZeroDimensions { width, height });
    }

    let expected = usize::try_from(u64::from(width) * u64::from(height))
        .ok()
        .and_then(|n| n.checked_mul(buffer.layout().channels()))
        .unwrap_or(usize::MAX);
    let actual = buffer.bytes().len();
    if expected != actual {
        return Err(PipelineError::BufferSizeMismatch { expected, actual });
    }

    let rgba = match buffer.layout() {
        PixelLayout::Rgba8 => buffer.bytes().to_vec(),
        PixelLayout::Rgb8 => buffer
            .bytes()
            .chunks_exact(3)
            .flat_map(|px| [px[0], px[1], px[2], u8::MAX])
            .collect(),
    };
    let image = RgbaImage::from_raw(width, height, rgba)
        .ok_or(PipelineError::BufferSizeMismatch { expected, actual })?;

    if !image.pixels().any(|px| px.0[3] >= alpha_floor.max(1)) {
        return Err(PipelineError::FullyTransparent);
    }

    Ok(image)
}

impl PixelBuffer {
    /// Decode encoded image bytes (PNG, JPEG, BMP, WebP) with the
    /// `image` codec into an RGBA pixel buffer.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
    /// Returns [`PipelineError::ImageDecode`] if the format is
    /// unrecognized or the data is corrupt.
    pub fn from_encoded(bytes: &[u8]) -> Result<Self, PipelineError> {
        if bytes.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        let decoded = image::load_from_memory(bytes)?;
        Ok(Self::from_rgba(decoded.to_rgba8()))
    }
}
