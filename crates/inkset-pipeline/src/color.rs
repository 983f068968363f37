//! RGB colors and the perceptual distance used throughout the pipeline.
//!
//! Palette assignment, mask thresholding and palette de-duplication all
//! measure color difference with one luma-weighted Euclidean metric,
//! [`perceptual_distance`], using the 0.30 / 0.59 / 0.11 channel weights.
//! The weights sum to 1, so the distance stays on the familiar 0..255
//! scale: pure black to pure white is exactly 255.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Red, green and blue channel weights of the perceptual metric.
pub const CHANNEL_WEIGHTS: [f64; 3] = [0.30, 0.59, 0.11];

/// Brightness at or below which a color counts as near-black.
pub const NEAR_BLACK_BRIGHTNESS: f64 = 24.0;

/// Brightness at or above which a color counts as near-white.
pub const NEAR_WHITE_BRIGHTNESS: f64 = 231.0;

/// One RGB sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    /// Red channel.
    pub r: u8,
    /// Green channel.
    pub g: u8,
    /// Blue channel.
    pub b: u8,
}

impl Color {
    /// Pure black.
    pub const BLACK: Self = Self::new(0, 0, 0);
    /// Pure white.
    pub const WHITE: Self = Self::new(255, 255, 255);

    /// Create a color from its channels.
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Build a color from floating-point channels, rounding and
    /// saturating each into `0..=255`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_f64(rgb: [f64; 3]) -> Self {
        let channel = |v: f64| {
            if v.is_nan() {
                0
            } else {
                v.round().clamp(0.0, 255.0) as u8
            }
        };
        Self::new(channel(rgb[0]), channel(rgb[1]), channel(rgb[2]))
    }

    /// Channels as floats.
    #[must_use]
    pub fn to_f64(self) -> [f64; 3] {
        [f64::from(self.r), f64::from(self.g), f64::from(self.b)]
    }

    /// Luma-weighted brightness in `0.0..=255.0`.
    #[must_use]
    pub fn brightness(self) -> f64 {
        let [r, g, b] = self.to_f64();
        CHANNEL_WEIGHTS[0].mul_add(r, CHANNEL_WEIGHTS[1].mul_add(g, CHANNEL_WEIGHTS[2] * b))
    }

    /// HSV saturation in `0.0..=1.0`. Black has zero saturation.
    #[must_use]
    pub fn saturation(self) -> f64 {
        let max = self.r.max(self.g).max(self.b);
        let min = self.r.min(self.g).min(self.b);
        if max == 0 {
            0.0
        } else {
            f64::from(max - min) / f64::from(max)
        }
    }

    /// `true` for near-black and near-white colors. These are the
    /// extreme-contrast inks that masking never rejects.
    #[must_use]
    pub fn is_extreme(self) -> bool {
        let brightness = self.brightness();
        brightness <= NEAR_BLACK_BRIGHTNESS || brightness >= NEAR_WHITE_BRIGHTNESS
    }

    /// `#rrggbb` hex notation for SVG fills.
    #[must_use]
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl From<image::Rgba<u8>> for Color {
    fn from(px: image::Rgba<u8>) -> Self {
        Self::new(px.0[0], px.0[1], px.0[2])
    }
}

/// Squared perceptual distance between two float RGB triples.
#[must_use]
pub fn perceptual_distance_sq(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    CHANNEL_WEIGHTS[0].mul_add(
        dr * dr,
        CHANNEL_WEIGHTS[1].mul_add(dg * dg, CHANNEL_WEIGHTS[2] * db * db),
    )
}

/// Luma-weighted Euclidean distance between two colors, `0.0..=255.0`.
#[must_use]
pub fn perceptual_distance(a: Color, b: Color) -> f64 {
    perceptual_distance_sq(a.to_f64(), b.to_f64()).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn black_to_white_spans_full_scale() {
        assert!((perceptual_distance(Color::BLACK, Color::WHITE) - 255.0).abs() < 1e-9);
    }

    #[test]
    fn distance_is_symmetric_and_zero_on_identity() {
        let a = Color::new(200, 30, 90);
        let b = Color::new(10, 220, 45);
        assert!((perceptual_distance(a, b) - perceptual_distance(b, a)).abs() < 1e-12);
        assert!(perceptual_distance(a, a).abs() < f64::EPSILON);
    }

    #[test]
    fn green_difference_weighs_more_than_blue() {
        let base = Color::new(0, 0, 0);
        let green = Color::new(0, 100, 0);
        let blue = Color::new(0, 0, 100);
        assert!(perceptual_distance(base, green) > perceptual_distance(base, blue));
    }

    #[test]
    fn brightness_matches_luma_weights() {
        assert!((Color::WHITE.brightness() - 255.0).abs() < 1e-9);
        assert!((Color::new(255, 0, 0).brightness() - 76.5).abs() < 1e-9);
    }

    #[test]
    fn saturation_extremes() {
        assert!(Color::BLACK.saturation().abs() < f64::EPSILON);
        assert!(Color::new(128, 128, 128).saturation().abs() < f64::EPSILON);
        assert!((Color::new(255, 0, 0).saturation() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn extreme_detection() {
        assert!(Color::BLACK.is_extreme());
        assert!(Color::new(250, 250, 245).is_extreme());
        assert!(!Color::new(128, 128, 128).is_extreme());
        assert!(!Color::new(255, 0, 0).is_extreme());
    }

    #[test]
    fn from_f64_rounds_and_saturates() {
        assert_eq!(
            Color::from_f64([-4.0, 127.6, 300.0]),
            Color::new(0, 128, 255)
        );
        assert_eq!(Color::from_f64([f64::NAN, 1.0, 2.0]), Color::new(0, 1, 2));
    }

    #[test]
    fn hex_formatting() {
        assert_eq!(Color::new(255, 0, 16).to_hex(), "#ff0010");
        assert_eq!(Color::new(1, 2, 3).to_string(), "#010203");
    }
}
