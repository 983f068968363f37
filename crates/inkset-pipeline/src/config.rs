//! Pipeline configuration.
//!
//! Every knob has a `DEFAULT_*` associated constant so callers (the
//! bench CLI in particular) can derive their own defaults from one
//! place. The pipeline never rejects a configuration: it runs on
//! [`PipelineConfig::clamped`], which pulls out-of-range values back
//! into their supported ranges. [`PipelineConfig::validate`] is there for
//! callers that would rather report bad input than have it silently
//! corrected.

use serde::{Deserialize, Serialize};

use crate::contour::ContourTracerKind;
use crate::downsample::DownsampleFilter;
use crate::types::PipelineError;

/// Smallest palette the extractor will be asked for.
pub const MIN_COLORS: usize = 2;

/// Largest palette the extractor will be asked for.
pub const MAX_COLORS: usize = 10;

/// How the per-color mask tolerance is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ToleranceMode {
    /// Every palette color uses `color_tolerance` unchanged.
    Fixed,
    /// Tolerance widens for dark colors and for very high or very low
    /// saturation, so anti-aliased fringes land in the same ink.
    #[default]
    Adaptive,
}

/// Configuration for a vectorization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Upper bound on palette size (2..=10).
    pub max_colors: usize,

    /// Fixed or adaptive per-color mask tolerance.
    pub color_tolerance_mode: ToleranceMode,

    /// Base perceptual-distance tolerance used when building masks
    /// (same 0..255 scale as [`crate::color::perceptual_distance`]).
    pub color_tolerance: f64,

    /// Target mean error, in pixels, for cubic Bezier fitting.
    pub path_fitting_tolerance: f64,

    /// Douglas-Peucker tolerance in pixels.
    pub simplify_tolerance: f64,

    /// Regions covering fewer pixels than this are noise.
    pub minimum_area: u32,

    /// Turning angle above which a simplified vertex is a corner.
    /// Clamped to 30..=60 degrees.
    pub corner_threshold_degrees: f64,

    /// Most paths any single color layer may contribute.
    pub max_paths_per_layer: usize,

    /// Most paths the whole document may contain.
    pub max_total_paths: usize,

    /// Upper bound on the serialized SVG size in bytes.
    pub max_document_bytes: usize,

    /// Seed for the k-means++ PRNG.
    pub seed: u64,

    /// Longest canvas axis in pixels; larger sources are downsampled.
    pub working_resolution: u32,

    /// Longest axis of the image sampled for palette extraction.
    pub palette_resolution: u32,

    /// Resampling filter for both downsampling steps.
    pub downsample_filter: DownsampleFilter,

    /// Cap on k-means refinement iterations.
    pub kmeans_max_iterations: usize,

    /// k-means stops once total centroid movement drops below this.
    pub kmeans_convergence: f64,

    /// Minimum pairwise perceptual distance between palette entries.
    pub min_palette_distance: f64,

    /// Append a reserved black or white entry for contrast.
    pub force_contrast: bool,

    /// Pixels with alpha below this value never belong to any mask.
    pub alpha_floor: u8,

    /// Masks whose coverage is below `mask_significance` times the
    /// palette weight of their color are rejected.
    pub mask_significance: f64,

    /// Number of 3x3 opening passes applied to each mask.
    pub morphology_iterations: u32,

    /// Which boundary tracing algorithm to use.
    pub contour_tracer: ContourTracerKind,

    /// Boundary polygons with fewer points than this are discarded.
    pub min_vertices: usize,

    /// Cap on Bezier control-point search iterations.
    pub bezier_max_iterations: usize,

    /// Decimal places written for path coordinates.
    pub coordinate_precision: u8,

    /// Worker threads for the per-color fan-out. `0` uses the available
    /// parallelism, `1` runs every layer and its row work sequentially.
    pub worker_threads: usize,
}

impl PipelineConfig {
    /// Default value for [`max_colors`](Self::max_colors).
    pub const DEFAULT_MAX_COLORS: usize = 6;
    /// Default value for [`color_tolerance_mode`](Self::color_tolerance_mode).
    pub const DEFAULT_COLOR_TOLERANCE_MODE: ToleranceMode = ToleranceMode::Adaptive;
    /// Default value for [`color_tolerance`](Self::color_tolerance).
    pub const DEFAULT_COLOR_TOLERANCE: f64 = 48.0;
    /// Default value for [`path_fitting_tolerance`](Self::path_fitting_tolerance).
    pub const DEFAULT_PATH_FITTING_TOLERANCE: f64 = 1.0;
    /// Default value for [`simplify_tolerance`](Self::simplify_tolerance).
    pub const DEFAULT_SIMPLIFY_TOLERANCE: f64 = 1.5;
    /// Default value for [`minimum_area`](Self::minimum_area).
    pub const DEFAULT_MINIMUM_AREA: u32 = 16;
    /// Default value for [`corner_threshold_degrees`](Self::corner_threshold_degrees).
    pub const DEFAULT_CORNER_THRESHOLD_DEGREES: f64 = 45.0;
    /// Default value for [`max_paths_per_layer`](Self::max_paths_per_layer).
    pub const DEFAULT_MAX_PATHS_PER_LAYER: usize = 400;
    /// Default value for [`max_total_paths`](Self::max_total_paths).
    pub const DEFAULT_MAX_TOTAL_PATHS: usize = 1500;
    /// Default value for [`max_document_bytes`](Self::max_document_bytes).
    pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 1024 * 1024;
    /// Default value for [`seed`](Self::seed).
    pub const DEFAULT_SEED: u64 = 42;
    /// Default value for [`working_resolution`](Self::working_resolution).
    pub const DEFAULT_WORKING_RESOLUTION: u32 = 1024;
    /// Default value for [`palette_resolution`](Self::palette_resolution).
    pub const DEFAULT_PALETTE_RESOLUTION: u32 = 128;
    /// Default value for [`downsample_filter`](Self::downsample_filter).
    pub const DEFAULT_DOWNSAMPLE_FILTER: DownsampleFilter = DownsampleFilter::Triangle;
    /// Default value for [`kmeans_max_iterations`](Self::kmeans_max_iterations).
    pub const DEFAULT_KMEANS_MAX_ITERATIONS: usize = 32;
    /// Default value for [`kmeans_convergence`](Self::kmeans_convergence).
    pub const DEFAULT_KMEANS_CONVERGENCE: f64 = 0.5;
    /// Default value for [`min_palette_distance`](Self::min_palette_distance).
    pub const DEFAULT_MIN_PALETTE_DISTANCE: f64 = 24.0;
    /// Default value for [`alpha_floor`](Self::alpha_floor).
    pub const DEFAULT_ALPHA_FLOOR: u8 = 128;
    /// Default value for [`mask_significance`](Self::mask_significance).
    pub const DEFAULT_MASK_SIGNIFICANCE: f64 = 0.2;
    /// Default value for [`morphology_iterations`](Self::morphology_iterations).
    pub const DEFAULT_MORPHOLOGY_ITERATIONS: u32 = 1;
    /// Default value for [`min_vertices`](Self::min_vertices).
    pub const DEFAULT_MIN_VERTICES: usize = 4;
    /// Default value for [`contour_tracer`](Self::contour_tracer).
    pub const DEFAULT_CONTOUR_TRACER: ContourTracerKind = ContourTracerKind::MooreNeighbor;
    /// Default value for [`bezier_max_iterations`](Self::bezier_max_iterations).
    pub const DEFAULT_BEZIER_MAX_ITERATIONS: usize = 24;
    /// Default value for [`coordinate_precision`](Self::coordinate_precision).
    pub const DEFAULT_COORDINATE_PRECISION: u8 = 2;

    /// Supported corner threshold range in degrees.
    pub const CORNER_THRESHOLD_RANGE: (f64, f64) = (30.0, 60.0);

    /// Largest coordinate precision the serializer will emit.
    pub const MAX_COORDINATE_PRECISION: u8 = 4;

    /// Return a copy with every field pulled into its supported range.
    ///
    /// Non-finite floats fall back to their defaults.
    #[must_use]
    pub fn clamped(&self) -> Self {
        let defaults = Self::default();
        let finite_or = |v: f64, d: f64| if v.is_finite() { v } else { d };
        let (corner_lo, corner_hi) = Self::CORNER_THRESHOLD_RANGE;

        Self {
            max_colors: self.max_colors.clamp(MIN_COLORS, MAX_COLORS),
            color_tolerance_mode: self.color_tolerance_mode,
            color_tolerance: finite_or(self.color_tolerance, defaults.color_tolerance)
                .clamp(0.0, 255.0),
            path_fitting_tolerance: finite_or(
                self.path_fitting_tolerance,
                defaults.path_fitting_tolerance,
            )
            .max(0.0),
            simplify_tolerance: finite_or(self.simplify_tolerance, defaults.simplify_tolerance)
                .max(0.0),
            minimum_area: self.minimum_area,
            corner_threshold_degrees: finite_or(
                self.corner_threshold_degrees,
                defaults.corner_threshold_degrees,
            )
            .clamp(corner_lo, corner_hi),
            max_paths_per_layer: self.max_paths_per_layer,
            max_total_paths: self.max_total_paths,
            max_document_bytes: self.max_document_bytes,
            seed: self.seed,
            working_resolution: self.working_resolution.max(1),
            palette_resolution: self.palette_resolution.max(1),
            downsample_filter: self.downsample_filter,
            kmeans_max_iterations: self.kmeans_max_iterations.max(1),
            kmeans_convergence: finite_or(self.kmeans_convergence, defaults.kmeans_convergence)
                .max(0.0),
            min_palette_distance: finite_or(
                self.min_palette_distance,
                defaults.min_palette_distance,
            )
            .clamp(0.0, 255.0),
            force_contrast: self.force_contrast,
            alpha_floor: self.alpha_floor,
            mask_significance: finite_or(self.mask_significance, defaults.mask_significance)
                .clamp(0.0, 1.0),
            morphology_iterations: self.morphology_iterations,
            contour_tracer: self.contour_tracer,
            min_vertices: self.min_vertices.max(4),
            bezier_max_iterations: self.bezier_max_iterations,
            coordinate_precision: self
                .coordinate_precision
                .min(Self::MAX_COORDINATE_PRECISION),
            worker_threads: self.worker_threads,
        }
    }

    /// Check the configuration without correcting it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first field
    /// that lies outside its supported range.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let (corner_lo, corner_hi) = Self::CORNER_THRESHOLD_RANGE;
        let invalid = |msg: String| Err(PipelineError::InvalidConfig(msg));

        if !(MIN_COLORS..=MAX_COLORS).contains(&self.max_colors) {
            return invalid(format!(
                "max_colors must be in {MIN_COLORS}..={MAX_COLORS}, got {}",
                self.max_colors
            ));
        }
        if !(0.0..=255.0).contains(&self.color_tolerance) {
            return invalid(format!(
                "color_tolerance must be in 0..=255, got {}",
                self.color_tolerance
            ));
        }
        if self.path_fitting_tolerance.is_nan() || self.path_fitting_tolerance < 0.0 {
            return invalid(format!(
                "path_fitting_tolerance must be non-negative, got {}",
                self.path_fitting_tolerance
            ));
        }
        if self.simplify_tolerance.is_nan() || self.simplify_tolerance < 0.0 {
            return invalid(format!(
                "simplify_tolerance must be non-negative, got {}",
                self.simplify_tolerance
            ));
        }
        if !(corner_lo..=corner_hi).contains(&self.corner_threshold_degrees) {
            return invalid(format!(
                "corner_threshold_degrees must be in {corner_lo}..={corner_hi}, got {}",
                self.corner_threshold_degrees
            ));
        }
        if self.working_resolution == 0 || self.palette_resolution == 0 {
            return invalid("working and palette resolutions must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.mask_significance) {
            return invalid(format!(
                "mask_significance must be in 0..=1, got {}",
                self.mask_significance
            ));
        }
        if self.min_vertices < 4 {
            return invalid(format!(
                "min_vertices must be at least 4, got {}",
                self.min_vertices
            ));
        }
        if self.coordinate_precision > Self::MAX_COORDINATE_PRECISION {
            return invalid(format!(
                "coordinate_precision must be at most {}, got {}",
                Self::MAX_COORDINATE_PRECISION,
                self.coordinate_precision
            ));
        }
        Ok(())
    }

    /// Corner threshold in radians.
    #[must_use]
    pub fn corner_threshold_radians(&self) -> f64 {
        self.corner_threshold_degrees.to_radians()
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_colors: Self::DEFAULT_MAX_COLORS,
            color_tolerance_mode: Self::DEFAULT_COLOR_TOLERANCE_MODE,
            color_tolerance: Self::DEFAULT_COLOR_TOLERANCE,
            path_fitting_tolerance: Self::DEFAULT_PATH_FITTING_TOLERANCE,
            simplify_tolerance: Self::DEFAULT_SIMPLIFY_TOLERANCE,
            minimum_area: Self::DEFAULT_MINIMUM_AREA,
            corner_threshold_degrees: Self::DEFAULT_CORNER_THRESHOLD_DEGREES,
            max_paths_per_layer: Self::DEFAULT_MAX_PATHS_PER_LAYER,
            max_total_paths: Self::DEFAULT_MAX_TOTAL_PATHS,
            max_document_bytes: Self::DEFAULT_MAX_DOCUMENT_BYTES,
            seed: Self::DEFAULT_SEED,
            working_resolution: Self::DEFAULT_WORKING_RESOLUTION,
            palette_resolution: Self::DEFAULT_PALETTE_RESOLUTION,
            downsample_filter: Self::DEFAULT_DOWNSAMPLE_FILTER,
            kmeans_max_iterations: Self::DEFAULT_KMEANS_MAX_ITERATIONS,
            kmeans_convergence: Self::DEFAULT_KMEANS_CONVERGENCE,
            min_palette_distance: Self::DEFAULT_MIN_PALETTE_DISTANCE,
            force_contrast: false,
            alpha_floor: Self::DEFAULT_ALPHA_FLOOR,
            mask_significance: Self::DEFAULT_MASK_SIGNIFICANCE,
            morphology_iterations: Self::DEFAULT_MORPHOLOGY_ITERATIONS,
            contour_tracer: Self::DEFAULT_CONTOUR_TRACER,
            min_vertices: Self::DEFAULT_MIN_VERTICES,
            bezier_max_iterations: Self::DEFAULT_BEZIER_MAX_ITERATIONS,
            coordinate_precision: Self::DEFAULT_COORDINATE_PRECISION,
            worker_threads: 0,
        }
    }
}
