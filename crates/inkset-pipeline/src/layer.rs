//! The per-color sub-pipeline: mask, refine, trace, simplify.
//!
//! [`process_layer`] is the unit the worker pool fans out. It only reads
//! the shared canvas and returns everything it produced, including the
//! degradations it ran into, for the driver to merge in palette order.

use image::RgbaImage;

use crate::color::Color;
use crate::config::PipelineConfig;
use crate::contour::{ContourTracer, TraceFilter};
use crate::diagnostics::{Clock, Degradation, LayerDiagnostics, StageDiagnostics, StageMetrics};
use crate::fit::{FitSettings, VectorPath, fit_polygon};
use crate::mask::{Mask, MaskDecision, build_mask, tolerance_for};
use crate::morphology;
use crate::palette::PaletteEntry;

/// Fitted paths for one palette color.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorLayer {
    /// Fill color.
    pub color: Color,
    /// Palette index.
    pub index: usize,
    /// Closed outlines, in tracing order.
    pub paths: Vec<VectorPath>,
}

/// Everything one color's sub-pipeline produced.
#[derive(Debug, Clone)]
pub struct LayerOutput {
    /// `None` when the mask was rejected or nothing survived tracing.
    pub layer: Option<ColorLayer>,
    /// Per-step timing and counts.
    pub diagnostics: LayerDiagnostics,
    /// Recoverable conditions hit along the way.
    pub degradations: Vec<Degradation>,
}

/// Result of turning one mask into paths.
#[derive(Debug, Clone)]
pub struct MaskVectorization {
    /// Fitted outlines.
    pub paths: Vec<VectorPath>,
    /// Opening step.
    pub refine: StageDiagnostics,
    /// Tracing step.
    pub trace: StageDiagnostics,
    /// Simplification and fitting step.
    pub fit: StageDiagnostics,
    /// Traces force-closed at the step bound.
    pub step_limit_hits: usize,
    /// Curves that missed the fitting tolerance.
    pub unconverged: usize,
}

/// Run one palette color through mask, refine, trace and simplify.
pub fn process_layer<C: Clock>(
    canvas: &RgbaImage,
    entry: &PaletteEntry,
    config: &PipelineConfig,
    clock: &C,
) -> LayerOutput {
    let tolerance = tolerance_for(entry.color, config);

    let start = clock.now();
    let decision = build_mask(canvas, entry, config);
    let (pixel_count, coverage, rejected) = match &decision {
        MaskDecision::Kept(mask) => (mask.pixel_count(), mask.coverage(), false),
        MaskDecision::Rejected {
            pixel_count,
            coverage,
            ..
        } => (*pixel_count, *coverage, true),
    };
    let mask_stage = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Mask {
            tolerance,
            pixel_count,
            coverage,
            rejected,
        },
    };

    let mut diagnostics = LayerDiagnostics {
        color: entry.color,
        index: entry.index,
        mask: mask_stage,
        refine: None,
        trace: None,
        fit: None,
    };

    let mask = match decision {
        MaskDecision::Kept(mask) => mask,
        MaskDecision::Rejected {
            coverage, required, ..
        } => {
            tracing::debug!(color = %entry.color, coverage, required, "mask rejected");
            return LayerOutput {
                layer: None,
                diagnostics,
                degradations: vec![Degradation::MaskRejected {
                    color: entry.color,
                    coverage,
                    required,
                }],
            };
        }
    };

    let vectorized = vectorize_mask(mask, config, clock);

    let mut degradations = Vec::new();
    if vectorized.step_limit_hits > 0 {
        degradations.push(Degradation::TraceStepLimit {
            color: entry.color,
            traces: vectorized.step_limit_hits,
        });
    }
    if vectorized.unconverged > 0 {
        degradations.push(Degradation::ToleranceUnreached {
            color: entry.color,
            curves: vectorized.unconverged,
        });
    }

    diagnostics.refine = Some(vectorized.refine);
    diagnostics.trace = Some(vectorized.trace);
    diagnostics.fit = Some(vectorized.fit);

    tracing::debug!(
        color = %entry.color,
        paths = vectorized.paths.len(),
        "layer vectorized"
    );

    let layer = (!vectorized.paths.is_empty()).then(|| ColorLayer {
        color: entry.color,
        index: entry.index,
        paths: vectorized.paths,
    });

    LayerOutput {
        layer,
        diagnostics,
        degradations,
    }
}

/// Refine, trace and fit a mask.
///
/// Shared by the color layers and the monochrome fallback.
pub fn vectorize_mask<C: Clock>(mask: Mask, config: &PipelineConfig, clock: &C) -> MaskVectorization {
    let start = clock.now();
    let pixels_before = mask.pixel_count();
    let refined = morphology::open(mask, config.morphology_iterations);
    let refine = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Refine {
            iterations: config.morphology_iterations,
            pixels_before,
            pixels_after: refined.pixel_count(),
        },
    };

    let start = clock.now();
    let filter = TraceFilter {
        min_vertices: config.min_vertices,
        minimum_area: u64::from(config.minimum_area),
    };
    let traced = config.contour_tracer.trace(&refined, &filter);
    let total_points: usize = traced.polygons.iter().map(|p| p.len()).sum();
    let trace = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Trace {
            tracer: config.contour_tracer,
            polygons: traced.polygons.len(),
            discarded: traced.discarded,
            step_limit_hits: traced.step_limit_hits,
            total_points,
        },
    };

    let start = clock.now();
    let settings = FitSettings::from(config);
    let paths: Vec<VectorPath> = traced
        .polygons
        .iter()
        .filter_map(|polygon| fit_polygon(polygon, &settings))
        .collect();

    let unconverged: usize = paths.iter().map(VectorPath::unconverged_runs).sum();
    let fit = StageDiagnostics {
        duration: clock.elapsed(&start),
        metrics: StageMetrics::Fit {
            paths: paths.len(),
            points_before: paths.iter().map(VectorPath::original_points).sum(),
            points_after: paths.iter().map(VectorPath::simplified_points).sum(),
            corners: paths.iter().map(VectorPath::corner_count).sum(),
            curves: paths.iter().map(VectorPath::curve_count).sum(),
            unconverged,
            max_error: paths.iter().map(VectorPath::fit_error).fold(0.0, f64::max),
        },
    };

    MaskVectorization {
        paths,
        refine,
        trace,
        fit,
        step_limit_hits: traced.step_limit_hits,
        unconverged,
    }
}
