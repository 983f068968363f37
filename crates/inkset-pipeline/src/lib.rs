//! inkset-pipeline: raster-to-vector color separation (sans-IO).
//!
//! Turns a pixel buffer into a limited-color SVG document:
//! decode -> downsample -> palette extraction -> per-color
//! {mask -> refine -> trace -> simplify/fit} -> budgeted assembly,
//! with a monochrome fallback whenever color separation yields nothing.
//!
//! This crate has **no I/O**. It operates on in-memory buffers and
//! returns the document as a string. The only failure a caller can see
//! is a source that cannot be turned into a canvas ([`PipelineError`]);
//! everything else degrades and is reported through
//! [`diagnostics::Degradation`] values and `tracing` warnings.

pub mod assemble;
pub mod bezier;
pub mod color;
pub mod config;
pub mod contour;
pub mod decode;
pub mod diagnostics;
pub mod downsample;
pub mod fallback;
pub mod fit;
pub mod layer;
pub mod mask;
pub mod morphology;
pub mod palette;
pub mod pipeline;
pub mod simplify;
pub mod types;
pub mod workers;

pub use assemble::{LayerSummary, SvgDocument};
pub use color::{Color, perceptual_distance};
pub use config::{PipelineConfig, ToleranceMode};
pub use contour::{ContourTracer, ContourTracerKind};
pub use diagnostics::{Clock, Degradation, PipelineDiagnostics, PipelinePhase, StdClock};
pub use downsample::DownsampleFilter;
pub use types::{Dimensions, PipelineError, PixelBuffer, PixelLayout, Point, Polyline};

/// Vectorize `buffer` into an SVG document.
///
/// The configuration is clamped into its supported ranges first. The
/// same buffer, configuration and seed always produce the same document.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`], [`PipelineError::ZeroDimensions`],
/// [`PipelineError::BufferSizeMismatch`] or
/// [`PipelineError::FullyTransparent`] when the buffer cannot be used.
pub fn vectorize(buffer: &PixelBuffer, config: &PipelineConfig) -> Result<SvgDocument, PipelineError> {
    pipeline::run(buffer, config, &StdClock).map(pipeline::Done::into_document)
}

/// Like [`vectorize`] but also returns timing, counts, phases and
/// degradations for the run.
///
/// # Errors
///
/// Same as [`vectorize`].
pub fn vectorize_with_diagnostics<C>(
    buffer: &PixelBuffer,
    config: &PipelineConfig,
    clock: &C,
) -> Result<(SvgDocument, PipelineDiagnostics), PipelineError>
where
    C: Clock + Sync,
{
    pipeline::run_with_diagnostics(buffer, config, clock)
        .map(|(done, diagnostics)| (done.into_document(), diagnostics))
}
