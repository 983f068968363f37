//! Incremental pipeline: advance stage-by-stage, inspecting each
//! intermediate result before continuing.
//!
//! ```rust
//! # use inkset_pipeline::{PipelineConfig, PipelineError, PixelBuffer, StdClock};
//! # use inkset_pipeline::pipeline::Pending;
//! # fn run(buffer: &PixelBuffer) -> Result<(), PipelineError> {
//! let config = PipelineConfig::default();
//! let palettized = Pending::new(buffer, &config)
//!     .decode()?
//!     .downsample()
//!     .extract_palette();
//! let done = match palettized.trace_layers(&StdClock) {
//!     Ok(traced) => traced.assemble().unwrap_or_else(|fallback| fallback.resolve(&StdClock)),
//!     Err(fallback) => fallback.resolve(&StdClock),
//! };
//! let svg = done.into_document();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state. Only
//! [`Pending::decode`] can fail with an error. The masking, tracing and
//! assembling transitions return [`Fallback`] instead of their normal
//! successor when they end up with nothing usable, and
//! [`Fallback::resolve`] always produces a [`Done`].
//!
//! Every phase entered and every degradation is recorded on the way and
//! exposed by [`Done`]. [`run_with_diagnostics`] drives the whole chain
//! and times each transition with an injected [`Clock`].

use std::time::Duration;

use image::RgbaImage;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::assemble::{AssemblyReport, Budgets, DocumentInfo, SvgDocument, assemble, render_unbudgeted};
use crate::config::PipelineConfig;
use crate::diagnostics::{
    Clock, Degradation, FallbackReason, LayerDiagnostics, PipelineDiagnostics, PipelinePhase,
    PipelineSummary, StageDiagnostics, StageMetrics,
};
use crate::fallback::{canvas_rectangle, monochrome};
use crate::layer::{ColorLayer, process_layer};
use crate::palette::{PaletteExtraction, PaletteSource, extract_palette, sample_population};
use crate::types::{Dimensions, PipelineError, PixelBuffer, PixelLayout};
use crate::workers::WorkerPool;

/// Phases entered and degradations met during one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunLog {
    phases: Vec<PipelinePhase>,
    degradations: Vec<Degradation>,
}

impl RunLog {
    /// Phases entered, in order.
    #[must_use]
    pub fn phases(&self) -> &[PipelinePhase] {
        &self.phases
    }

    /// Recoverable conditions encountered, in order.
    #[must_use]
    pub fn degradations(&self) -> &[Degradation] {
        &self.degradations
    }

    fn enter(&mut self, phase: PipelinePhase) {
        tracing::debug!(%phase, "entering phase");
        self.phases.push(phase);
    }

    fn degrade(&mut self, degradation: Degradation) {
        degradation.log();
        self.degradations.push(degradation);
    }
}

/// State shared by every stage.
#[derive(Debug)]
struct Context {
    config: PipelineConfig,
    log: RunLog,
    source: Dimensions,
}

/// Outcome of the per-color fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    /// Threads the layers ran on.
    pub worker_threads: usize,
    /// Palette colors processed.
    pub layer_count: usize,
    /// Layers that produced at least one path.
    pub productive_layers: usize,
}

/// What the monochrome fallback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackReport {
    /// Why it ran.
    pub reason: FallbackReason,
    /// Otsu level on luma.
    pub threshold: u8,
    /// Paths traced from the thresholded mask.
    pub traced_paths: usize,
    /// Whether the canvas rectangle was emitted instead.
    pub rectangle: bool,
}

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
#[must_use = "pipeline stages are consumed by advancing; call .decode() to continue"]
pub struct Pending<'a> {
    buffer: &'a PixelBuffer,
    ctx: Context,
}

impl<'a> Pending<'a> {
    /// Start a run. The configuration is clamped into range.
    pub fn new(buffer: &'a PixelBuffer, config: &PipelineConfig) -> Self {
        let mut log = RunLog::default();
        log.enter(PipelinePhase::Init);
        Self {
            buffer,
            ctx: Context {
                config: config.clamped(),
                log,
                source: buffer.dimensions(),
            },
        }
    }

    /// The source buffer.
    #[must_use]
    pub const fn buffer(&self) -> &PixelBuffer {
        self.buffer
    }

    /// Validate the buffer and normalize it to RGBA.
    ///
    /// # Errors
    ///
    /// Returns the [`PipelineError`] produced by [`crate::decode::to_rgba`]
    /// when the buffer is empty, has a zero axis, has the wrong byte
    /// count, or is fully transparent. No later stage can fail.
    pub fn decode(self) -> Result<Decoded, PipelineError> {
        let rgba = crate::decode::to_rgba(self.buffer, self.ctx.config.alpha_floor)?;
        let floor = self.ctx.config.alpha_floor.max(1);
        let opaque = rgba.pixels().filter(|px| px.0[3] >= floor).count();
        let opaque_pixels = u64::try_from(opaque).unwrap_or(u64::MAX);
        tracing::debug!(
            width = rgba.width(),
            height = rgba.height(),
            opaque_pixels,
            "decoded source"
        );
        Ok(Decoded {
            ctx: self.ctx,
            layout: self.buffer.layout(),
            rgba,
            opaque_pixels,
        })
    }
}

// ───────────────────────── Stage 1: Decoded ──────────────────────────

/// Pipeline state after validating the source.
#[must_use = "pipeline stages are consumed by advancing; call .downsample() to continue"]
pub struct Decoded {
    ctx: Context,
    layout: PixelLayout,
    rgba: RgbaImage,
    opaque_pixels: u64,
}

impl Decoded {
    /// The full-resolution RGBA source.
    #[must_use]
    pub const fn rgba(&self) -> &RgbaImage {
        &self.rgba
    }

    /// Pixels at or above the alpha floor.
    #[must_use]
    pub const fn opaque_pixels(&self) -> u64 {
        self.opaque_pixels
    }

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Decode {
            layout: self.layout,
            width: self.rgba.width(),
            height: self.rgba.height(),
            opaque_pixels: self.opaque_pixels,
        }
    }

    /// Build the working canvas and the smaller palette sample.
    pub fn downsample(self) -> Downsampled {
        let config = &self.ctx.config;
        let (canvas, applied) =
            crate::downsample::downsample(&self.rgba, config.working_resolution, config.downsample_filter);
        let (sample, _) = crate::downsample::downsample(
            &self.rgba,
            config.palette_resolution,
            config.downsample_filter,
        );
        tracing::debug!(
            canvas_width = canvas.width(),
            canvas_height = canvas.height(),
            sample_width = sample.width(),
            sample_height = sample.height(),
            applied,
            "downsampled"
        );
        Downsampled {
            ctx: self.ctx,
            canvas,
            sample,
            applied,
        }
    }
}

// ───────────────────────── Stage 2: Downsampled ──────────────────────

/// Pipeline state after resampling.
#[must_use = "pipeline stages are consumed by advancing; call .extract_palette() to continue"]
pub struct Downsampled {
    ctx: Context,
    canvas: RgbaImage,
    sample: RgbaImage,
    applied: bool,
}

impl Downsampled {
    /// The working canvas every mask is built from.
    #[must_use]
    pub const fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    /// The image the palette is sampled from.
    #[must_use]
    pub const fn sample(&self) -> &RgbaImage {
        &self.sample
    }

    fn metrics(&self) -> StageMetrics {
        StageMetrics::Downsample {
            filter: self.ctx.config.downsample_filter,
            canvas_width: self.canvas.width(),
            canvas_height: self.canvas.height(),
            sample_width: self.sample.width(),
            sample_height: self.sample.height(),
            applied: self.applied,
        }
    }

    /// Cluster the palette sample with a PRNG seeded from the config.
    pub fn extract_palette(self) -> Palettized {
        let mut ctx = self.ctx;
        ctx.log.enter(PipelinePhase::Palette);

        let mut rng = StdRng::seed_from_u64(ctx.config.seed);
        let population = sample_population(&self.sample, ctx.config.alpha_floor);
        let extraction = extract_palette(&population, &ctx.config, &mut rng);

        tracing::debug!(
            source = ?extraction.source,
            colors = extraction.palette.len(),
            iterations = extraction.iterations,
            "palette extracted"
        );
        if extraction.source != PaletteSource::Clustered {
            ctx.log.degrade(Degradation::DegenerateInput {
                source: extraction.source,
            });
        }

        Palettized {
            ctx,
            canvas: self.canvas,
            extraction,
        }
    }
}

// ───────────────────────── Stage 3: Palettized ───────────────────────

/// Pipeline state after palette extraction.
#[must_use = "pipeline stages are consumed by advancing; call .trace_layers() to continue"]
pub struct Palettized {
    ctx: Context,
    canvas: RgbaImage,
    extraction: PaletteExtraction,
}

impl Palettized {
    /// The palette and how it was obtained.
    #[must_use]
    pub const fn extraction(&self) -> &PaletteExtraction {
        &self.extraction
    }

    fn metrics(&self) -> StageMetrics {
        let e = &self.extraction;
        StageMetrics::Palette {
            source: e.source,
            sample_count: e.sample_count,
            distinct_colors: e.distinct_colors,
            palette_size: e.palette.len(),
            iterations: e.iterations,
            converged: e.converged,
            reseeded: e.reseeded,
            merged: e.merged,
        }
    }

    /// Run every palette color through mask, refine, trace and simplify
    /// on a per-run worker pool.
    ///
    /// # Errors
    ///
    /// Returns [`Fallback`] (not an error) when every mask was rejected
    /// or no mask produced a path.
    pub fn trace_layers<C>(self, clock: &C) -> Result<Traced, Fallback>
    where
        C: Clock + Sync,
    {
        let mut ctx = self.ctx;
        ctx.log.enter(PipelinePhase::Masking);

        let pool = WorkerPool::new(ctx.config.worker_threads).unwrap_or_else(|reason| {
            ctx.log
                .degrade(Degradation::WorkerPoolUnavailable { reason });
            WorkerPool::inline()
        });

        let canvas = &self.canvas;
        let config = &ctx.config;
        let outputs = pool.map(self.extraction.palette.entries(), |entry| {
            process_layer(canvas, entry, config, clock)
        });

        let mut layers = Vec::new();
        let mut details = Vec::with_capacity(outputs.len());
        let mut any_kept = false;
        for output in outputs {
            any_kept |= output.diagnostics.refine.is_some();
            for degradation in output.degradations {
                ctx.log.degrade(degradation);
            }
            details.push(output.diagnostics);
            layers.extend(output.layer);
        }

        let fanout = FanoutReport {
            worker_threads: pool.threads(),
            layer_count: details.len(),
            productive_layers: layers.len(),
        };
        let palette_size = self.extraction.palette.len();

        if !any_kept {
            return Err(Fallback::new(
                ctx,
                self.canvas,
                FallbackReason::NoMasks,
                palette_size,
                fanout,
                details,
                None,
            ));
        }

        ctx.log.enter(PipelinePhase::Refining);
        ctx.log.enter(PipelinePhase::Tracing);
        if layers.is_empty() {
            return Err(Fallback::new(
                ctx,
                self.canvas,
                FallbackReason::NoPaths,
                palette_size,
                fanout,
                details,
                None,
            ));
        }
        ctx.log.enter(PipelinePhase::Simplifying);

        Ok(Traced {
            ctx,
            canvas: self.canvas,
            palette_size,
            layers,
            details,
            fanout,
        })
    }
}

// ───────────────────────── Stage 4: Traced ───────────────────────────

/// Pipeline state after the per-color fan-out.
#[must_use = "pipeline stages are consumed by advancing; call .assemble() to continue"]
pub struct Traced {
    ctx: Context,
    canvas: RgbaImage,
    palette_size: usize,
    layers: Vec<ColorLayer>,
    details: Vec<LayerDiagnostics>,
    fanout: FanoutReport,
}

impl Traced {
    /// Layers that produced paths, in palette order.
    #[must_use]
    pub fn layers(&self) -> &[ColorLayer] {
        &self.layers
    }

    /// Combine the layers into one budgeted document.
    ///
    /// # Errors
    ///
    /// Returns [`Fallback`] (not an error) when no path survives the
    /// budgets.
    pub fn assemble(self) -> Result<Done, Fallback> {
        let mut ctx = self.ctx;
        ctx.log.enter(PipelinePhase::Assembling);

        let info = DocumentInfo {
            dimensions: Dimensions {
                width: self.canvas.width(),
                height: self.canvas.height(),
            },
            palette_size: self.palette_size,
            fallback: false,
        };
        let assembly = assemble(
            &self.layers,
            &info,
            &Budgets::from(&ctx.config),
            ctx.config.coordinate_precision,
        );
        let report = assembly.report;
        if report.budget_exceeded(ctx.config.coordinate_precision) {
            ctx.log.degrade(Degradation::BudgetExceeded {
                dropped_paths: report.refused_paths + report.emergency_drops,
                precision: report.precision,
            });
        }

        let Some(document) = assembly.document else {
            return Err(Fallback::new(
                ctx,
                self.canvas,
                FallbackReason::EmptyDocument,
                self.palette_size,
                self.fanout,
                self.details,
                Some(report),
            ));
        };

        ctx.log.enter(PipelinePhase::Done);
        Ok(Done {
            ctx,
            document,
            details: self.details,
            fanout: Some(self.fanout),
            assembly: Some(report),
            fallback: None,
        })
    }
}

// ───────────────────────── Fallback ──────────────────────────────────

/// A run whose color separation produced nothing usable.
#[must_use = "call .resolve() to produce the monochrome document"]
pub struct Fallback {
    ctx: Context,
    canvas: RgbaImage,
    reason: FallbackReason,
    palette_size: usize,
    fanout: FanoutReport,
    details: Vec<LayerDiagnostics>,
    assembly: Option<AssemblyReport>,
}

impl Fallback {
    fn new(
        mut ctx: Context,
        canvas: RgbaImage,
        reason: FallbackReason,
        palette_size: usize,
        fanout: FanoutReport,
        details: Vec<LayerDiagnostics>,
        assembly: Option<AssemblyReport>,
    ) -> Self {
        ctx.log.degrade(Degradation::EmptyResult { reason });
        Self {
            ctx,
            canvas,
            reason,
            palette_size,
            fanout,
            details,
            assembly,
        }
    }

    /// Why the fallback was taken.
    #[must_use]
    pub const fn reason(&self) -> FallbackReason {
        self.reason
    }

    /// Palette entries extracted before falling back.
    #[must_use]
    pub const fn palette_size(&self) -> usize {
        self.palette_size
    }

    /// Trace the canvas as a single ink. Never fails.
    pub fn resolve<C: Clock>(self, clock: &C) -> Done {
        let mut ctx = self.ctx;
        ctx.log.enter(PipelinePhase::Fallback);

        let config = &ctx.config;
        let trace = monochrome(&self.canvas, config, clock);
        let traced_paths = trace.layer.paths.len();
        let info = DocumentInfo {
            dimensions: Dimensions {
                width: self.canvas.width(),
                height: self.canvas.height(),
            },
            palette_size: 1,
            fallback: true,
        };

        let assembled = if trace.layer.paths.is_empty() {
            None
        } else {
            assemble(
                std::slice::from_ref(&trace.layer),
                &info,
                &Budgets::from(config),
                config.coordinate_precision,
            )
            .document
        };
        let rectangle = assembled.is_none();
        let document = assembled.unwrap_or_else(|| {
            tracing::debug!("monochrome trace empty; emitting canvas rectangle");
            render_unbudgeted(
                &[canvas_rectangle(&self.canvas, config)],
                &info,
                config.coordinate_precision,
            )
        });

        ctx.log.enter(PipelinePhase::Done);
        Done {
            ctx,
            document,
            details: self.details,
            fanout: Some(self.fanout),
            assembly: self.assembly,
            fallback: Some(FallbackReport {
                reason: self.reason,
                threshold: trace.threshold,
                traced_paths,
                rectangle,
            }),
        }
    }
}

// ───────────────────────── Done ──────────────────────────────────────

/// A finished run.
#[must_use]
pub struct Done {
    ctx: Context,
    document: SvgDocument,
    details: Vec<LayerDiagnostics>,
    fanout: Option<FanoutReport>,
    assembly: Option<AssemblyReport>,
    fallback: Option<FallbackReport>,
}

impl Done {
    /// The produced document.
    #[must_use]
    pub const fn document(&self) -> &SvgDocument {
        &self.document
    }

    /// Consume the run, keeping only the document.
    #[must_use]
    pub fn into_document(self) -> SvgDocument {
        self.document
    }

    /// Phases and degradations.
    #[must_use]
    pub const fn log(&self) -> &RunLog {
        &self.ctx.log
    }

    /// The clamped configuration the run used.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.ctx.config
    }

    /// Source buffer dimensions.
    #[must_use]
    pub const fn source_dimensions(&self) -> Dimensions {
        self.ctx.source
    }

    /// Per-color diagnostics in palette order.
    #[must_use]
    pub fn layer_details(&self) -> &[LayerDiagnostics] {
        &self.details
    }

    /// Fan-out counts.
    #[must_use]
    pub const fn fanout(&self) -> Option<FanoutReport> {
        self.fanout
    }

    /// Color assembly counts, if assembly ran.
    #[must_use]
    pub const fn assembly(&self) -> Option<AssemblyReport> {
        self.assembly
    }

    /// Fallback details, if the fallback produced the document.
    #[must_use]
    pub const fn fallback(&self) -> Option<FallbackReport> {
        self.fallback
    }
}

/// Run the whole chain, resolving any fallback.
///
/// # Errors
///
/// Only source validation can fail; see [`Pending::decode`].
pub fn run<C>(buffer: &PixelBuffer, config: &PipelineConfig, clock: &C) -> Result<Done, PipelineError>
where
    C: Clock + Sync,
{
    let palettized = Pending::new(buffer, config)
        .decode()?
        .downsample()
        .extract_palette();
    Ok(match palettized.trace_layers(clock) {
        Ok(traced) => traced
            .assemble()
            .unwrap_or_else(|fallback| fallback.resolve(clock)),
        Err(fallback) => fallback.resolve(clock),
    })
}

/// Run the whole chain, timing every stage with `clock`.
///
/// # Errors
///
/// Only source validation can fail; see [`Pending::decode`].
pub fn run_with_diagnostics<C>(
    buffer: &PixelBuffer,
    config: &PipelineConfig,
    clock: &C,
) -> Result<(Done, PipelineDiagnostics), PipelineError>
where
    C: Clock + Sync,
{
    let total_start = clock.now();
    let timed = |start: &C::Instant, metrics: StageMetrics| StageDiagnostics {
        duration: clock.elapsed(start),
        metrics,
    };

    let start = clock.now();
    let decoded = Pending::new(buffer, config).decode()?;
    let decode = timed(&start, decoded.metrics());

    let start = clock.now();
    let downsampled = decoded.downsample();
    let downsample = timed(&start, downsampled.metrics());

    let start = clock.now();
    let palettized = downsampled.extract_palette();
    let palette = timed(&start, palettized.metrics());
    let palette_size = palettized.extraction.palette.len();

    let start = clock.now();
    let traced = palettized.trace_layers(clock);
    let layers_duration = clock.elapsed(&start);

    let mut assembly_duration = None;
    let mut fallback_duration = Duration::ZERO;
    let done = match traced {
        Ok(traced) => {
            let start = clock.now();
            let assembled = traced.assemble();
            assembly_duration = Some(clock.elapsed(&start));
            assembled.unwrap_or_else(|fallback| {
                let start = clock.now();
                let done = fallback.resolve(clock);
                fallback_duration = clock.elapsed(&start);
                done
            })
        }
        Err(fallback) => {
            let start = clock.now();
            let done = fallback.resolve(clock);
            fallback_duration = clock.elapsed(&start);
            done
        }
    };

    let layers = done.fanout.map(|f| StageDiagnostics {
        duration: layers_duration,
        metrics: StageMetrics::Layers {
            worker_threads: f.worker_threads,
            layer_count: f.layer_count,
            productive_layers: f.productive_layers,
        },
    });
    let assembly = done
        .assembly
        .zip(assembly_duration)
        .map(|(r, duration)| StageDiagnostics {
            duration,
            metrics: StageMetrics::Assembly {
                candidate_paths: r.candidate_paths,
                admitted_paths: r.admitted_paths,
                refused_paths: r.refused_paths,
                emergency_drops: r.emergency_drops,
                precision: r.precision,
                byte_size: r.byte_size,
            },
        });
    let fallback = done.fallback.map(|f| StageDiagnostics {
        duration: fallback_duration,
        metrics: StageMetrics::Fallback {
            reason: f.reason,
            threshold: f.threshold,
            paths: f.traced_paths,
            rectangle: f.rectangle,
        },
    });

    let document = &done.document;
    let diagnostics = PipelineDiagnostics {
        decode,
        downsample,
        palette,
        layers,
        layer_details: done.details.clone(),
        assembly,
        fallback,
        phases: done.ctx.log.phases.clone(),
        degradations: done.ctx.log.degradations.clone(),
        total_duration: clock.elapsed(&total_start),
        summary: PipelineSummary {
            source_width: done.ctx.source.width,
            source_height: done.ctx.source.height,
            canvas_width: document.dimensions().width,
            canvas_height: document.dimensions().height,
            palette_size,
            group_count: document.group_count(),
            path_count: document.path_count(),
            byte_size: document.byte_size(),
            fallback: document.is_fallback(),
        },
    };

    Ok((done, diagnostics))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use image::Rgba;

    use super::*;
    use crate::diagnostics::StdClock;

    fn two_tone(w: u32, h: u32) -> PixelBuffer {
        PixelBuffer::from_rgba(RgbaImage::from_fn(w, h, |x, y| {
            if (w / 4..3 * w / 4).contains(&x) && (h / 4..3 * h / 4).contains(&y) {
                Rgba([20, 40, 200, 255])
            } else {
                Rgba([250, 250, 250, 255])
            }
        }))
    }

    #[test]
    fn stages_advance_to_done() {
        let buffer = two_tone(60, 40);
        let config = PipelineConfig {
            max_colors: 2,
            ..PipelineConfig::default()
        };
        let decoded = Pending::new(&buffer, &config).decode().unwrap();
        assert_eq!(decoded.opaque_pixels(), 2400);
        let downsampled = decoded.downsample();
        assert_eq!(downsampled.canvas().dimensions(), (60, 40));
        let palettized = downsampled.extract_palette();
        assert_eq!(palettized.extraction().palette.len(), 2);
        let Ok(traced) = palettized.trace_layers(&StdClock) else {
            panic!("two-tone image should not fall back");
        };
        assert_eq!(traced.layers().len(), 2);
        let Ok(done) = traced.assemble() else {
            panic!("default budgets should fit two layers");
        };

        assert_eq!(
            done.log().phases(),
            &[
                PipelinePhase::Init,
                PipelinePhase::Palette,
                PipelinePhase::Masking,
                PipelinePhase::Refining,
                PipelinePhase::Tracing,
                PipelinePhase::Simplifying,
                PipelinePhase::Assembling,
                PipelinePhase::Done,
            ]
        );
        assert!(!done.document().is_fallback());
        assert_eq!(done.document().group_count(), 2);
        assert!(done.fallback().is_none());
    }

    #[test]
    fn decode_failure_is_the_only_error() {
        let buffer = PixelBuffer::new(2, 2, PixelLayout::Rgba8, vec![0; 16]);
        let result = run(&buffer, &PipelineConfig::default(), &StdClock);
        assert!(matches!(result, Err(PipelineError::FullyTransparent)));
    }

    #[test]
    fn all_masks_rejected_falls_back_from_masking() {
        // Two mid-tone inks, neither near black nor near white.
        let buffer = PixelBuffer::from_rgba(RgbaImage::from_fn(40, 40, |x, _| {
            if x < 20 {
                Rgba([200, 40, 40, 255])
            } else {
                Rgba([40, 160, 40, 255])
            }
        }));
        let config = PipelineConfig {
            max_colors: 2,
            minimum_area: u32::MAX,
            ..PipelineConfig::default()
        };
        let palettized = Pending::new(&buffer, &config)
            .decode()
            .unwrap()
            .downsample()
            .extract_palette();
        assert!(
            palettized
                .extraction()
                .palette
                .entries()
                .iter()
                .all(|e| !e.color.is_extreme() && !e.reserved)
        );
        let Err(fallback) = palettized.trace_layers(&StdClock) else {
            panic!("expected fallback");
        };
        assert_eq!(fallback.reason(), FallbackReason::NoMasks);
        let done = fallback.resolve(&StdClock);
        assert!(done.document().is_fallback());
        assert_eq!(done.document().palette_size(), 1);
        assert!(!done.log().phases().contains(&PipelinePhase::Refining));
        assert_eq!(
            done.log()
                .degradations()
                .iter()
                .filter(|d| matches!(d, Degradation::MaskRejected { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn oversized_noise_floor_falls_back_from_tracing() {
        let buffer = two_tone(60, 40);
        let config = PipelineConfig {
            max_colors: 2,
            minimum_area: 1_000_000,
            ..PipelineConfig::default()
        };
        let done = run(&buffer, &config, &StdClock).unwrap();
        assert!(done.document().is_fallback());
        let report = done.fallback().unwrap();
        assert!(report.rectangle, "the fallback's own trace is filtered too");
        assert!(done.log().phases().contains(&PipelinePhase::Fallback));
        assert_eq!(done.log().phases().last(), Some(&PipelinePhase::Done));
        assert!(
            done.log()
                .degradations()
                .iter()
                .any(|d| matches!(d, Degradation::EmptyResult { .. }))
        );
    }

    #[test]
    fn tiny_byte_budget_falls_back_from_assembling() {
        let buffer = two_tone(60, 40);
        let config = PipelineConfig {
            max_colors: 2,
            max_document_bytes: 1,
            ..PipelineConfig::default()
        };
        let done = run(&buffer, &config, &StdClock).unwrap();
        let report = done.fallback().unwrap();
        assert_eq!(report.reason, FallbackReason::EmptyDocument);
        assert!(report.rectangle);
        assert_eq!(done.document().path_count(), 1);
        assert!(
            done.log()
                .degradations()
                .iter()
                .any(|d| matches!(d, Degradation::BudgetExceeded { .. }))
        );
    }

    #[test]
    fn inline_and_pooled_runs_agree() {
        let buffer = two_tone(80, 60);
        let inline = PipelineConfig {
            worker_threads: 1,
            ..PipelineConfig::default()
        };
        let pooled = PipelineConfig {
            worker_threads: 4,
            ..PipelineConfig::default()
        };
        let a = run(&buffer, &inline, &StdClock).unwrap();
        let b = run(&buffer, &pooled, &StdClock).unwrap();
        assert_eq!(a.document().as_str(), b.document().as_str());
        assert_eq!(a.fanout().unwrap().worker_threads, 1);
        assert_eq!(b.fanout().unwrap().worker_threads, 4);
    }

    #[test]
    fn diagnostics_cover_every_stage() {
        let buffer = two_tone(60, 40);
        let (done, diag) =
            run_with_diagnostics(&buffer, &PipelineConfig::default(), &StdClock).unwrap();
        assert_eq!(diag.phases, done.log().phases());
        assert!(diag.layers.is_some());
        assert!(diag.assembly.is_some());
        assert!(diag.fallback.is_none());
        assert_eq!(diag.layer_details.len(), diag.summary.palette_size);
        assert_eq!(diag.summary.path_count, done.document().path_count());
        assert_eq!(diag.summary.source_width, 60);
        assert!(diag.total_duration >= diag.palette.duration);
    }
}
