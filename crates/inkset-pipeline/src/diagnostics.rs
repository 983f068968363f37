//! Pipeline diagnostics: timing, counts, phases and degradations.
//!
//! These diagnostics are permanent instrumentation intended for
//! parameter tuning. [`crate::vectorize_with_diagnostics`] collects them
//! alongside the SVG document.
//!
//! Timestamps come from an injected [`Clock`] so the core never reads
//! the system time on its own. Durations are serialized as fractional
//! seconds (`f64`) for JSON compatibility, since `std::time::Duration`
//! does not implement serde traits.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::contour::ContourTracerKind;
use crate::downsample::DownsampleFilter;
use crate::palette::PaletteSource;
use crate::types::PixelLayout;

/// Source of timestamps for stage timing.
pub trait Clock {
    /// Opaque timestamp type.
    type Instant;

    /// Current timestamp.
    fn now(&self) -> Self::Instant;

    /// Time elapsed since `since`.
    fn elapsed(&self, since: &Self::Instant) -> Duration;
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// States of a pipeline run, in the order they can be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelinePhase {
    /// Source validation and canvas preparation.
    Init,
    /// Palette extraction.
    Palette,
    /// Per-color mask building.
    Masking,
    /// Morphological refinement.
    Refining,
    /// Boundary tracing.
    Tracing,
    /// Simplification and curve fitting.
    Simplifying,
    /// Budgeted SVG assembly.
    Assembling,
    /// Monochrome safety net.
    Fallback,
    /// A document exists.
    Done,
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::Palette => "PALETTE",
            Self::Masking => "MASKING",
            Self::Refining => "REFINING",
            Self::Tracing => "TRACING",
            Self::Simplifying => "SIMPLIFYING",
            Self::Assembling => "ASSEMBLING",
            Self::Fallback => "FALLBACK",
            Self::Done => "DONE",
        };
        f.write_str(name)
    }
}

/// Why the monochrome fallback was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackReason {
    /// Every palette color's mask was rejected.
    NoMasks,
    /// Masks survived but no boundary produced a path.
    NoPaths,
    /// Assembly ended with zero paths.
    EmptyDocument,
}

impl FallbackReason {
    /// Phase in which the fallback edge was taken.
    #[must_use]
    pub const fn phase(self) -> PipelinePhase {
        match self {
            Self::NoMasks => PipelinePhase::Masking,
            Self::NoPaths => PipelinePhase::Tracing,
            Self::EmptyDocument => PipelinePhase::Assembling,
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMasks => f.write_str("no mask survived"),
            Self::NoPaths => f.write_str("no boundary produced a path"),
            Self::EmptyDocument => f.write_str("assembly produced no paths"),
        }
    }
}

/// A recoverable condition the pipeline worked around.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Degradation {
    /// The palette sample was uniform or too small to cluster.
    DegenerateInput {
        /// What was substituted for a clustered palette.
        source: PaletteSource,
    },
    /// A color's mask was too small to matter; the color is skipped.
    MaskRejected {
        /// The skipped color.
        color: Color,
        /// Canvas fraction the mask covered.
        coverage: f64,
        /// Coverage that was required.
        required: f64,
    },
    /// Some curves missed the fitting tolerance; best effort was kept.
    ToleranceUnreached {
        /// Layer color.
        color: Color,
        /// Curves that did not converge.
        curves: usize,
    },
    /// Boundary traces were cut off by the step bound.
    TraceStepLimit {
        /// Layer color.
        color: Color,
        /// Traces force-closed.
        traces: usize,
    },
    /// Assembly hit a budget and shed paths or precision.
    BudgetExceeded {
        /// Paths not admitted or dropped.
        dropped_paths: usize,
        /// Coordinate precision finally used.
        precision: u8,
    },
    /// A stage produced nothing usable; the monochrome fallback ran.
    EmptyResult {
        /// Why.
        reason: FallbackReason,
    },
    /// The worker pool could not be built; layers ran sequentially.
    WorkerPoolUnavailable {
        /// Builder error message.
        reason: String,
    },
}

impl Degradation {
    /// Emit this degradation as a `tracing` warning.
    pub fn log(&self) {
        tracing::warn!(degradation = %self, "pipeline degraded");
    }
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DegenerateInput { source } => write!(f, "degenerate input ({source:?} palette)"),
            Self::MaskRejected {
                color,
                coverage,
                required,
            } => write!(
                f,
                "mask for {color} rejected (coverage {:.3}% < {:.3}%)",
                coverage * 100.0,
                required * 100.0
            ),
            Self::ToleranceUnreached { color, curves } => {
                write!(f, "{curves} curve(s) in {color} missed the fitting tolerance")
            }
            Self::TraceStepLimit { color, traces } => {
                write!(f, "{traces} trace(s) in {color} hit the step bound")
            }
            Self::BudgetExceeded {
                dropped_paths,
                precision,
            } => write!(
                f,
                "budget exceeded: {dropped_paths} path(s) dropped, precision {precision}"
            ),
            Self::EmptyResult { reason } => write!(f, "empty result: {reason}"),
            Self::WorkerPoolUnavailable { reason } => {
                write!(f, "worker pool unavailable: {reason}")
            }
        }
    }
}

/// Diagnostics collected from a single pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    /// Source validation.
    pub decode: StageDiagnostics,
    /// Canvas and palette-sample resampling.
    pub downsample: StageDiagnostics,
    /// Palette extraction.
    pub palette: StageDiagnostics,
    /// Wall time of the per-color fan-out (absent if a fallback happened
    /// before it).
    pub layers: Option<StageDiagnostics>,
    /// Per-color sub-pipeline details, in palette order.
    pub layer_details: Vec<LayerDiagnostics>,
    /// Budgeted assembly of the color layers.
    pub assembly: Option<StageDiagnostics>,
    /// Monochrome fallback, when taken.
    pub fallback: Option<StageDiagnostics>,
    /// Phases entered, in order.
    pub phases: Vec<PipelinePhase>,
    /// Recoverable conditions encountered.
    pub degradations: Vec<Degradation>,
    /// Total wall-clock duration of the run (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
    /// Summary counts across all stages.
    pub summary: PipelineSummary,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Per-color sub-pipeline diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerDiagnostics {
    /// Layer color.
    pub color: Color,
    /// Palette index.
    pub index: usize,
    /// Mask building.
    pub mask: StageDiagnostics,
    /// Opening (absent when the mask was rejected).
    pub refine: Option<StageDiagnostics>,
    /// Boundary tracing (absent when the mask was rejected).
    pub trace: Option<StageDiagnostics>,
    /// Simplification and fitting (absent when the mask was rejected).
    pub fit: Option<StageDiagnostics>,
}

/// Stage-specific metrics that vary by pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Source validation.
    Decode {
        /// Source channel layout.
        layout: PixelLayout,
        /// Source width in pixels.
        width: u32,
        /// Source height in pixels.
        height: u32,
        /// Pixels at or above the alpha floor.
        opaque_pixels: u64,
    },
    /// Resampling.
    Downsample {
        /// Filter used.
        filter: DownsampleFilter,
        /// Working canvas width.
        canvas_width: u32,
        /// Working canvas height.
        canvas_height: u32,
        /// Palette sample width.
        sample_width: u32,
        /// Palette sample height.
        sample_height: u32,
        /// Whether the canvas is smaller than the source.
        applied: bool,
    },
    /// Palette extraction.
    Palette {
        /// Clustered or degenerate.
        source: PaletteSource,
        /// Opaque pixels sampled.
        sample_count: usize,
        /// Distinct colors among the samples.
        distinct_colors: usize,
        /// Entries in the palette.
        palette_size: usize,
        /// Lloyd iterations.
        iterations: usize,
        /// Whether k-means converged.
        converged: bool,
        /// Empty clusters reseeded.
        reseeded: usize,
        /// Close clusters merged.
        merged: usize,
    },
    /// Per-color fan-out.
    Layers {
        /// Threads in the worker pool (1 when running inline).
        worker_threads: usize,
        /// Palette colors processed.
        layer_count: usize,
        /// Layers that produced at least one path.
        productive_layers: usize,
    },
    /// Mask building for one color.
    Mask {
        /// Perceptual tolerance used.
        tolerance: f64,
        /// Foreground pixels.
        pixel_count: u64,
        /// Canvas fraction covered.
        coverage: f64,
        /// Whether the mask was rejected.
        rejected: bool,
    },
    /// Opening for one color.
    Refine {
        /// Opening iterations.
        iterations: u32,
        /// Foreground pixels before.
        pixels_before: u64,
        /// Foreground pixels after.
        pixels_after: u64,
    },
    /// Boundary tracing for one color.
    Trace {
        /// Strategy used.
        tracer: ContourTracerKind,
        /// Polygons kept.
        polygons: usize,
        /// Regions discarded as noise.
        discarded: usize,
        /// Traces force-closed at the step bound.
        step_limit_hits: usize,
        /// Boundary points across kept polygons.
        total_points: usize,
    },
    /// Simplification and fitting for one color.
    Fit {
        /// Paths produced.
        paths: usize,
        /// Boundary points before simplification.
        points_before: usize,
        /// Vertices after simplification.
        points_after: usize,
        /// Corners detected.
        corners: usize,
        /// Cubic segments emitted.
        curves: usize,
        /// Curves that missed the tolerance.
        unconverged: usize,
        /// Worst mean fitting error.
        max_error: f64,
    },
    /// Budgeted assembly.
    Assembly {
        /// Paths offered by the layers.
        candidate_paths: usize,
        /// Paths in the document.
        admitted_paths: usize,
        /// Paths refused by the admission budgets.
        refused_paths: usize,
        /// Paths dropped by the emergency pass.
        emergency_drops: usize,
        /// Coordinate precision finally used.
        precision: u8,
        /// Serialized size.
        byte_size: usize,
    },
    /// Monochrome fallback.
    Fallback {
        /// Why it ran.
        reason: FallbackReason,
        /// Otsu threshold on luma.
        threshold: u8,
        /// Paths traced from the thresholded mask.
        paths: usize,
        /// Whether the canvas rectangle had to be emitted instead.
        rectangle: bool,
    },
}

/// High-level summary counts for the entire run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Source width in pixels.
    pub source_width: u32,
    /// Source height in pixels.
    pub source_height: u32,
    /// Canvas width in pixels.
    pub canvas_width: u32,
    /// Canvas height in pixels.
    pub canvas_height: u32,
    /// Palette entries extracted.
    pub palette_size: usize,
    /// Color groups in the document.
    pub group_count: usize,
    /// Paths in the document.
    pub path_count: usize,
    /// Serialized document size.
    pub byte_size: usize,
    /// Whether the monochrome fallback produced the document.
    pub fallback: bool,
}

impl PipelineDiagnostics {
    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Pipeline Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Source: {}x{}  |  Canvas: {}x{}",
            self.summary.source_width,
            self.summary.source_height,
            self.summary.canvas_width,
            self.summary.canvas_height,
        ));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        let phases: Vec<String> = self.phases.iter().map(ToString::to_string).collect();
        lines.push(format!("Phases: {}", phases.join(" -> ")));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        let mut stages: Vec<(String, &StageDiagnostics)> = vec![
            ("Decode".to_string(), &self.decode),
            ("Downsample".to_string(), &self.downsample),
            ("Palette".to_string(), &self.palette),
        ];
        if let Some(ref layers) = self.layers {
            stages.push(("Layers".to_string(), layers));
        }
        for layer in &self.layer_details {
            let prefix = format!("  [{}] {}", layer.index, layer.color);
            stages.push((format!("{prefix} mask"), &layer.mask));
            for (name, stage) in [
                ("refine", &layer.refine),
                ("trace", &layer.trace),
                ("fit", &layer.fit),
            ] {
                if let Some(stage) = stage {
                    stages.push((format!("{prefix} {name}"), stage));
                }
            }
        }
        if let Some(ref assembly) = self.assembly {
            stages.push(("Assembly".to_string(), assembly));
        }
        if let Some(ref fallback) = self.fallback {
            stages.push(("Fallback".to_string(), fallback));
        }

        for (name, diag) in &stages {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.push(String::new());
        lines.push(format!(
            "Palette: {}  |  Groups: {}  |  Paths: {}  |  Bytes: {}{}",
            self.summary.palette_size,
            self.summary.group_count,
            self.summary.path_count,
            self.summary.byte_size,
            if self.summary.fallback {
                "  |  FALLBACK"
            } else {
                ""
            },
        ));

        if !self.degradations.is_empty() {
            lines.push(String::new());
            lines.push("Degradations:".to_string());
            for d in &self.degradations {
                lines.push(format!("  - {d}"));
            }
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Decode {
            layout,
            width,
            height,
            opaque_pixels,
        } => format!("{layout:?} {width}x{height}, {opaque_pixels} opaque"),
        StageMetrics::Downsample {
            filter,
            canvas_width,
            canvas_height,
            sample_width,
            sample_height,
            applied,
        } => format!(
            "{filter} canvas={canvas_width}x{canvas_height}{} sample={sample_width}x{sample_height}",
            if *applied { " (resampled)" } else { "" },
        ),
        StageMetrics::Palette {
            source,
            sample_count,
            distinct_colors,
            palette_size,
            iterations,
            converged,
            reseeded,
            merged,
        } => format!(
            "{source:?} {palette_size} colors from {sample_count} samples ({distinct_colors} distinct), iters={iterations}{} reseeded={reseeded} merged={merged}",
            if *converged { "" } else { " (cap)" },
        ),
        StageMetrics::Layers {
            worker_threads,
            layer_count,
            productive_layers,
        } => format!("{productive_layers}/{layer_count} layers on {worker_threads} thread(s)"),
        StageMetrics::Mask {
            tolerance,
            pixel_count,
            coverage,
            rejected,
        } => format!(
            "tol={tolerance:.1} {pixel_count} px ({:.1}%){}",
            coverage * 100.0,
            if *rejected { " REJECTED" } else { "" },
        ),
        StageMetrics::Refine {
            iterations,
            pixels_before,
            pixels_after,
        } => format!("x{iterations} {pixels_before}->{pixels_after} px"),
        StageMetrics::Trace {
            tracer,
            polygons,
            discarded,
            step_limit_hits,
            total_points,
        } => format!(
            "{tracer} {polygons} polygons ({discarded} discarded), {total_points} pts{}",
            if *step_limit_hits > 0 {
                format!(", {step_limit_hits} step-limited")
            } else {
                String::new()
            },
        ),
        StageMetrics::Fit {
            paths,
            points_before,
            points_after,
            corners,
            curves,
            unconverged,
            max_error,
        } => format!(
            "{paths} paths, {points_before}->{points_after} pts, {corners} corners, {curves} curves ({unconverged} unconverged), err<={max_error:.2}",
        ),
        StageMetrics::Assembly {
            candidate_paths,
            admitted_paths,
            refused_paths,
            emergency_drops,
            precision,
            byte_size,
        } => format!(
            "{admitted_paths}/{candidate_paths} paths (refused={refused_paths} emergency={emergency_drops}) p={precision} {byte_size} bytes",
        ),
        StageMetrics::Fallback {
            reason,
            threshold,
            paths,
            rectangle,
        } => format!(
            "{reason}; otsu={threshold} paths={paths}{}",
            if *rectangle { " (rectangle)" } else { "" },
        ),
    }
}
