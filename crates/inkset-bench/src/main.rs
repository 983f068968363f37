//! inkset-bench: CLI tool for separation parameter experimentation and diagnostics.
//!
//! Runs the color separation pipeline on an image file with configurable
//! parameters, printing per-stage diagnostics. Useful for:
//!
//! - Comparing contour tracers (`moore-neighbor` vs `border-following`)
//! - Tuning palette size, color tolerance and fitting tolerance
//! - Checking how budgets trade path count against document size
//! - Confirming that repeated runs produce byte-identical documents
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin inkset-bench -- [OPTIONS] <IMAGE_PATH>
//! ```
//!
//! Set `RUST_LOG=inkset_pipeline=debug` to see stage transitions.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::hash::Hasher;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::builder::RangedU64ValueParser;
use clap::{Parser, ValueEnum};
use inkset_pipeline::{PipelineConfig, PipelineDiagnostics, PixelBuffer, StdClock};
use siphasher::sip::SipHasher13;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Color separation experimentation and diagnostics for inkset.
///
/// Vectorizes an image into a limited-color SVG and prints per-stage
/// timing, counts and degradations.
#[derive(Parser)]
#[command(name = "inkset-bench", version)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// Path to the input image (PNG, JPEG, BMP, WebP).
    image_path: PathBuf,

    /// Maximum palette size (2-10).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MAX_COLORS, value_parser = RangedU64ValueParser::<usize>::new().range(2..=10))]
    max_colors: usize,

    /// Mask tolerance mode.
    #[arg(long, value_enum, default_value_t = CLI_DEFAULT_TOLERANCE_MODE)]
    tolerance_mode: Tolerance,

    /// Base perceptual color tolerance (0-255 scale).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_COLOR_TOLERANCE)]
    color_tolerance: f64,

    /// Bezier fitting tolerance in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_PATH_FITTING_TOLERANCE)]
    path_fitting_tolerance: f64,

    /// Douglas-Peucker simplification tolerance in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_SIMPLIFY_TOLERANCE)]
    simplify_tolerance: f64,

    /// Regions smaller than this many pixels are discarded.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MINIMUM_AREA)]
    minimum_area: u32,

    /// Corner turning angle in degrees (clamped to 30-60).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_CORNER_THRESHOLD_DEGREES)]
    corner_threshold: f64,

    /// Path budget per color layer.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MAX_PATHS_PER_LAYER, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    max_paths_per_layer: usize,

    /// Path budget for the whole document.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MAX_TOTAL_PATHS, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    max_total_paths: usize,

    /// Serialized document size budget in bytes.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MAX_DOCUMENT_BYTES)]
    max_document_bytes: usize,

    /// Seed for k-means++ initialization.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_SEED)]
    seed: u64,

    /// Working resolution (max canvas dimension in pixels).
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_WORKING_RESOLUTION, value_parser = RangedU64ValueParser::<u32>::new().range(1..))]
    working_resolution: u32,

    /// Max dimension of the palette sample in pixels.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_PALETTE_RESOLUTION, value_parser = RangedU64ValueParser::<u32>::new().range(1..))]
    palette_resolution: u32,

    /// Downsample filter (disabled, nearest, triangle, catmull-rom, gaussian, lanczos3).
    #[arg(long, value_enum, default_value_t = CLI_DEFAULT_FILTER)]
    downsample_filter: Filter,

    /// K-means iteration cap.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_KMEANS_MAX_ITERATIONS)]
    kmeans_max_iterations: usize,

    /// Total centroid movement below which k-means stops.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_KMEANS_CONVERGENCE)]
    kmeans_convergence: f64,

    /// Minimum perceptual distance between palette entries.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MIN_PALETTE_DISTANCE)]
    min_palette_distance: f64,

    /// Reserve a black or white palette entry for contrast.
    #[arg(long)]
    force_contrast: bool,

    /// Pixels with alpha below this never count as opaque.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_ALPHA_FLOOR)]
    alpha_floor: u8,

    /// Minimum mask coverage as a fraction of the palette weight.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MASK_SIGNIFICANCE)]
    mask_significance: f64,

    /// Morphological opening iterations.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MORPHOLOGY_ITERATIONS)]
    morphology_iterations: u32,

    /// Boundary tracing algorithm.
    #[arg(long, value_enum, default_value_t = CLI_DEFAULT_TRACER)]
    tracer: Tracer,

    /// Boundary polygons with fewer vertices are dropped.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_MIN_VERTICES)]
    min_vertices: usize,

    /// Bezier grid-search iteration cap.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_BEZIER_MAX_ITERATIONS)]
    bezier_max_iterations: usize,

    /// Decimal places in path data.
    #[arg(long, default_value_t = PipelineConfig::DEFAULT_COORDINATE_PRECISION, value_parser = RangedU64ValueParser::<u8>::new().range(0..=u64::from(PipelineConfig::MAX_COORDINATE_PRECISION)))]
    coordinate_precision: u8,

    /// Worker threads for the per-color fan-out (0 = all cores, 1 = sequential).
    #[arg(long, default_value_t = 0)]
    worker_threads: usize,

    /// Write SVG output to file.
    #[arg(long)]
    svg: Option<PathBuf>,

    /// Number of runs for averaging.
    #[arg(long, default_value_t = 1, value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    runs: usize,

    /// Output diagnostics as JSON instead of human-readable report.
    #[arg(long)]
    json: bool,

    /// Full pipeline config as a JSON string.
    ///
    /// When provided, all other pipeline parameter flags are ignored.
    /// Missing fields take their defaults.
    #[arg(long)]
    config_json: Option<String>,
}

/// Mask tolerance mode selection.
#[derive(Clone, Copy, ValueEnum)]
enum Tolerance {
    /// Same tolerance for every color.
    Fixed,
    /// Widened for dark or strongly saturated colors.
    Adaptive,
}

/// Downsample resampling filter selection.
#[derive(Clone, Copy, ValueEnum)]
enum Filter {
    /// Disabled: skip downsampling regardless of image size.
    Disabled,
    /// Nearest-neighbor (fastest, blocky).
    Nearest,
    /// Bilinear interpolation (fast, decent quality).
    Triangle,
    /// Bicubic Catmull-Rom (moderate, good quality).
    CatmullRom,
    /// Gaussian (moderate, smooth).
    Gaussian,
    /// Lanczos with 3 lobes (slowest, sharpest).
    Lanczos3,
}

/// Contour tracer selection.
#[derive(Clone, Copy, ValueEnum)]
enum Tracer {
    /// Moore-neighbor boundary walk.
    MooreNeighbor,
    /// Suzuki-Abe border following, outer borders only.
    BorderFollowing,
}

const fn tolerance_from_pipeline(mode: inkset_pipeline::ToleranceMode) -> Tolerance {
    match mode {
        inkset_pipeline::ToleranceMode::Fixed => Tolerance::Fixed,
        inkset_pipeline::ToleranceMode::Adaptive => Tolerance::Adaptive,
    }
}

/// Maps a [`inkset_pipeline::DownsampleFilter`] to the local CLI [`Filter`] enum.
const fn filter_from_pipeline(f: inkset_pipeline::DownsampleFilter) -> Filter {
    match f {
        inkset_pipeline::DownsampleFilter::Disabled => Filter::Disabled,
        inkset_pipeline::DownsampleFilter::Nearest => Filter::Nearest,
        inkset_pipeline::DownsampleFilter::Triangle => Filter::Triangle,
        inkset_pipeline::DownsampleFilter::CatmullRom => Filter::CatmullRom,
        inkset_pipeline::DownsampleFilter::Gaussian => Filter::Gaussian,
        inkset_pipeline::DownsampleFilter::Lanczos3 => Filter::Lanczos3,
    }
}

const fn tracer_from_pipeline(kind: inkset_pipeline::ContourTracerKind) -> Tracer {
    match kind {
        inkset_pipeline::ContourTracerKind::MooreNeighbor => Tracer::MooreNeighbor,
        inkset_pipeline::ContourTracerKind::BorderFollowing => Tracer::BorderFollowing,
    }
}

// CLI defaults derived from the pipeline constants so the two cannot
// silently diverge.
const CLI_DEFAULT_TOLERANCE_MODE: Tolerance =
    tolerance_from_pipeline(PipelineConfig::DEFAULT_COLOR_TOLERANCE_MODE);
const CLI_DEFAULT_FILTER: Filter = filter_from_pipeline(PipelineConfig::DEFAULT_DOWNSAMPLE_FILTER);
const CLI_DEFAULT_TRACER: Tracer = tracer_from_pipeline(PipelineConfig::DEFAULT_CONTOUR_TRACER);

/// Build a [`PipelineConfig`] from CLI arguments.
///
/// If `--config-json` is provided, the JSON is parsed directly and all
/// individual parameter flags are ignored.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    if let Some(ref json) = cli.config_json {
        return serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"));
    }

    Ok(PipelineConfig {
        max_colors: cli.max_colors,
        color_tolerance_mode: match cli.tolerance_mode {
            Tolerance::Fixed => inkset_pipeline::ToleranceMode::Fixed,
            Tolerance::Adaptive => inkset_pipeline::ToleranceMode::Adaptive,
        },
        color_tolerance: cli.color_tolerance,
        path_fitting_tolerance: cli.path_fitting_tolerance,
        simplify_tolerance: cli.simplify_tolerance,
        minimum_area: cli.minimum_area,
        corner_threshold_degrees: cli.corner_threshold,
        max_paths_per_layer: cli.max_paths_per_layer,
        max_total_paths: cli.max_total_paths,
        max_document_bytes: cli.max_document_bytes,
        seed: cli.seed,
        working_resolution: cli.working_resolution,
        palette_resolution: cli.palette_resolution,
        downsample_filter: match cli.downsample_filter {
            Filter::Disabled => inkset_pipeline::DownsampleFilter::Disabled,
            Filter::Nearest => inkset_pipeline::DownsampleFilter::Nearest,
            Filter::Triangle => inkset_pipeline::DownsampleFilter::Triangle,
            Filter::CatmullRom => inkset_pipeline::DownsampleFilter::CatmullRom,
            Filter::Gaussian => inkset_pipeline::DownsampleFilter::Gaussian,
            Filter::Lanczos3 => inkset_pipeline::DownsampleFilter::Lanczos3,
        },
        kmeans_max_iterations: cli.kmeans_max_iterations,
        kmeans_convergence: cli.kmeans_convergence,
        min_palette_distance: cli.min_palette_distance,
        force_contrast: cli.force_contrast,
        alpha_floor: cli.alpha_floor,
        mask_significance: cli.mask_significance,
        morphology_iterations: cli.morphology_iterations,
        contour_tracer: match cli.tracer {
            Tracer::MooreNeighbor => inkset_pipeline::ContourTracerKind::MooreNeighbor,
            Tracer::BorderFollowing => inkset_pipeline::ContourTracerKind::BorderFollowing,
        },
        min_vertices: cli.min_vertices,
        bezier_max_iterations: cli.bezier_max_iterations,
        coordinate_precision: cli.coordinate_precision,
        worker_threads: cli.worker_threads,
    })
}

/// Install a `RUST_LOG`-aware subscriber writing to stderr, so stdout
/// stays clean for the report or JSON.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn fingerprint(svg: &str) -> u64 {
    let mut hasher = SipHasher13::new();
    hasher.write(svg.as_bytes());
    hasher.finish()
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("Warning: {e} (values will be clamped)");
    }

    let image_bytes = match std::fs::read(&cli.image_path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Error reading {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    let buffer = match PixelBuffer::from_encoded(&image_bytes) {
        Ok(buffer) => buffer,
        Err(e) => {
            eprintln!("Error decoding {}: {e}", cli.image_path.display());
            return ExitCode::FAILURE;
        }
    };

    eprintln!(
        "Image: {} ({} bytes, {}x{})",
        cli.image_path.display(),
        image_bytes.len(),
        buffer.width(),
        buffer.height(),
    );
    eprintln!("Config: {config:#?}");
    eprintln!("Runs: {}", cli.runs);
    eprintln!();

    let mut all_diagnostics = Vec::with_capacity(cli.runs);
    let mut first_fingerprint = None;
    let mut mismatched_runs = 0usize;

    for run in 0..cli.runs {
        if cli.runs > 1 {
            eprintln!("--- Run {}/{} ---", run + 1, cli.runs);
        }

        let (document, diagnostics) =
            match inkset_pipeline::vectorize_with_diagnostics(&buffer, &config, &StdClock) {
                Ok(result) => result,
                Err(e) => {
                    eprintln!("Pipeline error: {e}");
                    return ExitCode::FAILURE;
                }
            };

        if cli.json {
            match serde_json::to_string_pretty(&diagnostics) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    eprintln!("Error serializing diagnostics: {e}");
                    return ExitCode::FAILURE;
                }
            }
        } else {
            println!("{}", diagnostics.report());
        }

        let print = fingerprint(document.as_str());
        tracing::debug!(run, fingerprint = print, bytes = document.byte_size(), "run finished");
        match first_fingerprint {
            None => first_fingerprint = Some(print),
            Some(expected) if expected != print => {
                mismatched_runs += 1;
                eprintln!("Run {} produced a different document ({print:016x} != {expected:016x})", run + 1);
            }
            Some(_) => {}
        }

        // Write SVG on the first run only.
        if run == 0
            && let Some(ref svg_path) = cli.svg
        {
            match std::fs::write(svg_path, document.as_str()) {
                Ok(()) => {
                    eprintln!(
                        "SVG written to {} ({} bytes, {} paths in {} groups{})",
                        svg_path.display(),
                        document.byte_size(),
                        document.path_count(),
                        document.group_count(),
                        if document.is_fallback() { ", fallback" } else { "" },
                    );
                }
                Err(e) => {
                    eprintln!("Error writing SVG to {}: {e}", svg_path.display());
                }
            }
        }

        all_diagnostics.push(diagnostics);

        if cli.runs > 1 {
            eprintln!();
        }
    }

    if cli.runs > 1 {
        print_multi_run_summary(&all_diagnostics);
        if let Some(print) = first_fingerprint {
            println!();
            if mismatched_runs == 0 {
                println!("Determinism: all {} runs identical (fingerprint {print:016x})", cli.runs);
            } else {
                println!("Determinism: {mismatched_runs} of {} runs differed", cli.runs);
            }
        }
    }

    if mismatched_runs > 0 {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// Function pointer type for extracting a stage duration from diagnostics.
type StageExtractor = fn(&PipelineDiagnostics) -> Option<Duration>;

/// Print aggregated statistics across multiple runs.
#[allow(clippy::cast_precision_loss)]
fn print_multi_run_summary(all_diagnostics: &[PipelineDiagnostics]) {
    debug_assert!(!all_diagnostics.is_empty(), "no diagnostics to summarize");

    println!();
    println!(
        "Summary ({} runs)\n{}",
        all_diagnostics.len(),
        "=".repeat(60),
    );

    if all_diagnostics.is_empty() {
        println!("Warning: no diagnostics to summarize");
        return;
    }

    let durations: Vec<f64> = all_diagnostics
        .iter()
        .map(|d| d.total_duration.as_secs_f64() * 1000.0)
        .collect();

    let min = durations.iter().copied().reduce(f64::min).unwrap_or(0.0);
    let max = durations.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let mean = durations.iter().sum::<f64>() / durations.len() as f64;

    println!("Total duration: min={min:.3}ms  mean={mean:.3}ms  max={max:.3}ms");

    println!();
    println!("{:<24} {:>12}", "Stage", "Mean (ms)");
    println!("{}", "-".repeat(40));

    let stage_extractors: &[(&str, StageExtractor)] = &[
        ("Decode", |d| Some(d.decode.duration)),
        ("Downsample", |d| Some(d.downsample.duration)),
        ("Palette", |d| Some(d.palette.duration)),
        ("Layers", |d| d.layers.as_ref().map(|s| s.duration)),
        ("Assembly", |d| d.assembly.as_ref().map(|s| s.duration)),
        ("Fallback", |d| d.fallback.as_ref().map(|s| s.duration)),
    ];

    for (name, extractor) in stage_extractors {
        let stage_durations: Vec<f64> = all_diagnostics
            .iter()
            .filter_map(extractor)
            .map(|dur| dur.as_secs_f64() * 1000.0)
            .collect();

        if stage_durations.is_empty() {
            continue;
        }

        let stage_mean = stage_durations.iter().sum::<f64>() / stage_durations.len() as f64;
        println!("{name:<24} {stage_mean:>10.3}ms");
    }
}
