//! Integration tests: whole-pipeline behavior on synthetic images.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use image::{Rgba, RgbaImage};
use inkset_pipeline::diagnostics::{LayerDiagnostics, StageMetrics};
use inkset_pipeline::{
    Color, PipelineConfig, PipelineError, PixelBuffer, PixelLayout, StdClock, perceptual_distance,
    vectorize, vectorize_with_diagnostics,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

fn red_square_on_white() -> PixelBuffer {
    PixelBuffer::from_rgba(RgbaImage::from_fn(400, 400, |x, y| {
        if (100..300).contains(&x) && (100..300).contains(&y) {
            RED
        } else {
            WHITE
        }
    }))
}

fn layer_for(details: &[LayerDiagnostics], near: Color) -> &LayerDiagnostics {
    details
        .iter()
        .min_by(|a, b| {
            perceptual_distance(a.color, near).total_cmp(&perceptual_distance(b.color, near))
        })
        .expect("at least one layer")
}

fn mask_coverage(layer: &LayerDiagnostics) -> f64 {
    match layer.mask.metrics {
        StageMetrics::Mask { coverage, .. } => coverage,
        ref other => panic!("unexpected mask metrics {other:?}"),
    }
}

fn fit_counts(layer: &LayerDiagnostics) -> (usize, usize) {
    match layer.fit.as_ref().map(|f| &f.metrics) {
        Some(StageMetrics::Fit { paths, corners, .. }) => (*paths, *corners),
        other => panic!("unexpected fit metrics {other:?}"),
    }
}

#[test]
fn red_square_on_white_separates_into_two_groups() {
    let config = PipelineConfig {
        max_colors: 2,
        ..PipelineConfig::default()
    };
    let (doc, diag) = vectorize_with_diagnostics(&red_square_on_white(), &config, &StdClock).unwrap();

    assert!(!doc.is_fallback());
    assert_eq!(doc.palette_size(), 2);
    assert_eq!(doc.group_count(), 2);

    let red = Color::new(255, 0, 0);
    let white = Color::new(255, 255, 255);
    let colors: Vec<Color> = doc.layers().iter().map(|l| l.color).collect();
    assert!(colors.iter().any(|&c| perceptual_distance(c, red) < 10.0));
    assert!(colors.iter().any(|&c| perceptual_distance(c, white) < 10.0));

    let red_layer = layer_for(&diag.layer_details, red);
    assert!((mask_coverage(red_layer) - 0.25).abs() < 0.01);
    assert_eq!(fit_counts(red_layer), (1, 4));

    let red_group = doc
        .layers()
        .iter()
        .find(|l| perceptual_distance(l.color, red) < 10.0)
        .unwrap();
    assert_eq!(red_group.path_count, 1);

    let svg = doc.as_str();
    assert!(svg.contains(r#"width="400""#));
    assert!(svg.contains(r#"viewBox="0 0 400 400""#));
    assert!(svg.contains(r#"data-palette-size="2""#));
    assert!(svg.contains(r#"data-fallback="false""#));
    assert_eq!(svg.matches("<g ").count(), 2);
}

#[test]
fn uniform_gray_yields_one_full_canvas_path() {
    let buffer = PixelBuffer::from_rgba(RgbaImage::from_pixel(120, 80, Rgba([128, 128, 128, 255])));
    let (doc, diag) =
        vectorize_with_diagnostics(&buffer, &PipelineConfig::default(), &StdClock).unwrap();

    assert_eq!(diag.summary.palette_size, 1);
    assert_eq!(doc.group_count(), 1);
    assert_eq!(doc.path_count(), 1);
    assert!(!doc.is_fallback());

    let layer = &diag.layer_details[0];
    assert!((mask_coverage(layer) - 1.0).abs() < f64::EPSILON);
    assert_eq!(fit_counts(layer), (1, 4));
    assert!(doc.as_str().contains(r##"fill="#808080""##));
}

#[test]
fn uniform_gray_with_forced_contrast_adds_empty_ink() {
    let buffer = PixelBuffer::from_rgba(RgbaImage::from_pixel(120, 80, Rgba([128, 128, 128, 255])));
    let config = PipelineConfig {
        force_contrast: true,
        ..PipelineConfig::default()
    };
    let (doc, diag) = vectorize_with_diagnostics(&buffer, &config, &StdClock).unwrap();
    assert_eq!(diag.summary.palette_size, 2);
    // The reserved contrast ink has an empty mask, so only gray is drawn.
    assert_eq!(doc.path_count(), 1);
}

#[test]
fn isolated_speckles_are_dropped() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut image = RgbaImage::from_pixel(400, 400, WHITE);
    for i in 0..50u32 {
        let color = Rgba([
            rng.gen_range(0..=150),
            rng.gen_range(0..=150),
            rng.gen_range(0..=150),
            255,
        ]);
        let (x0, y0) = ((i % 10) * 38 + 12, (i / 10) * 76 + 20);
        for dy in 0..2 {
            for dx in 0..2 {
                image.put_pixel(x0 + dx, y0 + dy, color);
            }
        }
    }

    // Sample the palette at full resolution so speckles keep their colors.
    let config = PipelineConfig {
        palette_resolution: 400,
        ..PipelineConfig::default()
    };
    let doc = vectorize(&PixelBuffer::from_rgba(image), &config).unwrap();
    assert!(!doc.is_fallback());
    assert_eq!(doc.path_count(), 1, "only the paper outline survives");
    for layer in doc.layers() {
        assert!(
            perceptual_distance(layer.color, Color::new(255, 255, 255)) < 10.0,
            "speckle color {} reached the document",
            layer.color
        );
    }
}

#[test]
fn fully_transparent_buffer_is_an_error() {
    let buffer = PixelBuffer::new(64, 64, PixelLayout::Rgba8, vec![0; 64 * 64 * 4]);
    let err = vectorize(&buffer, &PipelineConfig::default()).unwrap_err();
    assert!(matches!(err, PipelineError::FullyTransparent));
}

#[test]
fn faint_alpha_below_floor_is_transparent() {
    let buffer = PixelBuffer::from_rgba(RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 40])));
    assert!(matches!(
        vectorize(&buffer, &PipelineConfig::default()),
        Err(PipelineError::FullyTransparent)
    ));
}

fn busy_image(seed: u64) -> PixelBuffer {
    let mut rng = StdRng::seed_from_u64(seed);
    let inks = [
        Rgba([230, 60, 40, 255]),
        Rgba([40, 90, 200, 255]),
        Rgba([250, 200, 40, 255]),
        Rgba([30, 30, 30, 255]),
    ];
    let mut image = RgbaImage::from_pixel(240, 180, Rgba([245, 240, 230, 255]));
    for _ in 0..60 {
        let ink = inks[rng.gen_range(0..inks.len())];
        let (cx, cy) = (rng.gen_range(0..240i32), rng.gen_range(0..180i32));
        let r = rng.gen_range(4..18i32);
        for y in (cy - r).max(0)..(cy + r).min(180) {
            for x in (cx - r).max(0)..(cx + r).min(240) {
                if (x - cx).pow(2) + (y - cy).pow(2) <= r * r {
                    image.put_pixel(x.unsigned_abs(), y.unsigned_abs(), ink);
                }
            }
        }
    }
    PixelBuffer::from_rgba(image)
}

#[test]
fn identical_runs_are_topologically_equivalent() {
    let buffer = busy_image(3);
    let config = PipelineConfig::default();
    let a = vectorize(&buffer, &config).unwrap();
    let b = vectorize(&buffer, &config).unwrap();

    assert_eq!(a.layers(), b.layers());
    assert_eq!(a.path_count(), b.path_count());
    assert_eq!(a.as_str(), b.as_str());
}

#[test]
fn palette_respects_bound_and_separation() {
    let config = PipelineConfig {
        max_colors: 3,
        ..PipelineConfig::default()
    };
    let (_, diag) = vectorize_with_diagnostics(&busy_image(11), &config, &StdClock).unwrap();
    let colors: Vec<Color> = diag.layer_details.iter().map(|l| l.color).collect();
    assert!(!colors.is_empty() && colors.len() <= 3);
    for (i, &a) in colors.iter().enumerate() {
        for &b in &colors[i + 1..] {
            assert!(perceptual_distance(a, b) >= config.min_palette_distance);
        }
    }
}

#[test]
fn budgets_hold_or_pipeline_falls_back() {
    let buffer = busy_image(5);
    for (per_layer, total, bytes) in [(3, 5, 1 << 20), (400, 1500, 4000), (1, 2, 600), (400, 1500, 10)] {
        let config = PipelineConfig {
            max_paths_per_layer: per_layer,
            max_total_paths: total,
            max_document_bytes: bytes,
            ..PipelineConfig::default()
        };
        let doc = vectorize(&buffer, &config).unwrap();
        if doc.is_fallback() {
            assert!(doc.path_count() >= 1);
            continue;
        }
        assert!(doc.path_count() <= total);
        assert!(doc.layers().iter().all(|l| l.path_count <= per_layer));
        assert!(doc.byte_size() <= bytes, "{} > {bytes}", doc.byte_size());
    }
}

#[test]
fn border_following_separates_red_square_on_white() {
    let config = PipelineConfig {
        max_colors: 2,
        contour_tracer: inkset_pipeline::ContourTracerKind::BorderFollowing,
        ..PipelineConfig::default()
    };
    let doc = vectorize(&red_square_on_white(), &config).unwrap();
    assert_eq!(doc.group_count(), 2);
    assert_eq!(doc.path_count(), 2);
}
