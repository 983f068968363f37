//! Boundary polygon to vector path: simplify, find corners, fit curves.
//!
//! 1. Douglas-Peucker reduces the closed ring to its significant vertices.
//! 2. A simplified vertex whose unsigned turning angle exceeds the corner
//!    threshold is a corner.
//! 3. The ring is cut at the corners (or, with fewer than two corners, at
//!    four evenly spaced vertices). A run spanning at least four
//!    simplified vertices becomes one cubic Bezier fitted against the
//!    original boundary points of that stretch; shorter runs become
//!    straight lines through the simplified vertices.

use serde::{Deserialize, Serialize};

use crate::bezier::{CubicBezier, fit_cubic};
use crate::config::PipelineConfig;
use crate::contour::BoundaryPolygon;
use crate::simplify::simplify_indices;
use crate::types::Point;

/// Runs with at least this many simplified vertices get a cubic.
pub const MIN_CURVE_RUN: usize = 4;

/// Anchors used when a ring has fewer than two corners.
const SMOOTH_ANCHORS: usize = 4;

/// One drawing command after the path's start point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Segment {
    /// Straight line to the given point.
    Line(Point),
    /// Cubic Bezier to `to`.
    Cubic {
        /// First control point.
        c1: Point,
        /// Second control point.
        c2: Point,
        /// End point.
        to: Point,
    },
}

impl Segment {
    /// Where this segment ends.
    #[must_use]
    pub const fn end(&self) -> Point {
        match *self {
            Self::Line(p) => p,
            Self::Cubic { to, .. } => to,
        }
    }
}

/// A closed, smoothed outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorPath {
    start: Point,
    segments: Vec<Segment>,
    corner_count: usize,
    fit_error: f64,
    unconverged_runs: usize,
    original_points: usize,
    simplified_points: usize,
}

impl VectorPath {
    /// Closed polygon of straight lines through `points`.
    ///
    /// Returns `None` for an empty slice.
    #[must_use]
    pub fn polygon(points: &[Point]) -> Option<Self> {
        let (&start, rest) = points.split_first()?;
        let mut segments: Vec<Segment> = rest.iter().map(|&p| Segment::Line(p)).collect();
        if rest.last().is_some_and(|&p| p != start) {
            segments.push(Segment::Line(start));
        }
        Some(Self {
            start,
            segments,
            corner_count: points.len(),
            fit_error: 0.0,
            unconverged_runs: 0,
            original_points: points.len(),
            simplified_points: points.len(),
        })
    }

    /// First point of the outline.
    #[must_use]
    pub const fn start(&self) -> Point {
        self.start
    }

    /// Drawing commands; the last one ends at [`start`](Self::start).
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of segments, the assembler's complexity measure.
    #[must_use]
    pub const fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Number of cubic segments.
    #[must_use]
    pub fn curve_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Cubic { .. }))
            .count()
    }

    /// Corners detected on the simplified ring.
    #[must_use]
    pub const fn corner_count(&self) -> usize {
        self.corner_count
    }

    /// Worst mean error among the fitted curves.
    #[must_use]
    pub const fn fit_error(&self) -> f64 {
        self.fit_error
    }

    /// Curves that stopped before reaching the fitting tolerance.
    #[must_use]
    pub const fn unconverged_runs(&self) -> usize {
        self.unconverged_runs
    }

    /// `true` when every curve reached the fitting tolerance.
    #[must_use]
    pub const fn tolerance_reached(&self) -> bool {
        self.unconverged_runs == 0
    }

    /// Boundary points before simplification.
    #[must_use]
    pub const fn original_points(&self) -> usize {
        self.original_points
    }

    /// Vertices kept by simplification.
    #[must_use]
    pub const fn simplified_points(&self) -> usize {
        self.simplified_points
    }

    /// Approximate outline length.
    #[must_use]
    pub fn perimeter(&self) -> f64 {
        let mut from = self.start;
        let mut total = 0.0;
        for segment in &self.segments {
            total += match *segment {
                Segment::Line(to) => from.distance(to),
                Segment::Cubic { c1, c2, to } => CubicBezier {
                    p0: from,
                    c1,
                    c2,
                    p3: to,
                }
                .approximate_length(),
            };
            from = segment.end();
        }
        total
    }
}

/// Tolerances for turning polygons into paths.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitSettings {
    /// Douglas-Peucker tolerance in pixels.
    pub simplify_tolerance: f64,
    /// Turning angle, in radians, above which a vertex is a corner.
    pub corner_threshold: f64,
    /// Target mean error for each cubic.
    pub fitting_tolerance: f64,
    /// Cap on control-point search iterations per cubic.
    pub max_iterations: usize,
}

impl From<&PipelineConfig> for FitSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            simplify_tolerance: config.simplify_tolerance,
            corner_threshold: config.corner_threshold_radians(),
            fitting_tolerance: config.path_fitting_tolerance,
            max_iterations: config.bezier_max_iterations,
        }
    }
}

/// Fit a traced boundary polygon.
#[must_use]
pub fn fit_polygon(polygon: &BoundaryPolygon, settings: &FitSettings) -> Option<VectorPath> {
    fit_ring(polygon.points(), settings)
}

/// Fit a ring of points (closed or not; it is treated as closed).
///
/// Returns `None` only for an empty ring.
#[must_use]
pub fn fit_ring(ring: &[Point], settings: &FitSettings) -> Option<VectorPath> {
    let closed = ring.len() >= 2 && ring.first() == ring.last();
    let unique = if closed { ring.len() - 1 } else { ring.len() };
    if unique == 0 {
        return None;
    }

    let verts: Vec<usize> = simplify_indices(ring, settings.simplify_tolerance)
        .into_iter()
        .filter(|&i| i < unique)
        .collect();
    let m = verts.len();

    if m < 3 {
        let points: Vec<Point> = verts.iter().map(|&i| ring[i]).collect();
        return VectorPath::polygon(&points).map(|path| VectorPath {
            corner_count: 0,
            original_points: ring.len(),
            ..path
        });
    }

    let vertex = |k: usize| ring[verts[k % m]];
    let corners: Vec<usize> = (0..m)
        .filter(|&k| {
            let prev = vertex(k + m - 1);
            let cur = vertex(k);
            let next = vertex(k + 1);
            turning_angle(prev, cur, next) > settings.corner_threshold
        })
        .collect();

    let anchors = if corners.len() >= 2 {
        corners.clone()
    } else {
        let first = corners.first().copied().unwrap_or(0);
        let count = SMOOTH_ANCHORS.min(m);
        (0..count).map(|a| (first + a * m / count) % m).collect()
    };

    let start = vertex(anchors[0]);
    let mut segments = Vec::new();
    let mut fit_error: f64 = 0.0;
    let mut unconverged_runs = 0;

    for (a, &k1) in anchors.iter().enumerate() {
        let k2 = anchors[(a + 1) % anchors.len()];
        let run_len = (k2 + m - k1) % m + 1;

        if run_len >= MIN_CURVE_RUN {
            let stretch = cyclic_slice(ring, unique, verts[k1], verts[k2 % m]);
            let fit = fit_cubic(&stretch, settings.fitting_tolerance, settings.max_iterations);
            fit_error = fit_error.max(fit.error);
            if !fit.converged {
                unconverged_runs += 1;
            }
            segments.push(Segment::Cubic {
                c1: fit.curve.c1,
                c2: fit.curve.c2,
                to: fit.curve.p3,
            });
        } else {
            for step in 1..run_len {
                segments.push(Segment::Line(vertex(k1 + step)));
            }
        }
    }

    Some(VectorPath {
        start,
        segments,
        corner_count: corners.len(),
        fit_error,
        unconverged_runs,
        original_points: ring.len(),
        simplified_points: m,
    })
}

/// Unsigned turning angle at `cur`, in radians `[0, pi]`.
fn turning_angle(prev: Point, cur: Point, next: Point) -> f64 {
    let a = (cur.x - prev.x, cur.y - prev.y);
    let b = (next.x - cur.x, next.y - cur.y);
    let dot = a.0.mul_add(b.0, a.1 * b.1);
    let cross = a.0.mul_add(b.1, -(a.1 * b.0));
    cross.atan2(dot).abs()
}

/// Points `from..=to` of a ring with `unique` distinct points, wrapping
/// past the end when `to <= from`.
fn cyclic_slice(ring: &[Point], unique: usize, from: usize, to: usize) -> Vec<Point> {
    if from < to {
        ring[from..=to].to_vec()
    } else {
        ring[from..unique]
            .iter()
            .chain(&ring[..=to])
            .copied()
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn settings() -> FitSettings {
        FitSettings::from(&PipelineConfig::default())
    }

    /// Pixel-center boundary of an axis-aligned square, closed.
    fn square_ring(x0: f64, y0: f64, side: u32) -> Vec<Point> {
        let s = f64::from(side);
        let mut ring = Vec::new();
        for i in 0..side {
            ring.push(Point::new(x0 + f64::from(i), y0));
        }
        for i in 0..side {
            ring.push(Point::new(x0 + s, y0 + f64::from(i)));
        }
        for i in 0..side {
            ring.push(Point::new(x0 + s - f64::from(i), y0 + s));
        }
        for i in 0..side {
            ring.push(Point::new(x0, y0 + s - f64::from(i)));
        }
        ring.push(Point::new(x0, y0));
        ring
    }

    fn circle_ring(radius: f64, samples: u32) -> Vec<Point> {
        let mut ring: Vec<Point> = (0..samples)
            .map(|i| {
                let a = std::f64::consts::TAU * f64::from(i) / f64::from(samples);
                Point::new(radius.mul_add(a.cos(), 50.0), radius.mul_add(a.sin(), 50.0))
            })
            .collect();
        ring.push(ring[0]);
        ring
    }

    fn closes(path: &VectorPath) -> bool {
        path.segments()
            .last()
            .is_some_and(|s| s.end().distance(path.start()) < 1e-9)
    }

    #[test]
    fn square_has_four_corners_and_four_lines() {
        let path = fit_ring(&square_ring(10.0, 10.0, 40), &settings()).unwrap();
        assert_eq!(path.corner_count(), 4);
        assert_eq!(path.segment_count(), 4);
        assert_eq!(path.curve_count(), 0);
        assert!(closes(&path));
        assert!((path.perimeter() - 160.0).abs() < 1e-9);
    }

    #[test]
    fn circle_becomes_smooth_curves() {
        let ring = circle_ring(40.0, 360);
        let path = fit_ring(&ring, &settings()).unwrap();
        assert!(path.corner_count() < 2);
        assert_eq!(path.curve_count(), SMOOTH_ANCHORS);
        assert!(closes(&path));
        assert!(path.simplified_points() <= ring.len());
        let expected = std::f64::consts::TAU * 40.0;
        assert!((path.perimeter() - expected).abs() / expected < 0.1);
    }

    #[test]
    fn circle_fit_error_is_small() {
        let path = fit_ring(&circle_ring(40.0, 360), &settings()).unwrap();
        assert!(path.fit_error() < 2.0, "error {}", path.fit_error());
    }

    #[test]
    fn unreachable_tolerance_still_returns_path() {
        let strict = FitSettings {
            fitting_tolerance: 0.0,
            max_iterations: 2,
            ..settings()
        };
        let path = fit_ring(&circle_ring(40.0, 360), &strict).unwrap();
        assert!(!path.tolerance_reached());
        assert!(path.unconverged_runs() > 0);
        assert!(closes(&path));
    }

    #[test]
    fn degenerate_ring_becomes_polygon() {
        let ring = vec![
            Point::new(1.0, 1.0),
            Point::new(2.0, 1.0),
            Point::new(1.0, 1.0),
        ];
        let path = fit_ring(&ring, &settings()).unwrap();
        assert!(closes(&path));
        assert_eq!(path.curve_count(), 0);
    }

    #[test]
    fn empty_ring_is_none() {
        assert!(fit_ring(&[], &settings()).is_none());
    }

    #[test]
    fn turning_angle_right_angle() {
        let a = turning_angle(
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
        );
        assert!((a - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        let straight = turning_angle(
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(2.0, 0.0),
        );
        assert!(straight.abs() < 1e-12);
    }

    #[test]
    fn polygon_closes_open_input() {
        let path = VectorPath::polygon(&[
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 3.0),
        ])
        .unwrap();
        assert_eq!(path.segment_count(), 3);
        assert!((path.perimeter() - 12.0).abs() < 1e-12);
    }

    #[test]
    fn cyclic_slice_wraps() {
        let ring: Vec<Point> = (0..5).map(|i| Point::new(f64::from(i), 0.0)).collect();
        let mut closed = ring.clone();
        closed.push(ring[0]);
        let slice = cyclic_slice(&closed, 5, 3, 1);
        let xs: Vec<f64> = slice.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![3.0, 4.0, 0.0, 1.0]);
    }
}
