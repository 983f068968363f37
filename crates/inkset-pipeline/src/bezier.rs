//! Cubic Bezier curves and a derivative-free least-error fit.
//!
//! The fit starts with control points at 1/4 and 3/4 of the chord and
//! then searches a 3x3 grid of offsets around each control point (81
//! candidates per iteration). The best candidate is accepted only if it
//! lowers the error; when none does, the grid step is halved. Accepted
//! errors are therefore non-increasing from one iteration to the next.

use serde::{Deserialize, Serialize};

use crate::types::Point;

/// Grid steps smaller than this stop the search.
const MIN_STEP: f64 = 1e-3;

/// Offsets tried along each control-point axis, in units of the step.
const OFFSETS: [f64; 3] = [-1.0, 0.0, 1.0];

/// A cubic Bezier segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CubicBezier {
    /// Start point.
    pub p0: Point,
    /// First control point.
    pub c1: Point,
    /// Second control point.
    pub c2: Point,
    /// End point.
    pub p3: Point,
}

impl CubicBezier {
    /// Curve with control points at 1/4 and 3/4 of the chord.
    #[must_use]
    pub fn from_chord(p0: Point, p3: Point) -> Self {
        Self {
            p0,
            c1: p0.lerp(p3, 0.25),
            c2: p0.lerp(p3, 0.75),
            p3,
        }
    }

    /// Point on the curve at parameter `t` in `0.0..=1.0`.
    #[must_use]
    pub fn eval(&self, t: f64) -> Point {
        let u = 1.0 - t;
        let b0 = u * u * u;
        let b1 = 3.0 * u * u * t;
        let b2 = 3.0 * u * t * t;
        let b3 = t * t * t;
        Point::new(
            b0.mul_add(self.p0.x, b1.mul_add(self.c1.x, b2.mul_add(self.c2.x, b3 * self.p3.x))),
            b0.mul_add(self.p0.y, b1.mul_add(self.c1.y, b2.mul_add(self.c2.y, b3 * self.p3.y))),
        )
    }

    /// Length of the control polygon, an upper bound on arc length.
    #[must_use]
    pub fn control_length(&self) -> f64 {
        self.p0.distance(self.c1) + self.c1.distance(self.c2) + self.c2.distance(self.p3)
    }

    /// Arc length estimate: mean of chord and control polygon lengths.
    #[must_use]
    pub fn approximate_length(&self) -> f64 {
        f64::midpoint(self.p0.distance(self.p3), self.control_length())
    }
}

/// Result of fitting one run of points.
#[derive(Debug, Clone, PartialEq)]
pub struct BezierFit {
    /// Best curve found.
    pub curve: CubicBezier,
    /// Mean distance between each input point and its curve sample.
    pub error: f64,
    /// Search iterations performed.
    pub iterations: usize,
    /// Whether `error` reached the requested tolerance.
    pub converged: bool,
    /// Error after initialization and after every iteration.
    pub error_history: Vec<f64>,
}

/// Mean Euclidean distance between `points[i]` and the curve sampled at
/// the uniform parameter `i / (n - 1)`.
#[must_use]
pub fn fit_error(curve: &CubicBezier, points: &[Point]) -> f64 {
    if points.len() < 2 {
        return points.first().map_or(0.0, |p| p.distance(curve.p0));
    }
    #[allow(clippy::cast_precision_loss)]
    let last = (points.len() - 1) as f64;
    let total: f64 = points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f64 / last;
            p.distance(curve.eval(t))
        })
        .sum();
    #[allow(clippy::cast_precision_loss)]
    let n = points.len() as f64;
    total / n
}

/// Fit one cubic through `points`, anchored at the first and last point.
///
/// Never fails: if `tolerance` is not reached within `max_iterations`,
/// the best curve found so far is returned with `converged == false`.
#[must_use]
pub fn fit_cubic(points: &[Point], tolerance: f64, max_iterations: usize) -> BezierFit {
    let (Some(&p0), Some(&p3)) = (points.first(), points.last()) else {
        let origin = Point::new(0.0, 0.0);
        return BezierFit {
            curve: CubicBezier::from_chord(origin, origin),
            error: 0.0,
            iterations: 0,
            converged: true,
            error_history: vec![0.0],
        };
    };

    let mut curve = CubicBezier::from_chord(p0, p3);
    let mut error = fit_error(&curve, points);
    let mut history = vec![error];

    let span = points
        .iter()
        .map(|p| p.distance(p0))
        .fold(p0.distance(p3), f64::max);
    let mut step = (span / 8.0).max(0.5);
    let mut iterations = 0;

    while error > tolerance && iterations < max_iterations && step >= MIN_STEP {
        iterations += 1;

        let mut best = (curve, error);
        for dx1 in OFFSETS {
            for dy1 in OFFSETS {
                for dx2 in OFFSETS {
                    for dy2 in OFFSETS {
                        let candidate = CubicBezier {
                            c1: Point::new(dx1.mul_add(step, curve.c1.x), dy1.mul_add(step, curve.c1.y)),
                            c2: Point::new(dx2.mul_add(step, curve.c2.x), dy2.mul_add(step, curve.c2.y)),
                            ..curve
                        };
                        let e = fit_error(&candidate, points);
                        if e < best.1 {
                            best = (candidate, e);
                        }
                    }
                }
            }
        }

        if best.1 < error {
            (curve, error) = best;
        } else {
            step /= 2.0;
        }
        history.push(error);
    }

    BezierFit {
        curve,
        error,
        iterations,
        converged: error <= tolerance,
        error_history: history,
    }
}
