//! Path simplification using the Ramer-Douglas-Peucker algorithm.
//!
//! Reduces point count in polylines by removing points that are within
//! a given tolerance of the line between their neighbors. Closed rings
//! are split at the point farthest from the start so both halves are
//! simplified as ordinary open runs.
//!
//! Simplification only ever removes points, so the simplified count
//! never exceeds the original.

use crate::types::{Point, Polyline};

/// Simplify a polyline using the Ramer-Douglas-Peucker algorithm.
///
/// Points within `tolerance` pixels of the line between their endpoints
/// are removed. A tolerance of 0.0 preserves all non-collinear points.
/// Closed input stays closed.
#[must_use = "returns the simplified polyline"]
pub fn simplify(polyline: &Polyline, tolerance: f64) -> Polyline {
    let points = polyline.points();
    Polyline::new(
        simplify_indices(points, tolerance)
            .into_iter()
            .map(|i| points[i])
            .collect(),
    )
}

/// Indices of the points Ramer-Douglas-Peucker keeps, in ascending
/// order. The first and last index are always kept.
///
/// When `points` is a closed ring (first equals last) the point farthest
/// from the start is kept as well, since the chord of a closed ring is
/// degenerate.
#[must_use]
pub fn simplify_indices(points: &[Point], tolerance: f64) -> Vec<usize> {
    if points.len() < 3 {
        return (0..points.len()).collect();
    }

    let last = points.len() - 1;
    let mut kept = vec![false; points.len()];
    kept[0] = true;
    kept[last] = true;

    if points[0] == points[last] {
        let far = (1..last)
            .max_by(|&a, &b| {
                points[a]
                    .distance_squared(points[0])
                    .total_cmp(&points[b].distance_squared(points[0]))
            })
            .unwrap_or(last);
        kept[far] = true;
        rdp_recurse(points, 0, far, tolerance, &mut kept);
        rdp_recurse(points, far, last, tolerance, &mut kept);
    } else {
        rdp_recurse(points, 0, last, tolerance, &mut kept);
    }

    kept.iter()
        .enumerate()
        .filter(|&(_, k)| *k)
        .map(|(i, _)| i)
        .collect()
}

/// Recursive step of the Ramer-Douglas-Peucker algorithm.
///
/// Finds the point between `start` and `end` that is farthest from the
/// line segment between them. If that distance exceeds `tolerance`, the
/// point is kept and both sub-segments are processed recursively.
fn rdp_recurse(points: &[Point], start: usize, end: usize, tolerance: f64, kept: &mut [bool]) {
    if end <= start + 1 {
        return;
    }

    let mut max_dist = 0.0;
    let mut max_idx = start;

    for i in (start + 1)..end {
        let d = perpendicular_distance(points[i], points[start], points[end]);
        if d > max_dist {
            max_dist = d;
            max_idx = i;
        }
    }

    if max_dist > tolerance {
        kept[max_idx] = true;
        rdp_recurse(points, start, max_idx, tolerance, kept);
        rdp_recurse(points, max_idx, end, tolerance, kept);
    }
}

/// Perpendicular distance from point `p` to the line defined by `a` and `b`.
///
/// Uses the formula: |cross(b-a, p-a)| / |b-a|.
/// When `a` and `b` coincide, returns the distance from `p` to `a`.
fn perpendicular_distance(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let length_sq = dx.mul_add(dx, dy * dy);

    if length_sq == 0.0 {
        // a and b are the same point.
        return p.distance(a);
    }

    // |cross product| / |line length|
    let cross = dx.mul_add(a.y - p.y, -(dy * (a.x - p.x)));
    cross.abs() / length_sq.sqrt()
}
